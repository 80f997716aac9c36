//! Host-process lifecycle integration: acquires monitor ownership, spawns
//! the Monitor as a child process, starts the Registrator, and installs
//! signal handlers that tear everything down gracefully.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use crate::error::Result;
use crate::registrator::Registrator;
use crate::store::Store;
use crate::value::Arguments;

const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(200);

static SIGNAL_ENGINE: OnceLock<Mutex<Weak<Engine>>> = OnceLock::new();
static TERM_SIGNAL: AtomicI32 = AtomicI32::new(0);
static CHLD_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Process-level entry point for a host application. One `Engine` per host
/// process; constructed explicitly, never a global singleton.
pub struct Engine {
    store: Arc<Store>,
    registrator: Mutex<Option<Registrator>>,
    monitor: Mutex<Option<Child>>,
    started: AtomicBool,
}

impl Engine {
    pub fn new(store: Arc<Store>) -> Self {
        Engine {
            store,
            registrator: Mutex::new(None),
            monitor: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Starts the monitor if this process wins the monitor election and the
    /// configuration allows it. Returns `true` iff a Monitor child was
    /// spawned by this call; `false` covers every refusal case described in
    /// the component design (autocron_lock set, re-entrant worker pid,
    /// lock already held by another host). In every non-autocron-lock case
    /// the Registrator is still started so the host can enqueue work.
    pub fn start(self: &Arc<Self>, db_path: impl AsRef<Path>, workers: Option<u32>) -> Result<bool> {
        self.store.init_database(db_path.as_ref())?;

        if self.store.autocron_lock() {
            tracing::info!("autocron_lock set, refusing to start");
            return Ok(false);
        }

        let self_pid = std::process::id();
        if self.store.is_worker_pid(self_pid)? {
            tracing::warn!(pid = self_pid, "process pid is a registered worker pid, refusing to start");
            return Ok(false);
        }

        if let Some(workers) = workers {
            let mut settings = self.store.get_settings()?;
            settings.max_workers = workers;
            self.store.update_settings(&settings)?;
        }

        let acquired = self.store.acquire_monitor_lock()?;
        if acquired {
            let child = spawn_monitor(db_path.as_ref(), self_pid)?;
            *self.monitor.lock().unwrap() = Some(child);
        } else {
            tracing::info!("monitor lock already held by another host process");
        }

        let registrator = if self.store.blocking_mode() {
            Registrator::blocking(Arc::clone(&self.store))
        } else {
            Registrator::start(Arc::clone(&self.store))
        };
        *self.registrator.lock().unwrap() = Some(registrator);
        self.started.store(true, Ordering::SeqCst);
        self.install_signal_handlers();
        Ok(acquired)
    }

    /// Registers this `Engine` as the target of SIGINT/SIGTERM/SIGCHLD and
    /// spawns a background thread that reacts to them: a termination signal
    /// calls `stop()`, restores the signal's original disposition, and
    /// re-raises it; SIGCHLD calls `reap_monitor()`. Only async-signal-safe
    /// work (storing an integer) happens inside the actual OS handler; the
    /// background thread does the rest.
    fn install_signal_handlers(self: &Arc<Self>) {
        let slot = SIGNAL_ENGINE.get_or_init(|| Mutex::new(Weak::new()));
        *slot.lock().unwrap() = Arc::downgrade(self);
        install_os_handlers();
        std::thread::Builder::new()
            .name("autocron-engine-signals".into())
            .spawn(watch_signals)
            .expect("failed to spawn signal-watcher thread");
    }

    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &self,
        function_module: &str,
        function_name: &str,
        schedule: Option<chrono::DateTime<chrono::Utc>>,
        crontab: &str,
        uuid: &str,
        arguments: Arguments,
    ) -> Result<()> {
        match self.registrator.lock().unwrap().as_ref() {
            Some(registrator) => registrator.register(function_module, function_name, schedule, crontab, uuid, arguments),
            None => self.store.register_task(function_module, function_name, schedule, crontab, uuid, &arguments),
        }
    }

    /// Sends the Monitor child a termination signal, drains and stops the
    /// Registrator, then tears down the database.
    pub fn stop(&self) -> Result<()> {
        if let Some(mut child) = self.monitor.lock().unwrap().take() {
            terminate_child(&mut child);
        }
        if let Some(registrator) = self.registrator.lock().unwrap().take() {
            registrator.shutdown();
        }
        self.store.tear_down_database()
    }

    /// Reaps the Monitor child if it has exited, preventing zombie state.
    /// Intended to be called from a SIGCHLD handler.
    pub fn reap_monitor(&self) {
        if let Some(child) = self.monitor.lock().unwrap().as_mut() {
            let _ = child.try_wait();
        }
    }
}

fn spawn_monitor(db_path: &Path, host_pid: u32) -> Result<Child> {
    let monitor_bin = sibling_binary("autocron-monitor")?;
    let child = Command::new(monitor_bin)
        .arg(format!("--dbfile={}", db_path.display()))
        .arg(format!("--mainpid={host_pid}"))
        .stdin(Stdio::null())
        .spawn()?;
    tracing::info!(pid = child.id(), "spawned monitor");
    Ok(child)
}

/// Resolves a sibling binary relative to the host's own executable path,
/// falling back to a `PATH` lookup via `which`.
pub fn sibling_binary(name: &str) -> Result<PathBuf> {
    if let Ok(current) = std::env::current_exe() {
        if let Some(dir) = current.parent() {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    which::which(name).map_err(|_| crate::error::AutocronError::Config(format!("sibling binary {name} not found")))
}

#[cfg(unix)]
fn terminate_child(child: &mut Child) {
    unsafe {
        libc::kill(child.id() as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_child(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(unix)]
fn install_os_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_term_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_term_signal as libc::sighandler_t);
        libc::signal(libc::SIGCHLD, handle_chld_signal as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_os_handlers() {}

#[cfg(unix)]
extern "C" fn handle_term_signal(signum: i32) {
    TERM_SIGNAL.store(signum, Ordering::SeqCst);
}

#[cfg(unix)]
extern "C" fn handle_chld_signal(_signum: i32) {
    CHLD_RECEIVED.store(true, Ordering::SeqCst);
}

fn current_engine() -> Option<Arc<Engine>> {
    SIGNAL_ENGINE.get().and_then(|slot| slot.lock().unwrap().upgrade())
}

/// Polls the flags the OS handlers set. A termination signal calls `stop()`,
/// restores the signal's original (default) disposition, and re-raises it so
/// the process actually terminates with the expected signal; SIGCHLD calls
/// `reap_monitor()` and the loop continues.
fn watch_signals() {
    loop {
        if CHLD_RECEIVED.swap(false, Ordering::SeqCst) {
            if let Some(engine) = current_engine() {
                engine.reap_monitor();
            }
        }

        let signum = TERM_SIGNAL.swap(0, Ordering::SeqCst);
        if signum != 0 {
            if let Some(engine) = current_engine() {
                if let Err(err) = engine.stop() {
                    tracing::error!(error = %err, "engine stop failed during signal shutdown");
                }
            }
            #[cfg(unix)]
            unsafe {
                libc::signal(signum, libc::SIG_DFL);
                libc::raise(signum);
            }
            return;
        }

        std::thread::sleep(SIGNAL_POLL_INTERVAL);
    }
}
