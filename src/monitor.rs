//! Supervises the worker pool for one host process. Runs as the
//! `autocron-monitor` binary: one per host, elected via
//! [`crate::store::Store::acquire_monitor_lock`]. Watches the host's pid for
//! liveness and restarts any worker that exits unexpectedly.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::sibling_binary;
use crate::error::Result;
use crate::process::{self, ShutdownFlag};
use crate::store::Store;

const WORKER_START_DELAY: Duration = Duration::from_millis(20);

pub struct Monitor {
    store: Arc<Store>,
    db_path: PathBuf,
    main_pid: u32,
    pid: u32,
    workers: Vec<Child>,
}

impl Monitor {
    pub fn new(store: Arc<Store>, db_path: PathBuf, main_pid: u32) -> Self {
        Monitor {
            store,
            db_path,
            main_pid,
            pid: std::process::id(),
            workers: Vec::new(),
        }
    }

    /// Runs until the shutdown flag is set or the host process disappears,
    /// then terminates every worker and tears down the database.
    pub async fn run(&mut self, shutdown: ShutdownFlag) -> Result<()> {
        self.top_up_workers().await?;

        loop {
            if shutdown.is_set() {
                tracing::info!("monitor shutting down on signal");
                break;
            }
            if !process::is_process_alive(self.main_pid) {
                tracing::warn!(pid = self.main_pid, "host process is gone, tearing down");
                break;
            }
            self.reap_dead_workers();
            self.top_up_workers().await?;
            let poll_interval = Duration::from_secs_f64(self.store.monitor_idle_time() as f64);
            tokio::time::sleep(poll_interval).await;
        }

        self.terminate_all_workers();
        self.store.tear_down_database()
    }

    /// Drops any worker child that has already exited, logging a warning
    /// so a crash loop is visible without taking the monitor down with it.
    fn reap_dead_workers(&mut self) {
        self.workers.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                tracing::warn!(pid = child.id(), %status, "worker exited, will be replaced");
                let _ = self.store.decrement_running_workers(child.id());
                false
            }
            Ok(None) => true,
            Err(err) => {
                tracing::error!(error = %err, "failed to poll worker status");
                true
            }
        });
    }

    async fn top_up_workers(&mut self) -> Result<()> {
        let target = self.store.max_workers().max(1);
        while (self.workers.len() as u32) < target {
            let child = spawn_worker(&self.db_path, self.pid)?;
            self.workers.push(child);
            tokio::time::sleep(WORKER_START_DELAY).await;
        }
        Ok(())
    }

    fn terminate_all_workers(&mut self) {
        for child in &mut self.workers {
            terminate(child);
        }
        for child in &mut self.workers {
            let _ = child.wait();
        }
    }
}

fn spawn_worker(db_path: &Path, monitor_pid: u32) -> Result<Child> {
    let worker_bin = sibling_binary("autocron-worker")?;
    let child = Command::new(worker_bin)
        .arg(format!("--dbfile={}", db_path.display()))
        .arg(format!("--monitorpid={monitor_pid}"))
        .stdin(Stdio::null())
        .spawn()?;
    tracing::info!(pid = child.id(), "spawned worker");
    Ok(child)
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    unsafe {
        libc::kill(child.id() as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
}
