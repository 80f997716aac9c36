//! Decouples task registration from the host's hot path: `register` pushes
//! to an unbounded channel and returns immediately; a single dedicated
//! thread drains it into the Store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::store::Store;
use crate::value::Arguments;

const POLL_TIMEOUT: Duration = Duration::from_secs(2);

struct Registration {
    function_module: String,
    function_name: String,
    schedule: Option<DateTime<Utc>>,
    crontab: String,
    uuid: String,
    arguments: Arguments,
}

/// Non-blocking front door to `Store::register_task`. Construct with
/// [`Registrator::start`] for the normal background-thread mode, or
/// [`Registrator::blocking`] when the Store's `blocking_mode` setting is on.
pub struct Registrator {
    sender: Option<Sender<Registration>>,
    store: Arc<Store>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Registrator {
    /// Starts the background registrator thread.
    pub fn start(store: Arc<Store>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_store = Arc::clone(&store);
        let thread_shutdown = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("autocron-registrator".into())
            .spawn(move || run(thread_store, receiver, thread_shutdown))
            .expect("failed to spawn registrator thread");
        Registrator {
            sender: Some(sender),
            store,
            shutdown,
            thread: Some(thread),
        }
    }

    /// No background thread; every `register` call is synchronous.
    pub fn blocking(store: Arc<Store>) -> Self {
        Registrator {
            sender: None,
            store,
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &self,
        function_module: &str,
        function_name: &str,
        schedule: Option<DateTime<Utc>>,
        crontab: &str,
        uuid: &str,
        arguments: Arguments,
    ) -> Result<()> {
        match &self.sender {
            Some(sender) => {
                let registration = Registration {
                    function_module: function_module.to_string(),
                    function_name: function_name.to_string(),
                    schedule,
                    crontab: crontab.to_string(),
                    uuid: uuid.to_string(),
                    arguments,
                };
                // An unbounded channel's send only fails if the receiver
                // (the registrator thread) is gone; fall through to a
                // synchronous write rather than silently dropping the task.
                if let Err(mpsc::SendError(registration)) = sender.send(registration) {
                    return self.store.register_task(
                        &registration.function_module,
                        &registration.function_name,
                        registration.schedule,
                        &registration.crontab,
                        &registration.uuid,
                        &registration.arguments,
                    );
                }
                Ok(())
            }
            None => self.store.register_task(function_module, function_name, schedule, crontab, uuid, &arguments),
        }
    }

    /// Drains pending registrations, then joins the background thread.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        drop(self.sender.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(store: Arc<Store>, receiver: Receiver<Registration>, shutdown: Arc<AtomicBool>) {
    loop {
        match receiver.recv_timeout(POLL_TIMEOUT) {
            Ok(registration) => {
                if let Err(err) = store.register_task(
                    &registration.function_module,
                    &registration.function_name,
                    registration.schedule,
                    &registration.crontab,
                    &registration.uuid,
                    &registration.arguments,
                ) {
                    tracing::error!(error = %err, "failed to register task");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
