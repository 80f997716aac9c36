//! Claims and executes tasks. Runs as the `autocron-worker` binary: one of
//! `Settings.max_workers` per host, spawned and supervised by the Monitor.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::Result;
use crate::process::{self, ShutdownFlag};
use crate::registry::Registry;
use crate::scheduler::CronScheduler;
use crate::store::{Store, Task};
use crate::value::Arguments;

pub struct Worker {
    store: Arc<Store>,
    registry: Arc<Registry>,
    pid: u32,
    monitor_pid: Option<u32>,
}

impl Worker {
    pub fn new(store: Arc<Store>, registry: Arc<Registry>, monitor_pid: Option<u32>) -> Self {
        Worker {
            store,
            registry,
            pid: std::process::id(),
            monitor_pid,
        }
    }

    /// Registers this pid, runs the dispatch loop until shutdown or the
    /// monitor disappears, then unregisters regardless of how the loop exited.
    pub async fn run(&self, shutdown: ShutdownFlag) -> Result<()> {
        // A task function that calls back into the engine to register more
        // work would otherwise deadlock against this same process's dispatch
        // loop; workers never accept registrations.
        self.store.set_accept_registrations(false);
        self.store.increment_running_workers(self.pid)?;
        let outcome = self.dispatch_loop(shutdown).await;
        let _ = self.store.decrement_running_workers(self.pid);
        outcome
    }

    async fn dispatch_loop(&self, shutdown: ShutdownFlag) -> Result<()> {
        loop {
            if shutdown.is_set() {
                tracing::info!(pid = self.pid, "worker shutting down on signal");
                return Ok(());
            }
            if let Some(monitor_pid) = self.monitor_pid {
                if !process::is_process_alive(monitor_pid) {
                    tracing::warn!(pid = self.pid, monitor_pid, "monitor is gone, stopping");
                    return Ok(());
                }
            }
            match self.store.get_next_task()? {
                Some(task) => self.handle_task(task)?,
                None => {
                    self.store.delete_outdated_results()?;
                    self.idle_sleep(&shutdown).await;
                }
            }
        }
    }

    fn handle_task(&self, task: Task) -> Result<()> {
        let outcome = match Arguments::decode(&task.function_arguments) {
            Ok(arguments) => self.registry.invoke(&task.function_module, &task.function_name, &arguments),
            Err(err) => Err(format!("failed to decode task arguments: {err}")),
        };
        self.postprocess_task(&task, outcome)
    }

    fn postprocess_task(&self, task: &Task, outcome: std::result::Result<serde_json::Value, String>) -> Result<()> {
        if task.is_delayed() {
            match &outcome {
                Ok(value) => self.store.update_result(&task.uuid, value, "", None)?,
                Err(message) => {
                    tracing::error!(uuid = %task.uuid, error = %message, "task failed");
                    self.store.update_result(&task.uuid, &serde_json::Value::Null, message, None)?;
                }
            }
        } else if let Err(message) = &outcome {
            tracing::error!(function = %task.function_name, error = %message, "task failed");
        }

        if task.is_crontask() {
            let scheduler = CronScheduler::new(&task.crontab)?;
            let next = scheduler.next_fire_after(Utc::now())?;
            self.store.update_task_schedule(task, next)
        } else {
            self.store.delete_task(task)
        }
    }

    /// The configured idle time, or the adaptive formula when it is 0: more
    /// workers means each one polls less eagerly.
    fn idle_time_secs(&self) -> f64 {
        let configured = self.store.worker_idle_time();
        if configured > 0 {
            return configured as f64;
        }
        let workers = self.store.max_workers() as f64;
        (1.0 + 0.025 * (workers - 8.0)).max(1.0)
    }

    /// Sleeps in 1-second slices so a shutdown signal wakes the worker
    /// promptly instead of after the full idle interval.
    async fn idle_sleep(&self, shutdown: &ShutdownFlag) {
        let total = self.idle_time_secs();
        let mut waited = 0.0;
        while waited < total {
            if shutdown.is_set() {
                return;
            }
            let step = (total - waited).min(1.0);
            tokio::time::sleep(Duration::from_secs_f64(step)).await;
            waited += step;
        }
    }
}
