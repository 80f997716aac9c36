//! Shared process-supervision primitives used by the Monitor and Worker
//! binaries: liveness probing via signal 0 and a shutdown flag driven by
//! tokio's signal handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Sends signal 0 to `pid`: this delivers no signal but fails if the
/// process no longer exists, making it a liveness probe.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}

/// A flag flipped once SIGINT or SIGTERM arrives, polled at loop boundaries.
#[derive(Clone)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        ShutdownFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Spawns a task that waits for SIGINT or SIGTERM and sets the flag,
    /// returning immediately. Intended to be called once from a binary's
    /// `#[tokio::main]` before entering its dispatch loop.
    #[cfg(unix)]
    pub fn watch(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            flag.set();
        });
    }

    #[cfg(not(unix))]
    pub fn watch(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            flag.set();
        });
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}
