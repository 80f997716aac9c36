//! Shared logging bootstrap for the host process and every sibling binary.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the global `tracing` subscriber. Safe to call once per
/// process; calling it a second time is a logic error in the caller, not
/// guarded against here since each binary calls it exactly once in `main`.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_line_number(true))
        .init();
}
