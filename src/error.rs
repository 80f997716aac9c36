use thiserror::Error;

/// Library-wide error type. Binaries convert this into `anyhow::Error` at
/// their boundary via `?` and attach `.context(...)` as needed.
#[derive(Debug, Error)]
pub enum AutocronError {
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("store retry budget exhausted after {retries} attempts: {source}")]
    StoreBusy {
        retries: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid crontab {crontab:?}: {reason}")]
    Scheduler { crontab: String, reason: String },

    #[error("next_fire_after exceeded iteration cap for crontab {0:?}")]
    SchedulerOverflow(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("value encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("no function registered for {module}::{name}")]
    UnknownFunction { module: String, name: String },
}

pub type Result<T> = std::result::Result<T, AutocronError>;
