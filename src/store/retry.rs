//! Retry-on-busy wrapper. SQLite write contention surfaces as a transient
//! "database busy" error; every public Store method runs its body through
//! [`with_retry`] so contention never becomes an observable failure until
//! the retry budget is exhausted.

use std::thread;
use std::time::Duration;

use rusqlite::ErrorCode;

use crate::error::{AutocronError, Result};

const MAX_RETRIES: u32 = 100;
const INITIAL_DELAY: Duration = Duration::from_millis(10);
const DELAY_INCREMENT_STEPS: u32 = 20;
const DELAY_INCREMENT_FACTOR: f64 = 1.5;

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(ffi_err, _)
            if matches!(ffi_err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Runs `op` and retries it on transient SQLite busy/locked errors, with a
/// delay that starts at 10ms and is multiplied by 1.5 every 20 retries.
/// Surfaces the original error, wrapped, once the retry budget is exhausted.
pub fn with_retry<T>(mut op: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
    let mut delay = INITIAL_DELAY;
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_busy(&err) && attempt < MAX_RETRIES => {
                attempt += 1;
                if attempt % DELAY_INCREMENT_STEPS == 0 {
                    delay = delay.mul_f64(DELAY_INCREMENT_FACTOR);
                }
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "store busy, retrying");
                thread::sleep(delay);
            }
            Err(err) if is_busy(&err) => {
                return Err(AutocronError::StoreBusy {
                    retries: attempt,
                    source: err,
                });
            }
            Err(err) => return Err(AutocronError::from(err)),
        }
    }
}
