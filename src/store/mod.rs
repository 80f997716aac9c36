//! The sole mediator of persistent state. All other components talk to the
//! Store; it never calls back into them. Every public method is wrapped by
//! [`retry::with_retry`] so transient SQLite busy/locked errors are retried
//! transparently rather than surfacing to the caller.

mod model;
mod retry;
mod schema;

pub use model::{ResultRow, ResultStatus, Settings, Task, TaskStatus};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::Result;
use crate::value::Arguments;

#[derive(Debug, Clone)]
struct CachedSettings {
    autocron_lock: bool,
    monitor_lock: bool,
    monitor_idle_time: u32,
    max_workers: u32,
    worker_idle_time: u32,
    result_ttl: u32,
    blocking_mode: bool,
}

impl From<&Settings> for CachedSettings {
    fn from(s: &Settings) -> Self {
        CachedSettings {
            autocron_lock: s.autocron_lock,
            monitor_lock: s.monitor_lock,
            monitor_idle_time: s.monitor_idle_time,
            max_workers: s.max_workers,
            worker_idle_time: s.worker_idle_time,
            result_ttl: s.result_ttl,
            blocking_mode: s.blocking_mode,
        }
    }
}

#[derive(Debug, Clone)]
enum StoreState {
    /// No `init_database` call has happened yet; registrations (typically
    /// crontasks discovered at load time) are written to a transient
    /// pre-registration database.
    Uninitialized,
    Open { path: PathBuf, temporary: bool },
}

/// Persistence handle for one SQLite database file. Cheap to construct;
/// cloning a `Store` does not clone the underlying file, only the handle
/// (wrap in `Arc` to share across the Registrator thread and the host).
pub struct Store {
    state: Mutex<StoreState>,
    cached: RwLock<Option<CachedSettings>>,
    accept_registrations: AtomicBool,
}

impl Store {
    pub fn new() -> Self {
        Store {
            state: Mutex::new(StoreState::Uninitialized),
            cached: RwLock::new(None),
            accept_registrations: AtomicBool::new(true),
        }
    }

    /// Workers set this to `false` at start-up so that functions invoked
    /// inside a task do not try to re-register themselves from within the
    /// worker process.
    pub fn set_accept_registrations(&self, accept: bool) {
        self.accept_registrations.store(accept, Ordering::SeqCst);
    }

    fn accept_registrations(&self) -> bool {
        self.accept_registrations.load(Ordering::SeqCst)
    }

    fn current_path(&self) -> PathBuf {
        match &*self.state.lock().unwrap() {
            StoreState::Uninitialized => unreachable!("current_path called before any path exists"),
            StoreState::Open { path, .. } => path.clone(),
        }
    }

    fn open_connection(&self) -> rusqlite::Result<Connection> {
        let path = self.current_path();
        Connection::open(path)
    }

    fn cached_settings(&self) -> CachedSettings {
        self.cached
            .read()
            .unwrap()
            .clone()
            .expect("cached settings read before init_database")
    }

    pub fn max_workers(&self) -> u32 {
        self.cached_settings().max_workers
    }

    pub fn monitor_idle_time(&self) -> u32 {
        self.cached_settings().monitor_idle_time
    }

    pub fn worker_idle_time(&self) -> u32 {
        self.cached_settings().worker_idle_time
    }

    pub fn autocron_lock(&self) -> bool {
        self.cached_settings().autocron_lock
    }

    pub fn blocking_mode(&self) -> bool {
        self.cached_settings().blocking_mode
    }

    /// Ensures a pre-registration database exists and returns its path,
    /// transitioning `Uninitialized` -> `Open { temporary: true }`.
    fn ensure_writable_path(&self) -> Result<PathBuf> {
        let mut guard = self.state.lock().unwrap();
        match &*guard {
            StoreState::Open { path, .. } => Ok(path.clone()),
            StoreState::Uninitialized => {
                let path = std::env::temp_dir().join(format!(
                    "{}{}.db",
                    schema::TEMPORARY_PREFIX,
                    Uuid::new_v4()
                ));
                let conn = Connection::open(&path)?;
                schema::create_tables(&conn)?;
                *guard = StoreState::Open { path: path.clone(), temporary: true };
                Ok(path)
            }
        }
    }

    /// Opens or creates the SQLite file at `path`. Idempotent: a second call
    /// with the same real path is a no-op; a call following pre-registration
    /// migrates the temporary database's tasks and deletes the temp file.
    pub fn init_database(&self, path: impl AsRef<Path>) -> Result<()> {
        let target = path.as_ref().to_path_buf();
        retry::with_retry(|| self.init_database_once(&target))
    }

    fn init_database_once(&self, target: &Path) -> rusqlite::Result<()> {
        let mut migrated_tasks = Vec::new();
        {
            let mut guard = self.state.lock().unwrap();
            match &*guard {
                StoreState::Open { path, temporary: false } if path == target => {
                    return Ok(());
                }
                StoreState::Open { path, temporary: true } => {
                    let old_conn = Connection::open(path)?;
                    migrated_tasks = select_all_tasks(&old_conn)?;
                    drop(old_conn);
                    let _ = std::fs::remove_file(path);
                }
                _ => {}
            }
            *guard = StoreState::Open { path: target.to_path_buf(), temporary: false };
        }

        let conn = self.open_connection()?;
        conn.execute("BEGIN EXCLUSIVE", [])?;
        let result = (|| -> rusqlite::Result<()> {
            schema::create_tables(&conn)?;
            let settings = match schema::read_settings(&conn)? {
                Some(s) => s,
                None => {
                    let defaults = Settings::default();
                    schema::insert_default_settings(&conn, &defaults)?;
                    defaults
                }
            };
            for mut task in migrated_tasks.drain(..) {
                task.rowid = 0;
                insert_task(&conn, &task)?;
            }
            // at-least-once recovery: a PROCESSING row left over from a
            // previous run did not finish; give it back to the pool.
            conn.execute(
                "UPDATE task SET status = ?1 WHERE status = ?2",
                params![TaskStatus::Waiting.as_i64(), TaskStatus::Processing.as_i64()],
            )?;
            *self.cached.write().unwrap() = Some(CachedSettings::from(&settings));
            Ok(())
        })();
        match result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                Ok(())
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(err)
            }
        }
    }

    /// Stores a callable in the task table. If `crontab` is non-empty and a
    /// row with the same `(module, name)` already exists, returns without
    /// inserting (deduplicates crontasks). If `uuid` is non-empty, also
    /// inserts a matching Result row in `WAITING` state.
    #[allow(clippy::too_many_arguments)]
    pub fn register_task(
        &self,
        function_module: &str,
        function_name: &str,
        schedule: Option<DateTime<Utc>>,
        crontab: &str,
        uuid: &str,
        arguments: &Arguments,
    ) -> Result<()> {
        if !self.accept_registrations() {
            return Ok(());
        }
        self.ensure_writable_path()?;
        let schedule = schedule.unwrap_or_else(Utc::now);
        let encoded = arguments.encode()?;
        let result_ttl = self.cached.read().unwrap().as_ref().map(|c| c.result_ttl).unwrap_or(1800);
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.execute("BEGIN EXCLUSIVE", [])?;
            let outcome = (|| -> rusqlite::Result<()> {
                if !crontab.is_empty() {
                    let exists: Option<i64> = conn
                        .query_row(
                            "SELECT rowid FROM task WHERE function_module = ?1 AND function_name = ?2 AND crontab != ''",
                            params![function_module, function_name],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if exists.is_some() {
                        return Ok(());
                    }
                }
                conn.execute(
                    "INSERT INTO task (uuid, schedule, status, crontab, function_module, function_name, function_arguments)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        uuid,
                        schema::format_instant(schedule),
                        TaskStatus::Waiting.as_i64(),
                        crontab,
                        function_module,
                        function_name,
                        encoded,
                    ],
                )?;
                if !uuid.is_empty() {
                    let ttl = Utc::now() + ChronoDuration::seconds(result_ttl as i64);
                    conn.execute(
                        "INSERT INTO result (uuid, status, function_module, function_name, function_arguments, function_result, error_message, ttl)
                         VALUES (?1, ?2, ?3, ?4, ?5, x'', '', ?6)",
                        params![
                            uuid,
                            ResultStatus::Waiting.as_i64(),
                            function_module,
                            function_name,
                            encoded,
                            schema::format_instant(ttl),
                        ],
                    )?;
                }
                Ok(())
            })();
            match outcome {
                Ok(()) => {
                    conn.execute("COMMIT", [])?;
                    Ok(())
                }
                Err(err) => {
                    let _ = conn.execute("ROLLBACK", []);
                    Err(err)
                }
            }
        })
    }

    /// Atomically claims the next due task: crontasks first, then any other
    /// waiting task whose `schedule` has arrived. The `WAITING -> PROCESSING`
    /// write happens inside the same exclusive transaction as the read,
    /// guaranteeing at-most-one worker per task.
    pub fn get_next_task(&self) -> Result<Option<Task>> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.execute("BEGIN EXCLUSIVE", [])?;
            let outcome = (|| -> rusqlite::Result<Option<Task>> {
                let now = schema::format_instant(Utc::now());
                let waiting = TaskStatus::Waiting.as_i64();
                let mut stmt = conn.prepare(
                    "SELECT rowid, * FROM task WHERE status = ?1 AND crontab != '' AND schedule <= ?2
                     ORDER BY schedule ASC LIMIT 1",
                )?;
                let mut task = stmt
                    .query_row(params![waiting, now], schema::task_from_row)
                    .optional()?;
                if task.is_none() {
                    let mut stmt = conn.prepare(
                        "SELECT rowid, * FROM task WHERE status = ?1 AND schedule <= ?2
                         ORDER BY schedule ASC LIMIT 1",
                    )?;
                    task = stmt.query_row(params![waiting, now], schema::task_from_row).optional()?;
                }
                if let Some(t) = &task {
                    conn.execute(
                        "UPDATE task SET status = ?1 WHERE rowid = ?2",
                        params![TaskStatus::Processing.as_i64(), t.rowid],
                    )?;
                }
                Ok(task)
            })();
            match outcome {
                Ok(task) => {
                    conn.execute("COMMIT", [])?;
                    Ok(task)
                }
                Err(err) => {
                    let _ = conn.execute("ROLLBACK", []);
                    Err(err)
                }
            }
        })
    }

    /// Reschedules a crontask: sets a new `schedule` and returns it to `WAITING`.
    pub fn update_task_schedule(&self, task: &Task, new_schedule: DateTime<Utc>) -> Result<()> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.execute(
                "UPDATE task SET schedule = ?1, status = ?2 WHERE rowid = ?3",
                params![
                    schema::format_instant(new_schedule),
                    TaskStatus::Waiting.as_i64(),
                    task.rowid,
                ],
            )?;
            Ok(())
        })
    }

    /// Removes a completed, non-cron task by rowid.
    pub fn delete_task(&self, task: &Task) -> Result<()> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.execute("DELETE FROM task WHERE rowid = ?1", params![task.rowid])?;
            Ok(())
        })
    }

    pub fn count_tasks(&self) -> Result<u64> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.query_row("SELECT COUNT(*) FROM task", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
        })
    }

    pub fn get_tasks(&self) -> Result<Vec<Task>> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            select_all_tasks(&conn)
        })
    }

    pub fn count_results(&self) -> Result<u64> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.query_row("SELECT COUNT(*) FROM result", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
        })
    }

    pub fn get_results(&self) -> Result<Vec<ResultRow>> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            let mut stmt = conn.prepare("SELECT rowid, * FROM result")?;
            let rows = stmt.query_map([], schema::result_from_row)?;
            rows.collect()
        })
    }

    pub fn get_result_by_uuid(&self, uuid: &str) -> Result<Option<ResultRow>> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.query_row(
                "SELECT rowid, * FROM result WHERE uuid = ?1",
                params![uuid],
                schema::result_from_row,
            )
            .optional()
        })
    }

    /// Updates the stored outcome for a delayed task's result row.
    /// `status` becomes `READY` iff `error_message` is empty, else `ERROR`.
    pub fn update_result(
        &self,
        uuid: &str,
        result: &serde_json::Value,
        error_message: &str,
        ttl_override: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let encoded = crate::value::encode_result(result)?;
        let status = if error_message.is_empty() {
            ResultStatus::Ready
        } else {
            ResultStatus::Error
        };
        let default_ttl_secs = self.cached.read().unwrap().as_ref().map(|c| c.result_ttl).unwrap_or(1800);
        let ttl = ttl_override.unwrap_or_else(|| Utc::now() + ChronoDuration::seconds(default_ttl_secs as i64));
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.execute(
                "UPDATE result SET function_result = ?1, error_message = ?2, status = ?3, ttl = ?4
                 WHERE uuid = ?5",
                params![encoded, error_message, status.as_i64(), schema::format_instant(ttl), uuid],
            )?;
            Ok(())
        })
    }

    /// Deletes all results whose outcome has landed and whose `ttl` has expired.
    pub fn delete_outdated_results(&self) -> Result<()> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.execute(
                "DELETE FROM result WHERE status != ?1 AND ttl <= ?2",
                params![ResultStatus::Waiting.as_i64(), schema::format_instant(Utc::now())],
            )?;
            Ok(())
        })
    }

    /// Tries to become the monitor master. Returns `true` iff the lock flag
    /// transitioned `false -> true` under this call.
    pub fn acquire_monitor_lock(&self) -> Result<bool> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.execute("BEGIN EXCLUSIVE", [])?;
            let outcome = (|| -> rusqlite::Result<bool> {
                let mut settings = schema::read_settings(&conn)?.unwrap_or_default();
                if settings.monitor_lock {
                    return Ok(false);
                }
                settings.monitor_lock = true;
                schema::update_settings(&conn, &settings)?;
                Ok(true)
            })();
            match outcome {
                Ok(acquired) => {
                    conn.execute("COMMIT", [])?;
                    Ok(acquired)
                }
                Err(err) => {
                    let _ = conn.execute("ROLLBACK", []);
                    Err(err)
                }
            }
        })
    }

    pub fn set_monitor_lock(&self, value: bool) -> Result<()> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            let mut settings = schema::read_settings(&conn)?.unwrap_or_default();
            settings.monitor_lock = value;
            schema::update_settings(&conn, &settings)
        })
    }

    pub fn increment_running_workers(&self, pid: u32) -> Result<()> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.execute("BEGIN EXCLUSIVE", [])?;
            let outcome = (|| -> rusqlite::Result<()> {
                let mut settings = schema::read_settings(&conn)?.unwrap_or_default();
                let mut pids = settings.worker_pid_list();
                pids.push(pid);
                settings.worker_pids = pids.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",");
                settings.running_workers = pids.len() as u32;
                schema::update_settings(&conn, &settings)
            })();
            match outcome {
                Ok(()) => {
                    conn.execute("COMMIT", [])?;
                    Ok(())
                }
                Err(err) => {
                    let _ = conn.execute("ROLLBACK", []);
                    Err(err)
                }
            }
        })
    }

    pub fn decrement_running_workers(&self, pid: u32) -> Result<()> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.execute("BEGIN EXCLUSIVE", [])?;
            let outcome = (|| -> rusqlite::Result<()> {
                let mut settings = schema::read_settings(&conn)?.unwrap_or_default();
                let mut pids = settings.worker_pid_list();
                if let Some(pos) = pids.iter().position(|p| *p == pid) {
                    pids.remove(pos);
                    settings.worker_pids = pids.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",");
                    settings.running_workers = pids.len() as u32;
                    schema::update_settings(&conn, &settings)?;
                }
                Ok(())
            })();
            match outcome {
                Ok(()) => {
                    conn.execute("COMMIT", [])?;
                    Ok(())
                }
                Err(err) => {
                    let _ = conn.execute("ROLLBACK", []);
                    Err(err)
                }
            }
        })
    }

    pub fn is_worker_pid(&self, pid: u32) -> Result<bool> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            let settings = schema::read_settings(&conn)?.unwrap_or_default();
            Ok(settings.worker_pid_list().contains(&pid))
        })
    }

    pub fn get_settings(&self) -> Result<Settings> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            Ok(schema::read_settings(&conn)?.unwrap_or_default())
        })
    }

    pub fn update_settings(&self, settings: &Settings) -> Result<()> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            schema::update_settings(&conn, settings)
        })?;
        *self.cached.write().unwrap() = Some(CachedSettings::from(settings));
        Ok(())
    }

    /// Clears `monitor_lock`, zeroes the worker bookkeeping, deletes every
    /// crontask, and recovers any still-`PROCESSING` row to `WAITING`.
    /// Called by the Engine on host shutdown and by the Monitor when it
    /// detects the host is gone.
    pub fn tear_down_database(&self) -> Result<()> {
        retry::with_retry(|| {
            let conn = self.open_connection()?;
            conn.execute("BEGIN EXCLUSIVE", [])?;
            let outcome = (|| -> rusqlite::Result<()> {
                let mut settings = schema::read_settings(&conn)?.unwrap_or_default();
                settings.monitor_lock = false;
                settings.running_workers = 0;
                settings.worker_pids = String::new();
                schema::update_settings(&conn, &settings)?;
                conn.execute("DELETE FROM task WHERE crontab != ''", [])?;
                conn.execute(
                    "UPDATE task SET status = ?1 WHERE status = ?2",
                    params![TaskStatus::Waiting.as_i64(), TaskStatus::Processing.as_i64()],
                )?;
                Ok(())
            })();
            match outcome {
                Ok(()) => {
                    conn.execute("COMMIT", [])?;
                    Ok(())
                }
                Err(err) => {
                    let _ = conn.execute("ROLLBACK", []);
                    Err(err)
                }
            }
        })
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

fn select_all_tasks(conn: &Connection) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare("SELECT rowid, * FROM task")?;
    let rows = stmt.query_map([], schema::task_from_row)?;
    rows.collect()
}

fn insert_task(conn: &Connection, task: &Task) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO task (uuid, schedule, status, crontab, function_module, function_name, function_arguments)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            task.uuid,
            schema::format_instant(task.schedule),
            task.status.as_i64(),
            task.crontab,
            task.function_module,
            task.function_name,
            task.function_arguments,
        ],
    )?;
    Ok(())
}
