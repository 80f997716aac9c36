use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::store::model::{ResultRow, ResultStatus, Settings, Task, TaskStatus};

pub const TEMPORARY_PREFIX: &str = ".temp-";

pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS task (
            uuid TEXT NOT NULL DEFAULT '',
            schedule TEXT NOT NULL,
            status INTEGER NOT NULL,
            crontab TEXT NOT NULL DEFAULT '',
            function_module TEXT NOT NULL,
            function_name TEXT NOT NULL,
            function_arguments BLOB NOT NULL
        );
        CREATE TABLE IF NOT EXISTS result (
            uuid TEXT NOT NULL UNIQUE,
            status INTEGER NOT NULL,
            function_module TEXT NOT NULL,
            function_name TEXT NOT NULL,
            function_arguments BLOB NOT NULL,
            function_result BLOB NOT NULL DEFAULT x'',
            error_message TEXT NOT NULL DEFAULT '',
            ttl TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS settings (
            max_workers INTEGER NOT NULL,
            running_workers INTEGER NOT NULL,
            worker_pids TEXT NOT NULL,
            monitor_lock INTEGER NOT NULL,
            autocron_lock INTEGER NOT NULL,
            blocking_mode INTEGER NOT NULL,
            monitor_idle_time INTEGER NOT NULL,
            worker_idle_time INTEGER NOT NULL,
            result_ttl INTEGER NOT NULL
        );
        ",
    )
}

pub fn read_settings(conn: &Connection) -> rusqlite::Result<Option<Settings>> {
    conn.query_row(
        "SELECT max_workers, running_workers, worker_pids, monitor_lock, autocron_lock,
                blocking_mode, monitor_idle_time, worker_idle_time, result_ttl
         FROM settings LIMIT 1",
        [],
        |row| {
            Ok(Settings {
                max_workers: row.get::<_, i64>(0)? as u32,
                running_workers: row.get::<_, i64>(1)? as u32,
                worker_pids: row.get(2)?,
                monitor_lock: row.get(3)?,
                autocron_lock: row.get(4)?,
                blocking_mode: row.get(5)?,
                monitor_idle_time: row.get::<_, i64>(6)? as u32,
                worker_idle_time: row.get::<_, i64>(7)? as u32,
                result_ttl: row.get::<_, i64>(8)? as u32,
            })
        },
    )
    .optional()
}

pub fn insert_default_settings(conn: &Connection, settings: &Settings) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings (max_workers, running_workers, worker_pids, monitor_lock,
            autocron_lock, blocking_mode, monitor_idle_time, worker_idle_time, result_ttl)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            settings.max_workers,
            settings.running_workers,
            settings.worker_pids,
            settings.monitor_lock,
            settings.autocron_lock,
            settings.blocking_mode,
            settings.monitor_idle_time,
            settings.worker_idle_time,
            settings.result_ttl,
        ],
    )?;
    Ok(())
}

pub fn update_settings(conn: &Connection, settings: &Settings) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE settings SET max_workers = ?1, running_workers = ?2, worker_pids = ?3,
            monitor_lock = ?4, autocron_lock = ?5, blocking_mode = ?6,
            monitor_idle_time = ?7, worker_idle_time = ?8, result_ttl = ?9",
        params![
            settings.max_workers,
            settings.running_workers,
            settings.worker_pids,
            settings.monitor_lock,
            settings.autocron_lock,
            settings.blocking_mode,
            settings.monitor_idle_time,
            settings.worker_idle_time,
            settings.result_ttl,
        ],
    )?;
    Ok(())
}

pub fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        rowid: row.get("rowid")?,
        uuid: row.get("uuid")?,
        schedule: parse_instant(&row.get::<_, String>("schedule")?),
        status: TaskStatus::from_i64(row.get("status")?),
        crontab: row.get("crontab")?,
        function_module: row.get("function_module")?,
        function_name: row.get("function_name")?,
        function_arguments: row.get("function_arguments")?,
    })
}

pub fn result_from_row(row: &Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok(ResultRow {
        rowid: row.get("rowid")?,
        uuid: row.get("uuid")?,
        status: ResultStatus::from_i64(row.get("status")?),
        function_module: row.get("function_module")?,
        function_name: row.get("function_name")?,
        function_arguments: row.get("function_arguments")?,
        function_result: row.get("function_result")?,
        error_message: row.get("error_message")?,
        ttl: parse_instant(&row.get::<_, String>("ttl")?),
    })
}

/// Instants are encoded as RFC 3339 strings at the Store boundary; no
/// framework-supplied type adapters.
pub fn format_instant(instant: chrono::DateTime<chrono::Utc>) -> String {
    instant.to_rfc3339()
}

fn parse_instant(raw: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}
