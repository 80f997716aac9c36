//! End-to-end scenarios against a real (tempdir) SQLite file, simulating
//! multi-process coordination by holding more than one `Store` handle open
//! against the same file within a single test process.

use std::sync::Arc;

use autocron::scheduler::CronScheduler;
use autocron::store::{Store, TaskStatus};
use autocron::{Arguments, Registry};
use chrono::{TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

fn temp_db_path() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("autocron.db");
    (dir, path)
}

#[test]
fn delayed_add_runs_to_completion() {
    let (_dir, path) = temp_db_path();
    let store = Store::new();
    store.init_database(&path).unwrap();

    let uuid = Uuid::new_v4().to_string();
    let arguments = Arguments::new(vec![json!(30), json!(12)], Default::default());
    store.register_task("math", "add", None, "", &uuid, &arguments).unwrap();

    assert_eq!(store.count_tasks().unwrap(), 1);
    assert_eq!(store.count_results().unwrap(), 1);
    let result = store.get_result_by_uuid(&uuid).unwrap().unwrap();
    assert!(!result.is_ready());

    let mut registry = Registry::new();
    registry.register("math", "add", |args, _kwargs| {
        let a = args[0].as_i64().unwrap_or(0);
        let b = args[1].as_i64().unwrap_or(0);
        Ok(json!(a + b))
    });

    let task = store.get_next_task().unwrap().expect("a claimable task");
    let decoded = Arguments::decode(&task.function_arguments).unwrap();
    let outcome = registry.invoke(&task.function_module, &task.function_name, &decoded).unwrap();
    store.update_result(&task.uuid, &outcome, "", None).unwrap();
    store.delete_task(&task).unwrap();

    assert_eq!(store.count_tasks().unwrap(), 0);
    assert_eq!(store.count_results().unwrap(), 1);
    let result = store.get_result_by_uuid(&uuid).unwrap().unwrap();
    assert!(result.is_ready());
    assert_eq!(autocron::value::decode_result(&result.function_result).unwrap(), json!(42));
}

#[test]
fn cron_task_is_rescheduled_not_deleted() {
    let (_dir, path) = temp_db_path();
    let store = Store::new();
    store.init_database(&path).unwrap();

    store.register_task("jobs", "tick", None, "* * * * *", "", &Arguments::default()).unwrap();

    let task = store.get_next_task().unwrap().expect("crontask is claimable");
    assert!(task.is_crontask());

    let reference = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 30).unwrap();
    let scheduler = CronScheduler::new(&task.crontab).unwrap();
    let next = scheduler.next_fire_after(reference).unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 0).unwrap());

    store.update_task_schedule(&task, next).unwrap();

    let tasks = store.get_tasks().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Waiting);
    assert_eq!(tasks[0].schedule, next);
}

#[test]
fn registering_the_same_crontask_twice_is_deduplicated() {
    let (_dir, path) = temp_db_path();
    let store = Store::new();
    store.init_database(&path).unwrap();

    for _ in 0..2 {
        store.register_task("jobs", "sweep", None, "* * * * *", "", &Arguments::default()).unwrap();
    }

    assert_eq!(store.count_tasks().unwrap(), 1);
}

#[test]
fn processing_rows_are_recovered_to_waiting_on_init() {
    let (_dir, path) = temp_db_path();
    {
        let store = Store::new();
        store.init_database(&path).unwrap();
        store.register_task("jobs", "orphan", None, "", "", &Arguments::default()).unwrap();
        let task = store.get_next_task().unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Waiting); // returned task reflects pre-claim read
    }

    // A fresh Store re-opening the same file sees the claimed row recovered.
    let store = Store::new();
    store.init_database(&path).unwrap();
    let tasks = store.get_tasks().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Waiting);
}

#[test]
fn exactly_one_monitor_lock_winner() {
    let (_dir, path) = temp_db_path();
    let a = Arc::new(Store::new());
    a.init_database(&path).unwrap();
    let b = Arc::new(Store::new());
    b.init_database(&path).unwrap();

    let won_a = a.acquire_monitor_lock().unwrap();
    let won_b = b.acquire_monitor_lock().unwrap();

    assert_ne!(won_a, won_b);
}

#[test]
fn tear_down_clears_locks_and_crontasks() {
    let (_dir, path) = temp_db_path();
    let store = Store::new();
    store.init_database(&path).unwrap();
    store.register_task("jobs", "tick", None, "* * * * *", "", &Arguments::default()).unwrap();
    store.increment_running_workers(4242).unwrap();
    store.acquire_monitor_lock().unwrap();

    store.tear_down_database().unwrap();

    let settings = store.get_settings().unwrap();
    assert!(!settings.monitor_lock);
    assert_eq!(settings.running_workers, 0);
    assert_eq!(settings.worker_pids, "");
    assert_eq!(store.count_tasks().unwrap(), 0);
}
