use chrono::{DateTime, Utc};

/// `WAITING` may be claimed; `PROCESSING` is owned by exactly one worker.
/// Terminal outcomes are represented by row deletion (delayed tasks) or a
/// transition back to `WAITING` with an updated `schedule` (crontasks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Waiting,
    Processing,
}

impl TaskStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            TaskStatus::Waiting => 1,
            TaskStatus::Processing => 2,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            2 => TaskStatus::Processing,
            _ => TaskStatus::Waiting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Waiting,
    Ready,
    Error,
}

impl ResultStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            ResultStatus::Waiting => 1,
            ResultStatus::Ready => 3,
            ResultStatus::Error => 4,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            3 => ResultStatus::Ready,
            4 => ResultStatus::Error,
            _ => ResultStatus::Waiting,
        }
    }
}

/// An item of work pending execution. See the data model for invariants
/// relating `uuid` and `crontab`.
#[derive(Debug, Clone)]
pub struct Task {
    pub rowid: i64,
    pub uuid: String,
    pub schedule: DateTime<Utc>,
    pub status: TaskStatus,
    pub crontab: String,
    pub function_module: String,
    pub function_name: String,
    pub function_arguments: Vec<u8>,
}

impl Task {
    pub fn is_crontask(&self) -> bool {
        !self.crontab.is_empty()
    }

    pub fn is_delayed(&self) -> bool {
        !self.uuid.is_empty()
    }
}

/// A slot for the outcome of a delayed task, keyed by `uuid`.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub rowid: i64,
    pub uuid: String,
    pub status: ResultStatus,
    pub function_module: String,
    pub function_name: String,
    pub function_arguments: Vec<u8>,
    pub function_result: Vec<u8>,
    pub error_message: String,
    pub ttl: DateTime<Utc>,
}

impl ResultRow {
    pub fn has_error(&self) -> bool {
        self.status == ResultStatus::Error
    }

    pub fn is_ready(&self) -> bool {
        self.status == ResultStatus::Ready
    }
}

/// The single-row runtime configuration table.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_workers: u32,
    pub running_workers: u32,
    pub worker_pids: String,
    pub monitor_lock: bool,
    pub autocron_lock: bool,
    pub blocking_mode: bool,
    pub monitor_idle_time: u32,
    pub worker_idle_time: u32,
    pub result_ttl: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_workers: 1,
            running_workers: 0,
            worker_pids: String::new(),
            monitor_lock: false,
            autocron_lock: false,
            blocking_mode: false,
            monitor_idle_time: 5,
            worker_idle_time: 0,
            result_ttl: 1800,
        }
    }
}

impl Settings {
    pub fn worker_pid_list(&self) -> Vec<u32> {
        self.worker_pids
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}
