//! Layered configuration: an optional `.env` file, then process environment,
//! then built-in defaults.

use std::path::PathBuf;

use anyhow::Context;

const DEFAULT_PROJECT_NAME: &str = "autocron";
const DEFAULT_DB_FILE_NAME: &str = "autocron.db";

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the database file, as given or resolved under `~/.autocron/<project>/`.
    pub db_path: PathBuf,
    /// Overrides `Settings.max_workers` on first `init_database`, if set.
    pub max_workers: Option<u32>,
    /// Log filter directive passed to `EnvFilter`, e.g. "info,autocron=debug".
    pub log_filter: String,
}

impl Config {
    /// Loads configuration from an optional `.env` file and the process
    /// environment. Never fails on a missing `.env` file; fails only on a
    /// malformed environment variable that was explicitly provided.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                return Err(err).context("failed to load .env file");
            }
        }

        let project_name =
            std::env::var("AUTOCRON_PROJECT_NAME").unwrap_or_else(|_| DEFAULT_PROJECT_NAME.to_string());

        let db_path = match std::env::var("AUTOCRON_DB_PATH") {
            Ok(raw) => resolve_db_path(&raw, &project_name)?,
            Err(_) => resolve_db_path(DEFAULT_DB_FILE_NAME, &project_name)?,
        };

        let max_workers = match std::env::var("AUTOCRON_MAX_WORKERS") {
            Ok(raw) => Some(
                raw.parse::<u32>()
                    .with_context(|| format!("AUTOCRON_MAX_WORKERS={raw:?} is not a valid integer"))?,
            ),
            Err(_) => None,
        };

        let log_filter =
            std::env::var("AUTOCRON_LOG").unwrap_or_else(|_| "info,autocron=debug".to_string());

        Ok(Config {
            db_path,
            max_workers,
            log_filter,
        })
    }
}

/// Relative paths resolve under `<home>/.autocron/<project_name>/<filename>`,
/// creating the directory on demand. Absolute paths are used as given.
pub fn resolve_db_path(raw: &str, project_name: &str) -> anyhow::Result<PathBuf> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return Ok(path);
    }
    let home = dirs_home().context("could not determine home directory")?;
    let dir = home.join(".autocron").join(project_name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    Ok(dir.join(path))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
