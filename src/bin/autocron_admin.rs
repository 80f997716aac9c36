//! Out-of-process inspection and maintenance CLI for an existing database
//! file. Does not start an Engine; talks to the Store directly.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use autocron::store::Store;

#[derive(Parser, Debug)]
#[command(name = "autocron-admin", about = "Inspect and maintain an autocron database")]
struct Args {
    /// Path to the database file.
    #[arg(long)]
    dbfile: PathBuf,

    #[arg(short = 'i', long)]
    info: bool,

    #[arg(short = 't', long)]
    tasks: bool,

    #[arg(short = 'r', long)]
    results: bool,

    #[arg(long, value_name = "N")]
    set_max_workers: Option<u32>,

    #[arg(long, value_name = "on|off")]
    set_autocron_lock: Option<String>,

    #[arg(long, value_name = "on|off")]
    set_monitor_lock: Option<String>,

    #[arg(long, value_name = "on|off")]
    set_blocking_mode: Option<String>,

    #[arg(long, value_name = "S")]
    set_worker_idle_time: Option<u32>,

    #[arg(long, value_name = "S")]
    set_monitor_idle_time: Option<u32>,

    #[arg(long, value_name = "S")]
    set_result_ttl: Option<u32>,

    #[arg(long)]
    set_defaults: bool,

    #[arg(long)]
    delete_database: bool,
}

fn parse_bool_flag(name: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "on" | "true" => Ok(true),
        "off" | "false" => Ok(false),
        other => bail!("{name} expects on/off/true/false, got {other:?}"),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    autocron::logging::init("warn,autocron=info");

    let store = Arc::new(Store::new());
    store.init_database(&args.dbfile).context("failed to open database")?;

    let mut did_something = false;

    if args.set_defaults {
        store.update_settings(&Default::default())?;
        println!("settings reset to defaults");
        did_something = true;
    }

    if let Some(n) = args.set_max_workers {
        let mut settings = store.get_settings()?;
        settings.max_workers = n;
        store.update_settings(&settings)?;
        did_something = true;
    }
    if let Some(raw) = &args.set_autocron_lock {
        let mut settings = store.get_settings()?;
        settings.autocron_lock = parse_bool_flag("--set-autocron-lock", raw)?;
        store.update_settings(&settings)?;
        did_something = true;
    }
    if let Some(raw) = &args.set_monitor_lock {
        let mut settings = store.get_settings()?;
        settings.monitor_lock = parse_bool_flag("--set-monitor-lock", raw)?;
        store.update_settings(&settings)?;
        did_something = true;
    }
    if let Some(raw) = &args.set_blocking_mode {
        let mut settings = store.get_settings()?;
        settings.blocking_mode = parse_bool_flag("--set-blocking-mode", raw)?;
        store.update_settings(&settings)?;
        did_something = true;
    }
    if let Some(s) = args.set_worker_idle_time {
        let mut settings = store.get_settings()?;
        settings.worker_idle_time = s;
        store.update_settings(&settings)?;
        did_something = true;
    }
    if let Some(s) = args.set_monitor_idle_time {
        let mut settings = store.get_settings()?;
        settings.monitor_idle_time = s;
        store.update_settings(&settings)?;
        did_something = true;
    }
    if let Some(s) = args.set_result_ttl {
        let mut settings = store.get_settings()?;
        settings.result_ttl = s;
        store.update_settings(&settings)?;
        did_something = true;
    }

    if args.info {
        let settings = store.get_settings()?;
        let task_count = store.count_tasks()?;
        let result_count = store.count_results()?;
        println!("database: {}", args.dbfile.display());
        println!("tasks: {task_count}  results: {result_count}");
        println!("{settings:#?}");
        did_something = true;
    }

    if args.tasks {
        for task in store.get_tasks()? {
            println!("{task:?}");
        }
        did_something = true;
    }

    if args.results {
        for result in store.get_results()? {
            println!("{result:?}");
        }
        did_something = true;
    }

    if args.delete_database {
        print!("delete {}? [y/N] ", args.dbfile.display());
        std::io::stdout().flush().ok();
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer).ok();
        if answer.trim().eq_ignore_ascii_case("y") {
            std::fs::remove_file(&args.dbfile).context("failed to delete database file")?;
            println!("deleted");
        } else {
            println!("aborted");
        }
        did_something = true;
    }

    if !did_something {
        bail!("no command given; pass --info, --tasks, --results, a --set-* flag, or --delete-database");
    }

    Ok(())
}
