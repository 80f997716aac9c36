//! Monitor entry point. Spawned by the Engine as `autocron-monitor
//! --dbfile=<path> --mainpid=<pid>`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use autocron::process::ShutdownFlag;
use autocron::store::Store;

#[derive(Parser, Debug)]
#[command(name = "autocron-monitor")]
struct Args {
    #[arg(long)]
    dbfile: PathBuf,

    #[arg(long)]
    mainpid: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    autocron::logging::init("info,autocron=debug");

    let store = Arc::new(Store::new());
    store.init_database(&args.dbfile).context("failed to open database")?;

    let shutdown = ShutdownFlag::new();
    shutdown.watch();

    let mut monitor = autocron::monitor::Monitor::new(store, args.dbfile, args.mainpid);
    monitor.run(shutdown).await.context("monitor loop failed")?;
    Ok(())
}
