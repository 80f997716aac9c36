//! Worker entry point. Spawned by the Monitor as `autocron-worker
//! --dbfile=<path> --monitorpid=<pid>`.
//!
//! A real host links the `autocron` library, builds a [`Registry`] with its
//! task functions, and never runs this binary directly except as a sibling
//! of the host executable the Monitor and Engine discover by directory.
//! This binary carries an empty registry and exists so the supervision tree
//! is exercisable standalone; hosts that need custom functions should spawn
//! their own worker binary built against the same `Registry` they populate
//! before calling `Engine::start`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use autocron::process::ShutdownFlag;
use autocron::store::Store;
use autocron::worker::Worker;
use autocron::Registry;

#[derive(Parser, Debug)]
#[command(name = "autocron-worker")]
struct Args {
    #[arg(long)]
    dbfile: PathBuf,

    #[arg(long)]
    monitorpid: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    autocron::logging::init("info,autocron=debug");

    let store = Arc::new(Store::new());
    store.init_database(&args.dbfile).context("failed to open database")?;

    let shutdown = ShutdownFlag::new();
    shutdown.watch();

    let registry = Arc::new(Registry::new());
    let worker = Worker::new(store, registry, args.monitorpid);
    worker.run(shutdown).await.context("worker loop failed")?;
    Ok(())
}
