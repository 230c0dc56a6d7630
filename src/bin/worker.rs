//! Thin worker-process entry point: parse a handful of overrides, build a
//! `Config`, boot a `Worker` against a Redis-backed broker, and run it
//! until `Ctrl-C`/`SIGTERM` requests a graceful drain.

use anyhow::{Context, Result};
use clap::Parser;
use lean_verify_worker::broker::RedisBroker;
use lean_verify_worker::config::Config;
use lean_verify_worker::worker::Worker;
use std::sync::atomic::Ordering;

/// Lean/Mathlib batch-verification worker.
///
/// Most configuration is read from the environment (see README); these
/// flags exist only to make local overrides convenient without exporting
/// env vars first.
#[derive(Parser, Debug)]
#[command(name = "lean-verify-worker")]
struct Args {
    /// Override REDIS_URL.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Override JOBS_QUEUE.
    #[arg(long, env = "JOBS_QUEUE")]
    jobs_queue: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(url) = args.redis_url {
        config.redis_url = url;
    }
    if let Some(queue) = args.jobs_queue {
        config.jobs_queue = queue;
    }

    tracing::info!(
        repl_path = %config.repl_path.display(),
        max_jobs = config.max_jobs,
        cache_capacity = config.cache_capacity,
        "booting worker"
    );

    let broker = RedisBroker::connect(&config.redis_url, config.jobs_queue.clone())
        .context("failed to connect to the job broker")?;

    let mut worker = Worker::new(config, Box::new(broker)).context("failed to boot worker")?;

    let shutdown = worker.shutdown_flag();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown requested, draining in-flight job");
        shutdown.store(true, Ordering::SeqCst);
    })
    .context("failed to install signal handler")?;

    worker.run().context("worker loop exited with an error")?;
    tracing::info!("worker stopped");
    Ok(())
}
