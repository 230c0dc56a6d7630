//! A long-running worker process: pulls one job at a time from the
//! broker's queue, routes it through the header-keyed REPL cache, and
//! recycles the cache after a configurable job quota. Single-threaded with
//! respect to its own cache and REPL sessions — see the concurrency model
//! in the design doc.

use crate::broker::Broker;
use crate::cache::ReplCache;
use crate::config::Config;
use crate::error::VerifyError;
use crate::header::{make_header_key, parse_header};
use crate::job::{Job, JobOutcome};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How long `blocking_pop` waits before giving the worker loop a chance to
/// notice a shutdown request.
const POP_POLL_SECS: u64 = 1;

pub struct Worker {
    config: Config,
    broker: Box<dyn Broker>,
    cache: ReplCache,
    completed_jobs: u64,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    /// Boot a worker: build its cache and warm it with the default imports
    /// so the first job doesn't pay the cold-start cost.
    pub fn new(config: Config, broker: Box<dyn Broker>) -> crate::error::Result<Self> {
        let mut cache = ReplCache::new(&config);
        let default_key = make_header_key(Some(&config.imports));
        cache.open_repl(&default_key)?;

        Ok(Worker {
            config,
            broker,
            cache,
            completed_jobs: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A flag a signal handler can flip to request a graceful drain: the
    /// worker finishes its in-flight job, tears down the cache, and exits.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until `shutdown_flag()` is set. Each iteration blocks at most
    /// `POP_POLL_SECS` so the flag is checked regularly even when the queue
    /// is empty.
    pub fn run(&mut self) -> crate::error::Result<()> {
        while !self.shutdown.load(Ordering::SeqCst) {
            let popped = self.broker.blocking_pop(POP_POLL_SECS)?;
            let Some((handle, job)) = popped else {
                continue;
            };

            let (outcome, failed) = self.execute(&job);
            self.broker.store_result(&handle, outcome, failed)?;

            self.completed_jobs += 1;
            if self.config.max_jobs > 0 && self.completed_jobs >= self.config.max_jobs {
                tracing::info!(
                    completed = self.completed_jobs,
                    "recycling REPL cache after job quota"
                );
                self.cache.clear();
                self.completed_jobs = 0;
            }
        }
        self.cache.clear();
        Ok(())
    }

    /// Route one job through the cache and produce its outcome. Never
    /// returns `Err` — any failure becomes a `JobOutcome::Error` so the
    /// worker loop (and the process) never crashes on a single bad job.
    fn execute(&mut self, job: &Job) -> (JobOutcome, bool) {
        let (mut header, body) = parse_header(&job.theorem);
        if let Some(forced) = &job.forced_header {
            header = forced.clone();
        }
        let key = make_header_key(Some(&header));

        let session = match self.cache.open_repl(&key) {
            Ok(s) => s,
            Err(e) => {
                return (
                    JobOutcome::Error {
                        error: e.to_string(),
                    },
                    true,
                )
            }
        };

        if body.is_empty() {
            return (JobOutcome::Reply(json!({})), false);
        }

        let mut cmd = json!({
            "allTactics": true,
            "cmd": body,
            "env": 0,
            "keepEnv": false,
        });
        if let Some(timeout) = job.timeout_seconds {
            cmd["timeout"] = json!(timeout);
        }

        match session.interact(&cmd, self.config.repl_read_deadline) {
            Ok(reply) => (JobOutcome::Reply(reply), false),
            Err(e @ VerifyError::ReplBroken(_)) => {
                self.cache.evict(&key);
                (
                    JobOutcome::Error {
                        error: e.to_string(),
                    },
                    true,
                )
            }
            Err(e) => (
                JobOutcome::Error {
                    error: e.to_string(),
                },
                true,
            ),
        }
    }
}
