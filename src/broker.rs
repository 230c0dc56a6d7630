//! Concrete implementation of the job-broker contract (§6.2 of the design
//! doc) against Redis: a FIFO queue with batch enqueue, a blocking pop,
//! per-job result storage with infinite retention until flushed, and
//! `started`/`finished`/`failed` counters. Exposed as a trait so unit tests
//! can swap in an in-memory double without a live Redis server.

use crate::error::{Result, VerifyError};
use crate::job::{Job, JobOutcome};
use redis::Commands;

/// Aggregate counters over one batch's lifetime. Each is monotonically
/// non-decreasing within the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub started: u64,
    pub finished: u64,
    pub failed: u64,
}

/// Opaque handle returned by `enqueue_batch`, used to fetch a job's result
/// later. Mirrors the submission order of the batch it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(pub String);

pub trait Broker: Send {
    /// Enqueue `jobs` as one batch, preserving order; the returned handle
    /// vector mirrors that order one-to-one.
    fn enqueue_batch(&mut self, jobs: &[Job]) -> Result<Vec<JobHandle>>;

    /// Block for up to `timeout_secs` waiting for the next ready job. A
    /// `None` on timeout lets the worker loop check its shutdown flag
    /// between polls.
    fn blocking_pop(&mut self, timeout_secs: u64) -> Result<Option<(JobHandle, Job)>>;

    /// Store a job's outcome and mark it finished or failed.
    fn store_result(&mut self, handle: &JobHandle, outcome: JobOutcome, failed: bool) -> Result<()>;

    /// Fetch a previously stored result, if any.
    fn get_result(&mut self, handle: &JobHandle) -> Result<Option<JobOutcome>>;

    /// Read the current started/finished/failed counters.
    fn counters(&mut self) -> Result<Counters>;

    /// Atomically clear this broker's queue, results and counters.
    fn flush(&mut self) -> Result<()>;
}

/// Redis-backed broker. Keys are namespaced under `<queue>:*` so several
/// logical queues can share one Redis database.
pub struct RedisBroker {
    conn: redis::Connection,
    queue: String,
}

impl RedisBroker {
    pub fn connect(redis_url: &str, queue: impl Into<String>) -> Result<Self> {
        if redis_url.trim().is_empty() {
            return Err(VerifyError::InvalidInput(
                "broker endpoint must not be empty".to_string(),
            ));
        }
        let client = redis::Client::open(redis_url)
            .map_err(|e| VerifyError::BrokerError(e.to_string()))?;
        let conn = client
            .get_connection()
            .map_err(|e| VerifyError::BrokerError(e.to_string()))?;
        Ok(RedisBroker {
            conn,
            queue: queue.into(),
        })
    }

    fn queue_key(&self) -> String {
        format!("{}:queue", self.queue)
    }
    fn results_key(&self) -> String {
        format!("{}:results", self.queue)
    }
    fn id_counter_key(&self) -> String {
        format!("{}:next_id", self.queue)
    }
    fn counter_key(&self, name: &str) -> String {
        format!("{}:counters:{}", self.queue, name)
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Envelope {
    id: String,
    job: Job,
}

impl Broker for RedisBroker {
    fn enqueue_batch(&mut self, jobs: &[Job]) -> Result<Vec<JobHandle>> {
        let mut handles = Vec::with_capacity(jobs.len());
        let mut pipe = redis::pipe();
        pipe.atomic();

        for job in jobs {
            let next_id: u64 = self
                .conn
                .incr(self.id_counter_key(), 1)
                .map_err(|e| VerifyError::BrokerError(e.to_string()))?;
            let id = next_id.to_string();
            let envelope = Envelope {
                id: id.clone(),
                job: job.clone(),
            };
            let payload = serde_json::to_string(&envelope)
                .map_err(|e| VerifyError::BrokerError(e.to_string()))?;
            pipe.rpush(self.queue_key(), payload);
            handles.push(JobHandle(id));
        }

        let _: () = pipe
            .query(&mut self.conn)
            .map_err(|e| VerifyError::BrokerError(e.to_string()))?;
        Ok(handles)
    }

    fn blocking_pop(&mut self, timeout_secs: u64) -> Result<Option<(JobHandle, Job)>> {
        let response: Option<(String, String)> = self
            .conn
            .blpop(self.queue_key(), timeout_secs as f64)
            .map_err(|e| VerifyError::BrokerError(e.to_string()))?;

        let Some((_key, payload)) = response else {
            return Ok(None);
        };

        let envelope: Envelope = serde_json::from_str(&payload)
            .map_err(|e| VerifyError::BrokerError(e.to_string()))?;

        let _: u64 = self
            .conn
            .incr(self.counter_key("started"), 1)
            .map_err(|e| VerifyError::BrokerError(e.to_string()))?;

        Ok(Some((JobHandle(envelope.id), envelope.job)))
    }

    fn store_result(&mut self, handle: &JobHandle, outcome: JobOutcome, failed: bool) -> Result<()> {
        let payload = serde_json::to_string(&outcome)
            .map_err(|e| VerifyError::BrokerError(e.to_string()))?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset(self.results_key(), &handle.0, payload);
        if failed {
            pipe.incr(self.counter_key("failed"), 1);
        } else {
            pipe.incr(self.counter_key("finished"), 1);
        }
        let _: () = pipe
            .query(&mut self.conn)
            .map_err(|e| VerifyError::BrokerError(e.to_string()))?;
        Ok(())
    }

    fn get_result(&mut self, handle: &JobHandle) -> Result<Option<JobOutcome>> {
        let payload: Option<String> = self
            .conn
            .hget(self.results_key(), &handle.0)
            .map_err(|e| VerifyError::BrokerError(e.to_string()))?;
        match payload {
            Some(p) => {
                let outcome = serde_json::from_str(&p)
                    .map_err(|e| VerifyError::BrokerError(e.to_string()))?;
                Ok(Some(outcome))
            }
            None => Ok(None),
        }
    }

    fn counters(&mut self) -> Result<Counters> {
        let started: u64 = self
            .conn
            .get(self.counter_key("started"))
            .unwrap_or(0);
        let finished: u64 = self
            .conn
            .get(self.counter_key("finished"))
            .unwrap_or(0);
        let failed: u64 = self
            .conn
            .get(self.counter_key("failed"))
            .unwrap_or(0);
        Ok(Counters {
            started,
            finished,
            failed,
        })
    }

    fn flush(&mut self) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(self.queue_key());
        pipe.del(self.results_key());
        pipe.del(self.id_counter_key());
        pipe.del(self.counter_key("started"));
        pipe.del(self.counter_key("finished"));
        pipe.del(self.counter_key("failed"));
        let _: () = pipe
            .query(&mut self.conn)
            .map_err(|e| VerifyError::BrokerError(e.to_string()))?;
        Ok(())
    }
}


#[cfg(test)]
pub mod fake {
    //! An in-memory `Broker` used by dispatcher/worker unit tests so they
    //! don't need a live Redis server.
    use super::*;
    use std::collections::{HashMap, VecDeque};

    #[derive(Default)]
    pub struct FakeBroker {
        queue: VecDeque<(JobHandle, Job)>,
        results: HashMap<String, JobOutcome>,
        next_id: u64,
        counters: Counters,
    }

    impl FakeBroker {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Broker for FakeBroker {
        fn enqueue_batch(&mut self, jobs: &[Job]) -> Result<Vec<JobHandle>> {
            let mut handles = Vec::with_capacity(jobs.len());
            for job in jobs {
                self.next_id += 1;
                let handle = JobHandle(self.next_id.to_string());
                self.queue.push_back((handle.clone(), job.clone()));
                handles.push(handle);
            }
            Ok(handles)
        }

        fn blocking_pop(&mut self, _timeout_secs: u64) -> Result<Option<(JobHandle, Job)>> {
            match self.queue.pop_front() {
                Some(entry) => {
                    self.counters.started += 1;
                    Ok(Some(entry))
                }
                None => Ok(None),
            }
        }

        fn store_result(
            &mut self,
            handle: &JobHandle,
            outcome: JobOutcome,
            failed: bool,
        ) -> Result<()> {
            self.results.insert(handle.0.clone(), outcome);
            if failed {
                self.counters.failed += 1;
            } else {
                self.counters.finished += 1;
            }
            Ok(())
        }

        fn get_result(&mut self, handle: &JobHandle) -> Result<Option<JobOutcome>> {
            Ok(self.results.get(&handle.0).cloned())
        }

        fn counters(&mut self) -> Result<Counters> {
            Ok(self.counters)
        }

        fn flush(&mut self) -> Result<()> {
            self.queue.clear();
            self.results.clear();
            self.counters = Counters::default();
            Ok(())
        }
    }
}
