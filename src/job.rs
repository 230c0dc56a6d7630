//! The unit of work exchanged through the broker, and the raw/classified
//! reply it produces.

use serde::{Deserialize, Serialize};

/// An immutable job: theorem text, the timeout to forward to the REPL, an
/// optional forced header that overrides whatever imports are parsed out
/// of the theorem text, and the sequence index assigned by the dispatcher
/// on enqueue. `sequence_index` is the sole ordering key for the final
/// result array — jobs carry no mutable infrastructure handle; the worker
/// attaches a REPL borrow at execution time instead (see `worker`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub theorem: String,
    pub timeout_seconds: Option<u64>,
    pub forced_header: Option<Vec<String>>,
    pub sequence_index: usize,
}

impl Job {
    pub fn new(
        theorem: impl Into<String>,
        timeout_seconds: Option<u64>,
        forced_header: Option<Vec<String>>,
        sequence_index: usize,
    ) -> Self {
        Job {
            theorem: theorem.into(),
            timeout_seconds,
            forced_header,
            sequence_index,
        }
    }
}

/// What a worker stores back into the broker for one job: the raw REPL
/// reply on success, or an error object if the query failed outright.
///
/// Untagged: round-tripping through JSON always lands on `Reply` (a
/// `Value` happily deserializes anything), but `as_raw_reply` makes both
/// variants equivalent downstream, so that's harmless — `classify` only
/// ever sees the resulting JSON shape, never the Rust variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Reply(serde_json::Value),
    Error { error: String },
}

impl JobOutcome {
    /// View this outcome as the raw reply `classify` expects: an error
    /// outcome is represented the same way a REPL `error` reply would be.
    pub fn as_raw_reply(&self) -> serde_json::Value {
        match self {
            JobOutcome::Reply(v) => v.clone(),
            JobOutcome::Error { error } => serde_json::json!({ "error": error }),
        }
    }
}
