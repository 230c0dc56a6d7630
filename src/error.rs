use thiserror::Error;

/// Errors surfaced by the REPL session manager, cache, broker client and
/// worker runtime. Recoverable variants are caught at the worker's
/// query-handling boundary and folded into a result record; they never
/// propagate out of the worker loop.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("couldn't connect to the REPL; probably busted")]
    ReplUnavailable,

    #[error("REPL connection broken: {0}")]
    ReplBroken(String),

    #[error("failed to decode REPL reply: {0}")]
    DecodeFailure(String),

    #[error("broker error: {0}")]
    BrokerError(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("theorem exceeds maximum size of {limit} characters ({actual} given)")]
    TheoremTooLarge { limit: usize, actual: usize },

    #[error("failed to initialize REPL environment: {0}")]
    CacheInitFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VerifyError>;
