use thiserror::Error;

/// Errors raised at the few construction-time boundaries that validate
/// caller-supplied data, as opposed to internal algorithmic preconditions
/// (which are enforced with `assert!` and abort the process, per the
/// engine's error-handling design).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("requested {requested} threads exceeds the supported limit of {limit}")]
    TooManyThreads { requested: usize, limit: usize },
}
