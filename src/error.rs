//! Error types for the expansion engine.
//!
//! Every failure carries a kind and a human-readable message so that a
//! boundary layer (CLI, HTTP server) can report it without knowing the
//! variants in detail.

use serde::Serialize;

/// Result type for expansion operations.
pub type Result<T> = std::result::Result<T, ExpansionError>;

/// Errors raised while building or solving an expansion problem.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpansionError {
    /// Dimensions disagree, a cost is negative or not finite, or a
    /// configuration value is out of range. Raised before any solving starts.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A binary network violated its construction invariants. This is a
    /// defect in the reduction, never a property of well-formed input.
    #[error("infeasible network: {0}")]
    InfeasibleNetwork(String),

    /// The worker thread pool could not be created.
    #[error("worker pool: {0}")]
    WorkerPool(String),
}

/// Coarse classification of an [`ExpansionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    MalformedInput,
    InfeasibleNetwork,
    WorkerPool,
}

impl ExpansionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExpansionError::MalformedInput(_) => ErrorKind::MalformedInput,
            ExpansionError::InfeasibleNetwork(_) => ErrorKind::InfeasibleNetwork,
            ExpansionError::WorkerPool(_) => ErrorKind::WorkerPool,
        }
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            ExpansionError::MalformedInput(m)
            | ExpansionError::InfeasibleNetwork(m)
            | ExpansionError::WorkerPool(m) => m,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ExpansionError::MalformedInput(msg.into())
    }

    pub(crate) fn infeasible(msg: impl Into<String>) -> Self {
        ExpansionError::InfeasibleNetwork(msg.into())
    }
}

impl From<rayon::ThreadPoolBuildError> for ExpansionError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        ExpansionError::WorkerPool(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_message_split_the_display() {
        let err = ExpansionError::malformed("n_labels must be positive");
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert_eq!(err.message(), "n_labels must be positive");
        assert_eq!(err.to_string(), "malformed input: n_labels must be positive");
    }

    #[test]
    fn kinds_serialize_as_names() {
        let json = serde_json::to_string(&ErrorKind::InfeasibleNetwork).unwrap();
        assert_eq!(json, "\"InfeasibleNetwork\"");
    }
}
