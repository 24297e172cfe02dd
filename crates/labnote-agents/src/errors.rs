//! Error taxonomy for the agents layer.
//!
//! Most failures inside a loop run are recovered into data (a dropped draft,
//! a fail-open verdict, the no-drafts message). The types here describe the
//! individual causes so they can be logged and reported without string
//! matching; only [`LoopError`] ever escapes `run_loop`.
//!
//! | Type             | Raised by                  | Recovered as                 |
//! |------------------|----------------------------|------------------------------|
//! | `ModelError`     | one draft or judge call    | dropped draft / fail-open    |
//! | `RetrievalError` | context lookup             | prompt without context block |
//! | `LoopError`      | controller misconfiguration| returned to the caller       |

use std::time::Duration;

use coordination::IllegalTransition;
use thiserror::Error;

/// Structured failure of a single model invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Network or connection failure before a response arrived.
    #[error("request failed: {0}")]
    Request(String),

    /// Server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not a chat-completion payload.
    #[error("could not decode completion: {0}")]
    Decode(String),

    /// Completion decoded but carried no text.
    #[error("completion was empty")]
    EmptyCompletion,

    /// Call did not finish within the configured budget.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// Client could not be built from the configuration.
    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl ModelError {
    /// Short label for telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
            Self::EmptyCompletion => "empty",
            Self::Timeout(_) => "timeout",
            Self::Configuration(_) => "configuration",
        }
    }
}

/// Failure of the context retriever.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retriever used before init() or after close()")]
    NotInitialized,

    #[error("failed to read reference documents: {0}")]
    Io(#[from] std::io::Error),
}

/// Faults that abort a controller run instead of degrading it.
#[derive(Debug, Error)]
pub enum LoopError {
    /// Roster, thresholds, or budgets are unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The controller tried to take an edge outside the loop graph.
    #[error("{0}")]
    IllegalTransition(#[from] IllegalTransition),
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::LoopPhase;

    #[test]
    fn test_timeout_kind_and_message() {
        let err = ModelError::Timeout(Duration::from_secs(120));
        assert_eq!(err.kind(), "timeout");
        assert!(err.to_string().contains("120s"));
    }

    #[test]
    fn test_status_error_message_carries_body() {
        let err = ModelError::Status {
            status: 404,
            body: "model not found".into(),
        };
        assert_eq!(err.kind(), "status");
        assert_eq!(err.to_string(), "server returned 404: model not found");
    }

    #[test]
    fn test_empty_completion_kind() {
        assert_eq!(ModelError::EmptyCompletion.kind(), "empty");
    }

    #[test]
    fn test_io_error_converts_to_retrieval_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such dir");
        let err: RetrievalError = io.into();
        assert!(err.to_string().contains("no such dir"));
    }

    #[test]
    fn test_configuration_error_message() {
        let err = LoopError::Configuration("draft roster is empty".into());
        assert_eq!(err.to_string(), "Configuration error: draft roster is empty");
    }

    #[test]
    fn test_illegal_transition_converts() {
        let err: LoopError = IllegalTransition {
            from: LoopPhase::Done,
            to: LoopPhase::Generating,
        }
        .into();
        assert!(matches!(err, LoopError::IllegalTransition(_)));
        assert!(err.to_string().contains("Done → Generating"));
    }
}
