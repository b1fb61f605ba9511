//! Failure taxonomy for a batch run.
//!
//! Each variant is a fixed category; the supervisor maps categories to
//! outcome codes with an explicit table instead of inspecting types.

use std::backtrace::Backtrace;

use crate::core::outcome::OutcomeCode;

/// Classification id used when a failure carries none of its own.
pub const GENERIC_CLASSIFICATION_ID: &str = "ERROR";

/// A failure that terminates a run before it completes normally.
#[derive(Debug, thiserror::Error)]
pub enum RunFailure {
    /// Raised by the job body. May carry its own outcome code.
    #[error("batch execution failed [{classification_id}]: {message}")]
    Execution {
        classification_id: String,
        code: Option<OutcomeCode>,
        message: String,
    },
    /// Raised by the surrounding framework (configuration, protocol sink).
    #[error("batch framework failed [{classification_id}]: {message}")]
    Framework {
        classification_id: String,
        code: OutcomeCode,
        message: String,
    },
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error("security failure: {0}")]
    Security(String),
    #[error(transparent)]
    Unclassified(#[from] anyhow::Error),
}

impl RunFailure {
    pub fn execution(classification_id: impl Into<String>, message: impl Into<String>) -> Self {
        RunFailure::Execution {
            classification_id: classification_id.into(),
            code: None,
            message: message.into(),
        }
    }

    pub fn execution_with_code(
        classification_id: impl Into<String>,
        code: OutcomeCode,
        message: impl Into<String>,
    ) -> Self {
        RunFailure::Execution {
            classification_id: classification_id.into(),
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn framework(
        classification_id: impl Into<String>,
        code: OutcomeCode,
        message: impl Into<String>,
    ) -> Self {
        RunFailure::Framework {
            classification_id: classification_id.into(),
            code,
            message: message.into(),
        }
    }

    /// The failure's own classification id (Execution and Framework only).
    pub fn classification_id(&self) -> Option<&str> {
        match self {
            RunFailure::Execution {
                classification_id, ..
            }
            | RunFailure::Framework {
                classification_id, ..
            } => Some(classification_id),
            _ => None,
        }
    }

    /// Backtrace captured with an unclassified error, if any.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            RunFailure::Unclassified(err) => Some(err.backtrace()),
            _ => None,
        }
    }
}
