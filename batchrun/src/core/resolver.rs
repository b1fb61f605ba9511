//! Resolution of a run's final outcome code.
//!
//! Two paths exist and exactly one applies per run: the precedence chain for
//! runs whose job body completed, and the classification table for runs
//! terminated by a [`RunFailure`].

use crate::core::failure::RunFailure;
use crate::core::outcome::OutcomeCode;

/// Flags observed on the result protocol when the job body returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeFlags {
    pub max_runtime_exceeded: bool,
    pub has_error_message: bool,
    pub aborted: bool,
    pub explicit_code: Option<OutcomeCode>,
}

/// Opt-in deviations from the reference precedence chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvePolicy {
    /// Resolve an aborted run without timeout or error messages to
    /// MANUAL_ABORT. Off by default: the abort flag is recorded but ignored.
    pub honor_manual_abort: bool,
}

/// How a run ended, before any outcome code is attached.
#[derive(Debug)]
pub enum Termination {
    Completed,
    Failed(RunFailure),
}

impl From<Result<(), RunFailure>> for Termination {
    fn from(result: Result<(), RunFailure>) -> Self {
        match result {
            Ok(()) => Termination::Completed,
            Err(failure) => Termination::Failed(failure),
        }
    }
}

impl Termination {
    /// Resolve the outcome code. `flags` are only consulted for completed runs.
    pub fn resolve(&self, flags: &OutcomeFlags, policy: ResolvePolicy) -> OutcomeCode {
        match self {
            Termination::Completed => resolve_outcome(flags, policy),
            Termination::Failed(failure) => classify_failure(failure),
        }
    }
}

/// Precedence chain for a completed run: timeout, then error messages, then
/// the job's explicit code or OK.
pub fn resolve_outcome(flags: &OutcomeFlags, policy: ResolvePolicy) -> OutcomeCode {
    if flags.max_runtime_exceeded {
        OutcomeCode::TIMEOUT
    } else if flags.has_error_message {
        OutcomeCode::GENERIC_FAILURE
    } else if policy.honor_manual_abort && flags.aborted {
        OutcomeCode::MANUAL_ABORT
    } else {
        flags.explicit_code.clone().unwrap_or(OutcomeCode::OK)
    }
}

/// Classification table for a run terminated by a failure.
pub fn classify_failure(failure: &RunFailure) -> OutcomeCode {
    match failure {
        RunFailure::Execution { code: Some(code), .. } => code.clone(),
        RunFailure::Execution { code: None, .. } => OutcomeCode::ABORTED,
        RunFailure::Framework { code, .. } => code.clone(),
        RunFailure::Authorization(_) | RunFailure::Security(_) => OutcomeCode::CONFIG_ERROR,
        RunFailure::Unclassified(_) => OutcomeCode::ABORTED,
    }
}
