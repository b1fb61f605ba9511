//! Outcome codes reported as the process exit status.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, bail};
use serde::Serialize;

/// Small integer plus description signaling why a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OutcomeCode {
    value: i32,
    description: Cow<'static, str>,
}

impl OutcomeCode {
    /// Run completed without error messages.
    pub const OK: OutcomeCode = OutcomeCode::baseline(0, "Batch completed successfully");
    /// Run completed but recorded at least one error message.
    pub const GENERIC_FAILURE: OutcomeCode =
        OutcomeCode::baseline(1, "Batch completed with errors");
    /// Run terminated by an unclassified failure.
    pub const ABORTED: OutcomeCode = OutcomeCode::baseline(2, "Batch aborted");
    /// Configuration, authorization or security problem.
    pub const CONFIG_ERROR: OutcomeCode =
        OutcomeCode::baseline(3, "Batch configuration error");
    /// Run was aborted on request. Only set explicitly by a job body or by
    /// an opted-in resolve policy.
    pub const MANUAL_ABORT: OutcomeCode = OutcomeCode::baseline(4, "Batch aborted manually");
    /// Run exceeded its maximum runtime.
    pub const TIMEOUT: OutcomeCode =
        OutcomeCode::baseline(5, "Batch exceeded its maximum runtime");

    pub const BASELINE: [OutcomeCode; 6] = [
        OutcomeCode::OK,
        OutcomeCode::GENERIC_FAILURE,
        OutcomeCode::ABORTED,
        OutcomeCode::CONFIG_ERROR,
        OutcomeCode::MANUAL_ABORT,
        OutcomeCode::TIMEOUT,
    ];

    const fn baseline(value: i32, description: &'static str) -> Self {
        Self {
            value,
            description: Cow::Borrowed(description),
        }
    }

    /// Job-specific code. Use [`OutcomeCatalog`] to keep values unique.
    pub fn new(value: i32, description: impl Into<String>) -> Self {
        Self {
            value,
            description: Cow::Owned(description.into()),
        }
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_ok(&self) -> bool {
        self.value == 0
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.value, self.description)
    }
}

/// The baseline codes extended by job-specific codes from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeCatalog {
    codes: BTreeMap<i32, OutcomeCode>,
}

impl Default for OutcomeCatalog {
    fn default() -> Self {
        Self {
            codes: OutcomeCode::BASELINE
                .into_iter()
                .map(|code| (code.value, code))
                .collect(),
        }
    }
}

impl OutcomeCatalog {
    /// Add a job-specific code. Baseline values are reserved; redefining a
    /// job-specific value replaces its description.
    pub fn register(&mut self, code: OutcomeCode) -> Result<()> {
        if OutcomeCode::BASELINE.iter().any(|b| b.value == code.value) {
            bail!(
                "outcome code {} is reserved for '{}'",
                code.value,
                self.codes[&code.value].description
            );
        }
        self.codes.insert(code.value, code);
        Ok(())
    }

    pub fn get(&self, value: i32) -> Option<&OutcomeCode> {
        self.codes.get(&value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutcomeCode> {
        self.codes.values()
    }
}
