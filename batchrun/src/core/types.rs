//! Value records collected during a batch run.
//!
//! These types carry no behavior beyond construction and accessors so that
//! the protocol, the writer and the tests can share them freely.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::text::single_line;

/// Severity of a processing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Info,
    Warning,
    Error,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Info => "INFO",
            MessageKind::Warning => "WARNING",
            MessageKind::Error => "ERROR",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A processing message appended to the result protocol.
///
/// The text is always a single logical line: line breaks are neutralized on
/// construction, so every stored or emitted message is already safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    classification_id: String,
    kind: MessageKind,
    text: String,
}

impl Message {
    pub fn new(
        classification_id: impl Into<String>,
        kind: MessageKind,
        text: impl AsRef<str>,
    ) -> Self {
        Self {
            classification_id: classification_id.into(),
            kind,
            text: single_line(text.as_ref()),
        }
    }

    pub fn info(classification_id: impl Into<String>, text: impl AsRef<str>) -> Self {
        Self::new(classification_id, MessageKind::Info, text)
    }

    pub fn warning(classification_id: impl Into<String>, text: impl AsRef<str>) -> Self {
        Self::new(classification_id, MessageKind::Warning, text)
    }

    pub fn error(classification_id: impl Into<String>, text: impl AsRef<str>) -> Self {
        Self::new(classification_id, MessageKind::Error, text)
    }

    pub fn classification_id(&self) -> &str {
        &self.classification_id
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }
}

/// A single counter value inside a statistics entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CounterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for CounterValue {
    fn from(value: i64) -> Self {
        CounterValue::Int(value)
    }
}

impl From<f64> for CounterValue {
    fn from(value: f64) -> Self {
        CounterValue::Float(value)
    }
}

impl From<&str> for CounterValue {
    fn from(value: &str) -> Self {
        CounterValue::Text(value.to_string())
    }
}

impl From<String> for CounterValue {
    fn from(value: String) -> Self {
        CounterValue::Text(value)
    }
}

impl fmt::Display for CounterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterValue::Int(v) => write!(f, "{v}"),
            CounterValue::Float(v) => write!(f, "{v}"),
            CounterValue::Text(v) => f.write_str(v),
        }
    }
}

/// A named, ranked record collected for the final report.
///
/// `rank == 0` asks the protocol to assign the next free rank on registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsEntry {
    pub id: String,
    pub rank: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, CounterValue>,
}

impl StatisticsEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rank: 0,
            counters: BTreeMap::new(),
        }
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_counter(mut self, name: impl Into<String>, value: impl Into<CounterValue>) -> Self {
        self.counters.insert(name.into(), value.into());
        self
    }

    pub fn set_counter(&mut self, name: impl Into<String>, value: impl Into<CounterValue>) {
        self.counters.insert(name.into(), value.into());
    }

    pub fn counter(&self, name: &str) -> Option<&CounterValue> {
        self.counters.get(name)
    }

    /// Add `delta` to an integer counter, starting from zero when absent.
    ///
    /// Non-integer values are replaced.
    pub fn increment(&mut self, name: &str, delta: i64) {
        let next = match self.counters.get(name) {
            Some(CounterValue::Int(current)) => current + delta,
            _ => delta,
        };
        self.set_counter(name, next);
    }
}
