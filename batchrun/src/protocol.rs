//! Result protocol: run-scoped state for one supervised batch run.
//!
//! The supervisor creates one `ResultProtocol` per run and passes it by
//! mutable reference to the job body and the error reporter. Every mutation
//! goes through `&mut self`, so registration and message appends are already
//! exclusive; wrap the protocol in a `Mutex` to share it between workers.
//!
//! Lifecycle: [`ResultProtocol::start`] once, any number of statistics and
//! messages, [`ResultProtocol::set_resolved_outcome`], then
//! [`ResultProtocol::finish`], which consumes the protocol.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::outcome::OutcomeCode;
use crate::core::resolver::OutcomeFlags;
use crate::core::statistics::Statistics;
use crate::core::types::{Message, StatisticsEntry};
use crate::io::protocol_writer::ProtocolWriter;

pub type BoxedWriter = Box<dyn ProtocolWriter + Send>;

pub struct ResultProtocol {
    writer: Option<BoxedWriter>,
    started_at: Option<DateTime<Utc>>,
    batch_id: Option<String>,
    parameters: Vec<String>,
    statistics: Statistics,
    messages: Vec<Message>,
    has_error_message: bool,
    aborted: bool,
    max_runtime_exceeded: bool,
    explicit_code: Option<OutcomeCode>,
    resolved_code: Option<OutcomeCode>,
}

/// Frozen view of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub batch_id: Option<String>,
    pub parameters: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub statistics: Vec<StatisticsEntry>,
    pub messages: Vec<Message>,
    pub has_error_message: bool,
    pub aborted: bool,
    pub max_runtime_exceeded: bool,
    pub outcome: OutcomeCode,
}

impl RunReport {
    pub fn duration_ms(&self) -> Option<i64> {
        self.started_at
            .map(|start| (self.ended_at - start).num_milliseconds())
    }
}

impl ResultProtocol {
    /// Protocol bound to `writer`, or purely in-memory when `None`.
    pub fn new(writer: Option<BoxedWriter>) -> Self {
        Self {
            writer,
            started_at: None,
            batch_id: None,
            parameters: Vec::new(),
            statistics: Statistics::new(),
            messages: Vec::new(),
            has_error_message: false,
            aborted: false,
            max_runtime_exceeded: false,
            explicit_code: None,
            resolved_code: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn with_writer<W: ProtocolWriter + Send + 'static>(writer: W) -> Self {
        Self::new(Some(Box::new(writer)))
    }

    pub fn has_writer(&self) -> bool {
        self.writer.is_some()
    }

    /// Record the start of the run and emit the start record.
    ///
    /// # Panics
    /// If the protocol was already started.
    pub fn start(&mut self, batch_id: impl Into<String>, parameters: Vec<String>) -> Result<()> {
        assert!(self.started_at.is_none(), "result protocol already started");
        let batch_id = batch_id.into();
        let started_at = Utc::now();
        self.started_at = Some(started_at);
        self.parameters = parameters;
        info!(batch_id = %batch_id, parameters = ?self.parameters, "batch started");
        if self.writer.is_none() {
            warn!(batch_id = %batch_id, "no protocol sink bound, keeping result protocol in memory");
        }
        let batch_id = self.batch_id.insert(batch_id);
        if let Some(writer) = self.writer.as_mut() {
            writer.write_start(batch_id, started_at, &self.parameters)?;
        }
        Ok(())
    }

    /// Register `entry`, assigning the next rank when its rank is zero.
    /// Returns the stored rank.
    pub fn register_statistics_entry(&mut self, entry: StatisticsEntry) -> u32 {
        let id = entry.id.clone();
        let rank = self.statistics.register(entry);
        debug!(id = %id, rank, "statistics entry registered");
        rank
    }

    pub fn statistics_entry(&self, id: &str) -> Option<&StatisticsEntry> {
        self.statistics.get(id)
    }

    /// Snapshot of all entries ordered by rank, then id.
    pub fn statistics_sorted(&self) -> std::vec::IntoIter<&StatisticsEntry> {
        self.statistics.sorted()
    }

    /// Append a message and, when a sink is bound, write and flush it at once.
    ///
    /// An ERROR message marks the run as failed for the rest of its lifetime.
    /// Sink failures propagate to the caller; the message stays recorded in
    /// memory either way.
    pub fn append_message(&mut self, message: Message) -> Result<()> {
        if message.is_error() {
            self.has_error_message = true;
        }
        debug!(
            classification_id = message.classification_id(),
            kind = %message.kind(),
            "message appended"
        );
        let written = match self.writer.as_mut() {
            Some(writer) => writer.write_message(&message).and_then(|()| writer.flush()),
            None => Ok(()),
        };
        self.messages.push(message);
        written
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_error_message(&self) -> bool {
        self.has_error_message
    }

    /// Pre-declare the code used when no timeout or error applies.
    pub fn set_outcome_code(&mut self, code: OutcomeCode) {
        self.explicit_code = Some(code);
    }

    pub fn outcome_code(&self) -> Option<&OutcomeCode> {
        self.explicit_code.as_ref()
    }

    pub fn set_aborted(&mut self, aborted: bool) {
        self.aborted = aborted;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn set_max_runtime_exceeded(&mut self, exceeded: bool) {
        self.max_runtime_exceeded = exceeded;
    }

    pub fn is_max_runtime_exceeded(&self) -> bool {
        self.max_runtime_exceeded
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.batch_id.as_deref()
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn outcome_flags(&self) -> OutcomeFlags {
        OutcomeFlags {
            max_runtime_exceeded: self.max_runtime_exceeded,
            has_error_message: self.has_error_message,
            aborted: self.aborted,
            explicit_code: self.explicit_code.clone(),
        }
    }

    /// Record the final outcome code.
    ///
    /// # Panics
    /// If a resolved code was already set.
    pub fn set_resolved_outcome(&mut self, code: OutcomeCode) {
        assert!(
            self.resolved_code.is_none(),
            "resolved outcome code already set"
        );
        self.resolved_code = Some(code);
    }

    pub fn resolved_outcome(&self) -> Option<&OutcomeCode> {
        self.resolved_code.as_ref()
    }

    /// Freeze the end time, emit statistics, end and return-code records,
    /// then close the sink.
    ///
    /// The resolved outcome code must be set beforehand. A sink failure does
    /// not stop the remaining records or the close; the first error is
    /// returned once the sink is closed.
    pub fn finish(mut self) -> Result<RunReport> {
        let outcome = self
            .resolved_code
            .take()
            .ok_or_else(|| anyhow!("resolved outcome code must be set before finish"))?;
        let now = Utc::now();
        let ended_at = match self.started_at {
            Some(start) if now < start => start,
            _ => now,
        };

        let statistics: Vec<StatisticsEntry> =
            self.statistics.sorted().cloned().collect();
        if let Some(mut writer) = self.writer.take() {
            let refs: Vec<&StatisticsEntry> = statistics.iter().collect();
            // Every closing record is attempted and the sink is always closed.
            let steps = [
                writer.write_statistics(&refs),
                writer.write_end(ended_at),
                writer.write_return_code(&outcome),
                writer.close(),
            ];
            if let Some(err) = steps.into_iter().find_map(Result::err) {
                warn!(code = outcome.value(), error = %format!("{err:#}"), "protocol sink failed while finishing");
                return Err(err);
            }
        }

        let report = RunReport {
            batch_id: self.batch_id,
            parameters: self.parameters,
            started_at: self.started_at,
            ended_at,
            statistics,
            messages: self.messages,
            has_error_message: self.has_error_message,
            aborted: self.aborted,
            max_runtime_exceeded: self.max_runtime_exceeded,
            outcome,
        };
        info!(
            batch_id = ?report.batch_id,
            code = report.outcome.value(),
            duration_ms = ?report.duration_ms(),
            "batch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MessageKind;
    use crate::test_support::{FailingWriter, RecordingWriter, WriterCall, WriterOp};

    #[test]
    fn error_message_flag_is_monotonic() {
        let mut protocol = ResultProtocol::in_memory();
        protocol.start("B1", Vec::new()).expect("start");
        assert!(!protocol.has_error_message());
        protocol
            .append_message(Message::warning("W1", "slow"))
            .expect("append");
        assert!(!protocol.has_error_message());
        protocol
            .append_message(Message::error("E1", "disk full"))
            .expect("append");
        protocol
            .append_message(Message::info("I1", "continuing"))
            .expect("append");
        protocol
            .append_message(Message::warning("W2", "still slow"))
            .expect("append");
        assert!(protocol.has_error_message());
        assert_eq!(protocol.messages().len(), 4);
    }

    #[test]
    fn registration_assigns_ranks_through_protocol() {
        let mut protocol = ResultProtocol::in_memory();
        assert_eq!(protocol.register_statistics_entry(StatisticsEntry::new("rows")), 1);
        assert_eq!(
            protocol.register_statistics_entry(StatisticsEntry::new("errors")),
            2
        );
        assert_eq!(protocol.register_statistics_entry(StatisticsEntry::new("rows")), 3);
        let ids: Vec<&str> = protocol
            .statistics_sorted()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["errors", "rows"]);
        assert!(protocol.statistics_entry("missing").is_none());
    }

    #[test]
    fn emits_records_in_lifecycle_order() {
        let writer = RecordingWriter::new();
        let mut protocol = ResultProtocol::with_writer(writer.clone());
        protocol
            .start("B1", vec!["-start".to_string()])
            .expect("start");
        protocol.register_statistics_entry(StatisticsEntry::new("rows"));
        protocol
            .append_message(Message::error("E1", "disk full"))
            .expect("append");
        protocol.set_resolved_outcome(OutcomeCode::GENERIC_FAILURE);
        protocol.finish().expect("finish");

        assert_eq!(
            writer.calls(),
            vec![
                WriterCall::Start {
                    batch_id: "B1".to_string(),
                    parameters: vec!["-start".to_string()],
                },
                WriterCall::Message {
                    classification_id: "E1".to_string(),
                    kind: MessageKind::Error,
                    text: "disk full".to_string(),
                },
                WriterCall::Flush,
                WriterCall::Statistics {
                    ids: vec!["rows".to_string()],
                },
                WriterCall::End,
                WriterCall::ReturnCode { value: 1 },
                WriterCall::Close,
            ]
        );
    }

    #[test]
    fn finish_freezes_end_after_start() {
        let mut protocol = ResultProtocol::in_memory();
        protocol.start("B1", Vec::new()).expect("start");
        protocol.set_resolved_outcome(OutcomeCode::OK);
        let report = protocol.finish().expect("finish");
        let started = report.started_at.expect("started");
        assert!(report.ended_at >= started);
        assert!(report.duration_ms().expect("duration") >= 0);
    }

    #[test]
    fn finish_requires_resolved_code() {
        let protocol = ResultProtocol::in_memory();
        let err = protocol.finish().expect_err("missing code");
        assert!(err.to_string().contains("resolved outcome code"));
    }

    #[test]
    #[should_panic(expected = "already started")]
    fn start_twice_panics() {
        let mut protocol = ResultProtocol::in_memory();
        protocol.start("B1", Vec::new()).expect("start");
        let _ = protocol.start("B1", Vec::new());
    }

    #[test]
    #[should_panic(expected = "already set")]
    fn resolved_code_is_set_once() {
        let mut protocol = ResultProtocol::in_memory();
        protocol.set_resolved_outcome(OutcomeCode::OK);
        protocol.set_resolved_outcome(OutcomeCode::TIMEOUT);
    }

    #[test]
    fn sink_failure_on_append_propagates_but_keeps_message() {
        let mut protocol = ResultProtocol::with_writer(FailingWriter::on(WriterOp::Message));
        protocol.start("B1", Vec::new()).expect("start");
        let err = protocol
            .append_message(Message::error("E1", "disk full"))
            .expect_err("sink failure");
        assert!(err.to_string().contains("message"));
        assert!(protocol.has_error_message());
        assert_eq!(protocol.messages().len(), 1);
    }

    #[test]
    fn in_memory_protocol_reports_everything() {
        let mut protocol = ResultProtocol::in_memory();
        assert!(!protocol.has_writer());
        protocol.start("B1", vec!["a".to_string()]).expect("start");
        protocol.set_aborted(true);
        protocol.set_outcome_code(OutcomeCode::new(10, "Partial"));
        let flags = protocol.outcome_flags();
        assert!(flags.aborted);
        assert_eq!(flags.explicit_code.map(|c| c.value()), Some(10));
        protocol.set_resolved_outcome(OutcomeCode::OK);
        let report = protocol.finish().expect("finish");
        assert_eq!(report.batch_id.as_deref(), Some("B1"));
        assert_eq!(report.parameters, vec!["a"]);
        assert!(report.aborted);
        assert_eq!(report.outcome, OutcomeCode::OK);
    }

    fn finish_with_failing(op: WriterOp) -> (anyhow::Error, Vec<WriterCall>) {
        let writer = FailingWriter::on(op);
        let recorded = writer.recorded();
        let mut protocol = ResultProtocol::with_writer(writer);
        protocol.start("B1", Vec::new()).expect("start");
        protocol.register_statistics_entry(StatisticsEntry::new("rows"));
        protocol.set_resolved_outcome(OutcomeCode::OK);
        let err = protocol.finish().expect_err("sink failure");
        (err, recorded.calls())
    }

    #[test]
    fn statistics_failure_still_writes_remaining_records_and_closes() {
        let (err, calls) = finish_with_failing(WriterOp::Statistics);
        assert!(err.to_string().contains("Statistics"));
        assert_eq!(
            &calls[1..],
            [
                WriterCall::End,
                WriterCall::ReturnCode { value: 0 },
                WriterCall::Close,
            ]
        );
    }

    #[test]
    fn end_failure_still_closes_sink_once() {
        let (err, calls) = finish_with_failing(WriterOp::End);
        assert!(err.to_string().contains("End"));
        assert_eq!(calls.last(), Some(&WriterCall::Close));
        assert_eq!(calls.iter().filter(|c| **c == WriterCall::Close).count(), 1);
        assert!(calls.contains(&WriterCall::ReturnCode { value: 0 }));
    }
}
