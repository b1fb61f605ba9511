//! Test-only protocol writers.

use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};

use crate::core::outcome::OutcomeCode;
use crate::core::types::{Message, MessageKind, StatisticsEntry};
use crate::io::protocol_writer::ProtocolWriter;

/// One observed writer call, reduced to the fields tests assert on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterCall {
    Start {
        batch_id: String,
        parameters: Vec<String>,
    },
    Message {
        classification_id: String,
        kind: MessageKind,
        text: String,
    },
    Statistics {
        ids: Vec<String>,
    },
    End,
    ReturnCode {
        value: i32,
    },
    Flush,
    Close,
}

/// Writer that records every call. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingWriter {
    calls: Arc<Mutex<Vec<WriterCall>>>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<WriterCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(&self, call: WriterCall) -> Result<()> {
        match self.calls.lock() {
            Ok(mut calls) => {
                calls.push(call);
                Ok(())
            }
            Err(_) => bail!("recording writer poisoned"),
        }
    }
}

impl ProtocolWriter for RecordingWriter {
    fn write_start(
        &mut self,
        batch_id: &str,
        _started_at: DateTime<Utc>,
        parameters: &[String],
    ) -> Result<()> {
        self.push(WriterCall::Start {
            batch_id: batch_id.to_string(),
            parameters: parameters.to_vec(),
        })
    }

    fn write_message(&mut self, message: &Message) -> Result<()> {
        self.push(WriterCall::Message {
            classification_id: message.classification_id().to_string(),
            kind: message.kind(),
            text: message.text().to_string(),
        })
    }

    fn write_statistics(&mut self, entries: &[&StatisticsEntry]) -> Result<()> {
        self.push(WriterCall::Statistics {
            ids: entries.iter().map(|e| e.id.clone()).collect(),
        })
    }

    fn write_end(&mut self, _ended_at: DateTime<Utc>) -> Result<()> {
        self.push(WriterCall::End)
    }

    fn write_return_code(&mut self, code: &OutcomeCode) -> Result<()> {
        self.push(WriterCall::ReturnCode {
            value: code.value(),
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.push(WriterCall::Flush)
    }

    fn close(&mut self) -> Result<()> {
        self.push(WriterCall::Close)
    }
}

/// Writer operation selector for [`FailingWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterOp {
    Start,
    Message,
    Statistics,
    End,
    ReturnCode,
    Flush,
    Close,
}

/// Writer that accepts every call except the selected operation.
#[derive(Debug, Clone)]
pub struct FailingWriter {
    fail_on: WriterOp,
    inner: RecordingWriter,
}

impl FailingWriter {
    pub fn on(fail_on: WriterOp) -> Self {
        Self {
            fail_on,
            inner: RecordingWriter::new(),
        }
    }

    /// Calls that succeeded before (and after) the injected failure.
    pub fn recorded(&self) -> RecordingWriter {
        self.inner.clone()
    }

    fn check(&self, op: WriterOp) -> Result<()> {
        if op == self.fail_on {
            bail!("injected {op:?} failure: sink unavailable (write {})", op_name(op));
        }
        Ok(())
    }
}

fn op_name(op: WriterOp) -> &'static str {
    match op {
        WriterOp::Start => "start",
        WriterOp::Message => "message",
        WriterOp::Statistics => "statistics",
        WriterOp::End => "end",
        WriterOp::ReturnCode => "return code",
        WriterOp::Flush => "flush",
        WriterOp::Close => "close",
    }
}

impl ProtocolWriter for FailingWriter {
    fn write_start(
        &mut self,
        batch_id: &str,
        started_at: DateTime<Utc>,
        parameters: &[String],
    ) -> Result<()> {
        self.check(WriterOp::Start)?;
        self.inner.write_start(batch_id, started_at, parameters)
    }

    fn write_message(&mut self, message: &Message) -> Result<()> {
        self.check(WriterOp::Message)?;
        self.inner.write_message(message)
    }

    fn write_statistics(&mut self, entries: &[&StatisticsEntry]) -> Result<()> {
        self.check(WriterOp::Statistics)?;
        self.inner.write_statistics(entries)
    }

    fn write_end(&mut self, ended_at: DateTime<Utc>) -> Result<()> {
        self.check(WriterOp::End)?;
        self.inner.write_end(ended_at)
    }

    fn write_return_code(&mut self, code: &OutcomeCode) -> Result<()> {
        self.check(WriterOp::ReturnCode)?;
        self.inner.write_return_code(code)
    }

    fn flush(&mut self) -> Result<()> {
        self.check(WriterOp::Flush)?;
        self.inner.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.check(WriterOp::Close)?;
        self.inner.close()
    }
}
