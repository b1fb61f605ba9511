//! Protocol sink: the durable record of a run's start, messages,
//! statistics and outcome.
//!
//! The default sink writes one JSON object per line, tagged by `record`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::core::outcome::OutcomeCode;
use crate::core::types::{Message, StatisticsEntry};

/// Record-level interface the result protocol drives.
///
/// Call order for one run: start, zero or more (message, flush), statistics,
/// end, return code, close.
pub trait ProtocolWriter {
    fn write_start(
        &mut self,
        batch_id: &str,
        started_at: DateTime<Utc>,
        parameters: &[String],
    ) -> Result<()>;
    fn write_message(&mut self, message: &Message) -> Result<()>;
    fn write_statistics(&mut self, entries: &[&StatisticsEntry]) -> Result<()>;
    fn write_end(&mut self, ended_at: DateTime<Utc>) -> Result<()>;
    fn write_return_code(&mut self, code: &OutcomeCode) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum ProtocolRecord<'a> {
    Start {
        batch_id: &'a str,
        started_at: DateTime<Utc>,
        parameters: &'a [String],
    },
    Message(&'a Message),
    Statistics {
        entries: &'a [&'a StatisticsEntry],
    },
    End {
        ended_at: DateTime<Utc>,
    },
    ReturnCode(&'a OutcomeCode),
}

/// JSON-lines protocol sink backed by any writer (a file by default).
pub struct JsonLinesWriter<W: Write = File> {
    path: Option<PathBuf>,
    out: Option<BufWriter<W>>,
}

impl JsonLinesWriter<File> {
    /// Create (truncate) the sink file, creating parent directories.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create protocol dir {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("create protocol file {}", path.display()))?;
        debug!(path = %path.display(), "protocol file created");
        Ok(Self {
            path: Some(path.to_path_buf()),
            out: Some(BufWriter::new(file)),
        })
    }
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn from_writer(inner: W) -> Self {
        Self {
            path: None,
            out: Some(BufWriter::new(inner)),
        }
    }

    fn target(&self) -> String {
        self.path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<stream>".to_string())
    }

    fn write_record(&mut self, record: &ProtocolRecord<'_>) -> Result<()> {
        let target = self.target();
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| anyhow!("protocol {target} already closed"))?;
        let mut line = serde_json::to_string(record).context("serialize protocol record")?;
        line.push('\n');
        out.write_all(line.as_bytes())
            .with_context(|| format!("write protocol {target}"))
    }
}

impl<W: Write> ProtocolWriter for JsonLinesWriter<W> {
    fn write_start(
        &mut self,
        batch_id: &str,
        started_at: DateTime<Utc>,
        parameters: &[String],
    ) -> Result<()> {
        self.write_record(&ProtocolRecord::Start {
            batch_id,
            started_at,
            parameters,
        })
    }

    fn write_message(&mut self, message: &Message) -> Result<()> {
        self.write_record(&ProtocolRecord::Message(message))
    }

    fn write_statistics(&mut self, entries: &[&StatisticsEntry]) -> Result<()> {
        self.write_record(&ProtocolRecord::Statistics { entries })
    }

    fn write_end(&mut self, ended_at: DateTime<Utc>) -> Result<()> {
        self.write_record(&ProtocolRecord::End { ended_at })
    }

    fn write_return_code(&mut self, code: &OutcomeCode) -> Result<()> {
        self.write_record(&ProtocolRecord::ReturnCode(code))
    }

    fn flush(&mut self) -> Result<()> {
        let target = self.target();
        match self.out.as_mut() {
            Some(out) => out
                .flush()
                .with_context(|| format!("flush protocol {target}")),
            None => Err(anyhow!("protocol {target} already closed")),
        }
    }

    fn close(&mut self) -> Result<()> {
        let target = self.target();
        let mut out = self
            .out
            .take()
            .ok_or_else(|| anyhow!("protocol {target} already closed"))?;
        out.flush()
            .with_context(|| format!("flush protocol {target}"))?;
        debug!(target = %target, "protocol closed");
        Ok(())
    }
}
