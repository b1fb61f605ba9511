//! Job body that runs an external command and translates its stdout
//! directives into protocol entries.
//!
//! Recognized stdout lines (anything else is ignored):
//!
//! ```text
//! INFO <id> <text>       append an INFO message
//! WARNING <id> <text>    append a WARNING message
//! ERROR <id> <text>      append an ERROR message
//! STAT <id> <value>      register a statistics entry with a `value` counter
//! CODE <value>           pre-declare the run's outcome code
//! ABORT [reason]         mark the run as aborted
//! ```

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::core::failure::RunFailure;
use crate::core::outcome::OutcomeCatalog;
use crate::core::types::{CounterValue, Message, MessageKind, StatisticsEntry};
use crate::io::config::{ConfigError, PropertyStore, keys};
use crate::io::process::run_command;
use crate::protocol::ResultProtocol;
use crate::supervisor::BatchJob;

/// Classification id for failures of the command itself.
pub const COMMAND_CLASSIFICATION_ID: &str = "COMMAND";

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

const DIRECTIVE_PATTERN: &str = r"^(INFO|WARNING|ERROR|STAT|CODE|ABORT)(?:\s+(\S+))?(?:\s+(.*))?$";

pub struct CommandJob {
    program: String,
    args: Vec<String>,
    max_runtime: Option<Duration>,
    output_limit_bytes: usize,
    catalog: OutcomeCatalog,
    directive: Regex,
}

impl CommandJob {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("command must not be empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            max_runtime: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            catalog: OutcomeCatalog::default(),
            directive: Regex::new(DIRECTIVE_PATTERN).context("compile directive pattern")?,
        })
    }

    /// Apply `max_runtime_secs` and the outcome catalog from configuration.
    pub fn configure(mut self, config: &PropertyStore) -> Result<Self, ConfigError> {
        self.catalog = config.outcome_catalog()?;
        if config.contains(keys::MAX_RUNTIME_SECS) {
            let secs = config.get_i64(keys::MAX_RUNTIME_SECS)?;
            let secs = u64::try_from(secs).map_err(|_| ConfigError::InvalidValue {
                key: keys::MAX_RUNTIME_SECS.to_string(),
                value: secs.to_string(),
                expected: "a non-negative number of seconds",
            })?;
            self.max_runtime = Some(Duration::from_secs(secs));
        }
        Ok(self)
    }

    pub fn with_max_runtime(mut self, max_runtime: Option<Duration>) -> Self {
        self.max_runtime = max_runtime;
        self
    }

    pub fn with_catalog(mut self, catalog: OutcomeCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    fn apply_line(&self, protocol: &mut ResultProtocol, line: &str) -> Result<(), RunFailure> {
        let Some(caps) = self.directive.captures(line.trim_end()) else {
            debug!(line, "ignoring non-directive output");
            return Ok(());
        };
        let keyword = &caps[1];
        let first = caps.get(2).map(|m| m.as_str());
        let rest = caps.get(3).map_or("", |m| m.as_str());

        match (keyword, first) {
            ("INFO", Some(id)) => protocol.append_message(Message::new(id, MessageKind::Info, rest))?,
            ("WARNING", Some(id)) => {
                protocol.append_message(Message::new(id, MessageKind::Warning, rest))?;
            }
            ("ERROR", Some(id)) => {
                protocol.append_message(Message::new(id, MessageKind::Error, rest))?;
            }
            ("STAT", Some(id)) => {
                protocol.register_statistics_entry(
                    StatisticsEntry::new(id).with_counter("value", parse_counter(rest)),
                );
            }
            ("CODE", Some(raw)) => {
                let code = raw
                    .parse::<i32>()
                    .ok()
                    .and_then(|value| self.catalog.get(value))
                    .ok_or_else(|| {
                        RunFailure::execution(
                            COMMAND_CLASSIFICATION_ID,
                            format!("unknown outcome code '{raw}'"),
                        )
                    })?;
                protocol.set_outcome_code(code.clone());
            }
            ("ABORT", reason) => {
                let reason = match (reason, rest) {
                    (Some(first), "") => first.to_string(),
                    (Some(first), rest) => format!("{first} {rest}"),
                    (None, _) => "no reason given".to_string(),
                };
                warn!(reason = %reason, "command requested abort");
                protocol.set_aborted(true);
            }
            _ => debug!(line, "ignoring incomplete directive"),
        }
        Ok(())
    }
}

impl BatchJob for CommandJob {
    fn run(&mut self, protocol: &mut ResultProtocol) -> Result<(), RunFailure> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        info!(program = %self.program, args = ?self.args, "running command");

        let output = run_command(cmd, self.max_runtime, self.output_limit_bytes)?;
        for line in &output.stdout_lines {
            self.apply_line(protocol, line)?;
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim_end(), "command stderr");
        }

        if output.timed_out {
            protocol.set_max_runtime_exceeded(true);
            return Ok(());
        }
        if !output.status.success() {
            return Err(RunFailure::execution(
                COMMAND_CLASSIFICATION_ID,
                format!("{} exited with {}", self.program, output.status),
            ));
        }
        Ok(())
    }
}

fn parse_counter(raw: &str) -> CounterValue {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i64>() {
        CounterValue::Int(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        CounterValue::Float(v)
    } else {
        CounterValue::Text(raw.to_string())
    }
}
