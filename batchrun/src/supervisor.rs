//! One supervised batch run, end to end.
//!
//! Configuration, protocol sink, start, job body, failure classification,
//! outcome resolution, finish and the exit-code summary line all happen
//! inside [`Supervisor::run`], which never fails: every problem ends up as an
//! outcome code.

use std::any::Any;
use std::io::{self, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use anyhow::{Context, anyhow};
use tracing::{info, warn};

use crate::core::failure::RunFailure;
use crate::core::outcome::OutcomeCode;
use crate::core::resolver::{ResolvePolicy, Termination};
use crate::io::config::{PropertyStore, keys};
use crate::io::protocol_writer::JsonLinesWriter;
use crate::logging::LogHandle;
use crate::protocol::{BoxedWriter, ResultProtocol, RunReport};
use crate::report::ErrorReporter;

/// Classification id for failures of the protocol sink itself.
pub const PROTOCOL_CLASSIFICATION_ID: &str = "PROTOCOL";

/// Job body executed between `start` and `finish`.
pub trait BatchJob {
    fn run(&mut self, protocol: &mut ResultProtocol) -> Result<(), RunFailure>;
}

impl<F> BatchJob for F
where
    F: FnMut(&mut ResultProtocol) -> Result<(), RunFailure>,
{
    fn run(&mut self, protocol: &mut ResultProtocol) -> Result<(), RunFailure> {
        self(protocol)
    }
}

/// Result of [`Supervisor::run`].
#[derive(Debug, Clone)]
pub struct SupervisedRun {
    pub code: OutcomeCode,
    /// Absent when the run failed before a protocol existed, or when
    /// finishing the protocol failed.
    pub report: Option<RunReport>,
}

pub struct Supervisor<'a, E: Write = io::Stderr, O: Write = io::Stdout> {
    log: Option<&'a LogHandle>,
    stderr: E,
    stdout: O,
}

impl<'a> Supervisor<'a> {
    pub fn new(log: Option<&'a LogHandle>) -> Self {
        Self::with_streams(log, io::stderr(), io::stdout())
    }
}

impl<'a, E: Write, O: Write> Supervisor<'a, E, O> {
    pub fn with_streams(log: Option<&'a LogHandle>, stderr: E, stdout: O) -> Self {
        Self {
            log,
            stderr,
            stdout,
        }
    }

    pub fn into_streams(self) -> (E, O) {
        (self.stderr, self.stdout)
    }

    /// Run `job` under `config` and print the `"<value>: <description>"`
    /// summary line to stdout.
    pub fn run<J: BatchJob + ?Sized>(
        &mut self,
        config: &PropertyStore,
        parameters: &[String],
        job: &mut J,
    ) -> SupervisedRun {
        let mut protocol: Option<ResultProtocol> = None;
        let mut policy = ResolvePolicy::default();
        let attempt = (|| -> Result<(), RunFailure> {
            policy = config.resolve_policy()?;
            let batch_id = config.get_string(keys::BATCH_ID)?;
            let writer = self.open_sink(config)?;
            let protocol = protocol.insert(ResultProtocol::new(writer));
            protocol
                .start(batch_id.as_str(), parameters.to_vec())
                .map_err(protocol_failure)?;
            info!(batch_id = %batch_id, "running job body");
            catch_unwind(AssertUnwindSafe(|| job.run(protocol)))
                .unwrap_or_else(|payload| Err(panic_failure(&*payload)))
        })();

        self.conclude(protocol, Termination::from(attempt), policy)
    }

    /// Conclude a run that failed before it could be started, e.g. because
    /// the configuration could not be read.
    pub fn reject(&mut self, failure: RunFailure) -> SupervisedRun {
        self.conclude(None, Termination::Failed(failure), ResolvePolicy::default())
    }

    fn conclude(
        &mut self,
        mut protocol: Option<ResultProtocol>,
        termination: Termination,
        policy: ResolvePolicy,
    ) -> SupervisedRun {
        let mut reporter = ErrorReporter::with_stderr(self.log, &mut self.stderr);
        if let Termination::Failed(failure) = &termination {
            reporter.report(protocol.as_mut(), failure);
        }

        let flags = protocol
            .as_ref()
            .map(ResultProtocol::outcome_flags)
            .unwrap_or_default();
        let code = termination.resolve(&flags, policy);
        if code.is_ok() {
            info!(code = code.value(), "batch outcome resolved");
        } else {
            warn!(code = code.value(), description = code.description(), "batch outcome resolved");
        }

        let report = protocol.and_then(|mut protocol| {
            protocol.set_resolved_outcome(code.clone());
            match protocol.finish() {
                Ok(report) => Some(report),
                Err(err) => {
                    reporter.notice("could not finish the result protocol", &err);
                    None
                }
            }
        });

        if let Err(err) = writeln!(self.stdout, "{code}").and_then(|()| self.stdout.flush()) {
            warn!(error = %err, "could not print the outcome summary");
        }
        SupervisedRun { code, report }
    }

    fn open_sink(&mut self, config: &PropertyStore) -> Result<Option<BoxedWriter>, RunFailure> {
        let path = config.get_string_or(keys::PROTOCOL_FILE, "");
        if path.trim().is_empty() {
            return Ok(None);
        }
        let required = config.get_bool_or(keys::REQUIRE_PROTOCOL_SINK, true)?;
        match JsonLinesWriter::create(Path::new(&path))
            .with_context(|| format!("open protocol sink {path}"))
        {
            Ok(writer) => Ok(Some(Box::new(writer) as BoxedWriter)),
            Err(err) if required => Err(protocol_failure(err)),
            Err(err) => {
                ErrorReporter::with_stderr(self.log, &mut self.stderr)
                    .notice("continuing without a protocol sink", &err);
                Ok(None)
            }
        }
    }
}

/// A panicking job body is an unclassified failure like any other.
fn panic_failure(payload: &(dyn Any + Send)) -> RunFailure {
    let detail = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    RunFailure::from(anyhow!("job body panicked: {detail}"))
}

fn protocol_failure(err: anyhow::Error) -> RunFailure {
    RunFailure::framework(
        PROTOCOL_CLASSIFICATION_ID,
        OutcomeCode::ABORTED,
        format!("{err:#}"),
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;
    use crate::core::types::{Message, StatisticsEntry};

    struct Harness {
        dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dir: TempDir::new().expect("tempdir"),
            }
        }

        fn protocol_path(&self) -> std::path::PathBuf {
            self.dir.path().join("protocol.jsonl")
        }

        fn config(&self) -> PropertyStore {
            PropertyStore::new()
                .with(keys::BATCH_ID, "B1")
                .with(keys::PROTOCOL_FILE, self.protocol_path().display().to_string())
        }

        fn records(&self) -> Vec<Value> {
            fs::read_to_string(self.protocol_path())
                .expect("read protocol")
                .lines()
                .map(|line| serde_json::from_str(line).expect("json line"))
                .collect()
        }
    }

    fn run<J: BatchJob>(config: &PropertyStore, job: &mut J) -> (SupervisedRun, String, String) {
        let mut supervisor = Supervisor::with_streams(None, Vec::new(), Vec::new());
        let run = supervisor.run(config, &["--date=2024-01-31".to_string()], job);
        let (stderr, stdout) = supervisor.into_streams();
        (
            run,
            String::from_utf8(stderr).expect("utf8"),
            String::from_utf8(stdout).expect("utf8"),
        )
    }

    #[test]
    fn clean_run_resolves_ok_and_writes_full_protocol() {
        let harness = Harness::new();
        let mut job = |protocol: &mut ResultProtocol| -> Result<(), RunFailure> {
            protocol.register_statistics_entry(StatisticsEntry::new("rows").with_counter("value", 12i64));
            protocol.append_message(Message::info("I1", "done"))?;
            Ok(())
        };
        let (run, stderr, stdout) = run(&harness.config(), &mut job);

        assert_eq!(run.code, OutcomeCode::OK);
        assert_eq!(stdout, "0: Batch completed successfully\n");
        assert!(stderr.is_empty());

        let kinds: Vec<String> = harness
            .records()
            .iter()
            .map(|r| r["record"].as_str().expect("record tag").to_string())
            .collect();
        assert_eq!(
            kinds,
            vec!["start", "message", "statistics", "end", "return_code"]
        );
        let report = run.report.expect("report");
        assert_eq!(report.parameters, vec!["--date=2024-01-31"]);
        assert_eq!(report.statistics.len(), 1);
    }

    #[test]
    fn error_message_without_failure_is_generic_failure() {
        let harness = Harness::new();
        let mut job = |protocol: &mut ResultProtocol| -> Result<(), RunFailure> {
            protocol.append_message(Message::error("E1", "disk full"))?;
            Ok(())
        };
        let (run, stderr, stdout) = run(&harness.config(), &mut job);

        assert_eq!(run.code, OutcomeCode::GENERIC_FAILURE);
        assert_eq!(stdout, "1: Batch completed with errors\n");
        assert!(stderr.is_empty());

        let report = run.report.expect("report");
        assert!(report.statistics.is_empty());
        assert!(report.has_error_message);
        assert!(report.ended_at >= report.started_at.expect("started"));
    }

    #[test]
    fn escaping_execution_failure_without_code_is_aborted() {
        let harness = Harness::new();
        let mut job = |_: &mut ResultProtocol| -> Result<(), RunFailure> {
            Err(RunFailure::execution("E1", "disk full"))
        };
        let (run, stderr, stdout) = run(&harness.config(), &mut job);

        assert_eq!(run.code, OutcomeCode::ABORTED);
        assert_eq!(stdout, "2: Batch aborted\n");
        assert!(stderr.contains("disk full"));

        let report = run.report.expect("report");
        assert_eq!(report.messages.len(), 1);
        assert_eq!(report.messages[0].classification_id(), "E1");
        assert_eq!(report.outcome, OutcomeCode::ABORTED);
    }

    #[test]
    fn execution_failure_with_code_keeps_its_code() {
        let harness = Harness::new();
        let mut job = |_: &mut ResultProtocol| -> Result<(), RunFailure> {
            Err(RunFailure::execution_with_code(
                "E2",
                OutcomeCode::MANUAL_ABORT,
                "operator stopped the run",
            ))
        };
        let (run, _, _) = run(&harness.config(), &mut job);
        assert_eq!(run.code, OutcomeCode::MANUAL_ABORT);
    }

    #[test]
    fn missing_batch_id_is_config_error_without_protocol() {
        let mut job = |_: &mut ResultProtocol| -> Result<(), RunFailure> {
            panic!("job must not run without a batch id")
        };
        let (run, stderr, stdout) = run(&PropertyStore::new(), &mut job);

        assert_eq!(run.code, OutcomeCode::CONFIG_ERROR);
        assert!(run.report.is_none());
        assert!(stdout.starts_with("3: "));
        assert!(stderr.contains(keys::BATCH_ID));
    }

    #[test]
    fn panicking_job_is_aborted_and_still_finished() {
        let harness = Harness::new();
        let mut job = |protocol: &mut ResultProtocol| -> Result<(), RunFailure> {
            protocol.register_statistics_entry(StatisticsEntry::new("rows"));
            let rows: Vec<u32> = Vec::new();
            let index = protocol.statistics_sorted().len() + 2;
            let _ = rows[index];
            Ok(())
        };
        let (run, stderr, stdout) = run(&harness.config(), &mut job);

        assert_eq!(run.code, OutcomeCode::ABORTED);
        assert_eq!(stdout, "2: Batch aborted\n");
        assert!(stderr.contains("job body panicked: index out of bounds"));

        let report = run.report.expect("report");
        assert_eq!(report.statistics.len(), 1);
        assert_eq!(report.messages.len(), 1);
        let tags: Vec<String> = harness
            .records()
            .iter()
            .map(|r| r["record"].as_str().expect("record tag").to_string())
            .collect();
        assert_eq!(tags.last().map(String::as_str), Some("return_code"));
    }

    #[test]
    fn security_failure_is_config_error() {
        let harness = Harness::new();
        let mut job = |_: &mut ResultProtocol| -> Result<(), RunFailure> {
            Err(RunFailure::Security("keystore locked".into()))
        };
        let (run, _, _) = run(&harness.config(), &mut job);
        assert_eq!(run.code, OutcomeCode::CONFIG_ERROR);
        let report = run.report.expect("report");
        assert_eq!(report.messages[0].classification_id(), "ERROR");
    }

    #[test]
    fn unclassified_failure_is_aborted() {
        let harness = Harness::new();
        let mut job = |_: &mut ResultProtocol| -> Result<(), RunFailure> {
            Err(anyhow::anyhow!("index out of range").into())
        };
        let (run, _, _) = run(&harness.config(), &mut job);
        assert_eq!(run.code, OutcomeCode::ABORTED);
    }

    #[test]
    fn timeout_wins_over_errors_and_explicit_code() {
        let harness = Harness::new();
        let mut job = |protocol: &mut ResultProtocol| -> Result<(), RunFailure> {
            protocol.append_message(Message::error("E1", "late"))?;
            protocol.set_outcome_code(OutcomeCode::new(10, "Partial"));
            protocol.set_max_runtime_exceeded(true);
            Ok(())
        };
        let (run, _, stdout) = run(&harness.config(), &mut job);
        assert_eq!(run.code, OutcomeCode::TIMEOUT);
        assert!(stdout.starts_with("5: "));
    }

    #[test]
    fn abort_alone_resolves_ok_unless_policy_honors_it() {
        let harness = Harness::new();
        let mut job = |protocol: &mut ResultProtocol| -> Result<(), RunFailure> {
            protocol.set_aborted(true);
            Ok(())
        };
        let (run_default, _, _) = run(&harness.config(), &mut job);
        assert_eq!(run_default.code, OutcomeCode::OK);
        assert!(run_default.report.expect("report").aborted);

        let config = harness.config().with(keys::HONOR_MANUAL_ABORT, "true");
        let (run_honored, _, _) = run(&config, &mut job);
        assert_eq!(run_honored.code, OutcomeCode::MANUAL_ABORT);
    }

    #[test]
    fn required_sink_that_cannot_open_aborts() {
        let harness = Harness::new();
        let blocker = harness.dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").expect("write blocker");
        let config = harness
            .config()
            .with(keys::PROTOCOL_FILE, blocker.join("protocol.jsonl").display().to_string());
        let mut job = |_: &mut ResultProtocol| -> Result<(), RunFailure> {
            panic!("job must not run without its sink")
        };
        let (run, stderr, _) = run(&config, &mut job);
        assert_eq!(run.code, OutcomeCode::ABORTED);
        assert!(run.report.is_none());
        assert!(stderr.contains("open protocol sink"));
    }

    #[test]
    fn optional_sink_that_cannot_open_degrades_to_memory() {
        let harness = Harness::new();
        let blocker = harness.dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").expect("write blocker");
        let config = harness
            .config()
            .with(keys::PROTOCOL_FILE, blocker.join("protocol.jsonl").display().to_string())
            .with(keys::REQUIRE_PROTOCOL_SINK, "false");
        let mut job = |protocol: &mut ResultProtocol| -> Result<(), RunFailure> {
            protocol.register_statistics_entry(StatisticsEntry::new("rows"));
            Ok(())
        };
        let (run, stderr, _) = run(&config, &mut job);
        assert_eq!(run.code, OutcomeCode::OK);
        assert!(stderr.contains("continuing without a protocol sink"));
        assert_eq!(run.report.expect("report").statistics.len(), 1);
    }

    #[test]
    fn rejected_run_prints_summary_without_protocol() {
        let mut supervisor = Supervisor::with_streams(None, Vec::new(), Vec::new());
        let run = supervisor.reject(
            crate::io::config::ConfigError::MissingKey {
                key: "batch_id".into(),
            }
            .into(),
        );
        let (stderr, stdout) = supervisor.into_streams();
        assert_eq!(run.code, OutcomeCode::CONFIG_ERROR);
        assert!(run.report.is_none());
        assert_eq!(
            String::from_utf8(stdout).expect("utf8"),
            "3: Batch configuration error\n"
        );
        assert!(!stderr.is_empty());
    }

    #[test]
    fn no_sink_configured_runs_in_memory() {
        let config = PropertyStore::new().with(keys::BATCH_ID, "B2");
        let mut job = |protocol: &mut ResultProtocol| -> Result<(), RunFailure> {
            assert!(!protocol.has_writer());
            Ok(())
        };
        let (run, _, stdout) = run(&config, &mut job);
        assert_eq!(run.code, OutcomeCode::OK);
        assert_eq!(stdout, "0: Batch completed successfully\n");
    }
}
