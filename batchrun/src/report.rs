//! Best-effort reporting of failures at any point in a run.
//!
//! [`ErrorReporter::report`] never fails: stderr is the last resort, and a
//! failure to append the error to the result protocol is itself only printed.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::io::{self, Write};

use tracing::error;

use crate::core::failure::{GENERIC_CLASSIFICATION_ID, RunFailure};
use crate::core::text::{render_diagnostic, single_line};
use crate::core::types::Message;
use crate::logging::LogHandle;
use crate::protocol::ResultProtocol;

pub struct ErrorReporter<'a, E: Write = io::Stderr> {
    log: Option<&'a LogHandle>,
    stderr: E,
}

impl<'a> ErrorReporter<'a> {
    pub fn new(log: Option<&'a LogHandle>) -> Self {
        Self::with_stderr(log, io::stderr())
    }
}

impl<'a, E: Write> ErrorReporter<'a, E> {
    pub fn with_stderr(log: Option<&'a LogHandle>, stderr: E) -> Self {
        Self { log, stderr }
    }

    pub fn into_inner(self) -> E {
        self.stderr
    }

    /// Report `failure` to stderr, the log (if any) and the protocol (if any).
    ///
    /// 1. The full diagnostic with its stack trace, flattened to one line,
    ///    always goes to stderr. The trace is the one captured with the
    ///    failure when there is one, otherwise it is captured here.
    /// 2. With a log handle an error record is emitted; without one the
    ///    multi-line diagnostic is printed to stderr as well.
    /// 3. With a protocol the flattened line is appended as an ERROR message
    ///    under the failure's classification id (or the generic one).
    pub fn report(&mut self, protocol: Option<&mut ResultProtocol>, failure: &RunFailure) {
        let captured = Backtrace::force_capture();
        let trace = failure
            .backtrace()
            .filter(|bt| bt.status() == BacktraceStatus::Captured)
            .unwrap_or(&captured);
        let diagnostic = render_diagnostic(failure, Some(trace));
        let line = single_line(&diagnostic);
        self.print(&line);

        let classification_id = failure
            .classification_id()
            .unwrap_or(GENERIC_CLASSIFICATION_ID);

        if self.log.is_some() {
            error!(
                classification_id,
                failure = %diagnostic,
                "batch execution failed"
            );
        } else {
            self.print(&diagnostic);
        }

        if let Some(protocol) = protocol {
            if let Err(err) = protocol.append_message(Message::error(classification_id, &line)) {
                self.print(&single_line(&format!(
                    "could not write the {classification_id} error message to the result protocol: {err:#}"
                )));
            }
        }
    }

    /// Print a one-line notice that something went wrong outside the job
    /// body, e.g. while closing the protocol.
    pub fn notice(&mut self, context: &str, err: &anyhow::Error) {
        let line = single_line(&format!("{context}: {err:#}"));
        if self.log.is_some() {
            error!(error = %line, "{context}");
        }
        self.print(&line);
    }

    fn print(&mut self, line: &str) {
        // Nothing left to report to if stderr itself is gone.
        let _ = writeln!(self.stderr, "{line}");
        let _ = self.stderr.flush();
    }
}
