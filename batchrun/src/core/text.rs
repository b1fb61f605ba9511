//! Single-line rendering for messages and failure diagnostics.

use std::backtrace::BacktraceStatus;
use std::error::Error;

/// Delimiter that replaces every line break in a neutralized string.
pub const LINE_DELIMITER: &str = " | ";

/// Replace every `\n` (optionally preceded by `\r`) with [`LINE_DELIMITER`].
///
/// A lone `\r` is left untouched.
pub fn single_line(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', LINE_DELIMITER)
}

/// Render an error and its full cause chain as a multi-line diagnostic.
///
/// Layout follows the familiar `Caused by:` form. A captured backtrace, when
/// one is supplied and was actually recorded, is appended at the end.
pub fn render_diagnostic(
    err: &(dyn Error + 'static),
    backtrace: Option<&std::backtrace::Backtrace>,
) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    if source.is_some() {
        out.push_str("\n\nCaused by:");
    }
    let mut depth = 0;
    while let Some(cause) = source {
        out.push_str(&format!("\n    {depth}: {cause}"));
        source = cause.source();
        depth += 1;
    }
    if let Some(bt) = backtrace.filter(|bt| bt.status() == BacktraceStatus::Captured) {
        out.push_str("\n\nStack backtrace:\n");
        out.push_str(bt.to_string().trim_end());
    }
    out
}
