//! Structured logging for batch runs.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr.
//!   Not part of the run's durable record.
//!
//! - **Result protocol (`io/protocol_writer`)**: the durable per-run sink.
//!   Always written when configured, unaffected by `RUST_LOG`.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Proof that structured logging is available to the error reporter.
///
/// Without a handle, failures are printed to stderr in full instead.
#[derive(Debug, Clone, Copy)]
pub struct LogHandle {
    _private: (),
}

impl LogHandle {
    /// Handle for a subscriber the host installed on its own.
    pub fn current() -> Self {
        Self { _private: () }
    }
}

/// Install the global tracing subscriber.
///
/// Reads `RUST_LOG` env var. Defaults to `info` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=batchrun=debug batchrun --config batch.toml -- ./job.sh
/// ```
pub fn init() -> Result<LogHandle> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()
        .context("install tracing subscriber")?;
    Ok(LogHandle::current())
}
