//! Batch outcome and result-protocol engine.
//!
//! One supervised batch run collects statistics and diagnostic messages in a
//! [`protocol::ResultProtocol`], classifies any escaping failure, and resolves
//! a single outcome code that the host uses as its exit status. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (outcome codes, resolution,
//!   failure classification, statistics ranking). No I/O.
//! - **[`io`]**: Side-effecting operations (configuration, protocol sink,
//!   child processes).
//!
//! Orchestration modules ([`protocol`], [`report`], [`supervisor`],
//! [`command_job`]) coordinate core logic with I/O for one run.

pub mod command_job;
pub mod core;
pub mod io;
pub mod logging;
pub mod protocol;
pub mod report;
pub mod supervisor;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
