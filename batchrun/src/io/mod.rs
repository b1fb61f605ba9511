//! Side-effecting helpers: configuration, protocol sink, child processes.

pub mod config;
pub mod process;
pub mod protocol_writer;
