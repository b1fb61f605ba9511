//! Supervise one batch run of an external command.
//!
//! The command's stdout directives feed the result protocol; the process
//! exits with the resolved outcome code after printing the summary line.

use std::path::PathBuf;

use batchrun::command_job::CommandJob;
use batchrun::core::failure::RunFailure;
use batchrun::io::config::{ConfigError, PropertyStore, keys};
use batchrun::logging;
use batchrun::protocol::ResultProtocol;
use batchrun::supervisor::{BatchJob, Supervisor};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "batchrun",
    version,
    about = "Supervise a batch command and exit with its outcome code"
)]
struct Cli {
    /// TOML configuration file (flattened to dotted keys).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Protocol sink path; overrides `protocol_file`.
    #[arg(long)]
    protocol: Option<PathBuf>,
    /// Batch id; overrides `batch_id`.
    #[arg(long)]
    batch_id: Option<String>,
    /// Command to run, after `--`.
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    // Without a subscriber the reporter prints full diagnostics itself.
    let log = logging::init().ok();
    let mut supervisor = Supervisor::new(log.as_ref());

    let run = match load_config(&cli) {
        Ok(config) => {
            let mut job = |protocol: &mut ResultProtocol| -> Result<(), RunFailure> {
                CommandJob::new(&cli.command)?
                    .configure(&config)?
                    .run(protocol)
            };
            supervisor.run(&config, &cli.command, &mut job)
        }
        Err(err) => supervisor.reject(err.into()),
    };
    std::process::exit(run.code.value());
}

/// Configuration file (if any) with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<PropertyStore, ConfigError> {
    let mut config = match cli.config.as_deref() {
        Some(path) => PropertyStore::load(path)?,
        None => PropertyStore::new(),
    };
    if let Some(batch_id) = &cli.batch_id {
        config.set(keys::BATCH_ID, batch_id.as_str());
    }
    if let Some(protocol) = cli.protocol.as_deref() {
        config.set(keys::PROTOCOL_FILE, protocol.display().to_string());
    }
    Ok(config)
}
