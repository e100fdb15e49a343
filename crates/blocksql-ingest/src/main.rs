//! blocksql - main entry point

use blocksql_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use blocksql_ingest::Cli;
use clap::Parser;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_config = match LogConfig::for_cli(cli.verbose) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: ignoring invalid LOG_* settings: {e}");
            LogConfig::builder()
                .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
                .output(LogOutput::Console)
                .log_file_prefix("blocksql")
                .build()
        },
    };
    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e}");
            None
        },
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping");
                cancel.cancel();
            }
        });
    }

    if let Err(e) = blocksql_ingest::cli::execute(cli, cancel).await {
        error!(error = %format!("{e:#}"), "Command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
