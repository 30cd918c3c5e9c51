//! appdaemon binary

use appdaemon::{Cli, Daemon, FileConfigSource, apps, config};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Tracing is configured by the settings, so errors up to here go to stderr
    let config = match config::load_with_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(common::Error::from(e).exit_code());
        }
    };

    common::logging::init_with(&config.log_level, config.log_format);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "appdaemon starting");

    let apps = match apps::load_applications(config.app_file.as_deref()) {
        Ok(apps) => apps,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load application list");
            eprintln!("Application list error: {}", e);
            return ExitCode::from(common::Error::from(e).exit_code());
        }
    };

    tracing::info!(services = apps.len(), "Application list loaded");

    let daemon = Daemon::new(config, apps, Arc::new(FileConfigSource::new(cli)));

    match daemon.run().await {
        Ok(shutdown) => ExitCode::from(shutdown.exit_code()),
        Err(e) => {
            tracing::error!(error = %e, "Daemon failed");
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
