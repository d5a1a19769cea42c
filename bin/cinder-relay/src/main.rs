//! Carbon relay.
//!
//! Accepts Carbon plaintext traffic and forwards every datapoint to a single Carbon backend.
#![deny(warnings)]
#![deny(missing_docs)]

use cinder_app::prelude::*;
use clap::Parser as _;
use tracing::{error, info};

mod config;
use self::config::{Action, Cli};

mod run;
use self::run::{load_configuration, run};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = match cli.action {
        Some(Action::Run) | None => cli.config,
    };

    let configuration = load_configuration(&config_path)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load configuration: {:?}", e)));
    let logging_config = LoggingConfiguration::from_configuration(&configuration)
        .unwrap_or_else(|e| fatal_and_exit(format!("invalid logging configuration: {:?}", e)));

    if let Err(e) = initialize_logging(&logging_config) {
        fatal_and_exit(format!("failed to initialize logging: {}", e));
    }

    match run(configuration).await {
        Ok(()) => info!("Carbon relay stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}
