mod config;
mod errors;
mod models;
mod server;
mod utils;

use dotenv::dotenv;
use log::{error, info};
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};

use crate::config::Config;

#[tokio::main]
async fn main() {
    // Loads environment variables from a `.env` file, if present.
    dotenv().ok();

    // Reads the server configuration; nothing runs without it.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initializes the terminal logger at the configured level.
    if let Err(e) = TermLogger::init(config.log_level, LogConfig::default(), TerminalMode::Mixed, ColorChoice::Auto) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    info!(
        "Result scraper starting: upstream {}, rate interval {:?}, {} bulk / {} batch workers",
        config.results_base_url, config.rate_interval, config.bulk_workers, config.batch_workers
    );

    // Serves the HTTP routes until the process is stopped.
    if let Err(e) = server::serve(config).await {
        error!("Server stopped: {:#}", e);
        std::process::exit(1);
    }
}
