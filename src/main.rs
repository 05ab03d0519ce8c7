//! Logsight Core - Main Entry Point
//!
//! Reads source records (JSON lines) from `LOGSIGHT_SOURCE` or stdin and runs the
//! pipeline until the input ends or Ctrl-C.

use std::fs::File;
use std::io::BufReader;

use logsight_core::constants::{get_config_path, get_source_path, APP_NAME, APP_VERSION};
use logsight_core::logic::config::load_config;
use logsight_core::logic::pipeline::{JsonLinesSource, LogSource, Pipeline};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting {} v{}...", APP_NAME, APP_VERSION);

    let config = match load_config(get_config_path().as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let pipeline = match Pipeline::build(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            log::error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let source: Box<dyn LogSource> = match get_source_path() {
        Some(path) => match File::open(&path) {
            Ok(file) => {
                log::info!("Reading {:?}", path);
                Box::new(JsonLinesSource::new(BufReader::new(file)))
            }
            Err(e) => {
                log::error!("Cannot open source {:?}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => Box::new(JsonLinesSource::new(BufReader::new(std::io::stdin()))),
    };

    let handle = pipeline.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received");
            handle.shutdown();
        }
    });

    match pipeline.run(source).await {
        Ok(report) => {
            match serde_json::to_string(&report.metrics) {
                Ok(json) => log::info!("final metrics {}", json),
                Err(e) => log::warn!("Failed to serialize metrics: {}", e),
            }
            // Source thread may still be blocked on stdin
            std::process::exit(0);
        }
        Err(e) => {
            log::error!("Pipeline failed: {}", e);
            std::process::exit(1);
        }
    }
}
