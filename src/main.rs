//! Telemetry replay binary entry point.
//!
//! Reads JSON-lines commands from stdin, feeds them into a telemetry
//! service with the periodic timer running, and writes the export document
//! at end of input. Logs go to stderr; stdout carries the export.
//!
//! Coverage is excluded because the main function needs a real stdin and
//! process environment.

// Enable the coverage attribute when running with nightly for llvm-cov exclusions
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use territory_telemetry::config::TelemetryConfig;
use territory_telemetry::error::TelemetryError;
use territory_telemetry::ingest::parse_line;
use territory_telemetry::instrument::install_panic_hook;
use territory_telemetry::service::TelemetryService;

#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() {
    // Initialize logging to stderr only (stdout is for the export document)
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "info".to_string())
                .parse()
                .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("telemetry-replay starting...");

    let config = TelemetryConfig::from_env();
    tracing::info!(
        "Configuration loaded: events={}, interval={}ms, rules={}",
        config.event_capacity,
        config.tick_interval_ms,
        config.thresholds.len()
    );

    let service = Arc::new(TelemetryService::new(config));
    service.start();
    install_panic_hook(&service);

    if let Err(e) = run(&service).await {
        tracing::error!("Replay error: {e}");
        service.stop();
        std::process::exit(1);
    }

    tracing::info!("telemetry-replay shutdown complete");
}

#[cfg_attr(coverage_nightly, coverage(off))]
async fn run(service: &Arc<TelemetryService>) -> Result<(), TelemetryError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0_usize;
    let mut skipped = 0_usize;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.map_err(territory_telemetry::error::IngestError::from)?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, exporting what was read");
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        line_no += 1;

        match parse_line(line_no, &line) {
            Ok(Some(command)) => {
                let applied = command.apply(service);
                tracing::debug!(line = line_no, ?applied, "Command applied");
            }
            Ok(None) => {}
            Err(e) => {
                skipped += 1;
                tracing::warn!(error = %e, "Skipping invalid line");
            }
        }
    }

    service.tick();
    service.stop();
    tracing::info!(lines = line_no, skipped, "Input exhausted");

    match std::env::var("TELEMETRY_EXPORT_PATH") {
        Ok(path) if !path.is_empty() => service.export_to_path(&path)?,
        _ => println!("{}", service.export_snapshot()?),
    }
    Ok(())
}
