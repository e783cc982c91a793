//! # FTMS Bridge
//!
//! Streams live telemetry from a Bluetooth LE indoor bike (FTMS) to the log
//! and to rotating JSONL files.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use ftms_bridge::ble::BleTransport;
use ftms_bridge::config::{Config, TelemetryConfig};
use ftms_bridge::connection::{ConnectionManager, DecodeStats};
use ftms_bridge::ftms::protocol::TelemetryRecord;
use ftms_bridge::logging::init_logging;
use ftms_bridge::telemetry::TelemetryLogger;

/// Used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main entry point for FTMS Bridge
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, else `config/default.toml`,
///      else built-in defaults)
///    - Set up logging
///    - Register status and telemetry-recorder observers
///
/// 2. **Connect**
///    - Scan for an FTMS bike and subscribe to Indoor Bike Data
///    - Ctrl+C cancels the attempt
///
/// 3. **Main Loop**
///    - Log a status line every `status_interval_ms`
///    - Exit on Ctrl+C (explicit disconnect) or when the bike drops the link
///
/// # Errors
///
/// Returns error if:
/// - The configuration file cannot be loaded
/// - No FTMS device is found or the handshake fails
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let (config, source) = load_config(std::env::args().nth(1))?;
    let _logging = init_logging(&config.logging)?;

    info!("FTMS Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", source);

    let manager = ConnectionManager::new(BleTransport::new(config.ble.clone()));

    let (disconnected_tx, mut disconnected_rx) = mpsc::unbounded_channel();
    manager.on_connection_change(move |connected| {
        if !connected {
            let _ = disconnected_tx.send(());
        }
    });
    manager.on_data_received(|record| debug!("{:?}", record));

    let recorder = if config.telemetry.enabled {
        Some(spawn_recorder(&manager, &config.telemetry)?)
    } else {
        info!("Telemetry recording disabled");
        None
    };

    info!("Press Ctrl+C to exit");

    tokio::select! {
        result = manager.connect() => result.context("connecting to FTMS device")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C before a device connected, shutting down...");
            manager.shutdown().await;
            return Ok(());
        }
    }

    if let Some(name) = manager.peripheral_name() {
        info!("Streaming Indoor Bike Data from {}", name);
    }

    let mut status_interval = interval(Duration::from_millis(config.logging.status_interval_ms));

    loop {
        tokio::select! {
            _ = status_interval.tick() => {
                info!("{}", format_status(manager.latest_record().as_ref(), manager.decode_stats()));
            }

            _ = disconnected_rx.recv() => {
                warn!("Device disconnected, shutting down...");
                break;
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                manager.shutdown().await;
                break;
            }
        }
    }

    let stats = manager.decode_stats();
    info!(
        "Total frames decoded: {}, dropped: {}",
        stats.frames_decoded, stats.frames_dropped
    );

    // Dropping the manager closes the recorder's channel
    drop(manager);
    if let Some(recorder) = recorder {
        if let Err(e) = recorder.await {
            warn!("Telemetry recorder task failed: {}", e);
        }
    }

    Ok(())
}

/// Resolve the configuration and describe where it came from
fn load_config(path_arg: Option<String>) -> Result<(Config, String)> {
    match path_arg {
        Some(path) => {
            let config = Config::load(&path).with_context(|| format!("loading {}", path))?;
            Ok((config, path))
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            let config = Config::load(DEFAULT_CONFIG_PATH)
                .with_context(|| format!("loading {}", DEFAULT_CONFIG_PATH))?;
            Ok((config, DEFAULT_CONFIG_PATH.to_string()))
        }
        None => Ok((Config::default(), "built-in defaults".to_string())),
    }
}

/// Forward decoded records to a JSONL writer task
fn spawn_recorder(
    manager: &ConnectionManager<BleTransport>,
    config: &TelemetryConfig,
) -> Result<JoinHandle<()>> {
    let mut logger = TelemetryLogger::new(config)?;
    let (tx, mut rx) = mpsc::unbounded_channel::<TelemetryRecord>();

    manager.add_data_observer(move |record| {
        let _ = tx.send(*record);
    });

    Ok(tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if let Err(e) = logger.log(&record) {
                warn!("Failed to write telemetry record: {}", e);
            }
        }
        if let Err(e) = logger.flush() {
            warn!("Failed to flush telemetry log: {}", e);
        }
    }))
}

fn format_status(record: Option<&TelemetryRecord>, stats: DecodeStats) -> String {
    fn show<T: std::fmt::Display>(value: Option<T>) -> String {
        value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
    }

    let frames = format!(
        "frames: {} ok / {} dropped",
        stats.frames_decoded, stats.frames_dropped
    );

    match record {
        Some(r) => format!(
            "speed {} km/h | cadence {} rpm | power {} W | HR {} bpm | {}",
            show(r.instantaneous_speed.map(|v| format!("{:.1}", v))),
            show(r.instantaneous_cadence.map(|v| format!("{:.0}", v))),
            show(r.instantaneous_power),
            show(r.heart_rate),
            frames
        ),
        None => format!("waiting for data | {}", frames),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_without_argument_uses_shipped_file() {
        // Tests run from the package root, where the shipped file lives
        let (config, source) = load_config(None).unwrap();
        assert_eq!(source, DEFAULT_CONFIG_PATH);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_config_from_explicit_path() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml");
        let (config, source) = load_config(Some(path.to_string())).unwrap();
        assert_eq!(source, path);
        assert_eq!(config.ble.scan_timeout_ms, 10000);
    }

    #[test]
    fn test_load_config_missing_explicit_path_fails() {
        assert!(load_config(Some("/nonexistent/ftms.toml".to_string())).is_err());
    }

    #[test]
    fn test_status_without_data() {
        let status = format_status(None, DecodeStats::default());
        assert_eq!(status, "waiting for data | frames: 0 ok / 0 dropped");
    }

    #[test]
    fn test_status_with_partial_record() {
        let record = TelemetryRecord {
            instantaneous_speed: Some(27.456),
            instantaneous_power: Some(215),
            ..Default::default()
        };
        let stats = DecodeStats {
            frames_decoded: 40,
            frames_dropped: 1,
        };

        let status = format_status(Some(&record), stats);

        assert_eq!(
            status,
            "speed 27.5 km/h | cadence - rpm | power 215 W | HR - bpm | frames: 40 ok / 1 dropped"
        );
    }
}
