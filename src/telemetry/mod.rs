//! # Telemetry Module
//!
//! Handles telemetry logging to JSONL files with rotation.
//!
//! This module handles:
//! - Formatting decoded Indoor Bike Data records as JSONL (JSON Lines)
//! - Writing to rotating log files (max N records per file)
//! - Retaining only the last M files
//! - Throttling how often records are written

pub mod logger;

pub use logger::TelemetryLogger;
