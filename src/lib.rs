//! # FTMS Bridge Library
//!
//! Live telemetry from Bluetooth LE indoor bikes over the Fitness Machine
//! Service (FTMS).
//!
//! This library provides the Indoor Bike Data frame decoder, a connection
//! manager that drives one peripheral through connect, subscribe and
//! disconnect, and a JSONL recorder for the decoded records.

pub mod config;
pub mod error;
pub mod ftms;
pub mod ble;
pub mod connection;
pub mod logging;
pub mod telemetry;

pub use connection::{ConnectionManager, ConnectionState, DecodeStats, Subscription};
pub use error::{ConnectionError, DecodeError, FtmsBridgeError, Result};
pub use ftms::decoder::decode_indoor_bike_data;
pub use ftms::protocol::{ExpendedEnergy, TelemetryRecord};
