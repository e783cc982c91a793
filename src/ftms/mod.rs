//! # FTMS Protocol Module
//!
//! Implementation of the Bluetooth Fitness Machine Service Indoor Bike Data
//! characteristic.
//!
//! This module handles:
//! - Service and characteristic UUIDs
//! - Flag bitmap interpretation (including the inverted "More Data" bit)
//! - Bounds-checked frame decoding into optional, scaled fields
//! - Frame encoding for tests and simulated peripherals

pub mod protocol;
pub mod decoder;
pub mod encoder;
