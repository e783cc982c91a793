//! # FTMS Protocol Constants and Types
//!
//! Core definitions for the Fitness Machine Service Indoor Bike Data
//! characteristic: UUIDs, flag bits, field layout and the decoded record.

use serde::Serialize;
use uuid::Uuid;

/// Fitness Machine Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5f9b_34fb);

/// Indoor Bike Data characteristic UUID (0x2AD2)
pub const INDOOR_BIKE_DATA_UUID: Uuid =
    Uuid::from_u128(0x0000_2ad2_0000_1000_8000_0080_5f9b_34fb);

/// Size of the leading flag bitmap in bytes
pub const FLAGS_SIZE: usize = 2;

/// "More Data" flag. Instantaneous speed is present when this bit is CLEAR.
pub const FLAG_MORE_DATA: u16 = 1 << 0;
pub const FLAG_AVERAGE_SPEED: u16 = 1 << 1;
pub const FLAG_INSTANTANEOUS_CADENCE: u16 = 1 << 2;
pub const FLAG_AVERAGE_CADENCE: u16 = 1 << 3;
pub const FLAG_TOTAL_DISTANCE: u16 = 1 << 4;
pub const FLAG_RESISTANCE_LEVEL: u16 = 1 << 5;
pub const FLAG_INSTANTANEOUS_POWER: u16 = 1 << 6;
pub const FLAG_AVERAGE_POWER: u16 = 1 << 7;
pub const FLAG_EXPENDED_ENERGY: u16 = 1 << 8;
pub const FLAG_HEART_RATE: u16 = 1 << 9;
pub const FLAG_METABOLIC_EQUIVALENT: u16 = 1 << 10;
pub const FLAG_ELAPSED_TIME: u16 = 1 << 11;
pub const FLAG_REMAINING_TIME: u16 = 1 << 12;

/// Mask of every defined flag bit (0-12)
pub const FLAG_DEFINED_MASK: u16 = 0x1FFF;

/// Speed resolution: 0.01 km/h
pub const SPEED_DIVISOR: f64 = 100.0;

/// Cadence resolution: 0.5 rpm
pub const CADENCE_DIVISOR: f64 = 2.0;

/// Metabolic equivalent resolution: 0.1 MET
pub const MET_DIVISOR: f64 = 10.0;

/// One optional field group of the Indoor Bike Data frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name used in error reports
    pub name: &'static str,
    /// Flag bit governing the field
    pub flag: u16,
    /// Width on the wire in bytes
    pub width: usize,
}

/// Field groups in wire order
pub const FIELD_LAYOUT: [FieldSpec; 13] = [
    FieldSpec { name: "instantaneous_speed", flag: FLAG_MORE_DATA, width: 2 },
    FieldSpec { name: "average_speed", flag: FLAG_AVERAGE_SPEED, width: 2 },
    FieldSpec { name: "instantaneous_cadence", flag: FLAG_INSTANTANEOUS_CADENCE, width: 2 },
    FieldSpec { name: "average_cadence", flag: FLAG_AVERAGE_CADENCE, width: 2 },
    FieldSpec { name: "total_distance", flag: FLAG_TOTAL_DISTANCE, width: 3 },
    FieldSpec { name: "resistance_level", flag: FLAG_RESISTANCE_LEVEL, width: 2 },
    FieldSpec { name: "instantaneous_power", flag: FLAG_INSTANTANEOUS_POWER, width: 2 },
    FieldSpec { name: "average_power", flag: FLAG_AVERAGE_POWER, width: 2 },
    FieldSpec { name: "expended_energy", flag: FLAG_EXPENDED_ENERGY, width: 5 },
    FieldSpec { name: "heart_rate", flag: FLAG_HEART_RATE, width: 1 },
    FieldSpec { name: "metabolic_equivalent", flag: FLAG_METABOLIC_EQUIVALENT, width: 1 },
    FieldSpec { name: "elapsed_time", flag: FLAG_ELAPSED_TIME, width: 2 },
    FieldSpec { name: "remaining_time", flag: FLAG_REMAINING_TIME, width: 2 },
];

/// Leading flag bitmap of an Indoor Bike Data frame
///
/// Only bits 0-12 carry meaning; reserved bits are kept as received and
/// ignored by every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagBitmap(u16);

impl FlagBitmap {
    /// Wrap a raw flag value
    pub const fn new(bits: u16) -> Self {
        Self(bits)
    }

    /// Build from the two little-endian bytes at the start of a frame
    pub const fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }

    /// Raw flag value, reserved bits included
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether the field governed by `flag` is present in the frame
    ///
    /// Handles the inverted polarity of bit 0: instantaneous speed is
    /// present when the "More Data" bit is clear.
    pub const fn is_present(self, flag: u16) -> bool {
        if flag == FLAG_MORE_DATA {
            self.0 & FLAG_MORE_DATA == 0
        } else {
            self.0 & flag != 0
        }
    }

    /// Exact frame length implied by these flags, flag bytes included
    pub fn frame_len(self) -> usize {
        FLAGS_SIZE
            + FIELD_LAYOUT
                .iter()
                .filter(|layout| self.is_present(layout.flag))
                .map(|layout| layout.width)
                .sum::<usize>()
    }
}

/// Expended energy triad (flag bit 8). Always reported as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpendedEnergy {
    /// Total energy in kcal
    pub total_energy: u16,
    /// Energy per hour in kcal/h
    pub energy_per_hour: u16,
    /// Energy per minute in kcal/min
    pub energy_per_minute: u8,
}

/// Decoded Indoor Bike Data frame
///
/// `None` means the field was not reported in this frame, which is not the
/// same as a reported zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TelemetryRecord {
    /// Instantaneous speed in km/h
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instantaneous_speed: Option<f64>,

    /// Average speed in km/h
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_speed: Option<f64>,

    /// Instantaneous cadence in rpm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instantaneous_cadence: Option<f64>,

    /// Average cadence in rpm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_cadence: Option<f64>,

    /// Total distance in meters (24-bit on the wire)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_distance: Option<u32>,

    /// Resistance level (unitless)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resistance_level: Option<i16>,

    /// Instantaneous power in watts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instantaneous_power: Option<i16>,

    /// Average power in watts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_power: Option<i16>,

    /// Expended energy triad
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expended_energy: Option<ExpendedEnergy>,

    /// Heart rate in bpm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u8>,

    /// Metabolic equivalent in MET
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metabolic_equivalent: Option<f64>,

    /// Elapsed time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<u16>,

    /// Remaining time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_time: Option<u16>,
}

impl TelemetryRecord {
    /// True when no field was reported
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
