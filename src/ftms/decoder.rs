//! # Indoor Bike Data Decoder
//!
//! Decodes FTMS Indoor Bike Data notifications into [`TelemetryRecord`]s.
//!
//! The frame starts with a 2-byte little-endian flag bitmap. Each defined
//! flag selects one optional field group; present groups follow in fixed
//! order, so a field's offset depends on which earlier groups are present.
//! Every read is bounds-checked and a short frame fails as a whole.

use bytes::Buf;

use super::protocol::*;
use crate::error::DecodeError;

type Result<T> = std::result::Result<T, DecodeError>;

/// Decode one Indoor Bike Data frame
///
/// # Arguments
///
/// * `frame` - Notification payload (flags + present fields)
///
/// # Returns
///
/// * `Result<TelemetryRecord>` - Decoded record, or error if the frame is
///   shorter than its flags require
///
/// # Errors
///
/// Returns [`DecodeError::BufferTooShort`] if the frame holds fewer than 2
/// bytes or ends before a field the flags announce. No partial record is
/// returned. Reserved flag bits and trailing bytes are ignored.
///
/// # Examples
///
/// ```
/// use ftms_bridge::ftms::decoder::decode_indoor_bike_data;
///
/// // Flags 0x0000: instantaneous speed only, 2500 = 25.00 km/h
/// let record = decode_indoor_bike_data(&[0x00, 0x00, 0xC4, 0x09]).unwrap();
/// assert_eq!(record.instantaneous_speed, Some(25.0));
/// ```
pub fn decode_indoor_bike_data(frame: &[u8]) -> Result<TelemetryRecord> {
    let mut cursor = frame;

    ensure_remaining(&cursor, "flags", FLAGS_SIZE)?;
    let flags = FlagBitmap::new(cursor.get_u16_le());

    let mut record = TelemetryRecord::default();

    for layout in FIELD_LAYOUT.iter().filter(|layout| flags.is_present(layout.flag)) {
        ensure_remaining(&cursor, layout.name, layout.width)?;

        match layout.flag {
            FLAG_MORE_DATA => {
                record.instantaneous_speed = Some(f64::from(cursor.get_u16_le()) / SPEED_DIVISOR);
            }
            FLAG_AVERAGE_SPEED => {
                record.average_speed = Some(f64::from(cursor.get_u16_le()) / SPEED_DIVISOR);
            }
            FLAG_INSTANTANEOUS_CADENCE => {
                record.instantaneous_cadence =
                    Some(f64::from(cursor.get_u16_le()) / CADENCE_DIVISOR);
            }
            FLAG_AVERAGE_CADENCE => {
                record.average_cadence = Some(f64::from(cursor.get_u16_le()) / CADENCE_DIVISOR);
            }
            FLAG_TOTAL_DISTANCE => {
                // 24-bit unsigned, no native integer of that width
                let b0 = u32::from(cursor.get_u8());
                let b1 = u32::from(cursor.get_u8());
                let b2 = u32::from(cursor.get_u8());
                record.total_distance = Some(b0 | (b1 << 8) | (b2 << 16));
            }
            FLAG_RESISTANCE_LEVEL => {
                record.resistance_level = Some(cursor.get_i16_le());
            }
            FLAG_INSTANTANEOUS_POWER => {
                record.instantaneous_power = Some(cursor.get_i16_le());
            }
            FLAG_AVERAGE_POWER => {
                record.average_power = Some(cursor.get_i16_le());
            }
            FLAG_EXPENDED_ENERGY => {
                record.expended_energy = Some(ExpendedEnergy {
                    total_energy: cursor.get_u16_le(),
                    energy_per_hour: cursor.get_u16_le(),
                    energy_per_minute: cursor.get_u8(),
                });
            }
            FLAG_HEART_RATE => {
                record.heart_rate = Some(cursor.get_u8());
            }
            FLAG_METABOLIC_EQUIVALENT => {
                record.metabolic_equivalent = Some(f64::from(cursor.get_u8()) / MET_DIVISOR);
            }
            FLAG_ELAPSED_TIME => {
                record.elapsed_time = Some(cursor.get_u16_le());
            }
            FLAG_REMAINING_TIME => {
                record.remaining_time = Some(cursor.get_u16_le());
            }
            _ => unreachable!("FIELD_LAYOUT only holds defined flags"),
        }
    }

    Ok(record)
}

/// Fail with `BufferTooShort` unless `width` bytes remain
fn ensure_remaining(cursor: &impl Buf, field: &'static str, width: usize) -> Result<()> {
    let available = cursor.remaining();
    if available < width {
        return Err(DecodeError::BufferTooShort {
            field,
            needed: width,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("field should be present");
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_decode_speed_only() {
        // Flags: 0x0000, speed 5000 = 50.00 km/h
        let frame = [0x00, 0x00, 0x88, 0x13];
        let record = decode_indoor_bike_data(&frame).unwrap();

        assert_eq!(record.instantaneous_speed, Some(50.0));
        assert_eq!(record.average_speed, None);
        assert_eq!(record.instantaneous_power, None);
    }

    #[test]
    fn test_decode_cadence_scale() {
        // Flags: more data (no speed) + instantaneous cadence, 180 = 90.0 rpm
        let frame = [0x05, 0x00, 0xB4, 0x00];
        let record = decode_indoor_bike_data(&frame).unwrap();

        assert_eq!(record.instantaneous_speed, None);
        assert_eq!(record.instantaneous_cadence, Some(90.0));
    }

    #[test]
    fn test_decode_total_distance_24_bit() {
        // Flags: more data + total distance
        let frame = [0x11, 0x00, 0x01, 0x00, 0x01];
        let record = decode_indoor_bike_data(&frame).unwrap();

        assert_eq!(record.total_distance, Some(0x01_0001));
        assert_eq!(record.total_distance, Some(65537));
    }

    #[test]
    fn test_decode_total_distance_no_sign_extension() {
        let frame = [0x11, 0x00, 0xFF, 0xFF, 0xFF];
        let record = decode_indoor_bike_data(&frame).unwrap();

        assert_eq!(record.total_distance, Some(0x00FF_FFFF));
    }

    #[test]
    fn test_decode_signed_fields() {
        // Flags: more data + resistance + inst power + avg power
        let frame = [
            0xE1, 0x00, //
            0xFB, 0xFF, // resistance -5
            0x2C, 0x01, // power 300 W
            0x9C, 0xFF, // average power -100 W
        ];
        let record = decode_indoor_bike_data(&frame).unwrap();

        assert_eq!(record.resistance_level, Some(-5));
        assert_eq!(record.instantaneous_power, Some(300));
        assert_eq!(record.average_power, Some(-100));
    }

    #[test]
    fn test_decode_typical_trainer_frame() {
        // Speed, cadence, power, heart rate: flags 0x0244
        let frame = [
            0x44, 0x02, //
            0xC4, 0x09, // speed 25.00 km/h
            0xAA, 0x00, // cadence 85.0 rpm
            0xC8, 0x00, // power 200 W
            0x8C, // heart rate 140
        ];
        let record = decode_indoor_bike_data(&frame).unwrap();

        assert_close(record.instantaneous_speed, 25.0);
        assert_close(record.instantaneous_cadence, 85.0);
        assert_eq!(record.instantaneous_power, Some(200));
        assert_eq!(record.heart_rate, Some(140));
        assert_eq!(record.average_speed, None);
        assert_eq!(record.expended_energy, None);
    }

    #[test]
    fn test_decode_all_fields() {
        let frame = [
            0xFE, 0x1F, // every defined bit except "more data"
            0x10, 0x27, // average speed 100.00 km/h
            0x64, 0x00, // instantaneous cadence 50.0 rpm
            0x65, 0x00, // average cadence 50.5 rpm
            0x39, 0x30, 0x00, // distance 12345 m
            0x0A, 0x00, // resistance 10
            0xFA, 0x00, // power 250 W
            0xF0, 0x00, // average power 240 W
            0x7B, 0x00, 0xC8, 0x01, 0x07, // energy 123 kcal, 456 kcal/h, 7 kcal/min
            0x96, // heart rate 150
            0x2D, // MET 4.5
            0x10, 0x0E, // elapsed 3600 s
            0x2C, 0x01, // remaining 300 s
        ];
        let record = decode_indoor_bike_data(&frame).unwrap();

        assert_eq!(record.instantaneous_speed, None);
        assert_close(record.average_speed, 100.0);
        assert_close(record.instantaneous_cadence, 50.0);
        assert_close(record.average_cadence, 50.5);
        assert_eq!(record.total_distance, Some(12345));
        assert_eq!(record.resistance_level, Some(10));
        assert_eq!(record.instantaneous_power, Some(250));
        assert_eq!(record.average_power, Some(240));
        assert_eq!(
            record.expended_energy,
            Some(ExpendedEnergy {
                total_energy: 123,
                energy_per_hour: 456,
                energy_per_minute: 7,
            })
        );
        assert_eq!(record.heart_rate, Some(150));
        assert_close(record.metabolic_equivalent, 4.5);
        assert_eq!(record.elapsed_time, Some(3600));
        assert_eq!(record.remaining_time, Some(300));
    }

    #[test]
    fn test_more_data_set_means_speed_absent() {
        let record = decode_indoor_bike_data(&[0x01, 0x00]).unwrap();
        assert_eq!(record.instantaneous_speed, None);
        assert!(record.is_empty());
    }

    #[test]
    fn test_more_data_clear_consumes_speed_bytes() {
        // Speed present; heart rate must come from the byte after it
        let frame = [0x00, 0x02, 0x00, 0x00, 0x48];
        let record = decode_indoor_bike_data(&frame).unwrap();

        assert_eq!(record.instantaneous_speed, Some(0.0));
        assert_eq!(record.heart_rate, Some(72));
    }

    #[test]
    fn test_reserved_bits_only_decodes_to_empty_record() {
        let record = decode_indoor_bike_data(&[0x01, 0xE0]).unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let frame = [0x00, 0x00, 0x88, 0x13, 0xDE, 0xAD, 0xBE, 0xEF];
        let record = decode_indoor_bike_data(&frame).unwrap();
        assert_eq!(record.instantaneous_speed, Some(50.0));
        assert_eq!(record.heart_rate, None);
    }

    #[test]
    fn test_energy_absent_when_bit_clear() {
        let record = decode_indoor_bike_data(&[0x01, 0x00]).unwrap();
        assert_eq!(record.expended_energy, None);
    }

    #[test]
    fn test_energy_truncated_is_error() {
        // Bit 8 set (plus more data), only 4 of 5 energy bytes
        let frame = [0x01, 0x01, 0x7B, 0x00, 0xC8, 0x01];
        let result = decode_indoor_bike_data(&frame);

        assert_eq!(
            result,
            Err(DecodeError::BufferTooShort {
                field: "expended_energy",
                needed: 5,
                available: 4,
            })
        );
    }

    #[test]
    fn test_empty_buffer() {
        let result = decode_indoor_bike_data(&[]);
        assert_eq!(
            result,
            Err(DecodeError::BufferTooShort {
                field: "flags",
                needed: 2,
                available: 0,
            })
        );
    }

    #[test]
    fn test_single_byte_buffer() {
        assert!(decode_indoor_bike_data(&[0x00]).is_err());
    }

    #[test]
    fn test_truncated_speed() {
        let result = decode_indoor_bike_data(&[0x00, 0x00, 0x88]);
        assert_eq!(
            result,
            Err(DecodeError::BufferTooShort {
                field: "instantaneous_speed",
                needed: 2,
                available: 1,
            })
        );
    }

    #[test]
    fn test_truncated_distance() {
        let result = decode_indoor_bike_data(&[0x11, 0x00, 0x01, 0x00]);
        assert!(matches!(
            result,
            Err(DecodeError::BufferTooShort { field: "total_distance", .. })
        ));
    }

    #[test]
    fn test_every_flag_combination_consumes_exact_length() {
        for bits in 0..=FLAG_DEFINED_MASK {
            let flags = FlagBitmap::new(bits);
            let len = flags.frame_len();

            let mut frame = vec![0xA5u8; len];
            frame[..2].copy_from_slice(&bits.to_le_bytes());

            assert!(
                decode_indoor_bike_data(&frame).is_ok(),
                "flags 0x{:04X} should decode from {} bytes",
                bits,
                len
            );

            let short = &frame[..len - 1];
            assert!(
                matches!(
                    decode_indoor_bike_data(short),
                    Err(DecodeError::BufferTooShort { .. })
                ),
                "flags 0x{:04X} should fail with {} bytes",
                bits,
                len - 1
            );
        }
    }

    #[test]
    fn test_every_truncation_fails_cleanly() {
        let frame = [
            0xFE, 0x1F, 0x10, 0x27, 0x64, 0x00, 0x65, 0x00, 0x39, 0x30, 0x00, 0x0A, 0x00, 0xFA,
            0x00, 0xF0, 0x00, 0x7B, 0x00, 0xC8, 0x01, 0x07, 0x96, 0x2D, 0x10, 0x0E, 0x2C, 0x01,
        ];
        for len in 0..frame.len() {
            assert!(decode_indoor_bike_data(&frame[..len]).is_err(), "len {}", len);
        }
        assert!(decode_indoor_bike_data(&frame).is_ok());
    }

    #[test]
    fn test_decode_is_deterministic() {
        let frame = [0x44, 0x02, 0xC4, 0x09, 0xAA, 0x00, 0xC8, 0x00, 0x8C];
        assert_eq!(
            decode_indoor_bike_data(&frame),
            decode_indoor_bike_data(&frame)
        );
    }
}
