//! Sensor report decoding
//!
//! A sensor report (command 0x11) carries a 16-bit field mask, a 32-bit
//! device timestamp and then one block per enabled field, always in
//! ascending bit order. All values are little-endian.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::commands::Command;

/// Acceleration, m/s²
pub const SCALE_ACCEL: f32 = 0.004_785_156_25;
/// Quaternion component
pub const SCALE_QUAT: f32 = 0.000_030_517_578_125;
/// Euler angle, degrees
pub const SCALE_ANGLE: f32 = 0.005_493_164_062_5;
/// Angular rate, degrees per second
pub const SCALE_ANGLE_SPEED: f32 = 0.061_035_156_25;
/// Magnetic field, µT
pub const SCALE_MAG: f32 = 0.151_062_011_718_75;
/// Temperature, °C
pub const SCALE_TEMPERATURE: f32 = 0.01;
/// Air pressure, hPa
pub const SCALE_AIR_PRESSURE: f32 = 0.000_238_418_579_1;
/// Altitude, m
pub const SCALE_HEIGHT: f32 = 0.001_072_883_6;

/// Command byte + field mask + timestamp
pub const REPORT_HEADER_LEN: usize = 7;

/// Set of optional quantities carried by a sensor report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMask(pub u16);

impl FieldMask {
    /// Linear acceleration without gravity
    pub const ACCEL: FieldMask = FieldMask(0x0001);
    /// Acceleration including gravity
    pub const ACCEL_WITH_GRAVITY: FieldMask = FieldMask(0x0002);
    /// Angular rate
    pub const GYRO: FieldMask = FieldMask(0x0004);
    /// Magnetic field
    pub const MAG: FieldMask = FieldMask(0x0008);
    /// Temperature, pressure and altitude
    pub const ENVIRONMENT: FieldMask = FieldMask(0x0010);
    /// Orientation quaternion
    pub const QUATERNION: FieldMask = FieldMask(0x0020);
    /// Euler angles
    pub const EULER: FieldMask = FieldMask(0x0040);
    /// Every field the device knows about
    pub const ALL: FieldMask = FieldMask(0x007F);

    /// Blocks in wire order with their encoded sizes
    pub const BLOCKS: [(FieldMask, usize); 7] = [
        (Self::ACCEL, 6),
        (Self::ACCEL_WITH_GRAVITY, 6),
        (Self::GYRO, 6),
        (Self::MAG, 6),
        (Self::ENVIRONMENT, 8),
        (Self::QUATERNION, 8),
        (Self::EULER, 6),
    ];

    /// Raw mask bits
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub fn contains(self, other: FieldMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: FieldMask) {
        self.0 |= other.0;
    }

    /// Whether no bits are set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Payload length of a sensor report carrying exactly these fields
    pub fn report_payload_len(self) -> usize {
        REPORT_HEADER_LEN
            + Self::BLOCKS
                .iter()
                .filter(|(bit, _)| self.contains(*bit))
                .map(|(_, size)| size)
                .sum::<usize>()
    }
}

impl std::ops::BitOr for FieldMask {
    type Output = FieldMask;

    fn bitor(self, rhs: FieldMask) -> FieldMask {
        FieldMask(self.0 | rhs.0)
    }
}

impl From<u16> for FieldMask {
    fn from(bits: u16) -> Self {
        FieldMask(bits)
    }
}

/// One decoded sensor report.
///
/// Quantities whose block was not decoded stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Linear acceleration excluding gravity, m/s² (x, y, z)
    pub accel: [f32; 3],
    /// Acceleration including gravity, m/s² (x, y, z)
    pub accel_with_gravity: [f32; 3],
    /// Angular rate, dps (x, y, z)
    pub gyro: [f32; 3],
    /// Magnetic field, µT (x, y, z)
    pub mag: [f32; 3],
    /// °C
    pub temperature: f32,
    /// hPa
    pub pressure: f32,
    /// m
    pub altitude: f32,
    /// Orientation quaternion (w, x, y, z)
    pub quaternion: [f32; 4],
    /// Euler angles, degrees (x, y, z)
    pub euler: [f32; 3],
    /// Device-relative timestamp, ms
    pub timestamp_ms: u32,
    /// Field mask as reported on the wire
    pub fields: FieldMask,
    /// Fields whose block was actually present in the payload
    pub decoded: FieldMask,
}

impl Sample {
    /// Whether the block for `field` was decoded from the payload
    pub fn has(&self, field: FieldMask) -> bool {
        self.decoded.contains(field)
    }
}

/// Decode a sensor report payload (command byte included).
///
/// Returns `None` for other commands and for reports shorter than the
/// 7-byte header. A block is consumed only if its bit is set and enough
/// bytes remain; the first block that does not fit ends decoding.
pub fn decode(payload: &[u8]) -> Option<Sample> {
    match payload.first() {
        Some(&cmd) if cmd == Command::SensorReport.byte() => {}
        Some(&cmd) => {
            debug!("ignoring unrecognized command {cmd:#04x}");
            return None;
        }
        None => return None,
    }
    if payload.len() < REPORT_HEADER_LEN {
        debug!("truncated sensor report: {} bytes", payload.len());
        return None;
    }

    let mut sample = Sample {
        fields: FieldMask(LittleEndian::read_u16(&payload[1..3])),
        timestamp_ms: LittleEndian::read_u32(&payload[3..7]),
        ..Sample::default()
    };

    let mut offset = REPORT_HEADER_LEN;
    for (bit, size) in FieldMask::BLOCKS {
        if !sample.fields.contains(bit) {
            continue;
        }
        let Some(block) = payload.get(offset..offset + size) else {
            debug!(
                "sensor report ends before block {:#06x} (need {} bytes at offset {})",
                bit.bits(),
                size,
                offset
            );
            break;
        };
        decode_block(&mut sample, bit, block);
        sample.decoded.insert(bit);
        offset += size;
    }

    Some(sample)
}

fn decode_block(sample: &mut Sample, bit: FieldMask, block: &[u8]) {
    match bit {
        FieldMask::ACCEL => sample.accel = scaled3(block, SCALE_ACCEL),
        FieldMask::ACCEL_WITH_GRAVITY => sample.accel_with_gravity = scaled3(block, SCALE_ACCEL),
        FieldMask::GYRO => sample.gyro = scaled3(block, SCALE_ANGLE_SPEED),
        FieldMask::MAG => sample.mag = scaled3(block, SCALE_MAG),
        FieldMask::ENVIRONMENT => {
            sample.temperature = LittleEndian::read_i16(&block[0..2]) as f32 * SCALE_TEMPERATURE;
            sample.pressure = LittleEndian::read_i24(&block[2..5]) as f32 * SCALE_AIR_PRESSURE;
            sample.altitude = LittleEndian::read_i24(&block[5..8]) as f32 * SCALE_HEIGHT;
        }
        FieldMask::QUATERNION => {
            let mut raw = [0i16; 4];
            LittleEndian::read_i16_into(block, &mut raw);
            sample.quaternion = raw.map(|v| v as f32 * SCALE_QUAT);
        }
        FieldMask::EULER => sample.euler = scaled3(block, SCALE_ANGLE),
        _ => {}
    }
}

fn scaled3(block: &[u8], scale: f32) -> [f32; 3] {
    let mut raw = [0i16; 3];
    LittleEndian::read_i16_into(block, &mut raw);
    raw.map(|v| v as f32 * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_payload_len() {
        assert_eq!(FieldMask::default().report_payload_len(), 7);
        assert_eq!(FieldMask::ACCEL_WITH_GRAVITY.report_payload_len(), 13);
        assert_eq!(FieldMask::ALL.report_payload_len(), 7 + 6 * 5 + 8 * 2);
    }

    #[test]
    fn test_rejects_other_commands() {
        assert!(decode(&[0x12, 0, 0, 0, 0, 0, 0]).is_none());
        assert!(decode(&[]).is_none());
    }

    #[test]
    fn test_rejects_truncated_header() {
        assert!(decode(&[0x11, 0x02, 0x00, 0x00, 0x00, 0x00]).is_none());
    }

    #[test]
    fn test_header_fields() {
        let sample = decode(&[0x11, 0x00, 0x00, 0x78, 0x56, 0x34, 0x12]).expect("Should decode");
        assert_eq!(sample.timestamp_ms, 0x1234_5678);
        assert!(sample.fields.is_empty());
    }

    #[test]
    fn test_quaternion_scaling() {
        let mut payload = vec![0x11, 0x20, 0x00, 0, 0, 0, 0];
        // w = 0x4000 (0.5), x = -0x4000, y = 0, z = 1
        payload.extend_from_slice(&[0x00, 0x40, 0x00, 0xC0, 0x00, 0x00, 0x01, 0x00]);
        let sample = decode(&payload).expect("Should decode");

        assert_eq!(sample.quaternion[0], 0.5);
        assert_eq!(sample.quaternion[1], -0.5);
        assert_eq!(sample.quaternion[2], 0.0);
        assert_eq!(sample.quaternion[3], SCALE_QUAT);
        assert!(sample.has(FieldMask::QUATERNION));
    }
}
