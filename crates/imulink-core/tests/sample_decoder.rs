use imulink_core::protocol::sample::{
    decode, SCALE_ACCEL, SCALE_AIR_PRESSURE, SCALE_ANGLE, SCALE_ANGLE_SPEED, SCALE_HEIGHT,
    SCALE_TEMPERATURE,
};
use imulink_core::protocol::{FieldMask, Sample};
use pretty_assertions::assert_eq;

fn report(mask: u16, timestamp: u32, blocks: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x11];
    payload.extend_from_slice(&mask.to_le_bytes());
    payload.extend_from_slice(&timestamp.to_le_bytes());
    payload.extend_from_slice(blocks);
    payload
}

fn i16s(values: &[i16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[test]
fn test_accel_with_gravity_only() {
    let payload = report(0x0002, 1500, &i16s(&[100, -200, 2048]));
    let sample = decode(&payload).unwrap();

    let expected = Sample {
        accel_with_gravity: [
            100.0 * SCALE_ACCEL,
            -200.0 * SCALE_ACCEL,
            2048.0 * SCALE_ACCEL,
        ],
        timestamp_ms: 1500,
        fields: FieldMask::ACCEL_WITH_GRAVITY,
        decoded: FieldMask::ACCEL_WITH_GRAVITY,
        ..Sample::default()
    };
    assert_eq!(sample, expected);
}

#[test]
fn test_blocks_follow_bit_order() {
    let mut blocks = i16s(&[1, 2, 3]); // gyro
    blocks.extend(i16s(&[-4, 5, -6])); // euler
    let payload = report(0x0044, 0, &blocks);
    let sample = decode(&payload).unwrap();

    assert_eq!(
        sample.gyro,
        [SCALE_ANGLE_SPEED, 2.0 * SCALE_ANGLE_SPEED, 3.0 * SCALE_ANGLE_SPEED]
    );
    assert_eq!(
        sample.euler,
        [-4.0 * SCALE_ANGLE, 5.0 * SCALE_ANGLE, -6.0 * SCALE_ANGLE]
    );
    assert_eq!(sample.decoded, FieldMask::GYRO | FieldMask::EULER);
}

fn environment(temperature: i16, pressure: [u8; 3], altitude: [u8; 3]) -> Vec<u8> {
    let mut block = temperature.to_le_bytes().to_vec();
    block.extend_from_slice(&pressure);
    block.extend_from_slice(&altitude);
    block
}

#[test]
fn test_environment_values() {
    let payload = report(0x0010, 0, &environment(2450, [0x10, 0x00, 0x00], [0x00, 0x01, 0x00]));
    let sample = decode(&payload).unwrap();

    assert_eq!(sample.temperature, 2450.0 * SCALE_TEMPERATURE);
    assert_eq!(sample.pressure, 16.0 * SCALE_AIR_PRESSURE);
    assert_eq!(sample.altitude, 256.0 * SCALE_HEIGHT);
}

#[test]
fn test_pressure_is_sign_extended_from_24_bits() {
    // Top byte 0xFF carries bit 23: -1
    let payload = report(0x0010, 0, &environment(0, [0xFF, 0xFF, 0xFF], [0x00, 0x00, 0x80]));
    let sample = decode(&payload).unwrap();
    assert!(sample.pressure < 0.0);
    assert_eq!(sample.pressure, -SCALE_AIR_PRESSURE);
    assert_eq!(sample.altitude, -8_388_608.0 * SCALE_HEIGHT);

    // Bit 23 clear: largest positive value, no sign extension
    let payload = report(0x0010, 0, &environment(0, [0xFF, 0xFF, 0x7F], [0x00; 3]));
    let sample = decode(&payload).unwrap();
    assert_eq!(sample.pressure, 8_388_607.0 * SCALE_AIR_PRESSURE);
}

#[test]
fn test_first_missing_block_ends_decoding() {
    // Accel fits, gyro does not
    let payload = report(0x0005, 9, &i16s(&[10, 20, 30]));
    let sample = decode(&payload).unwrap();

    assert_eq!(sample.fields.bits(), 0x0005);
    assert_eq!(sample.decoded, FieldMask::ACCEL);
    assert_eq!(sample.accel[1], 20.0 * SCALE_ACCEL);
    assert_eq!(sample.gyro, [0.0; 3]);
}

#[test]
fn test_later_block_not_read_after_short_block() {
    // Six bytes would fit the euler block, but the 8-byte environment
    // block comes first and does not fit
    let payload = report(0x0050, 0, &i16s(&[7, 8, 9]));
    let sample = decode(&payload).unwrap();

    assert!(sample.decoded.is_empty());
    assert!(!sample.has(FieldMask::EULER));
    assert_eq!(sample.euler, [0.0; 3]);
    assert_eq!(sample.temperature, 0.0);
}

#[test]
fn test_unknown_mask_bits_are_kept_but_ignored() {
    let payload = report(0x8001, 0, &i16s(&[1, 1, 1]));
    let sample = decode(&payload).unwrap();

    assert_eq!(sample.fields.bits(), 0x8001);
    assert_eq!(sample.decoded, FieldMask::ACCEL);
}

#[test]
fn test_sample_serializes_to_json() {
    let payload = report(0x0002, 42, &i16s(&[0, 0, 2048]));
    let sample = decode(&payload).unwrap();

    let json = serde_json::to_value(sample).unwrap();
    assert_eq!(json["timestamp_ms"], 42);
    assert_eq!(json["fields"], 2);
    let back: Sample = serde_json::from_value(json).unwrap();
    assert_eq!(back, sample);
}
