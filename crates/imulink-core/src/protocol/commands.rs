//! Protocol commands
//!
//! Defines the command bytes understood by the IMU module and the body of
//! the parameter-configuration command.

use serde::{Deserialize, Serialize};

/// Command bytes, the first byte of every frame's DATA section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Put the sensor into its working state (0x03)
    Wake,

    /// Sensor data report, sent by the device (0x11)
    SensorReport,

    /// Configure report parameters (0x12)
    ConfigureParams,

    /// Start streaming sensor reports unprompted (0x19)
    EnableAutoReport,
}

impl Command {
    /// Get the command byte
    pub fn byte(&self) -> u8 {
        match self {
            Command::Wake => 0x03,
            Command::SensorReport => 0x11,
            Command::ConfigureParams => 0x12,
            Command::EnableAutoReport => 0x19,
        }
    }

    /// Look up a command from its byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x03 => Some(Command::Wake),
            0x11 => Some(Command::SensorReport),
            0x12 => Some(Command::ConfigureParams),
            0x19 => Some(Command::EnableAutoReport),
            _ => None,
        }
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Wake => "wake",
            Command::SensorReport => "sensor report",
            Command::ConfigureParams => "configure parameters",
            Command::EnableAutoReport => "enable auto-report",
        }
    }
}

/// Still-state acceleration threshold sent during the handshake
pub const STILL_ACCEL_THRESHOLD: u8 = 5;
/// Static zero-speed threshold sent during the handshake
pub const STATIC_ZERO_SPEED: u8 = 255;
/// Dynamic zero-speed threshold sent during the handshake
pub const DYNAMIC_ZERO_SPEED: u8 = 0;

/// Body of the parameter-configuration command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceParams {
    /// Acceleration threshold below which the sensor counts as still
    pub still_accel_threshold: u8,
    /// Static zero-speed threshold
    pub static_zero_speed: u8,
    /// Dynamic zero-speed threshold
    pub dynamic_zero_speed: u8,
    /// Barometer filter level (0..=3)
    pub barometer_filter: u8,
    /// Fuse the magnetometer into the orientation solution
    pub compass_fusion: bool,
    /// Report rate in Hz
    pub report_rate: u8,
    /// Gyroscope filter coefficient
    pub gyro_filter: u8,
    /// Accelerometer filter coefficient
    pub accel_filter: u8,
    /// Magnetometer filter coefficient
    pub compass_filter: u8,
    /// Field mask of the quantities to report
    pub subscribe: u16,
}

impl DeviceParams {
    /// Encoded command length, command byte included
    pub const PAYLOAD_LEN: usize = 11;

    /// Build the full 0x12 payload
    pub fn to_payload(&self) -> [u8; Self::PAYLOAD_LEN] {
        let [subscribe_lo, subscribe_hi] = self.subscribe.to_le_bytes();
        [
            Command::ConfigureParams.byte(),
            self.still_accel_threshold,
            self.static_zero_speed,
            self.dynamic_zero_speed,
            ((self.barometer_filter & 0x03) << 1) | u8::from(self.compass_fusion),
            self.report_rate,
            self.gyro_filter,
            self.accel_filter,
            self.compass_filter,
            subscribe_lo,
            subscribe_hi,
        ]
    }
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            still_accel_threshold: STILL_ACCEL_THRESHOLD,
            static_zero_speed: STATIC_ZERO_SPEED,
            dynamic_zero_speed: DYNAMIC_ZERO_SPEED,
            barometer_filter: 2,
            compass_fusion: false,
            report_rate: 60,
            gyro_filter: 1,
            accel_filter: 3,
            compass_filter: 5,
            subscribe: 0x7F,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        for cmd in [
            Command::Wake,
            Command::SensorReport,
            Command::ConfigureParams,
            Command::EnableAutoReport,
        ] {
            assert_eq!(Command::from_byte(cmd.byte()), Some(cmd));
        }
        assert_eq!(Command::from_byte(0x42), None);
    }

    #[test]
    fn test_default_params_payload() {
        let payload = DeviceParams::default().to_payload();
        assert_eq!(
            payload,
            [0x12, 5, 255, 0, 0b100, 60, 1, 3, 5, 0x7F, 0x00]
        );
    }

    #[test]
    fn test_packed_filter_byte() {
        let params = DeviceParams {
            barometer_filter: 3,
            compass_fusion: true,
            subscribe: 0x0142,
            ..DeviceParams::default()
        };
        let payload = params.to_payload();
        assert_eq!(payload[4], 0b111);
        assert_eq!(payload[9], 0x42);
        assert_eq!(payload[10], 0x01);
    }
}
