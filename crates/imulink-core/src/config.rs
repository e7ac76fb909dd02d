//! Link configuration
//!
//! Loads [`LinkConfig`] from an INI-style file:
//!
//! ```ini
//! [Serial]
//! port = /dev/ttyUSB0
//! baudrate = 115200
//!
//! [IMU]
//! device_address = 255
//! subscribe_tag = 0x7F
//!
//! [HotPlug]
//! max_reconnect = 0
//! ```
//!
//! Blank lines and lines starting with `#` or `;` are ignored. Integers may
//! be written in decimal or with a `0x` prefix.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{
    commands::{DeviceParams, DYNAMIC_ZERO_SPEED, STATIC_ZERO_SPEED, STILL_ACCEL_THRESHOLD},
    FieldMask, BROADCAST_ADDRESS, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, FRAME_OVERHEAD,
    PREAMBLE_LEN,
};

/// Highest report rate the sensor firmware supports, Hz
pub const DEVICE_MAX_REPORT_RATE: u32 = 250;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("[{section}] {key}: invalid value '{value}'")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    #[error("[{section}] {key}: {value} is outside {min}..={max}")]
    OutOfRange {
        section: String,
        key: String,
        value: i64,
        min: i64,
        max: i64,
    },
}

/// Parsed INI document with typed accessors
#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniDocument {
    /// Parse INI text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut doc = IniDocument::default();
        let mut section = String::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[') {
                let Some(name) = name.strip_suffix(']') else {
                    return Err(ConfigError::Syntax {
                        line: idx + 1,
                        message: format!("unterminated section header '{line}'"),
                    });
                };
                section = name.trim().to_string();
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) => {
                    doc.sections
                        .entry(section.clone())
                        .or_default()
                        .insert(key.trim().to_string(), value.trim().to_string());
                }
                None => {
                    return Err(ConfigError::Syntax {
                        line: idx + 1,
                        message: format!("expected 'key = value', got '{line}'"),
                    })
                }
            }
        }

        Ok(doc)
    }

    /// Read and parse an INI file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Raw value, if present and non-empty
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// String value or default
    pub fn get_str(&self, section: &str, key: &str, default: &str) -> String {
        self.get(section, key).unwrap_or(default).to_string()
    }

    /// Integer value (decimal or `0x` hex) or default
    pub fn get_int(&self, section: &str, key: &str, default: i64) -> Result<i64, ConfigError> {
        let Some(value) = self.get(section, key) else {
            return Ok(default);
        };
        let parsed = match value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
        {
            Some(hex) => i64::from_str_radix(hex, 16),
            None => value.parse::<i64>(),
        };
        parsed.map_err(|_| ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Float value or default
    pub fn get_float(&self, section: &str, key: &str, default: f64) -> Result<f64, ConfigError> {
        let Some(value) = self.get(section, key) else {
            return Ok(default);
        };
        value.parse::<f64>().map_err(|_| ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Boolean value or default; `1`, `true`, `yes` and `on` are true
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get(section, key) {
            Some(value) => matches!(
                value.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            None => default,
        }
    }

    fn get_ranged<T>(
        &self,
        section: &str,
        key: &str,
        default: T,
        min: i64,
        max: i64,
    ) -> Result<T, ConfigError>
    where
        T: TryFrom<i64> + Into<i64> + Copy,
    {
        let value = self.get_int(section, key, default.into())?;
        if value < min || value > max {
            return Err(ConfigError::OutOfRange {
                section: section.to_string(),
                key: key.to_string(),
                value,
                min,
                max,
            });
        }
        T::try_from(value).map_err(|_| ConfigError::OutOfRange {
            section: section.to_string(),
            key: key.to_string(),
            value,
            min,
            max,
        })
    }
}

/// Everything needed to open, configure and supervise one sensor link.
///
/// Captured once when a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port name
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Accepted source address (255 = any); also the target of outbound commands
    pub device_address: u8,
    /// Report rate in Hz
    pub report_rate: u8,
    /// Field mask of the quantities to subscribe to
    pub subscribe: u16,
    /// Fuse the magnetometer into the orientation solution
    pub compass_fusion: bool,
    /// Barometer filter level (0..=3)
    pub barometer_filter: u8,
    /// Gyroscope filter coefficient
    pub gyro_filter: u8,
    /// Accelerometer filter coefficient
    pub accel_filter: u8,
    /// Magnetometer filter coefficient
    pub compass_filter: u8,
    /// Interval between link health checks, ms
    pub check_interval_ms: u64,
    /// Interval between reconnect attempts, ms
    pub reconnect_interval_ms: u64,
    /// Maximum consecutive reconnect attempts (0 = unbounded)
    pub max_reconnect: u32,
    /// How long a reconnect attempt waits for the device to appear, ms
    pub presence_timeout_ms: u64,
    /// Capacity of the sample dispatch queue (0 = call back on the reader thread)
    pub queue_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_TIMEOUT_MS,
            device_address: BROADCAST_ADDRESS,
            report_rate: 60,
            subscribe: FieldMask::ALL.bits(),
            compass_fusion: false,
            barometer_filter: 2,
            gyro_filter: 1,
            accel_filter: 3,
            compass_filter: 5,
            check_interval_ms: 1000,
            reconnect_interval_ms: 2000,
            max_reconnect: 0,
            presence_timeout_ms: 5000,
            queue_capacity: 0,
        }
    }
}

impl LinkConfig {
    /// Build a config from a parsed INI document, falling back to defaults
    pub fn from_ini(doc: &IniDocument) -> Result<Self, ConfigError> {
        let d = LinkConfig::default();
        Ok(Self {
            port: doc.get_str("Serial", "port", &d.port),
            baud_rate: doc.get_ranged("Serial", "baudrate", d.baud_rate, 1, u32::MAX as i64)?,
            read_timeout_ms: doc.get_ranged(
                "Serial",
                "timeout",
                d.read_timeout_ms as u32,
                1,
                60_000,
            )? as u64,
            device_address: doc.get_ranged("IMU", "device_address", d.device_address, 0, 255)?,
            report_rate: doc.get_ranged("IMU", "report_rate", d.report_rate, 1, 255)?,
            subscribe: doc.get_ranged("IMU", "subscribe_tag", d.subscribe, 0, 0xFFFF)?,
            compass_fusion: doc.get_bool("IMU", "compass_on", d.compass_fusion),
            barometer_filter: doc.get_ranged(
                "IMU",
                "barometer_filter",
                d.barometer_filter,
                0,
                3,
            )?,
            gyro_filter: doc.get_ranged("IMU", "gyro_filter", d.gyro_filter, 0, 255)?,
            accel_filter: doc.get_ranged("IMU", "acc_filter", d.accel_filter, 0, 255)?,
            compass_filter: doc.get_ranged(
                "IMU",
                "compass_filter",
                d.compass_filter,
                0,
                255,
            )?,
            check_interval_ms: doc.get_ranged(
                "HotPlug",
                "check_interval",
                d.check_interval_ms as u32,
                1,
                3_600_000,
            )? as u64,
            reconnect_interval_ms: doc.get_ranged(
                "HotPlug",
                "reconnect_interval",
                d.reconnect_interval_ms as u32,
                1,
                3_600_000,
            )? as u64,
            max_reconnect: doc.get_ranged(
                "HotPlug",
                "max_reconnect",
                d.max_reconnect,
                0,
                u32::MAX as i64,
            )?,
            presence_timeout_ms: doc.get_ranged(
                "HotPlug",
                "presence_timeout",
                d.presence_timeout_ms as u32,
                0,
                3_600_000,
            )? as u64,
            queue_capacity: doc.get_ranged(
                "Dispatch",
                "queue_capacity",
                d.queue_capacity as u32,
                0,
                1_000_000,
            )? as usize,
        })
    }

    /// Parse a config from INI text
    pub fn from_ini_str(content: &str) -> Result<Self, ConfigError> {
        Self::from_ini(&IniDocument::parse(content)?)
    }

    /// Load a config from an INI file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_ini(&IniDocument::load(path.as_ref())?)
    }

    /// Parameters sent in the configuration step of the handshake
    pub fn device_params(&self) -> DeviceParams {
        DeviceParams {
            still_accel_threshold: STILL_ACCEL_THRESHOLD,
            static_zero_speed: STATIC_ZERO_SPEED,
            dynamic_zero_speed: DYNAMIC_ZERO_SPEED,
            barometer_filter: self.barometer_filter,
            compass_fusion: self.compass_fusion,
            report_rate: self.report_rate,
            gyro_filter: self.gyro_filter,
            accel_filter: self.accel_filter,
            compass_filter: self.compass_filter,
            subscribe: self.subscribe,
        }
    }

    /// Subscribed fields
    pub fn fields(&self) -> FieldMask {
        FieldMask(self.subscribe)
    }

    /// Wire size of one sensor report for the subscribed fields, preamble included
    pub fn report_frame_len(&self) -> usize {
        PREAMBLE_LEN + FRAME_OVERHEAD + self.fields().report_payload_len()
    }

    /// Highest report rate the link can carry at this baud rate (8N1), Hz
    pub fn max_report_rate(&self) -> f64 {
        let bytes_per_sec = self.baud_rate as f64 / 10.0;
        bytes_per_sec / self.report_frame_len() as f64
    }

    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Health check interval as a duration
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Reconnect interval as a duration
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Presence wait as a duration
    pub fn presence_timeout(&self) -> Duration {
        Duration::from_millis(self.presence_timeout_ms)
    }

    /// Problems worth telling the user about before starting
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.report_rate as u32 > DEVICE_MAX_REPORT_RATE {
            warnings.push(format!(
                "report_rate {} Hz exceeds the device maximum of {} Hz",
                self.report_rate, DEVICE_MAX_REPORT_RATE
            ));
        }
        let link_max = self.max_report_rate();
        if self.report_rate as f64 > link_max {
            warnings.push(format!(
                "report_rate {} Hz exceeds what {} baud can carry for this subscription ({:.1} Hz)",
                self.report_rate, self.baud_rate, link_max
            ));
        }
        if self.fields().is_empty() {
            warnings.push("subscribe_tag is 0, reports will carry no sensor fields".to_string());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = LinkConfig::from_ini_str("").expect("Should parse");
        assert_eq!(config, LinkConfig::default());
    }

    #[test]
    fn test_comments_and_whitespace() {
        let doc = IniDocument::parse("# comment\n; other\n\n[IMU]\n  report_rate =  100  \n")
            .expect("Should parse");
        assert_eq!(doc.get("IMU", "report_rate"), Some("100"));
    }

    #[test]
    fn test_hex_and_bool_values() {
        let doc = IniDocument::parse("[IMU]\nsubscribe_tag = 0x02\ncompass_on = Yes\n")
            .expect("Should parse");
        assert_eq!(doc.get_int("IMU", "subscribe_tag", 0).unwrap(), 2);
        assert!(doc.get_bool("IMU", "compass_on", false));
        assert!(!doc.get_bool("IMU", "missing", false));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let err = IniDocument::parse("[IMU]\nreport_rate\n").unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_max_report_rate() {
        let config = LinkConfig {
            subscribe: FieldMask::ACCEL_WITH_GRAVITY.bits(),
            ..LinkConfig::default()
        };
        // 50 + 5 + 13 bytes per report at 11520 bytes/s
        assert_eq!(config.report_frame_len(), 68);
        assert!((config.max_report_rate() - 11520.0 / 68.0).abs() < 1e-9);
    }
}
