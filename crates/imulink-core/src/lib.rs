//! # imulink Core Library
//!
//! Frame codec and link management for 10-DOF IMU sensors on a serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A byte-at-a-time frame codec with checksum validation
//! - Sensor report decoding into typed [`Sample`](protocol::Sample)s
//! - A link session that runs the device handshake and a reader worker
//! - Hotplug supervision with bounded or unbounded reconnection
//! - INI-style link configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use imulink_core::{config::LinkConfig, link::LinkSession};
//!
//! let config = LinkConfig::from_file("config.ini")?;
//! let mut session = LinkSession::serial(config);
//! session.set_data_callback(|sample| println!("{:?}", sample.euler));
//! session.start()?;
//! ```

pub mod config;
pub mod demo;
pub mod link;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, LinkConfig};
    pub use crate::link::{LinkSession, LinkStats, SessionState};
    pub use crate::protocol::{
        Connector, FieldMask, FrameCodec, ProtocolError, RawFrame, Sample, StreamDecoder,
        Transport,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
