//! Serial Protocol Communication
//!
//! Implements the framed binary protocol spoken by the 10-DOF IMU module.
//!
//! Every frame on the wire is `BEGIN | ADDR | LEN | DATA | CHECKSUM | END`
//! with an 8-bit additive checksum over `ADDR..DATA`. Outbound frames are
//! additionally prefixed by a fixed preamble that lets the sensor's UART
//! resynchronize.

pub mod commands;
mod error;
pub mod packet;
pub mod sample;
pub mod serial;
pub mod stream;
pub mod transport;

pub use commands::{Command, DeviceParams};
pub use error::{FrameError, ProtocolError};
pub use packet::{encode_command, encode_frame, FrameCodec, FrameStats, ParserState, RawFrame};
pub use sample::{FieldMask, Sample};
pub use serial::{list_ports, open_port, port_exists, PortInfo};
pub use stream::StreamDecoder;
pub use transport::{Connector, SerialConnector, SerialTransport, Transport};

/// Default baud rate of the sensor UART
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default per-read timeout in milliseconds
///
/// Reads hold the transport lock, so this also bounds how long a command
/// write can wait behind the reader.
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// First byte of every frame
pub const FRAME_BEGIN: u8 = 0x49;

/// Last byte of every frame
pub const FRAME_END: u8 = 0x4D;

/// Largest DATA section accepted from the device
pub const MAX_RX_DATA_LEN: usize = 73;

/// Largest DATA section the device accepts from the host
pub const MAX_TX_DATA_LEN: usize = 31;

/// BEGIN + ADDR + LEN + CHECKSUM + END
pub const FRAME_OVERHEAD: usize = 5;

/// Size of the receive accumulation buffer
pub const FRAME_BUFFER_SIZE: usize = FRAME_OVERHEAD + MAX_RX_DATA_LEN;

/// Address filter value that accepts frames from any device.
/// Never valid as a source address on the wire.
pub const BROADCAST_ADDRESS: u8 = 255;

/// Number of zero bytes at the start of the outbound preamble
pub const PREAMBLE_ZERO_LEN: usize = 46;

/// Sync pattern closing the outbound preamble
pub const PREAMBLE_SYNC: [u8; 4] = [0x00, 0xFF, 0x00, 0xFF];

/// Total outbound preamble length
pub const PREAMBLE_LEN: usize = PREAMBLE_ZERO_LEN + PREAMBLE_SYNC.len();
