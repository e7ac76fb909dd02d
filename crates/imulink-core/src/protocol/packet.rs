//! Frame encoding/decoding
//!
//! Frame format:
//! - 1 byte: BEGIN (0x49)
//! - 1 byte: device address (255 is never a valid source)
//! - 1 byte: data length, 1..=73 inbound, 1..=31 outbound
//! - N bytes: data (command byte followed by command body)
//! - 1 byte: checksum, truncated sum of ADDR, LEN and every data byte
//! - 1 byte: END (0x4D)
//!
//! Outbound frames are sent behind a 50 byte preamble (46 zero bytes then
//! `00 FF 00 FF`). The preamble is outside the checksum domain.

use tracing::debug;

use super::{
    FrameError, ProtocolError, BROADCAST_ADDRESS, FRAME_BEGIN, FRAME_BUFFER_SIZE, FRAME_END,
    FRAME_OVERHEAD, MAX_RX_DATA_LEN, MAX_TX_DATA_LEN, PREAMBLE_LEN, PREAMBLE_SYNC,
    PREAMBLE_ZERO_LEN,
};

/// A checksum-validated frame, before address filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Source address from the wire
    pub address: u8,
    /// DATA section: command byte followed by its body
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// The command byte, if the payload carries one
    pub fn command(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Whether this frame passes an address filter (255 accepts any source)
    pub fn matches_address(&self, filter: u8) -> bool {
        filter == BROADCAST_ADDRESS || filter == self.address
    }
}

/// Receive state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    /// Discarding bytes until BEGIN
    #[default]
    WaitBegin,
    /// Expecting the source address
    Address,
    /// Expecting the data length
    Length,
    /// Accumulating data bytes
    Data,
    /// Expecting the checksum byte
    Checksum,
    /// Expecting END
    End,
}

/// Running counters kept by a [`FrameCodec`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames that completed with a valid checksum and END byte
    pub frames: u64,
    /// Frames aborted at the address byte
    pub bad_address: u64,
    /// Frames aborted at the length byte
    pub bad_length: u64,
    /// Frames aborted on checksum mismatch
    pub checksum_errors: u64,
    /// Frames aborted on a wrong END byte
    pub bad_end: u64,
}

impl FrameStats {
    /// Total number of aborted frame attempts
    pub fn aborted(&self) -> u64 {
        self.bad_address + self.bad_length + self.checksum_errors + self.bad_end
    }

    fn record(&mut self, err: FrameError) {
        match err {
            FrameError::BroadcastSource(_) => self.bad_address += 1,
            FrameError::InvalidLength(_) => self.bad_length += 1,
            FrameError::ChecksumMismatch { .. } => self.checksum_errors += 1,
            FrameError::BadEnd(_) => self.bad_end += 1,
        }
    }
}

/// Byte-at-a-time frame reassembler.
///
/// Every abort path clears the buffer and returns to
/// [`ParserState::WaitBegin`], so a malformed sequence costs at most one
/// frame's worth of discarded bytes.
///
/// [`FrameCodec::new`] parses device-to-host frames, where ADDR is the
/// source and 255 is rejected. [`FrameCodec::device`] parses host-to-device
/// commands, where ADDR is the destination and 255 addresses every sensor.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    state: ParserState,
    accept_broadcast: bool,
    buffer: [u8; FRAME_BUFFER_SIZE],
    len: usize,
    data_len: usize,
    checksum: u8,
    stats: FrameStats,
}

impl FrameCodec {
    /// Create a host-side codec waiting for BEGIN
    pub fn new() -> Self {
        Self {
            state: ParserState::WaitBegin,
            accept_broadcast: false,
            buffer: [0; FRAME_BUFFER_SIZE],
            len: 0,
            data_len: 0,
            checksum: 0,
            stats: FrameStats::default(),
        }
    }

    /// Create a device-side codec that also accepts broadcast commands
    pub fn device() -> Self {
        Self {
            accept_broadcast: true,
            ..Self::new()
        }
    }

    /// Current receive state
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Counters since creation
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Number of bytes of the current attempt held in the buffer
    pub fn buffered(&self) -> usize {
        self.len
    }

    /// Consume one byte, returning a frame when one completes
    pub fn feed(&mut self, byte: u8) -> Option<RawFrame> {
        match self.state {
            ParserState::WaitBegin => {
                if byte == FRAME_BEGIN {
                    self.clear();
                    self.push(byte);
                    self.state = ParserState::Address;
                }
            }
            ParserState::Address => {
                if byte == BROADCAST_ADDRESS && !self.accept_broadcast {
                    self.abort(FrameError::BroadcastSource(byte));
                } else {
                    self.push(byte);
                    self.checksum = byte;
                    self.state = ParserState::Length;
                }
            }
            ParserState::Length => {
                let len = byte as usize;
                if len == 0 || len > MAX_RX_DATA_LEN {
                    self.abort(FrameError::InvalidLength(byte));
                } else {
                    self.push(byte);
                    self.checksum = self.checksum.wrapping_add(byte);
                    self.data_len = len;
                    self.state = ParserState::Data;
                }
            }
            ParserState::Data => {
                self.push(byte);
                self.checksum = self.checksum.wrapping_add(byte);
                if self.len >= 3 + self.data_len {
                    self.state = ParserState::Checksum;
                }
            }
            ParserState::Checksum => {
                if byte == self.checksum {
                    self.push(byte);
                    self.state = ParserState::End;
                } else {
                    self.abort(FrameError::ChecksumMismatch {
                        computed: self.checksum,
                        received: byte,
                    });
                }
            }
            ParserState::End => {
                if byte == FRAME_END {
                    let frame = RawFrame {
                        address: self.buffer[1],
                        payload: self.buffer[3..3 + self.data_len].to_vec(),
                    };
                    self.stats.frames += 1;
                    self.reset();
                    return Some(frame);
                }
                self.abort(FrameError::BadEnd(byte));
            }
        }
        None
    }

    /// Drop any partial frame and wait for the next BEGIN.
    ///
    /// Called when the link is lost or re-established so stale bytes never
    /// complete a frame on the new connection. Counters are kept.
    pub fn reset(&mut self) {
        self.state = ParserState::WaitBegin;
        self.clear();
    }

    fn push(&mut self, byte: u8) {
        // Length is bounded by MAX_RX_DATA_LEN before any data is accepted
        self.buffer[self.len] = byte;
        self.len += 1;
    }

    // Stale bytes past `len` are overwritten before they are read
    fn clear(&mut self) {
        self.len = 0;
        self.data_len = 0;
        self.checksum = 0;
    }

    fn abort(&mut self, err: FrameError) {
        debug!("frame aborted: {err}");
        self.stats.record(err);
        self.reset();
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// 8-bit truncated sum, the frame checksum
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn validate_tx_payload(payload: &[u8]) -> Result<(), ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::PayloadEmpty);
    }
    if payload.len() > MAX_TX_DATA_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_TX_DATA_LEN,
        });
    }
    Ok(())
}

/// Encode a single `BEGIN..END` frame without the preamble
pub fn encode_frame(payload: &[u8], device_address: u8) -> Result<Vec<u8>, ProtocolError> {
    validate_tx_payload(payload)?;
    Ok(build_frame(payload, device_address))
}

/// Frame a payload without checking the outbound length limit.
/// Callers keep `payload.len()` within `1..=MAX_RX_DATA_LEN`.
pub(crate) fn build_frame(payload: &[u8], device_address: u8) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    bytes.push(FRAME_BEGIN);
    bytes.push(device_address);
    bytes.push(payload.len() as u8);
    bytes.extend_from_slice(payload);
    bytes.push(checksum(&bytes[1..]));
    bytes.push(FRAME_END);
    bytes
}

/// Encode a transmit-ready command: preamble followed by the frame
pub fn encode_command(payload: &[u8], device_address: u8) -> Result<Vec<u8>, ProtocolError> {
    let frame = encode_frame(payload, device_address)?;

    let mut bytes = Vec::with_capacity(PREAMBLE_LEN + frame.len());
    bytes.resize(PREAMBLE_ZERO_LEN, 0x00);
    bytes.extend_from_slice(&PREAMBLE_SYNC);
    bytes.extend_from_slice(&frame);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(codec: &mut FrameCodec, bytes: &[u8]) -> Vec<RawFrame> {
        bytes.iter().filter_map(|b| codec.feed(*b)).collect()
    }

    #[test]
    fn test_frame_roundtrip() {
        let encoded = encode_frame(&[0x11, 0x02, 0x00], 0x01).expect("Should encode");
        let mut codec = FrameCodec::new();
        let frames = feed_all(&mut codec, &encoded);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].address, 0x01);
        assert_eq!(frames[0].payload, vec![0x11, 0x02, 0x00]);
        assert_eq!(codec.state(), ParserState::WaitBegin);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_command_preamble_layout() {
        let bytes = encode_command(&[0x03], 0xFF).expect("Should encode");

        assert_eq!(bytes.len(), PREAMBLE_LEN + FRAME_OVERHEAD + 1);
        assert!(bytes[..46].iter().all(|b| *b == 0));
        assert_eq!(&bytes[46..50], &[0x00, 0xFF, 0x00, 0xFF]);
        assert_eq!(bytes[50], FRAME_BEGIN);
        assert_eq!(bytes[51], 0xFF);
        assert_eq!(bytes[52], 1);
        assert_eq!(bytes[53], 0x03);
        assert_eq!(bytes[54], 0xFFu8.wrapping_add(1).wrapping_add(0x03));
        assert_eq!(bytes[55], FRAME_END);
    }

    #[test]
    fn test_encode_rejects_bad_payloads() {
        assert!(matches!(
            encode_command(&[], 1),
            Err(ProtocolError::PayloadEmpty)
        ));
        assert!(matches!(
            encode_command(&[0u8; 32], 1),
            Err(ProtocolError::PayloadTooLarge { size: 32, max: 31 })
        ));
        assert!(encode_command(&[0u8; 31], 1).is_ok());
    }

    #[test]
    fn test_checksum_mismatch_counts() {
        let mut encoded = encode_frame(&[0x19], 0x02).expect("Should encode");
        encoded[3] ^= 0xFF;

        let mut codec = FrameCodec::new();
        assert!(feed_all(&mut codec, &encoded).is_empty());
        assert_eq!(codec.stats().checksum_errors, 1);
        assert_eq!(codec.state(), ParserState::WaitBegin);
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let encoded = encode_frame(&[0x11, 0x00, 0x00], 0x05).expect("Should encode");
        let mut codec = FrameCodec::new();

        feed_all(&mut codec, &encoded[..4]);
        assert_eq!(codec.state(), ParserState::Data);

        codec.reset();
        assert_eq!(codec.state(), ParserState::WaitBegin);
        assert_eq!(codec.buffered(), 0);

        // Tail of the old frame must not complete anything
        assert!(feed_all(&mut codec, &encoded[4..]).is_empty());
        assert_eq!(feed_all(&mut codec, &encoded).len(), 1);
    }

    #[test]
    fn test_device_codec_accepts_broadcast_commands() {
        let encoded = encode_frame(&[0x19], BROADCAST_ADDRESS).expect("Should encode");

        let mut host = FrameCodec::new();
        assert!(feed_all(&mut host, &encoded).is_empty());
        assert_eq!(host.stats().bad_address, 1);

        let mut device = FrameCodec::device();
        let frames = feed_all(&mut device, &encoded);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].address, BROADCAST_ADDRESS);
        assert_eq!(frames[0].payload, vec![0x19]);
    }

    #[test]
    fn test_aborted_attempt_does_not_leak_into_next_frame() {
        let long = encode_frame(&[0xAA; 20], 0x03).expect("Should encode");
        let short = encode_frame(&[0x11, 0x01], 0x04).expect("Should encode");
        let mut codec = FrameCodec::new();

        // Abandon the long frame mid-data
        feed_all(&mut codec, &long[..15]);
        codec.reset();
        let frames = feed_all(&mut codec, &short);
        assert_eq!(
            frames,
            vec![RawFrame {
                address: 0x04,
                payload: vec![0x11, 0x01]
            }]
        );
    }

    #[test]
    fn test_address_filter() {
        let frame = RawFrame {
            address: 3,
            payload: vec![0x11],
        };
        assert!(frame.matches_address(BROADCAST_ADDRESS));
        assert!(frame.matches_address(3));
        assert!(!frame.matches_address(4));
        assert_eq!(frame.command(), Some(0x11));
    }
}
