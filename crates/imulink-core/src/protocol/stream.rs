//! Byte stream to sample decoding
//!
//! Sits one layer above raw framing: frames from sources other than the
//! configured address are dropped silently before they reach the sample
//! decoder.

use tracing::debug;

use super::{sample, FrameCodec, FrameStats, RawFrame, Sample};

/// Frame codec plus address filter plus sample decoder
#[derive(Debug, Clone)]
pub struct StreamDecoder {
    codec: FrameCodec,
    address_filter: u8,
    address_mismatches: u64,
    undecodable: u64,
}

impl StreamDecoder {
    /// Create a decoder accepting frames from `address_filter` (255 = any)
    pub fn new(address_filter: u8) -> Self {
        Self {
            codec: FrameCodec::new(),
            address_filter,
            address_mismatches: 0,
            undecodable: 0,
        }
    }

    /// Consume one byte, returning a sample when a matching report completes
    pub fn push(&mut self, byte: u8) -> Option<Sample> {
        let frame = self.codec.feed(byte)?;
        self.dispatch(frame)
    }

    /// Consume a run of bytes, calling `on_sample` for each decoded sample
    pub fn extend<F>(&mut self, bytes: &[u8], mut on_sample: F)
    where
        F: FnMut(Sample),
    {
        for &b in bytes {
            if let Some(sample) = self.push(b) {
                on_sample(sample);
            }
        }
    }

    /// Reset the underlying frame codec
    pub fn reset(&mut self) {
        self.codec.reset();
    }

    /// Framing counters
    pub fn frame_stats(&self) -> FrameStats {
        self.codec.stats()
    }

    /// Frames dropped because their source address did not match
    pub fn address_mismatches(&self) -> u64 {
        self.address_mismatches
    }

    /// Valid frames that did not decode into a sample
    pub fn undecodable(&self) -> u64 {
        self.undecodable
    }

    /// Access the frame codec
    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    fn dispatch(&mut self, frame: RawFrame) -> Option<Sample> {
        if !frame.matches_address(self.address_filter) {
            debug!(
                "dropping frame from address {} (filter {})",
                frame.address, self.address_filter
            );
            self.address_mismatches += 1;
            return None;
        }
        let decoded = sample::decode(&frame.payload);
        if decoded.is_none() {
            self.undecodable += 1;
        }
        decoded
    }
}
