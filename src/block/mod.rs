//! Waveform sample blocks as delivered by the query layer
//!
//! A [`SampleBlock`] is the unit of data the CWB query transport hands back:
//! one channel, one start time, one sample rate and a run of samples still in
//! their encoded form. Blocks are decoded lazily by a [`codec::BlockDecoder`]
//! when a span ingests them.
//!
//! This module also provides:
//!
//! - [`BlockRef`], a compact identity for a block (channel, start and a CRC32
//!   of the raw payload) used by the run list
//! - The SEED encoding identifiers understood by the bundled decoder
//! - The list of informational blockette types whose blocks carry no samples

pub mod codec;

use crc32fast::Hasher;
use std::fmt;

/// SEED encoding: ASCII text (never decoded into samples)
pub const ENCODING_ASCII: u8 = 0;
/// SEED encoding: 16-bit integers
pub const ENCODING_INT16: u8 = 1;
/// SEED encoding: 24-bit integers
pub const ENCODING_INT24: u8 = 2;
/// SEED encoding: 32-bit integers
pub const ENCODING_INT32: u8 = 3;
/// SEED encoding: Steim-1 compression
pub const ENCODING_STEIM1: u8 = 10;
/// SEED encoding: Steim-2 compression
pub const ENCODING_STEIM2: u8 = 11;

/// Blockette types that describe events, calibrations, timing or opaque data
/// rather than carrying waveform samples.
pub const INFORMATIONAL_BLOCKETTES: [u16; 11] =
    [200, 201, 300, 310, 320, 390, 395, 400, 405, 500, 2000];

/// Byte order of the encoded payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Most significant byte first (SEED default)
    #[default]
    BigEndian,
    /// Least significant byte first
    LittleEndian,
}

/// A block of encoded samples for one channel
#[derive(Debug, Clone)]
pub struct SampleBlock {
    /// Channel name (network, station, channel, location)
    pub channel: String,
    /// Time of the first sample in epoch milliseconds
    pub start_ms: i64,
    /// Samples per second; zero or negative means the block has no usable rate
    pub rate: f64,
    /// Number of samples declared in the block header
    pub nsamp: usize,
    /// SEED encoding identifier of `payload`
    pub encoding: u8,
    /// Byte order of `payload`
    pub byte_order: ByteOrder,
    /// Blockette types present in the block header
    pub blockettes: Vec<u16>,
    /// Raw encoded sample data
    pub payload: Vec<u8>,
}

impl SampleBlock {
    /// Create a block with no blockettes
    ///
    /// # Arguments
    ///
    /// * `channel` - Channel name
    /// * `start_ms` - Time of the first sample in epoch milliseconds
    /// * `rate` - Samples per second
    /// * `nsamp` - Declared number of samples
    /// * `encoding` - SEED encoding identifier
    /// * `payload` - Raw encoded data
    pub fn new(
        channel: impl Into<String>,
        start_ms: i64,
        rate: f64,
        nsamp: usize,
        encoding: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            channel: channel.into(),
            start_ms,
            rate,
            nsamp,
            encoding,
            byte_order: ByteOrder::BigEndian,
            blockettes: Vec::new(),
            payload,
        }
    }

    /// Set the payload byte order
    #[must_use]
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Add a blockette type to the header list
    #[must_use]
    pub fn with_blockette(mut self, blockette: u16) -> Self {
        self.blockettes.push(blockette);
        self
    }

    /// Time just after the last sample: `start + nsamp / rate` in milliseconds
    ///
    /// Blocks without a usable rate report their start time.
    pub fn next_expected_ms(&self) -> i64 {
        if self.rate <= 0.0 {
            return self.start_ms;
        }
        self.start_ms + (self.nsamp as f64 / self.rate * 1000.0).round() as i64
    }

    /// Whether the block can contribute samples at all
    pub fn has_samples(&self) -> bool {
        self.rate > 0.0 && self.nsamp > 0
    }

    /// Whether the block carries an informational (non-waveform) blockette
    pub fn is_informational(&self) -> bool {
        self.blockettes
            .iter()
            .any(|b| INFORMATIONAL_BLOCKETTES.contains(b))
    }

    /// CRC32 of the raw payload
    pub fn payload_crc(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&self.payload);
        hasher.finalize()
    }

    /// Compact identity of this block
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            channel: self.channel.clone(),
            start_ms: self.start_ms,
            crc32: self.payload_crc(),
        }
    }
}

/// Identity of the block that produced a run of data
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockRef {
    /// Channel name of the block
    pub channel: String,
    /// Start time of the block in epoch milliseconds
    pub start_ms: i64,
    /// CRC32 of the block's raw payload
    pub crc32: u32,
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} crc={:08x}", self.channel, self.start_ms, self.crc32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_expected_time() {
        let block = SampleBlock::new("USDUG  BHZ00", 1_000, 40.0, 400, ENCODING_INT32, vec![]);
        assert_eq!(block.next_expected_ms(), 11_000);

        let odd = SampleBlock::new("USDUG  BHZ00", 1_000, 3.0, 1, ENCODING_INT32, vec![]);
        assert_eq!(odd.next_expected_ms(), 1_333);

        let no_rate = SampleBlock::new("USDUG  BHZ00", 1_000, 0.0, 10, ENCODING_INT32, vec![]);
        assert_eq!(no_rate.next_expected_ms(), 1_000);
        assert!(!no_rate.has_samples());
    }

    #[test]
    fn test_informational_marker() {
        let block = SampleBlock::new("USDUG  LOG", 0, 1.0, 0, ENCODING_ASCII, vec![]);
        assert!(!block.is_informational());

        let block = block.with_blockette(1000).with_blockette(2000);
        assert!(block.is_informational());
    }

    #[test]
    fn test_block_ref_tracks_payload() {
        let a = SampleBlock::new("USDUG  BHZ00", 0, 40.0, 1, ENCODING_INT32, vec![0, 0, 0, 1]);
        let b = SampleBlock::new("USDUG  BHZ00", 0, 40.0, 1, ENCODING_INT32, vec![0, 0, 0, 2]);

        assert_ne!(a.block_ref(), b.block_ref());
        assert_eq!(a.block_ref(), a.clone().block_ref());
        assert!(a.block_ref().to_string().starts_with("USDUG  BHZ00@0 crc="));
    }
}
