//! Block decoding contract
//!
//! Spans never look inside a block payload themselves. They hand each block to
//! a [`BlockDecoder`], which either yields the block's integer samples or
//! reports why it could not. Decoders are stateful: they may keep scratch
//! buffers between calls, so a decoder is owned by exactly one span and is
//! only ever driven through `&mut self`.
//!
//! [`RawIntegerDecoder`] handles uncompressed integer payloads. Compressed
//! encodings (Steim and friends) are supplied by plugging in another decoder.

use crate::block::{ByteOrder, SampleBlock, ENCODING_INT16, ENCODING_INT24, ENCODING_INT32};
use thiserror::Error;

/// Reasons a block could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The decoder does not understand this encoding
    #[error("unsupported encoding {encoding}")]
    Unsupported {
        /// SEED encoding identifier of the block
        encoding: u8,
    },
    /// The payload is malformed
    #[error("corrupt block: {0}")]
    Corrupt(String),
    /// The payload holds fewer samples than the header declares
    #[error("block declares {expected} samples but only {decoded} could be decoded")]
    ShortBlock {
        /// Declared sample count
        expected: usize,
        /// Samples actually present
        decoded: usize,
    },
}

/// Result type for decoding operations
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Turns a block's raw payload into integer samples
pub trait BlockDecoder: Send {
    /// Decode exactly `block.nsamp` samples
    ///
    /// The returned slice borrows the decoder's scratch space and is only
    /// valid until the next call.
    fn decode(&mut self, block: &SampleBlock) -> Result<&[i32]>;
}

/// Decoder for uncompressed 16, 24 and 32-bit integer payloads
#[derive(Debug, Default)]
pub struct RawIntegerDecoder {
    /// Reused output buffer
    scratch: Vec<i32>,
}

impl RawIntegerDecoder {
    /// Create a decoder with an empty scratch buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode samples as a payload this decoder understands
    ///
    /// # Arguments
    ///
    /// * `samples` - Values to encode
    /// * `encoding` - One of the 16, 24 or 32-bit integer encodings
    /// * `byte_order` - Byte order of the output
    pub fn encode(samples: &[i32], encoding: u8, byte_order: ByteOrder) -> Result<Vec<u8>> {
        let width = Self::width(encoding)?;
        let mut out = Vec::with_capacity(samples.len() * width);

        for &value in samples {
            let bytes = match byte_order {
                ByteOrder::BigEndian => value.to_be_bytes(),
                ByteOrder::LittleEndian => value.to_le_bytes(),
            };
            // Keep the low `width` bytes
            match byte_order {
                ByteOrder::BigEndian => out.extend_from_slice(&bytes[4 - width..]),
                ByteOrder::LittleEndian => out.extend_from_slice(&bytes[..width]),
            }
        }

        Ok(out)
    }

    fn width(encoding: u8) -> Result<usize> {
        match encoding {
            ENCODING_INT16 => Ok(2),
            ENCODING_INT24 => Ok(3),
            ENCODING_INT32 => Ok(4),
            other => Err(DecodeError::Unsupported { encoding: other }),
        }
    }
}

impl BlockDecoder for RawIntegerDecoder {
    fn decode(&mut self, block: &SampleBlock) -> Result<&[i32]> {
        let width = Self::width(block.encoding)?;

        if block.payload.len() % width != 0 {
            return Err(DecodeError::Corrupt(format!(
                "payload length {} is not a multiple of {}",
                block.payload.len(),
                width
            )));
        }

        let available = block.payload.len() / width;
        if available < block.nsamp {
            return Err(DecodeError::ShortBlock {
                expected: block.nsamp,
                decoded: available,
            });
        }

        self.scratch.clear();
        self.scratch.reserve(block.nsamp);

        for chunk in block.payload.chunks_exact(width).take(block.nsamp) {
            let mut raw = [0u8; 4];
            let value = match block.byte_order {
                ByteOrder::BigEndian => {
                    raw[4 - width..].copy_from_slice(chunk);
                    // Shift left then arithmetic-shift right to sign extend
                    i32::from_be_bytes(raw) << (32 - 8 * width as u32) >> (32 - 8 * width as u32)
                }
                ByteOrder::LittleEndian => {
                    raw[..width].copy_from_slice(chunk);
                    i32::from_le_bytes(raw) << (32 - 8 * width as u32) >> (32 - 8 * width as u32)
                }
            };
            self.scratch.push(value);
        }

        Ok(&self.scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ENCODING_STEIM2;

    fn block(encoding: u8, order: ByteOrder, samples: &[i32]) -> SampleBlock {
        let payload = RawIntegerDecoder::encode(samples, encoding, order).unwrap();
        SampleBlock::new("IUANMO BHZ00", 0, 20.0, samples.len(), encoding, payload)
            .with_byte_order(order)
    }

    #[test]
    fn test_decode_int32_both_orders() {
        let samples = [1, -1, i32::MAX, i32::MIN, 0, 123_456];
        let mut decoder = RawIntegerDecoder::new();

        for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            let decoded = decoder.decode(&block(ENCODING_INT32, order, &samples)).unwrap();
            assert_eq!(decoded, samples);
        }
    }

    #[test]
    fn test_decode_narrow_widths_sign_extend() {
        let mut decoder = RawIntegerDecoder::new();

        let samples16 = [-32768, -2, 0, 7, 32767];
        let decoded = decoder
            .decode(&block(ENCODING_INT16, ByteOrder::BigEndian, &samples16))
            .unwrap();
        assert_eq!(decoded, samples16);

        let samples24 = [-8_388_608, -5, 9, 8_388_607];
        let decoded = decoder
            .decode(&block(ENCODING_INT24, ByteOrder::LittleEndian, &samples24))
            .unwrap();
        assert_eq!(decoded, samples24);
    }

    #[test]
    fn test_decode_errors() {
        let mut decoder = RawIntegerDecoder::new();

        let steim = SampleBlock::new("IUANMO BHZ00", 0, 20.0, 10, ENCODING_STEIM2, vec![0; 64]);
        assert_eq!(
            decoder.decode(&steim),
            Err(DecodeError::Unsupported { encoding: ENCODING_STEIM2 })
        );

        let ragged = SampleBlock::new("IUANMO BHZ00", 0, 20.0, 1, ENCODING_INT32, vec![0; 5]);
        assert!(matches!(decoder.decode(&ragged), Err(DecodeError::Corrupt(_))));

        let short = SampleBlock::new("IUANMO BHZ00", 0, 20.0, 3, ENCODING_INT32, vec![0; 8]);
        assert_eq!(
            decoder.decode(&short),
            Err(DecodeError::ShortBlock { expected: 3, decoded: 2 })
        );
    }

    #[test]
    fn test_decode_ignores_trailing_padding() {
        let mut decoder = RawIntegerDecoder::new();
        let mut b = block(ENCODING_INT32, ByteOrder::BigEndian, &[4, 5, 6]);
        b.nsamp = 2;

        assert_eq!(decoder.decode(&b).unwrap(), [4, 5]);
    }
}
