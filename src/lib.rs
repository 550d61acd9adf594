//! CWB Ring - zero-filled time-series spans and query rings for
//! continuous waveform data fetched from a CWB archive.
//!
//! # Overview
//!
//! Clients ask for N samples of a channel starting at time T. This crate
//! provides the in-memory side of answering that:
//!
//! 1. A [`ZeroFilledSpan`]: a flat sample array covering a fixed-duration
//!    window, pre-filled with a "no data" sentinel, into which encoded blocks
//!    are decoded and merged
//! 2. A [`QueryRing`]: a span that represents a rolling window and refills
//!    itself from a [`WaveformSource`] when a request is not resident
//!
//! # Key Features
//!
//! - Out-of-order and overlapping blocks merged with a fixed precedence
//!   (the block listed first wins)
//! - Half-sample tolerance in every time/index conversion
//! - Gap-aware reads that stop at the first missing sample, or copy the
//!   sentinel through
//! - In-place window shifting without reallocation
//! - Bounded fetch retries with a fixed backoff
//!
//! # Usage
//!
//! The library is typically used by:
//! 1. Implementing [`WaveformSource`] over the query transport
//! 2. Creating a [`QueryRing`] per channel from a [`QueryRingConfig`]
//! 3. Calling [`QueryRing::get_data_at`] from processing or display code
//!
//! See the `demos` directory for a runnable example.

#![deny(missing_docs)]

mod block;
mod error;
#[cfg(feature = "subscriber")]
pub mod logging;
mod ring;
mod span;

pub use block::codec::{BlockDecoder, DecodeError, RawIntegerDecoder};
pub use block::{BlockRef, ByteOrder, SampleBlock};
pub use error::{Result, RingError};
pub use ring::{
    Coverage, QueryRequest, QueryResult, QueryRing, QueryRingConfig, WaveformSource,
    DEFAULT_MAX_ATTEMPTS,
};
pub use span::{
    Gap, MissingSummary, RateChange, Run, RunList, Sample, SampleRead, ShiftOutcome,
    ZeroFilledSpan, DEFAULT_FILL_VALUE,
};

/// SEED encoding identifiers and blockette markers
pub mod encoding {
    pub use crate::block::{
        ENCODING_ASCII, ENCODING_INT16, ENCODING_INT24, ENCODING_INT32, ENCODING_STEIM1,
        ENCODING_STEIM2, INFORMATIONAL_BLOCKETTES,
    };
}
