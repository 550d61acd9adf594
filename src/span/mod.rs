//! Zero-filled time-series spans
//!
//! A span is a flat array of samples covering a fixed-duration window at a
//! fixed rate. Every slot starts out holding a sentinel fill value meaning
//! "no data"; ingesting blocks overwrites the slots their samples land on.
//! Key components:
//!
//! - [`ZeroFilledSpan`], the buffer with block ingestion, gap-aware reads,
//!   full rebuilds and in-place shifting
//! - [`RunList`], the audit trail of which time intervals hold real data
//! - Diagnostic types describing shifts, rate changes and missing data
//!
//! Time is epoch milliseconds throughout. Conversions between time and sample
//! index carry half a sample period of slop so that block times jittered by
//! less than half a sample still land in the right bin.

pub mod runs;
pub mod zero_filled;

pub use runs::{Run, RunList};
pub use zero_filled::{Sample, SampleRead, ZeroFilledSpan};

use std::ops::Range;

/// Sentinel used for "no data" when the caller has no preference
pub const DEFAULT_FILL_VALUE: i32 = 2_147_000_000;

/// How a shift was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOutcome {
    /// Overlapping samples were moved to the front; carries the new start time
    Shifted(i64),
    /// The new start was outside the buffer; everything was reset to fill
    Reset(i64),
}

impl ShiftOutcome {
    /// Start time of the span after the shift
    pub fn start_ms(&self) -> i64 {
        match *self {
            ShiftOutcome::Shifted(t) | ShiftOutcome::Reset(t) => t,
        }
    }

    /// Whether prior data was discarded
    pub fn is_reset(&self) -> bool {
        matches!(self, ShiftOutcome::Reset(_))
    }
}

/// A block arrived with a rate different from the span's
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateChange {
    /// Start time of the offending block
    pub at_ms: i64,
    /// Rate the span is running at
    pub expected: f64,
    /// Rate the block declared
    pub found: f64,
}

/// Bookkeeping of fill-valued slots, recomputed after each bulk operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MissingSummary {
    /// Index of the first slot holding the fill value
    pub first_missing: Option<usize>,
    /// Index of the last slot holding the fill value
    pub last_missing: Option<usize>,
    /// Number of slots holding the fill value
    pub missing: usize,
    /// Index of the last slot holding real data
    pub last_data: Option<usize>,
}

impl MissingSummary {
    /// Scan a sample slice for fill values
    pub fn scan(samples: &[i32], fill_value: i32) -> Self {
        let mut summary = Self::default();

        for (i, &v) in samples.iter().enumerate() {
            if v == fill_value {
                summary.first_missing.get_or_insert(i);
                summary.last_missing = Some(i);
                summary.missing += 1;
            } else {
                summary.last_data = Some(i);
            }
        }

        summary
    }

    /// Whether every slot holds real data
    pub fn is_complete(&self) -> bool {
        self.missing == 0
    }
}

/// A contiguous range of fill-valued slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    /// Slot indices covered by the gap
    pub indices: Range<usize>,
    /// Time of the first missing sample
    pub start_ms: i64,
    /// Time of the first sample after the gap
    pub end_ms: i64,
}

impl Gap {
    /// Number of missing samples
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the gap covers no samples
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Half a sample period in whole milliseconds
pub(crate) fn half_period_ms(rate: f64) -> i64 {
    if rate <= 0.0 {
        return 0;
    }
    (500.0 / rate).round() as i64
}

/// Milliseconds spanned by `n` samples
pub(crate) fn samples_to_ms(n: f64, rate: f64) -> i64 {
    if rate <= 0.0 {
        return 0;
    }
    (n * 1000.0 / rate).round() as i64
}
