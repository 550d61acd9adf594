//! Zero-filled span implementation
//!
//! [`ZeroFilledSpan`] owns a flat `i32` sample array for a window of fixed
//! duration and rate. The array is pre-filled with a sentinel fill value;
//! blocks are decoded and copied into the slots their sample times map to,
//! clipped to the array bounds. The span supports:
//!
//! - Full rebuilds from a block list ([`ZeroFilledSpan::refill`])
//! - Single-block ingestion ([`ZeroFilledSpan::add_block`])
//! - Gap-aware windowed reads into integer or floating point buffers
//! - Sliding the window forward in place ([`ZeroFilledSpan::shift`]) and
//!   appending fresh blocks after a slide ([`ZeroFilledSpan::shift_add`])
//!
//! When blocks overlap during a bulk operation, they are applied in reverse
//! list order, so the block listed first ends up resident.

use crate::block::codec::{BlockDecoder, DecodeError, RawIntegerDecoder};
use crate::block::SampleBlock;
use crate::span::{
    half_period_ms, samples_to_ms, Gap, MissingSummary, RateChange, RunList, ShiftOutcome,
};
use std::fmt;
use tracing::{debug, warn};

/// Relative rate difference treated as a rate change
const RATE_EPSILON: f64 = 1e-4;

/// Output element types for windowed reads
///
/// Conversion from the stored `i32` is exact for `i32`, `i64` and `f64`.
pub trait Sample: Copy {
    /// Convert a stored sample
    fn from_sample(value: i32) -> Self;
}

impl Sample for i32 {
    fn from_sample(value: i32) -> Self {
        value
    }
}

impl Sample for i64 {
    fn from_sample(value: i32) -> Self {
        i64::from(value)
    }
}

impl Sample for f32 {
    fn from_sample(value: i32) -> Self {
        value as f32
    }
}

impl Sample for f64 {
    fn from_sample(value: i32) -> Self {
        f64::from(value)
    }
}

/// Result of a windowed read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRead {
    /// Exact time of the first returned sample (the requested time snapped
    /// to the sample grid)
    pub first_sample_ms: i64,
    /// Number of samples written to the output buffer
    pub len: usize,
}

/// A fixed-duration, fixed-rate sample window pre-filled with a sentinel
pub struct ZeroFilledSpan {
    /// Time of sample index 0
    start_ms: i64,
    /// Samples per second, zero when the span holds no data
    rate: f64,
    /// Sentinel meaning "no data"
    fill_value: i32,
    /// Window length in seconds
    duration: f64,
    /// Sample storage; only the first `nsamp` slots are live
    data: Vec<i32>,
    /// Number of live slots
    nsamp: usize,
    /// Highest next-expected time of any ingested block
    last_time_ms: i64,
    /// Half a sample period, used as slop in time/index conversions
    half_period_ms: i64,
    /// Cleared once any block fails to decode
    decode_clean: bool,
    /// Intervals backed by real data
    runs: RunList,
    /// Fill bookkeeping as of the last bulk operation
    missing: MissingSummary,
    /// Rate changes seen since the last clear
    rate_changes: Vec<RateChange>,
    /// Decoder owned by this span
    decoder: Box<dyn BlockDecoder>,
}

impl ZeroFilledSpan {
    /// Build a span from a block list using the raw integer decoder
    ///
    /// # Arguments
    ///
    /// * `blocks` - Blocks to ingest; earlier entries win where they overlap
    /// * `trim_ms` - The span starts at the first sample at or after this time
    /// * `duration` - Window length in seconds
    /// * `fill_value` - Sentinel for slots without data
    pub fn new(blocks: &[SampleBlock], trim_ms: i64, duration: f64, fill_value: i32) -> Self {
        Self::with_decoder(
            Box::new(RawIntegerDecoder::new()),
            blocks,
            trim_ms,
            duration,
            fill_value,
        )
    }

    /// Build a span from a block list with a caller-supplied decoder
    pub fn with_decoder(
        decoder: Box<dyn BlockDecoder>,
        blocks: &[SampleBlock],
        trim_ms: i64,
        duration: f64,
        fill_value: i32,
    ) -> Self {
        let mut span = Self {
            start_ms: trim_ms,
            rate: 0.0,
            fill_value,
            duration,
            data: Vec::new(),
            nsamp: 0,
            last_time_ms: trim_ms,
            half_period_ms: 0,
            decode_clean: true,
            runs: RunList::new(),
            missing: MissingSummary::default(),
            rate_changes: Vec::new(),
            decoder,
        };
        span.rebuild(blocks, trim_ms, duration);
        span
    }

    /// Create a span of known rate holding no data yet
    pub fn filled(start_ms: i64, rate: f64, duration: f64, fill_value: i32) -> Self {
        let mut span = Self::new(&[], start_ms, duration, fill_value);
        if rate > 0.0 {
            span.set_grid(start_ms, rate, duration);
            span.finish_bulk();
        }
        span
    }

    /// Time of sample index 0
    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    /// Samples per second; zero when empty
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Sentinel value for missing samples
    pub fn fill_value(&self) -> i32 {
        self.fill_value
    }

    /// Window length in seconds
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Number of live samples
    pub fn len(&self) -> usize {
        self.nsamp
    }

    /// Whether the span has no live samples
    pub fn is_empty(&self) -> bool {
        self.nsamp == 0
    }

    /// Number of allocated slots (never shrinks)
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Highest next-expected time of any ingested block
    ///
    /// This can run past [`end_ms`](Self::end_ms) when a block did not fit.
    pub fn last_time_ms(&self) -> i64 {
        self.last_time_ms
    }

    /// Time just after the last live sample
    pub fn end_ms(&self) -> i64 {
        self.time_at(self.nsamp)
    }

    /// Half a sample period in milliseconds
    pub fn tolerance_ms(&self) -> i64 {
        self.half_period_ms
    }

    /// Whether every block so far decoded cleanly
    pub fn is_decode_clean(&self) -> bool {
        self.decode_clean
    }

    /// The live samples
    pub fn samples(&self) -> &[i32] {
        &self.data[..self.nsamp]
    }

    /// Intervals backed by real data
    pub fn runs(&self) -> &RunList {
        &self.runs
    }

    /// Fill bookkeeping as of the last bulk operation
    pub fn missing(&self) -> MissingSummary {
        self.missing
    }

    /// Rate changes recorded since the last clear
    pub fn rate_changes(&self) -> &[RateChange] {
        &self.rate_changes
    }

    /// Forget recorded rate changes
    pub fn clear_rate_changes(&mut self) {
        self.rate_changes.clear();
    }

    /// Time of sample `index`
    pub fn time_at(&self, index: usize) -> i64 {
        self.start_ms + samples_to_ms(index as f64, self.rate)
    }

    /// Index of the sample nearest to `time_ms`, or `None` if it precedes the span
    pub fn index_of_time(&self, time_ms: i64) -> Option<usize> {
        if self.rate <= 0.0 {
            return None;
        }
        let index = ((time_ms - self.start_ms + self.half_period_ms - 1) as f64 * self.rate
            / 1000.0)
            .floor();
        if index < 0.0 {
            None
        } else {
            Some(index as usize)
        }
    }

    /// Rebuild the span from scratch
    ///
    /// The sample array grows when needed but never shrinks.
    ///
    /// # Arguments
    ///
    /// * `blocks` - Blocks to ingest; earlier entries win where they overlap
    /// * `trim_ms` - The span starts at the first sample at or after this time
    /// * `duration` - Window length in seconds
    /// * `fill_value` - Sentinel for slots without data
    pub fn refill(&mut self, blocks: &[SampleBlock], trim_ms: i64, duration: f64, fill_value: i32) {
        self.fill_value = fill_value;
        self.rebuild(blocks, trim_ms, duration);
    }

    /// Copy one block into the span
    ///
    /// Returns whether every sample of the block landed in the array. Blocks
    /// without samples, blocks that fail to decode and blocks that fall
    /// outside the array are absorbed here; they never abort the caller.
    pub fn add_block(&mut self, block: &SampleBlock) -> bool {
        if !block.has_samples() {
            return false;
        }
        if self.rate <= 0.0 {
            debug!(channel = %block.channel, "span has no rate yet, block ignored");
            return false;
        }

        if (block.rate - self.rate).abs() > self.rate * RATE_EPSILON {
            warn!(
                channel = %block.channel,
                start_ms = block.start_ms,
                rate = block.rate,
                expected = self.rate,
                "block rate differs from span rate"
            );
            self.rate_changes.push(RateChange {
                at_ms: block.start_ms,
                expected: self.rate,
                found: block.rate,
            });
        }

        // Bias by half a period so jittered block times land in the nearest bin
        let offset = ((block.start_ms - self.start_ms + self.half_period_ms) as f64 * self.rate
            / 1000.0)
            .floor() as i64;

        let decoded = match self.decoder.decode(block) {
            Ok(samples) => samples,
            Err(DecodeError::Unsupported { encoding }) => {
                if block.is_informational() {
                    debug!(channel = %block.channel, encoding, "informational block skipped");
                } else {
                    warn!(
                        channel = %block.channel,
                        start_ms = block.start_ms,
                        encoding,
                        "unsupported encoding, block skipped"
                    );
                }
                return false;
            }
            Err(e) => {
                self.decode_clean = false;
                warn!(
                    channel = %block.channel,
                    start_ms = block.start_ms,
                    error = %e,
                    "block failed to decode"
                );
                return false;
            }
        };

        let n = decoded.len().min(block.nsamp);
        let copied = if offset < 0 {
            // Only the tail at or after index 0 is kept
            let skip = offset.unsigned_abs() as usize;
            if skip >= n {
                0
            } else {
                let count = (n - skip).min(self.nsamp);
                self.data[..count].copy_from_slice(&decoded[skip..skip + count]);
                count
            }
        } else if (offset as usize) < self.nsamp {
            let offset = offset as usize;
            let count = n.min(self.nsamp - offset);
            self.data[offset..offset + count].copy_from_slice(&decoded[..count]);
            count
        } else {
            0
        };

        let next_ms = block.next_expected_ms();
        self.last_time_ms = self.last_time_ms.max(next_ms);
        if copied > 0 {
            self.runs.add(block.start_ms, next_ms, block.block_ref(), self.half_period_ms);
        }

        if copied != block.nsamp {
            debug!(
                channel = %block.channel,
                start_ms = block.start_ms,
                offset,
                copied,
                nsamp = block.nsamp,
                "block only partially fits span"
            );
        }
        copied == block.nsamp
    }

    /// Read up to `count` samples starting at `starting_ms`
    ///
    /// Returns `None` when `starting_ms` precedes the span. Otherwise the
    /// returned [`SampleRead`] carries the start time snapped to the sample
    /// grid and the number of samples written. The count is clamped to the
    /// live samples and to `out.len()`. Without `allow_gaps`, copying stops
    /// at the first fill value.
    pub fn get_data<T: Sample>(
        &self,
        starting_ms: i64,
        count: usize,
        out: &mut [T],
        allow_gaps: bool,
    ) -> Option<SampleRead> {
        let offset = self.index_of_time(starting_ms)?;
        let first_sample_ms = self.time_at(offset);

        if offset >= self.nsamp {
            return Some(SampleRead {
                first_sample_ms,
                len: 0,
            });
        }

        let count = count.min(self.nsamp - offset).min(out.len());
        let source = &self.data[offset..offset + count];

        let len = if allow_gaps {
            for (dst, &v) in out.iter_mut().zip(source) {
                *dst = T::from_sample(v);
            }
            count
        } else {
            let mut copied = 0;
            for (dst, &v) in out.iter_mut().zip(source) {
                if v == self.fill_value {
                    break;
                }
                *dst = T::from_sample(v);
                copied += 1;
            }
            copied
        };

        Some(SampleRead {
            first_sample_ms,
            len,
        })
    }

    /// Slide the window so the sample at `new_start_ms` becomes index 0
    ///
    /// Overlapping samples move to the front and the vacated tail is set to
    /// the fill value. A start outside the current array resets the whole
    /// buffer to fill and starts it exactly at `new_start_ms`.
    pub fn shift(&mut self, new_start_ms: i64) -> ShiftOutcome {
        let outcome = match self.index_of_time(new_start_ms) {
            Some(offset) if offset < self.nsamp => {
                let new_start = self.time_at(offset);
                if offset > 0 {
                    self.data.copy_within(offset..self.nsamp, 0);
                    self.data[self.nsamp - offset..self.nsamp].fill(self.fill_value);
                }
                self.start_ms = new_start;
                ShiftOutcome::Shifted(new_start)
            }
            _ => {
                debug!(
                    start_ms = self.start_ms,
                    new_start_ms,
                    "shift outside span, resetting"
                );
                self.data[..self.nsamp].fill(self.fill_value);
                self.start_ms = new_start_ms;
                self.runs.clear();
                ShiftOutcome::Reset(new_start_ms)
            }
        };

        self.finish_bulk();
        outcome
    }

    /// Append fresh blocks, sliding the window forward first if they would
    /// run past its end
    ///
    /// Blocks whose rate differs from the span's rebuild the span on the new
    /// rate, starting at the slide target, and report a reset.
    ///
    /// # Arguments
    ///
    /// * `blocks` - New blocks; earlier entries win where they overlap
    /// * `begin_ms` - Start of the interval the blocks were fetched for
    /// * `end_ms` - End of the interval the blocks were fetched for
    /// * `keep_secs` - Seconds of older data to keep in front of the new data
    ///   when sliding
    pub fn shift_add(
        &mut self,
        blocks: &[SampleBlock],
        begin_ms: i64,
        end_ms: i64,
        keep_secs: f64,
    ) -> Option<ShiftOutcome> {
        let mut first = begin_ms.min(end_ms);
        let mut last = begin_ms.max(end_ms);
        for block in blocks.iter().filter(|b| b.rate > 0.0) {
            first = first.min(block.start_ms);
            last = last.max(block.next_expected_ms());
        }

        let keep_ms = (keep_secs * 1000.0).round() as i64;
        let slide_to = begin_ms.max(first) - keep_ms;

        if self.rate <= 0.0 {
            // No sample grid yet, lay one down from the new blocks
            let duration = self.duration;
            self.rebuild(blocks, slide_to, duration);
            return None;
        }

        // The first block with a rate sets the rate of the new data
        if let Some(lead) = blocks
            .iter()
            .find(|b| b.rate > 0.0)
            .filter(|b| (b.rate - self.rate).abs() > self.rate * RATE_EPSILON)
        {
            warn!(
                channel = %lead.channel,
                start_ms = lead.start_ms,
                rate = lead.rate,
                expected = self.rate,
                "new blocks change the rate, rebuilding span"
            );
            self.rate_changes.push(RateChange {
                at_ms: lead.start_ms,
                expected: self.rate,
                found: lead.rate,
            });
            // Old samples sit on the old grid and cannot be kept
            let duration = self.duration;
            self.rebuild(blocks, slide_to, duration);
            return Some(ShiftOutcome::Reset(self.start_ms));
        }

        // Slide when the new data reaches past the last index
        let mut outcome = None;
        if self
            .index_of_time(last)
            .is_some_and(|index| index >= self.nsamp)
        {
            outcome = Some(self.shift(slide_to));
        }

        let end_time = self.time_at(self.nsamp.saturating_sub(1));
        for block in blocks.iter().rev() {
            if block.next_expected_ms() >= end_time {
                debug!(
                    channel = %block.channel,
                    start_ms = block.start_ms,
                    end_time,
                    "block runs past span end, not added"
                );
                continue;
            }
            self.add_block(block);
        }

        self.finish_bulk();
        outcome
    }

    /// Index ranges holding the fill value
    pub fn gaps(&self) -> Vec<Gap> {
        let mut gaps = Vec::new();
        let mut open: Option<usize> = None;

        for (i, &v) in self.samples().iter().enumerate() {
            match (v == self.fill_value, open) {
                (true, None) => open = Some(i),
                (false, Some(start)) => {
                    gaps.push(self.gap(start, i));
                    open = None;
                }
                _ => {}
            }
        }
        if let Some(start) = open {
            gaps.push(self.gap(start, self.nsamp));
        }

        gaps
    }

    fn gap(&self, start: usize, end: usize) -> Gap {
        Gap {
            indices: start..end,
            start_ms: self.time_at(start),
            end_ms: self.time_at(end),
        }
    }

    /// Lay down a fresh sample grid and pre-fill it
    fn set_grid(&mut self, start_ms: i64, rate: f64, duration: f64) {
        self.start_ms = start_ms;
        self.rate = rate;
        self.duration = duration;
        self.half_period_ms = half_period_ms(rate);
        self.nsamp = (duration * rate).round() as usize;
        if self.data.len() < self.nsamp {
            self.data.resize(self.nsamp, self.fill_value);
        }
        self.data[..self.nsamp].fill(self.fill_value);
    }

    fn rebuild(&mut self, blocks: &[SampleBlock], trim_ms: i64, duration: f64) {
        self.runs.clear();
        self.duration = duration;
        self.last_time_ms = trim_ms;

        let Some(first) = blocks.iter().find(|b| b.rate > 0.0) else {
            self.start_ms = trim_ms;
            self.rate = 0.0;
            self.half_period_ms = 0;
            self.nsamp = 0;
            self.missing = MissingSummary::default();
            return;
        };

        // First sample of the block's grid at or after the trim time
        let rate = first.rate;
        let whole = ((trim_ms - first.start_ms) as f64 * rate / 1000.0 - 1e-6).ceil();
        let start_ms = first.start_ms + samples_to_ms(whole, rate);

        self.set_grid(start_ms, rate, duration);

        for block in blocks.iter().rev() {
            self.add_block(block);
        }

        self.finish_bulk();
    }

    /// Trim the run list to the window and recount missing samples
    fn finish_bulk(&mut self) {
        let end_ms = self.start_ms + (self.duration * 1000.0).round() as i64;
        self.runs.trim(self.start_ms, end_ms);
        self.missing = MissingSummary::scan(&self.data[..self.nsamp], self.fill_value);
    }
}

impl fmt::Debug for ZeroFilledSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZeroFilledSpan")
            .field("start_ms", &self.start_ms)
            .field("rate", &self.rate)
            .field("nsamp", &self.nsamp)
            .field("last_time_ms", &self.last_time_ms)
            .field("missing", &self.missing)
            .field("decode_clean", &self.decode_clean)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ZeroFilledSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "span start={} rate={} nsamp={} last={} missing={} {}{}",
            self.start_ms,
            self.rate,
            self.nsamp,
            self.last_time_ms,
            self.missing.missing,
            self.runs,
            if self.decode_clean { "" } else { " (decode errors)" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{ByteOrder, ENCODING_INT32};

    const FILL: i32 = -99;

    fn block(start_ms: i64, rate: f64, samples: &[i32]) -> SampleBlock {
        let payload =
            RawIntegerDecoder::encode(samples, ENCODING_INT32, ByteOrder::BigEndian).unwrap();
        SampleBlock::new("TEST   HHZ", start_ms, rate, samples.len(), ENCODING_INT32, payload)
    }

    #[test]
    fn test_start_snaps_to_block_grid() {
        // 10 Hz block starting at 1050, trim at 1120 -> first sample at/after is 1150
        let span = ZeroFilledSpan::new(&[block(1050, 10.0, &[1; 20])], 1120, 1.0, FILL);
        assert_eq!(span.start_ms(), 1150);
        assert_eq!(span.len(), 10);
        assert_eq!(span.samples(), [1; 10]);

        // Trim exactly on a sample keeps that sample
        let span = ZeroFilledSpan::new(&[block(1050, 10.0, &[1; 20])], 1150, 1.0, FILL);
        assert_eq!(span.start_ms(), 1150);

        // Trim before the block moves back along its grid
        let span = ZeroFilledSpan::new(&[block(1050, 10.0, &[1; 5])], 1000, 1.0, FILL);
        assert_eq!(span.start_ms(), 1050);
        let span = ZeroFilledSpan::new(&[block(1050, 10.0, &[1; 5])], 820, 1.0, FILL);
        assert_eq!(span.start_ms(), 850);
        assert_eq!(span.samples()[..2], [FILL, FILL]);
        assert_eq!(span.samples()[2..7], [1; 5]);
    }

    #[test]
    fn test_blocks_without_rate_are_ignored() {
        let mut silent = block(0, 0.0, &[1, 2, 3]);
        silent.rate = 0.0;
        let span = ZeroFilledSpan::new(&[silent], 500, 10.0, FILL);

        assert!(span.is_empty());
        assert_eq!(span.start_ms(), 500);
        assert_eq!(span.rate(), 0.0);
    }

    #[test]
    fn test_add_block_reports_full_fit() {
        let mut span = ZeroFilledSpan::filled(0, 10.0, 1.0, FILL);

        assert!(span.add_block(&block(0, 10.0, &[1, 2, 3])));
        assert!(!span.add_block(&block(800, 10.0, &[8, 9, 10, 11])));
        assert!(!span.add_block(&block(5000, 10.0, &[1])));
        assert_eq!(span.samples(), [1, 2, 3, FILL, FILL, FILL, FILL, FILL, 8, 9]);

        // Freshness tracks the block that fell off the end, the run list does not
        assert_eq!(span.last_time_ms(), 5100);
        assert_eq!(span.runs().len(), 2);
        assert_eq!(span.runs().latest_ms(), Some(1200));
    }

    #[test]
    fn test_jittered_block_lands_in_nearest_bin() {
        let mut span = ZeroFilledSpan::filled(0, 10.0, 1.0, FILL);
        span.add_block(&block(296, 10.0, &[7]));
        span.add_block(&block(548, 10.0, &[8]));

        assert_eq!(span.samples()[3], 7);
        assert_eq!(span.samples()[5], 8);
    }

    #[test]
    fn test_rate_change_is_recorded_not_rejected() {
        let mut span = ZeroFilledSpan::filled(0, 10.0, 1.0, FILL);
        assert!(span.add_block(&block(0, 20.0, &[5, 6])));

        assert_eq!(
            span.rate_changes(),
            [RateChange {
                at_ms: 0,
                expected: 10.0,
                found: 20.0
            }]
        );
        assert_eq!(span.rate(), 10.0);

        span.clear_rate_changes();
        assert!(span.rate_changes().is_empty());
    }

    #[test]
    fn test_gaps_listing() {
        let span = ZeroFilledSpan::new(
            &[block(0, 10.0, &[1, 2]), block(500, 10.0, &[3, 4, 5])],
            0,
            1.0,
            FILL,
        );
        let gaps = span.gaps();

        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0].indices, 2..5);
        assert_eq!((gaps[0].start_ms, gaps[0].end_ms), (200, 500));
        assert_eq!(gaps[1].indices, 8..10);
        assert_eq!(gaps[1].len(), 2);
    }

    #[test]
    fn test_refill_never_shrinks_capacity() {
        let mut span = ZeroFilledSpan::new(&[block(0, 10.0, &[1; 100])], 0, 10.0, FILL);
        assert_eq!(span.capacity(), 100);

        span.refill(&[block(0, 10.0, &[2; 10])], 0, 1.0, FILL);
        assert_eq!(span.len(), 10);
        assert_eq!(span.capacity(), 100);

        span.refill(&[block(0, 10.0, &[3; 10])], 0, 20.0, FILL);
        assert_eq!(span.len(), 200);
        assert_eq!(span.capacity(), 200);
        assert_eq!(span.samples()[..10], [3; 10]);
        assert!(span.samples()[10..].iter().all(|&v| v == FILL));
    }

    #[test]
    fn test_display_summary() {
        let span = ZeroFilledSpan::new(&[block(0, 10.0, &[1; 5])], 0, 1.0, FILL);
        let text = span.to_string();

        assert!(text.starts_with("span start=0 rate=10 nsamp=10"));
        assert!(text.contains("missing=5"));
        assert!(!text.contains("decode errors"));
    }
}
