//! Query ring implementation
//!
//! The ring keeps one [`ZeroFilledSpan`] covering at most `duration` seconds
//! and refills it on demand. A request for `nsamp` samples at time `T` is
//! classified against the span:
//!
//! - **Covered**: `T` is not before the span start (within half a sample) and
//!   the request ends before the freshest data seen
//! - **Too old** (or empty span): the span is rebuilt from a query for
//!   `[T - pre_duration, T - pre_duration + duration)`
//! - **Too new**: data from the freshness mark onward is fetched and appended,
//!   sliding the window forward so it starts at `T - pre_duration`. When
//!   that start lies past the freshness mark, or an append cannot make
//!   progress, the window is refilled instead
//!
//! Fetching runs on the calling thread under the ring's lock, so only one
//! fetch is ever in flight per ring. An iteration that returns nothing, or a
//! refill that leaves the span unchanged, is followed by `retry_backoff`.
//! At most `max_attempts` iterations run in total.

use crate::block::codec::{BlockDecoder, RawIntegerDecoder};
use crate::block::SampleBlock;
use crate::error::{Result, RingError};
use crate::ring::{QueryRequest, QueryRingConfig, WaveformSource};
use crate::span::{samples_to_ms, Sample, ZeroFilledSpan};
use parking_lot::Mutex;
use std::fmt;
use std::thread;
use tracing::{debug, info, warn};

/// Where a requested window stands relative to the resident data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// The window is resident
    Covered,
    /// The ring holds no data yet
    Empty,
    /// The window starts before the ring
    TooOld,
    /// The window ends at or past the freshest data
    TooNew,
}

/// State touched by fetches, guarded as a unit
struct RingState {
    /// The resident window, including its decoder
    span: ZeroFilledSpan,
    /// Backing transport
    source: Box<dyn WaveformSource>,
}

/// A rolling window over one channel, refilled from a waveform archive
pub struct QueryRing {
    /// Channel, server and window parameters
    config: QueryRingConfig,
    /// Span, decoder and source behind one lock
    state: Mutex<RingState>,
}

impl QueryRing {
    /// Create a ring that decodes raw integer blocks
    ///
    /// # Arguments
    ///
    /// * `config` - Channel, server and window parameters
    /// * `source` - Transport used to fetch blocks
    pub fn new(config: QueryRingConfig, source: Box<dyn WaveformSource>) -> Result<Self> {
        Self::with_decoder(config, source, Box::new(RawIntegerDecoder::new()))
    }

    /// Create a ring with a caller-supplied decoder
    pub fn with_decoder(
        config: QueryRingConfig,
        source: Box<dyn WaveformSource>,
        decoder: Box<dyn BlockDecoder>,
    ) -> Result<Self> {
        config.validate()?;

        let span =
            ZeroFilledSpan::with_decoder(decoder, &[], 0, config.duration, config.fill_value);

        Ok(Self {
            config,
            state: Mutex::new(RingState { span, source }),
        })
    }

    /// The ring's configuration
    pub fn config(&self) -> &QueryRingConfig {
        &self.config
    }

    /// Classify a window without fetching
    pub fn coverage(&self, time_ms: i64, nsamp: usize) -> Coverage {
        classify(&self.state.lock().span, time_ms, nsamp)
    }

    /// Run `f` against the resident span
    pub fn with_span<R>(&self, f: impl FnOnce(&ZeroFilledSpan) -> R) -> R {
        f(&self.state.lock().span)
    }

    /// Make sure `nsamp` samples at `time_ms` are resident, fetching as needed
    ///
    /// Blocks the calling thread for fetches and backoff sleeps. Fails with
    /// [`RingError::Unavailable`] once the retry budget is spent.
    pub fn chk_data(&self, time_ms: i64, nsamp: usize) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_covered(&mut state, time_ms, nsamp)
    }

    /// Read `nsamp` samples at `time_ms` into `out`, fetching as needed
    ///
    /// Returns the number of samples written. Without `allow_gaps` the read
    /// stops at the first missing sample, so a short count is normal.
    pub fn get_data_at<T: Sample>(
        &self,
        time_ms: i64,
        nsamp: usize,
        out: &mut [T],
        allow_gaps: bool,
    ) -> Result<usize> {
        let mut state = self.state.lock();
        self.ensure_covered(&mut state, time_ms, nsamp)?;

        Ok(state
            .span
            .get_data(time_ms, nsamp, out, allow_gaps)
            .map_or(0, |read| read.len))
    }

    /// Read without fetching or waiting
    ///
    /// Returns 0 while another caller holds the ring for a fetch, or when the
    /// window is not resident yet.
    pub fn try_get_data_at<T: Sample>(
        &self,
        time_ms: i64,
        nsamp: usize,
        out: &mut [T],
        allow_gaps: bool,
    ) -> usize {
        let Some(state) = self.state.try_lock() else {
            return 0;
        };
        if classify(&state.span, time_ms, nsamp) != Coverage::Covered {
            return 0;
        }

        state
            .span
            .get_data(time_ms, nsamp, out, allow_gaps)
            .map_or(0, |read| read.len)
    }

    fn ensure_covered(&self, state: &mut RingState, time_ms: i64, nsamp: usize) -> Result<()> {
        let RingState { span, source } = state;
        let duration_ms = self.config.duration_ms();
        let pre_ms = self.config.pre_duration_ms();
        let capacity_ms = duration_ms - pre_ms;
        let begin = time_ms - pre_ms;
        // Set when an append could not advance the freshness mark
        let mut refill_next = false;

        for attempt in 1..=self.config.max_attempts {
            let coverage = classify(span, time_ms, nsamp);
            if coverage == Coverage::Covered {
                return Ok(());
            }

            // A refilled window ends at `begin + duration`; the request must end before it
            let requested_ms = samples_to_ms(nsamp as f64, span.rate());
            if span.rate() > 0.0 && requested_ms >= capacity_ms {
                return Err(RingError::WindowTooLong {
                    requested_ms,
                    capacity_ms,
                });
            }

            let query_start = span.last_time_ms().max(span.start_ms());
            let refill = refill_next || coverage != Coverage::TooNew || begin > query_start;
            refill_next = false;

            let start_before = span.start_ms();
            let last_before = span.last_time_ms();

            let fetched = if refill {
                let request = self.config.request(begin, self.config.duration);
                fetch(source.as_mut(), &request, attempt).map(|blocks| {
                    info!(
                        channel = %self.config.channel,
                        start_ms = begin,
                        blocks = blocks.len(),
                        ?coverage,
                        "refilling ring"
                    );
                    span.refill(&blocks, begin, self.config.duration, self.config.fill_value);
                    Fetched::Refilled
                })
            } else {
                let request_end = time_ms + requested_ms;
                let query_end = request_end.max(span.start_ms() + duration_ms);
                // Slide to the pre-roll ahead of the requested time
                let keep_secs = ((query_start - begin) as f64 / 1000.0).min(self.config.duration);

                let request = self.config.request(
                    query_start,
                    ((query_end - query_start) as f64 / 1000.0).max(0.0),
                );
                fetch(source.as_mut(), &request, attempt).map(|blocks| {
                    let outcome = span.shift_add(&blocks, query_start, query_end, keep_secs);
                    debug!(
                        channel = %self.config.channel,
                        start_ms = query_start,
                        blocks = blocks.len(),
                        ?outcome,
                        "appended to ring"
                    );
                    Fetched::Appended
                })
            };

            let stalled = match fetched {
                None => true,
                Some(Fetched::Appended) => {
                    // Blocks straddling the window end are skipped on append but kept by a refill
                    refill_next = span.last_time_ms() <= last_before;
                    false
                }
                Some(Fetched::Refilled) => {
                    span.start_ms() == start_before && span.last_time_ms() == last_before
                }
            };

            if stalled && !self.config.retry_backoff.is_zero() {
                debug!(
                    channel = %self.config.channel,
                    attempt,
                    "no progress, backing off"
                );
                thread::sleep(self.config.retry_backoff);
            }
        }

        if classify(span, time_ms, nsamp) == Coverage::Covered {
            return Ok(());
        }

        warn!(
            channel = %self.config.channel,
            time_ms,
            nsamp,
            attempts = self.config.max_attempts,
            "giving up on ring fetch"
        );
        Err(RingError::Unavailable {
            channel: self.config.channel.clone(),
            attempts: self.config.max_attempts,
        })
    }
}

/// What a fetch iteration did to the span
enum Fetched {
    Refilled,
    Appended,
}

/// Classify a window against a span
fn classify(span: &ZeroFilledSpan, time_ms: i64, nsamp: usize) -> Coverage {
    if span.is_empty() {
        return Coverage::Empty;
    }
    if time_ms - span.start_ms() <= -span.tolerance_ms() {
        return Coverage::TooOld;
    }
    if time_ms + samples_to_ms(nsamp as f64, span.rate()) >= span.last_time_ms() {
        return Coverage::TooNew;
    }
    Coverage::Covered
}

/// Run one query; `None` for a transient failure or an empty answer
fn fetch(
    source: &mut dyn WaveformSource,
    request: &QueryRequest,
    attempt: u32,
) -> Option<Vec<SampleBlock>> {
    let blocks = source
        .query(request)
        .and_then(|groups| groups.into_iter().find(|group| !group.is_empty()));

    if blocks.is_none() {
        debug!(
            channel = %request.channel,
            start_ms = request.start_ms,
            attempt,
            "query returned no data"
        );
    }
    blocks
}

impl fmt::Display for QueryRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ring {} {}:{} dur={}s pre={}s | {}",
            self.config.channel,
            self.config.host,
            self.config.port,
            self.config.duration,
            self.config.pre_duration,
            self.state.lock().span
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{ByteOrder, ENCODING_INT32};
    use crate::ring::QueryResult;
    use std::time::Duration;

    fn block(start_ms: i64, samples: &[i32]) -> SampleBlock {
        let payload =
            RawIntegerDecoder::encode(samples, ENCODING_INT32, ByteOrder::BigEndian).unwrap();
        SampleBlock::new("NNTEST HHZ", start_ms, 10.0, samples.len(), ENCODING_INT32, payload)
    }

    fn config() -> QueryRingConfig {
        QueryRingConfig {
            duration: 10.0,
            pre_duration: 2.0,
            retry_backoff: Duration::ZERO,
            ..QueryRingConfig::for_channel("NNTEST HHZ")
        }
    }

    #[test]
    fn test_classify_states() {
        let span = ZeroFilledSpan::new(&[block(10_000, &[1; 50])], 10_000, 10.0, -1);

        assert_eq!(classify(&span, 10_000, 10), Coverage::Covered);
        assert_eq!(classify(&span, 9_960, 10), Coverage::Covered, "Within half a sample");
        assert_eq!(classify(&span, 9_900, 10), Coverage::TooOld);
        assert_eq!(classify(&span, 14_000, 10), Coverage::TooNew);
        assert_eq!(classify(&span, 13_900, 10), Coverage::Covered);

        let empty = ZeroFilledSpan::new(&[], 0, 10.0, -1);
        assert_eq!(classify(&empty, 0, 1), Coverage::Empty);
    }

    #[test]
    fn test_empty_ring_refills_from_pre_roll() {
        let mut requests = Vec::new();
        let source = move |request: &QueryRequest| {
            requests.push(request.clone());
            assert_eq!(request.start_ms, 98_000);
            assert_eq!(request.duration, 10.0);
            Some(vec![vec![block(98_000, &(0..100).collect::<Vec<_>>())]])
        };

        let ring = QueryRing::new(config(), Box::new(source)).unwrap();
        let mut out = [0i32; 5];

        assert_eq!(ring.get_data_at(100_000, 5, &mut out, false), Ok(5));
        assert_eq!(out, [20, 21, 22, 23, 24]);
        ring.with_span(|span| assert_eq!(span.start_ms(), 98_000));
    }

    #[test]
    fn test_request_longer_than_ring_is_rejected() {
        let source = |_: &QueryRequest| Some(vec![vec![block(98_000, &[1; 100])]]);
        let ring = QueryRing::new(config(), Box::new(source)).unwrap();
        let mut out = [0i32; 100];

        assert_eq!(
            ring.get_data_at(100_000, 90, &mut out, true),
            Err(RingError::WindowTooLong {
                requested_ms: 9_000,
                capacity_ms: 8_000
            })
        );
    }

    #[test]
    fn test_display_mentions_channel() {
        let source = |_: &QueryRequest| -> QueryResult { None };
        let ring = QueryRing::new(config(), Box::new(source)).unwrap();
        let text = ring.to_string();

        assert!(text.starts_with("ring NNTEST HHZ localhost:2061 dur=10s pre=2s"));
    }
}
