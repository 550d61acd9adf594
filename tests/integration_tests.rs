//! Integration tests for a query ring following a live feed

use cwb_ring::encoding::ENCODING_INT32;
use cwb_ring::{
    ByteOrder, QueryRequest, QueryResult, QueryRing, QueryRingConfig, RawIntegerDecoder,
    SampleBlock, WaveformSource, DEFAULT_FILL_VALUE,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CHANNEL: &str = "IUANMO LHZ00";
const RATE: f64 = 10.0;
const FILL: i32 = DEFAULT_FILL_VALUE;

/// One-second blocks of a 10 Hz channel; samples hold their sample number
/// since the epoch. Blocks inside `hole` were never archived, and data
/// beyond `available_ms` has not arrived yet.
struct Feed {
    available_ms: i64,
    advance_ms: i64,
    hole: std::ops::Range<i64>,
    calls: Arc<AtomicUsize>,
}

impl Feed {
    fn new(available_ms: i64) -> Self {
        Self {
            available_ms,
            advance_ms: 0,
            hole: 0..0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn block(second: i64) -> SampleBlock {
        let samples: Vec<i32> = (0..10).map(|j| (second * 10 + j) as i32).collect();
        let payload =
            RawIntegerDecoder::encode(&samples, ENCODING_INT32, ByteOrder::BigEndian).unwrap();
        SampleBlock::new(CHANNEL, second * 1_000, RATE, 10, ENCODING_INT32, payload)
    }
}

impl WaveformSource for Feed {
    fn query(&mut self, request: &QueryRequest) -> QueryResult {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let end = request.end_ms().min(self.available_ms);
        let blocks: Vec<SampleBlock> = (request.start_ms.div_euclid(1_000)..)
            .take_while(|s| s * 1_000 < end)
            .filter(|s| !self.hole.contains(&(s * 1_000)))
            .map(Feed::block)
            .collect();

        self.available_ms += self.advance_ms;
        Some(vec![blocks])
    }
}

fn ring(feed: Feed) -> QueryRing {
    let config = QueryRingConfig {
        duration: 20.0,
        pre_duration: 5.0,
        retry_backoff: Duration::ZERO,
        ..QueryRingConfig::for_channel(CHANNEL)
    };
    QueryRing::new(config, Box::new(feed)).unwrap()
}

#[test]
fn test_archive_hole_and_partial_reads() {
    let mut feed = Feed::new(120_000);
    feed.hole = 41_000..42_000;
    let ring = ring(feed);
    let mut out = [0i32; 30];

    // Reads stop at the hole unless gaps are allowed
    assert_eq!(ring.get_data_at(40_000, 30, &mut out, false), Ok(10));
    assert_eq!(out[..10], (400..410).collect::<Vec<i32>>()[..]);

    assert_eq!(ring.get_data_at(40_000, 30, &mut out, true), Ok(30));
    assert!(out[10..20].iter().all(|&v| v == FILL));
    assert_eq!(out[20], 420);

    // A resident hole is not refetched
    assert_eq!(ring.get_data_at(41_000, 5, &mut out, false), Ok(0));

    ring.with_span(|span| {
        let gaps = span.gaps();
        assert_eq!(gaps.len(), 1);
        assert_eq!((gaps[0].start_ms, gaps[0].end_ms), (41_000, 42_000));
        assert_eq!(span.runs().len(), 2);
    });
}

#[test]
fn test_streaming_reads_follow_feed() {
    let feed = Feed::new(120_000);
    let calls = feed.calls.clone();
    let ring = ring(feed);
    let mut out = [0i32; 30];

    for t in (40_000..=100_000).step_by(5_000) {
        assert_eq!(ring.get_data_at(t, 30, &mut out, false), Ok(30), "t={}", t);
        let first = (t / 100) as i32;
        assert_eq!(out[..], (first..first + 30).collect::<Vec<i32>>()[..], "t={}", t);

        ring.with_span(|span| {
            assert!(span.start_ms() <= t);
            assert!(t + 3_000 <= span.start_ms() + 20_000);
            assert!(span.is_decode_clean());
        });
    }

    // Sliding is incremental, never a refetch of the whole window each step
    assert!(calls.load(Ordering::SeqCst) < 30);
}

#[test]
fn test_waits_for_late_data() {
    let mut feed = Feed::new(50_000);
    feed.advance_ms = 1_000;
    let calls = feed.calls.clone();
    let ring = ring(feed);
    let mut out = [0i64; 30];

    assert_eq!(ring.get_data_at(48_000, 30, &mut out, false), Ok(30));
    assert_eq!(out[0], 480);
    assert_eq!(out[29], 509);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    ring.with_span(|span| {
        assert_eq!(span.start_ms(), 43_000);
        assert_eq!(span.last_time_ms(), 52_000);
    });
}

#[test]
fn test_ring_display() {
    let ring = ring(Feed::new(60_000));
    ring.chk_data(30_000, 10).unwrap();
    let text = ring.to_string();

    assert!(text.starts_with("ring IUANMO LHZ00 localhost:2061 dur=20s pre=5s"));
    assert!(text.contains("span start=25000"));
}
