//! Basic usage example for cwb-ring
//!
//! This example demonstrates:
//! 1. Installing the structured logger
//! 2. Implementing a waveform source (here a synthetic in-memory archive)
//! 3. Reading from a query ring as a display would, scrolling forward in time
//! 4. Inspecting the resident span, its runs and gaps
//!
//! The synthetic archive serves a 40 Hz sine wave in 10 second blocks, with
//! one block missing to show how gaps come back to the caller.

use cwb_ring::encoding::ENCODING_INT32;
use cwb_ring::logging::{init_logging, LogConfig};
use cwb_ring::{
    ByteOrder, QueryRequest, QueryResult, QueryRing, QueryRingConfig, RawIntegerDecoder,
    SampleBlock, WaveformSource,
};
use std::time::Duration;

const CHANNEL: &str = "USISCO BHZ00";
const RATE: f64 = 40.0;
const BLOCK_MS: i64 = 10_000;

/// Synthetic archive; block 7 was never recorded
struct SineArchive {
    queries: usize,
}

impl SineArchive {
    fn block(k: i64) -> Option<SampleBlock> {
        if k == 7 {
            return None;
        }
        let samples: Vec<i32> = (0..400)
            .map(|j| {
                let t = (k * 400 + j) as f64 / RATE;
                (10_000.0 * (t * 0.5).sin()) as i32
            })
            .collect();
        let payload =
            RawIntegerDecoder::encode(&samples, ENCODING_INT32, ByteOrder::BigEndian).ok()?;
        Some(SampleBlock::new(
            CHANNEL,
            k * BLOCK_MS,
            RATE,
            samples.len(),
            ENCODING_INT32,
            payload,
        ))
    }
}

impl WaveformSource for SineArchive {
    fn query(&mut self, request: &QueryRequest) -> QueryResult {
        self.queries += 1;
        println!(
            "query #{}: {} from {} for {}s",
            self.queries, request.channel, request.start_ms, request.duration
        );

        let end = request.end_ms();
        let blocks = (request.start_ms.div_euclid(BLOCK_MS)..)
            .take_while(|k| k * BLOCK_MS < end)
            .filter_map(SineArchive::block)
            .collect();
        Some(vec![blocks])
    }
}

fn main() {
    if let Err(e) = init_logging(&LogConfig::default()) {
        eprintln!("logging disabled: {}", e);
    }

    let config = QueryRingConfig {
        duration: 120.0,
        pre_duration: 20.0,
        retry_backoff: Duration::from_millis(100),
        ..QueryRingConfig::for_channel(CHANNEL)
    };
    let ring = match QueryRing::new(config, Box::new(SineArchive { queries: 0 })) {
        Ok(ring) => ring,
        Err(e) => {
            eprintln!("bad ring configuration: {}", e);
            return;
        }
    };

    // Scroll a 15 second display window forward through the archive
    let mut window = vec![0f64; 600];
    for t in (30_000..=240_000).step_by(30_000) {
        match ring.get_data_at(t, window.len(), &mut window, false) {
            Ok(n) if n == window.len() => {
                let peak = window.iter().fold(0f64, |m, v| m.max(v.abs()));
                println!("t={:>7}  {} samples, peak {:.0}", t, n, peak);
            }
            Ok(n) => println!("t={:>7}  only {} samples before a gap", t, n),
            Err(e) => println!("t={:>7}  {}", t, e),
        }
    }

    // Same window with gaps copied through as the fill value
    let mut raw = vec![0i32; 600];
    if let Ok(n) = ring.get_data_at(65_000, raw.len(), &mut raw, true) {
        let missing = raw[..n].iter().filter(|&&v| v == ring.config().fill_value).count();
        println!("t=  65000  {} samples, {} missing", n, missing);
    }

    ring.with_span(|span| {
        println!("{}", span);
        for gap in span.gaps() {
            println!("gap: {} samples from {} to {}", gap.len(), gap.start_ms, gap.end_ms);
        }
    });
    println!("{}", ring);
}
