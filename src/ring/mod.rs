//! Query rings: rolling windows refilled from a CWB server
//!
//! A [`QueryRing`] wraps a [`ZeroFilledSpan`](crate::ZeroFilledSpan) and
//! answers "give me N samples at time T", fetching from a
//! [`WaveformSource`] whenever the requested window is not resident. This
//! module holds the pieces the ring is configured and fed with:
//!
//! - [`QueryRingConfig`], channel, server and window parameters
//! - [`QueryRequest`], one backing query
//! - [`WaveformSource`], the transport contract
//!
//! The transport itself (query wire format, connection handling) lives
//! outside this crate.

pub mod query_ring;

pub use query_ring::{Coverage, QueryRing};

use crate::block::SampleBlock;
use crate::error::{Result, RingError};
use crate::span::DEFAULT_FILL_VALUE;
use std::time::Duration;

/// Default number of fetch iterations before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 120;

/// A single query against the waveform archive
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Channel name
    pub channel: String,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Start of the requested interval in epoch milliseconds
    pub start_ms: i64,
    /// Length of the requested interval in seconds
    pub duration: f64,
}

impl QueryRequest {
    /// End of the requested interval in epoch milliseconds
    pub fn end_ms(&self) -> i64 {
        self.start_ms + (self.duration * 1000.0).round() as i64
    }
}

/// Answer to a query: `None` on transient failure, otherwise one group of
/// blocks per matching channel (normally exactly one)
pub type QueryResult = Option<Vec<Vec<SampleBlock>>>;

/// Transport that fetches blocks from a waveform archive
///
/// A `None` answer is retried later, never treated as fatal.
pub trait WaveformSource: Send {
    /// Run a query
    fn query(&mut self, request: &QueryRequest) -> QueryResult;
}

impl<F> WaveformSource for F
where
    F: FnMut(&QueryRequest) -> QueryResult + Send,
{
    fn query(&mut self, request: &QueryRequest) -> QueryResult {
        self(request)
    }
}

/// Configuration for a query ring
#[derive(Debug, Clone)]
pub struct QueryRingConfig {
    /// Channel name to query
    pub channel: String,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Length of the ring in seconds
    pub duration: f64,
    /// Seconds of history to hold before a requested time
    pub pre_duration: f64,
    /// Sentinel for missing samples
    pub fill_value: i32,
    /// Fetch iterations before reporting the data unavailable
    pub max_attempts: u32,
    /// Pause after a fetch that returned nothing
    pub retry_backoff: Duration,
}

impl Default for QueryRingConfig {
    fn default() -> Self {
        Self {
            channel: String::new(),
            host: "localhost".to_string(),
            port: 2061,
            duration: 600.0,
            pre_duration: 30.0,
            fill_value: DEFAULT_FILL_VALUE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl QueryRingConfig {
    /// Configuration for `channel` with default server and window settings
    pub fn for_channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// Check that the configuration describes a usable ring
    pub fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            return Err(RingError::InvalidConfig("channel is empty".to_string()));
        }
        if !(self.duration > 0.0) {
            return Err(RingError::InvalidConfig(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }
        if self.pre_duration < 0.0 || self.pre_duration >= self.duration {
            return Err(RingError::InvalidConfig(format!(
                "pre_duration {} must be within [0, {})",
                self.pre_duration, self.duration
            )));
        }
        if self.max_attempts == 0 {
            return Err(RingError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Build a query for `[start_ms, start_ms + duration)`
    pub fn request(&self, start_ms: i64, duration: f64) -> QueryRequest {
        QueryRequest {
            channel: self.channel.clone(),
            host: self.host.clone(),
            port: self.port,
            start_ms,
            duration,
        }
    }

    /// Ring length in milliseconds
    pub fn duration_ms(&self) -> i64 {
        (self.duration * 1000.0).round() as i64
    }

    /// Pre-roll length in milliseconds
    pub fn pre_duration_ms(&self) -> i64 {
        (self.pre_duration * 1000.0).round() as i64
    }
}
