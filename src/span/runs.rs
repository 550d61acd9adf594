//! Run list: which time intervals of a span hold real data
//!
//! Every block a span ingests appends its interval here. Overlapping or
//! abutting intervals are coalesced so the list stays an ordered set of
//! disjoint runs. The list is trimmed to the span's window after every bulk
//! operation. It is used for auditing only; samples live in the span itself.

use crate::block::BlockRef;
use std::fmt;

/// A contiguous interval of real data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    /// Start of the interval in epoch milliseconds
    pub start_ms: i64,
    /// End of the interval (exclusive) in epoch milliseconds
    pub end_ms: i64,
    /// Block that opened this run
    pub source: BlockRef,
    /// Number of blocks merged into this run
    pub blocks: usize,
}

impl Run {
    /// Length of the run in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// Ordered set of disjoint data runs
#[derive(Debug, Clone, Default)]
pub struct RunList {
    runs: Vec<Run>,
}

impl RunList {
    /// Create an empty run list
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an interval of data
    ///
    /// # Arguments
    ///
    /// * `start_ms` - Start of the interval
    /// * `end_ms` - End of the interval (exclusive)
    /// * `source` - Block the data came from
    /// * `slop_ms` - Runs separated by no more than this are merged
    pub fn add(&mut self, start_ms: i64, end_ms: i64, source: BlockRef, slop_ms: i64) {
        if end_ms <= start_ms {
            return;
        }

        // First run that could touch the new interval
        let first = self.runs.partition_point(|r| r.end_ms + slop_ms < start_ms);
        // One past the last run that touches it
        let last = self.runs.partition_point(|r| r.start_ms <= end_ms + slop_ms);

        if first >= last {
            self.runs.insert(
                first,
                Run {
                    start_ms,
                    end_ms,
                    source,
                    blocks: 1,
                },
            );
            return;
        }

        let merged: Vec<Run> = self.runs.drain(first..last).collect();
        let mut run = Run {
            start_ms,
            end_ms,
            source,
            blocks: 1,
        };
        for old in merged {
            if old.start_ms < run.start_ms {
                run.start_ms = old.start_ms;
                run.source = old.source;
            }
            run.end_ms = run.end_ms.max(old.end_ms);
            run.blocks += old.blocks;
        }
        self.runs.insert(first, run);
    }

    /// Clip all runs to `[start_ms, end_ms)` and drop those left empty
    pub fn trim(&mut self, start_ms: i64, end_ms: i64) {
        self.runs.retain_mut(|run| {
            run.start_ms = run.start_ms.max(start_ms);
            run.end_ms = run.end_ms.min(end_ms);
            run.end_ms > run.start_ms
        });
    }

    /// Remove every run
    pub fn clear(&mut self) {
        self.runs.clear();
    }

    /// Number of disjoint runs
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Whether no data has been recorded
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Iterate over the runs in time order
    pub fn iter(&self) -> std::slice::Iter<'_, Run> {
        self.runs.iter()
    }

    /// Total milliseconds covered by runs
    pub fn total_ms(&self) -> i64 {
        self.runs.iter().map(Run::duration_ms).sum()
    }

    /// Earliest time covered
    pub fn earliest_ms(&self) -> Option<i64> {
        self.runs.first().map(|r| r.start_ms)
    }

    /// Latest time covered (exclusive)
    pub fn latest_ms(&self) -> Option<i64> {
        self.runs.last().map(|r| r.end_ms)
    }
}

impl<'a> IntoIterator for &'a RunList {
    type Item = &'a Run;
    type IntoIter = std::slice::Iter<'a, Run>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for RunList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} run(s)", self.runs.len())?;
        for run in &self.runs {
            write!(f, " [{}-{} {} blk]", run.start_ms, run.end_ms, run.blocks)?;
        }
        Ok(())
    }
}
