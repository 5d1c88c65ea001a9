//! 📊 StatsAggregator: the one shared mutable thing in the whole run. Guarded accordingly.
//!
//! 🎬 *[ten workers finish at once. they all reach for the clipboard.]*
//! *[the mutex clears its throat. "one at a time, please."]*
//!
//! 🧠 Knowledge graph:
//! - Owned by the coordinator, lent to workers as `Arc<StatsAggregator>`. No globals.
//! - [`StatsAggregator::record`] is the only writer. Four fields, one critical section, no I/O
//!   inside it, ever.
//! - [`StatsAggregator::summary`] is a snapshot. Take it after the workers are joined if you
//!   want it to mean anything.

use std::sync::{Mutex, PoisonError};

/// 📈 Running totals across every successfully completed object.
///
/// `total_events` and `total_processing_seconds` only go up. The bounds only widen.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregateStats {
    pub total_events: u64,
    pub total_processing_seconds: f64,
    pub earliest_millis: Option<i64>,
    pub latest_millis: Option<i64>,
}

/// ⏳ Min/max timestamp seen within one object. Widen-only, like its big sibling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampBounds {
    pub earliest: Option<i64>,
    pub latest: Option<i64>,
}

impl TimestampBounds {
    pub fn observe(&mut self, millis: i64) {
        self.earliest = Some(self.earliest.map_or(millis, |e| e.min(millis)));
        self.latest = Some(self.latest.map_or(millis, |l| l.max(millis)));
    }

    pub fn merge(&mut self, other: TimestampBounds) {
        if let Some(e) = other.earliest {
            self.observe(e);
        }
        if let Some(l) = other.latest {
            self.observe(l);
        }
    }
}

/// 🧾 What one finished object contributes to the aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ObjectTally {
    pub event_count: u64,
    pub processing_seconds: f64,
    pub bounds: TimestampBounds,
}

/// 🔒 The clipboard, and the mutex guarding it.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<AggregateStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// ✍️ Fold one object's tally into the aggregate. Call exactly once per completed object.
    pub fn record(&self, tally: &ObjectTally) {
        // -- a poisoned lock only means some other thread panicked mid-update of plain numbers.
        // -- the numbers are still numbers. keep counting.
        let mut the_stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        the_stats.total_events += tally.event_count;
        the_stats.total_processing_seconds += tally.processing_seconds;
        if let Some(e) = tally.bounds.earliest {
            the_stats.earliest_millis = Some(the_stats.earliest_millis.map_or(e, |cur| cur.min(e)));
        }
        if let Some(l) = tally.bounds.latest {
            the_stats.latest_millis = Some(the_stats.latest_millis.map_or(l, |cur| cur.max(l)));
        }
    }

    /// 📸 Point-in-time copy. Only trustworthy after every worker has returned.
    pub fn summary(&self) -> AggregateStats {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
