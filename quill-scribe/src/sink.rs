//! Receivers for delivery outcomes.

use crate::engine::Outcome;
use crate::error::{DeliveryError, UnknownOutcome};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Everything known about one dropped line.
#[derive(Debug)]
pub struct DropReport<'a> {
    pub engine: &'a str,
    pub outcome: Outcome,
    pub category: &'a str,
    pub line: &'a str,
    pub error: Option<&'a DeliveryError>,
}

/// Told about every delivery, exactly once per call.
///
/// Implementations run while the engine holds its connection lock and
/// must not deliver through the same engine.
pub trait ErrorSink: Send + Sync {
    fn dropped(&self, report: &DropReport<'_>);

    fn delivered(&self) {}
}

// ── Counting sink ────────────────────────────────────────────────

/// Counts outcomes; never logs.
#[derive(Debug, Default)]
pub struct StatsErrorSink {
    counters: [AtomicU64; 4],
}

impl StatsErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: Outcome) {
        self.counters[usize::from(outcome.code())].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_of(&self, outcome: Outcome) -> u64 {
        self.counters[usize::from(outcome.code())].load(Ordering::Relaxed)
    }

    /// Count for a raw outcome code, as used by external tooling.
    pub fn count_of_code(&self, code: u8) -> Result<u64, UnknownOutcome> {
        Outcome::try_from(code).map(|o| self.count_of(o))
    }

    pub fn total_dropped(&self) -> u64 {
        Outcome::ALL
            .iter()
            .filter(|o| o.is_drop())
            .map(|o| self.count_of(*o))
            .sum()
    }

    pub fn snapshot(&self) -> BTreeMap<Outcome, u64> {
        Outcome::ALL.iter().map(|o| (*o, self.count_of(*o))).collect()
    }
}

impl ErrorSink for StatsErrorSink {
    fn dropped(&self, report: &DropReport<'_>) {
        self.record(report.outcome);
    }

    fn delivered(&self) {
        self.record(Outcome::Delivered);
    }
}

// ── Logging sink ─────────────────────────────────────────────────

/// Logs each drop as a warning carrying the dropped line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn dropped(&self, report: &DropReport<'_>) {
        let engine = report.engine;
        let category = report.category;
        let line = report.line;
        match (report.outcome, report.error) {
            (Outcome::DroppedNoConnection, Some(e)) => {
                warn!(engine, category, error = %e, "DROP - no connection: {line}");
            }
            (Outcome::DroppedNoConnection, None) => {
                warn!(engine, category, "DROP - no connection: {line}");
            }
            (Outcome::DroppedOverloaded, _) => {
                warn!(engine, category, "DROP - TRY_LATER: {line}");
            }
            (_, Some(e)) => {
                warn!(engine, category, error = %e, "DROP - transport failure: {line}");
            }
            (_, None) => {
                warn!(engine, category, outcome = %report.outcome, "DROP: {line}");
            }
        }
    }
}

/// Fans one report out to several sinks in order.
pub struct FanoutErrorSink {
    sinks: Vec<Arc<dyn ErrorSink>>,
}

impl FanoutErrorSink {
    pub fn new(sinks: Vec<Arc<dyn ErrorSink>>) -> Self {
        Self { sinks }
    }
}

impl ErrorSink for FanoutErrorSink {
    fn dropped(&self, report: &DropReport<'_>) {
        for sink in &self.sinks {
            sink.dropped(report);
        }
    }

    fn delivered(&self) {
        for sink in &self.sinks {
            sink.delivered();
        }
    }
}
