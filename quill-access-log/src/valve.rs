//! The per-request access-log hook.
//!
//! A valve owns the active compiled pattern, the enable flag, the optional
//! skip condition, and its lifecycle. The request pipeline calls
//! [`AccessLogValve::log_access`] (or wraps its downstream work in
//! [`AccessLogValve::invoke`]) once per completed request.

use crate::evaluator::LineEvaluator;
use crate::pattern::CompiledPattern;
use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{Local, TimeZone, Utc};
use quill_core::config::AccessLogConfig;
use quill_core::error::QuillError;
use quill_core::lifecycle::{Lifecycle, LifecycleState, start_with};
use quill_core::record::RecordContext;
use quill_core::sink::LineSink;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct AccessLogValve<S: LineSink, Tz: TimeZone = Local> {
    pattern: ArcSwap<CompiledPattern>,
    enabled: AtomicBool,
    condition: ArcSwapOption<String>,
    logger_name: ArcSwapOption<String>,
    lifecycle: Lifecycle,
    evaluator: LineEvaluator<Tz>,
    sink: S,
}

impl<S: LineSink> AccessLogValve<S, Local> {
    /// Valve with an empty pattern rendering in the local time zone.
    pub fn new(sink: S) -> Self {
        Self::with_evaluator(sink, LineEvaluator::new())
    }

    pub fn from_config(config: &AccessLogConfig, sink: S) -> Self {
        let valve = Self::new(sink);
        valve.apply_config(config);
        valve
    }
}

impl<S: LineSink, Tz: TimeZone> AccessLogValve<S, Tz> {
    pub fn with_evaluator(sink: S, evaluator: LineEvaluator<Tz>) -> Self {
        Self {
            pattern: ArcSwap::from_pointee(CompiledPattern::default()),
            enabled: AtomicBool::new(true),
            condition: ArcSwapOption::empty(),
            logger_name: ArcSwapOption::empty(),
            lifecycle: Lifecycle::new(),
            evaluator,
            sink,
        }
    }

    pub fn apply_config(&self, config: &AccessLogConfig) {
        self.set_pattern(&config.pattern);
        self.set_enabled(config.enabled);
        self.set_condition(config.condition.clone());
        self.set_logger_name(config.logger_name.clone());
    }

    // ── Configuration ────────────────────────────────────────────

    /// Compile and install a new pattern, replacing the old one wholesale.
    ///
    /// Renders already in flight finish with the pattern they loaded.
    pub fn set_pattern(&self, pattern: &str) {
        let compiled = CompiledPattern::from_config(pattern);
        debug!(pattern = %compiled.source(), elements = compiled.len(), "Access log pattern compiled");
        self.pattern.store(Arc::new(compiled));
    }

    pub fn pattern(&self) -> Arc<CompiledPattern> {
        self.pattern.load_full()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_condition(&self, condition: Option<String>) {
        self.condition.store(condition.map(Arc::new));
    }

    pub fn condition(&self) -> Option<Arc<String>> {
        self.condition.load_full()
    }

    pub fn set_logger_name(&self, name: Option<String>) {
        self.logger_name.store(name.map(Arc::new));
    }

    pub fn logger_name(&self) -> Option<Arc<String>> {
        self.logger_name.load_full()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start logging. Fails if already started or no logger name is set.
    pub fn start(&self) -> Result<(), QuillError> {
        start_with(&self.lifecycle, || match self.logger_name() {
            Some(name) if !name.is_empty() => {
                info!(logger = %name, pattern = %self.pattern().source(), "Access log valve started");
                Ok(())
            }
            _ => Err(QuillError::Lifecycle("access log valve: no logger name set".into())),
        })
    }

    pub fn stop(&self) -> Result<(), QuillError> {
        self.lifecycle.stop()?;
        info!("Access log valve stopped");
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    // ── Per request ──────────────────────────────────────────────

    /// Run the rest of the pipeline, time it, then log the finished record.
    pub fn invoke<C, F>(&self, next: F) -> C
    where
        C: RecordContext,
        F: FnOnce() -> C,
    {
        if !self.is_active() {
            return next();
        }
        let started = Instant::now();
        let record = next();
        self.log_access(&record, started.elapsed());
        record
    }

    /// Render and forward one line. Returns the line when one was logged.
    pub fn log_access(&self, ctx: &dyn RecordContext, elapsed: Duration) -> Option<String> {
        self.log_access_at(ctx, elapsed, Utc::now().timestamp_millis())
    }

    pub fn log_access_at(
        &self,
        ctx: &dyn RecordContext,
        elapsed: Duration,
        now_millis: i64,
    ) -> Option<String> {
        if !self.is_active() || self.is_skipped(ctx) {
            return None;
        }
        let pattern = self.pattern.load();
        let line = self.evaluator.render_at(&pattern, ctx, elapsed, now_millis);
        self.sink.log(&line);
        Some(line)
    }

    /// Forward an already formatted line.
    pub fn log(&self, line: &str) {
        self.sink.log(line);
    }

    #[inline]
    fn is_active(&self) -> bool {
        self.lifecycle.is_started() && self.is_enabled()
    }

    fn is_skipped(&self, ctx: &dyn RecordContext) -> bool {
        let condition = self.condition.load();
        match condition.as_deref() {
            Some(attr) => ctx.request_attribute(attr).is_some(),
            None => false,
        }
    }
}

/// Emits access-log lines as `tracing` events.
#[derive(Debug, Clone)]
pub struct TracingLineSink {
    logger: String,
}

impl TracingLineSink {
    pub fn new(logger: impl Into<String>) -> Self {
        Self {
            logger: logger.into(),
        }
    }
}

impl LineSink for TracingLineSink {
    fn log(&self, line: &str) {
        info!(target: "access_log", logger = %self.logger, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::record::AccessRecord;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CaptureSink {
        lines: Mutex<Vec<String>>,
    }

    impl CaptureSink {
        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl LineSink for CaptureSink {
        fn log(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
    }

    fn started_valve(pattern: &str) -> (AccessLogValve<Arc<CaptureSink>>, Arc<CaptureSink>) {
        let sink = Arc::new(CaptureSink::default());
        let valve = AccessLogValve::new(Arc::clone(&sink));
        valve.set_logger_name(Some("access".into()));
        valve.set_pattern(pattern);
        valve.start().unwrap();
        (valve, sink)
    }

    fn record() -> AccessRecord {
        AccessRecord::new()
            .with_remote_addr("10.0.0.1")
            .with_request("GET", "/x", "HTTP/1.1")
            .with_status(200)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    #[test]
    fn start_requires_logger_name() {
        let valve = AccessLogValve::new(CaptureSink::default());
        let err = valve.start().unwrap_err();
        assert!(err.to_string().contains("no logger name"));
        assert_eq!(valve.state(), LifecycleState::NotStarted);

        valve.set_logger_name(Some(String::new()));
        assert!(valve.start().is_err());
    }

    #[test]
    fn double_start_and_stop_are_rejected() {
        let (valve, _) = started_valve("%s");
        assert!(valve.start().is_err());
        valve.stop().unwrap();
        assert!(valve.stop().is_err());
    }

    #[test]
    fn not_started_valve_logs_nothing() {
        let sink = Arc::new(CaptureSink::default());
        let valve = AccessLogValve::new(Arc::clone(&sink));
        valve.set_pattern("%s");
        assert!(valve.log_access(&record(), Duration::ZERO).is_none());
        assert!(sink.lines().is_empty());
    }

    // ── Gating ───────────────────────────────────────────────────

    #[test]
    fn disabled_valve_logs_nothing() {
        let (valve, sink) = started_valve("%s");
        valve.set_enabled(false);
        assert!(valve.log_access(&record(), Duration::ZERO).is_none());
        valve.set_enabled(true);
        assert_eq!(valve.log_access(&record(), Duration::ZERO).as_deref(), Some("200"));
        assert_eq!(sink.lines(), vec!["200"]);
    }

    #[test]
    fn condition_attribute_skips_line() {
        let (valve, sink) = started_valve("%U");
        valve.set_condition(Some("no-log".into()));
        let skipped = record().with_attribute("no-log", "1");
        assert!(valve.log_access(&skipped, Duration::ZERO).is_none());
        assert!(valve.log_access(&record(), Duration::ZERO).is_some());
        assert_eq!(sink.lines(), vec!["/x"]);
    }

    // ── Patterns ─────────────────────────────────────────────────

    #[test]
    fn set_pattern_expands_aliases() {
        let (valve, _) = started_valve("combined");
        assert!(valve.pattern().source().ends_with("\"%{User-Agent}i\""));
        valve.set_pattern("common");
        assert_eq!(valve.pattern().source(), crate::pattern::COMMON_PATTERN);
    }

    #[test]
    fn set_pattern_replaces_wholesale() {
        let (valve, _) = started_valve("%m");
        let before = valve.pattern();
        valve.set_pattern("%U");
        // Holders of the old pattern keep an intact copy.
        assert_eq!(before.source(), "%m");
        assert_eq!(valve.log_access(&record(), Duration::ZERO).as_deref(), Some("/x"));
    }

    #[test]
    fn from_config_applies_every_field() {
        let config = AccessLogConfig {
            enabled: false,
            pattern: "%h".into(),
            condition: Some("skip".into()),
            logger_name: Some("access".into()),
        };
        let valve = AccessLogValve::from_config(&config, CaptureSink::default());
        assert!(!valve.is_enabled());
        assert_eq!(valve.pattern().source(), "%h");
        assert_eq!(valve.condition().as_deref().map(String::as_str), Some("skip"));
        assert!(valve.start().is_ok());
    }

    // ── invoke ───────────────────────────────────────────────────

    #[test]
    fn invoke_times_downstream_and_logs() {
        let (valve, sink) = started_valve("%m %D");
        let rec = valve.invoke(|| {
            std::thread::sleep(Duration::from_millis(20));
            record()
        });
        assert_eq!(rec.status, Some(200));
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let elapsed: u64 = lines[0].trim_start_matches("GET ").parse().unwrap();
        assert!(elapsed >= 20, "elapsed {elapsed}");
    }

    #[test]
    fn invoke_on_stopped_valve_still_runs_downstream() {
        let (valve, sink) = started_valve("%m");
        valve.stop().unwrap();
        let mut ran = false;
        valve.invoke(|| {
            ran = true;
            record()
        });
        assert!(ran);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn log_forwards_raw_line() {
        let (valve, sink) = started_valve("%m");
        valve.log("test log message");
        assert_eq!(sink.lines(), vec!["test log message"]);
    }
}
