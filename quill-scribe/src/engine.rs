//! Single-connection delivery engine.
//!
//! One mutex guards the connection state, so connect, send, and
//! close-on-failure for one event are never interleaved with another
//! thread's. Every call to [`DeliveryEngine::deliver`] produces exactly
//! one [`Outcome`] and exactly one report to the error sink; nothing is
//! retried, buffered, or surfaced to the caller as an error.

use crate::error::{DeliveryError, UnknownOutcome};
use crate::protocol::ResultCode;
use crate::sink::{DropReport, ErrorSink};
use crate::transport::{Connection, Connector};
use quill_core::sink::LineSink;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// How one delivery attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Delivered,
    DroppedNoConnection,
    DroppedOverloaded,
    DroppedError,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [
        Outcome::Delivered,
        Outcome::DroppedNoConnection,
        Outcome::DroppedOverloaded,
        Outcome::DroppedError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Delivered => "delivered",
            Outcome::DroppedNoConnection => "dropped_no_connection",
            Outcome::DroppedOverloaded => "dropped_overloaded",
            Outcome::DroppedError => "dropped_error",
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_drop(self) -> bool {
        self != Outcome::Delivered
    }
}

impl TryFrom<u8> for Outcome {
    type Error = UnknownOutcome;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Outcome::ALL
            .get(usize::from(code))
            .copied()
            .ok_or(UnknownOutcome(code))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection held by the engine between calls.
pub enum ConnectionState<C> {
    Disconnected,
    Connected(C),
}

impl<C: Connection> ConnectionState<C> {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    /// Close any held connection and forget it.
    fn reset(&mut self) {
        if let ConnectionState::Connected(mut conn) =
            std::mem::replace(self, ConnectionState::Disconnected)
        {
            conn.close();
        }
    }

    fn is_usable(&self) -> bool {
        match self {
            ConnectionState::Connected(conn) => conn.is_open(),
            ConnectionState::Disconnected => false,
        }
    }
}

pub struct DeliveryEngine<C: Connector> {
    name: String,
    connector: C,
    state: Mutex<ConnectionState<C::Conn>>,
    sink: Arc<dyn ErrorSink>,
}

impl<C: Connector> DeliveryEngine<C> {
    /// Engine starts disconnected; the first delivery connects lazily.
    pub fn new(connector: C, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            name: "scribe".to_string(),
            connector,
            state: Mutex::new(ConnectionState::Disconnected),
            sink,
        }
    }

    /// Name reported alongside drops.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn error_sink(&self) -> &Arc<dyn ErrorSink> {
        &self.sink
    }

    /// Deliver one formatted line under `category`.
    pub fn deliver(&self, category: &str, line: &str) -> Outcome {
        let mut state = self.lock_state();

        let conn = match self.ensure_connected(&mut state) {
            Ok(conn) => conn,
            Err(e) => return self.report(Outcome::DroppedNoConnection, category, line, Some(&e)),
        };

        match conn.log(category, line) {
            Ok(ResultCode::Ok) => {
                self.sink.delivered();
                Outcome::Delivered
            }
            // The collector is healthy but busy; keep the connection.
            Ok(ResultCode::TryLater) => self.report(Outcome::DroppedOverloaded, category, line, None),
            Err(e) => {
                if e.closes_connection() {
                    state.reset();
                }
                self.report(Outcome::DroppedError, category, line, Some(&e))
            }
        }
    }

    /// Close the held connection, if any. Later deliveries reconnect.
    pub fn close(&self) {
        let mut state = self.lock_state();
        if state.is_connected() {
            debug!(engine = %self.name, endpoint = %self.connector.endpoint(), "Collector connection closed");
        }
        state.reset();
    }

    pub fn is_connected(&self) -> bool {
        self.lock_state().is_usable()
    }

    fn ensure_connected<'a>(
        &self,
        state: &'a mut ConnectionState<C::Conn>,
    ) -> Result<&'a mut C::Conn, DeliveryError> {
        if !state.is_usable() {
            // A stale handle the transport already gave up on.
            state.reset();
            *state = ConnectionState::Connected(self.connector.connect()?);
        }
        match state {
            ConnectionState::Connected(conn) => Ok(conn),
            ConnectionState::Disconnected => Err(DeliveryError::NotConnected),
        }
    }

    fn report(
        &self,
        outcome: Outcome,
        category: &str,
        line: &str,
        error: Option<&DeliveryError>,
    ) -> Outcome {
        self.sink.dropped(&DropReport {
            engine: &self.name,
            outcome,
            category,
            line,
            error,
        });
        outcome
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState<C::Conn>> {
        // A panic mid-delivery leaves at worst a stale connection, which
        // the next call detects and replaces.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl<C: Connector> Drop for DeliveryEngine<C> {
    fn drop(&mut self) {
        self.lock_state().reset();
    }
}

/// Forwards whole lines to an engine under one category.
pub struct EngineLineSink<C: Connector> {
    engine: Arc<DeliveryEngine<C>>,
    category: String,
}

impl<C: Connector> EngineLineSink<C> {
    pub fn new(engine: Arc<DeliveryEngine<C>>, category: impl Into<String>) -> Self {
        Self {
            engine,
            category: category.into(),
        }
    }
}

impl<C: Connector> LineSink for EngineLineSink<C> {
    fn log(&self, line: &str) {
        self.engine.deliver(&self.category, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::StatsErrorSink;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── Scripted connector ───────────────────────────────────────

    #[derive(Clone, Copy)]
    enum Step {
        Reply(ResultCode),
        Fail,
        TooLarge,
    }

    struct MockConn {
        script: Arc<Mutex<VecDeque<Step>>>,
        sent: Arc<Mutex<Vec<(String, String)>>>,
        open: bool,
        closes: Arc<AtomicUsize>,
    }

    impl Connection for MockConn {
        fn log(&mut self, category: &str, message: &str) -> Result<ResultCode, DeliveryError> {
            self.sent
                .lock()
                .unwrap()
                .push((category.to_string(), message.to_string()));
            match self.script.lock().unwrap().pop_front().unwrap_or(Step::Reply(ResultCode::Ok)) {
                Step::Reply(code) => Ok(code),
                Step::Fail => {
                    self.open = false;
                    Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe").into())
                }
                Step::TooLarge => Err(DeliveryError::MessageTooLarge { len: 20, limit: 10 }),
            }
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&mut self) {
            self.open = false;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockConnector {
        refuse: Mutex<bool>,
        connects: AtomicUsize,
        closes: Arc<AtomicUsize>,
        script: Arc<Mutex<VecDeque<Step>>>,
        sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl MockConnector {
        fn script(&self, steps: &[Step]) {
            self.script.lock().unwrap().extend(steps.iter().copied());
        }

        fn refuse(&self, refuse: bool) {
            *self.refuse.lock().unwrap() = refuse;
        }
    }

    impl Connector for MockConnector {
        type Conn = MockConn;

        fn connect(&self) -> Result<MockConn, DeliveryError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if *self.refuse.lock().unwrap() {
                return Err(DeliveryError::Connect {
                    addr: self.endpoint(),
                    source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                });
            }
            Ok(MockConn {
                script: Arc::clone(&self.script),
                sent: Arc::clone(&self.sent),
                open: true,
                closes: Arc::clone(&self.closes),
            })
        }

        fn endpoint(&self) -> String {
            "mock:1463".into()
        }
    }

    fn engine() -> (DeliveryEngine<MockConnector>, Arc<StatsErrorSink>) {
        let stats = Arc::new(StatsErrorSink::new());
        let engine = DeliveryEngine::new(MockConnector::default(), stats.clone());
        (engine, stats)
    }

    // ── Outcome ──────────────────────────────────────────────────

    #[test]
    fn outcome_codes_round_trip() {
        for outcome in Outcome::ALL {
            assert_eq!(Outcome::try_from(outcome.code()), Ok(outcome));
        }
        assert_eq!(Outcome::try_from(4), Err(UnknownOutcome(4)));
        assert!(!Outcome::Delivered.is_drop());
        assert!(Outcome::DroppedError.is_drop());
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&Outcome::DroppedNoConnection).unwrap();
        assert_eq!(json, "\"dropped_no_connection\"");
        assert_eq!(Outcome::DroppedOverloaded.to_string(), "dropped_overloaded");
    }

    // ── State transitions ────────────────────────────────────────

    #[test]
    fn starts_disconnected_and_connects_lazily() {
        let (engine, stats) = engine();
        assert!(!engine.is_connected());
        assert_eq!(engine.deliver("cat", "one"), Outcome::Delivered);
        assert!(engine.is_connected());
        assert_eq!(engine.deliver("cat", "two"), Outcome::Delivered);
        assert_eq!(engine.connector().connects.load(Ordering::SeqCst), 1);
        assert_eq!(stats.count_of(Outcome::Delivered), 2);
        assert_eq!(
            *engine.connector().sent.lock().unwrap(),
            vec![("cat".to_string(), "one".to_string()), ("cat".to_string(), "two".to_string())]
        );
    }

    #[test]
    fn connect_failure_counts_only_no_connection() {
        let (engine, stats) = engine();
        engine.connector().refuse(true);
        assert_eq!(engine.deliver("cat", "x"), Outcome::DroppedNoConnection);
        assert!(!engine.is_connected());
        assert_eq!(stats.count_of(Outcome::DroppedNoConnection), 1);
        assert_eq!(stats.count_of(Outcome::DroppedError), 0);
        assert_eq!(stats.count_of(Outcome::Delivered), 0);
    }

    #[test]
    fn connect_is_retried_on_next_delivery() {
        let (engine, _) = engine();
        engine.connector().refuse(true);
        engine.deliver("cat", "x");
        engine.connector().refuse(false);
        assert_eq!(engine.deliver("cat", "y"), Outcome::Delivered);
        assert_eq!(engine.connector().connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn try_later_keeps_connection() {
        let (engine, stats) = engine();
        engine.connector().script(&[Step::Reply(ResultCode::TryLater)]);
        assert_eq!(engine.deliver("cat", "x"), Outcome::DroppedOverloaded);
        assert!(engine.is_connected());
        assert_eq!(engine.connector().closes.load(Ordering::SeqCst), 0);
        assert_eq!(engine.deliver("cat", "y"), Outcome::Delivered);
        assert_eq!(engine.connector().connects.load(Ordering::SeqCst), 1);
        assert_eq!(stats.count_of(Outcome::DroppedOverloaded), 1);
    }

    #[test]
    fn transport_failure_closes_and_next_call_reconnects() {
        let (engine, stats) = engine();
        engine.connector().script(&[Step::Reply(ResultCode::Ok), Step::Fail]);
        assert_eq!(engine.deliver("cat", "a"), Outcome::Delivered);
        assert_eq!(engine.deliver("cat", "b"), Outcome::DroppedError);
        assert!(!engine.is_connected());
        assert_eq!(engine.connector().closes.load(Ordering::SeqCst), 1);

        assert_eq!(engine.deliver("cat", "c"), Outcome::Delivered);
        assert_eq!(engine.connector().connects.load(Ordering::SeqCst), 2);
        assert_eq!(stats.count_of(Outcome::DroppedError), 1);
        assert_eq!(stats.count_of(Outcome::Delivered), 2);
    }

    #[test]
    fn oversized_line_is_dropped_without_reconnecting() {
        let (engine, stats) = engine();
        engine.connector().script(&[Step::TooLarge]);
        assert_eq!(engine.deliver("cat", "huge"), Outcome::DroppedError);
        assert!(engine.is_connected());
        assert_eq!(engine.connector().closes.load(Ordering::SeqCst), 0);

        assert_eq!(engine.deliver("cat", "small"), Outcome::Delivered);
        assert_eq!(engine.connector().connects.load(Ordering::SeqCst), 1);
        assert_eq!(stats.count_of(Outcome::DroppedError), 1);
    }

    #[test]
    fn close_forgets_connection() {
        let (engine, _) = engine();
        engine.deliver("cat", "a");
        engine.close();
        assert!(!engine.is_connected());
        engine.close();
        assert_eq!(engine.connector().closes.load(Ordering::SeqCst), 1);
        assert_eq!(engine.deliver("cat", "b"), Outcome::Delivered);
        assert_eq!(engine.connector().connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn line_sink_delivers_under_category() {
        let (engine, stats) = engine();
        let engine = Arc::new(engine);
        let sink = EngineLineSink::new(Arc::clone(&engine), "access");
        sink.log("GET /x 200");
        assert_eq!(stats.count_of(Outcome::Delivered), 1);
        assert_eq!(
            engine.connector().sent.lock().unwrap()[0],
            ("access".to_string(), "GET /x 200".to_string())
        );
    }

    #[test]
    fn concurrent_deliveries_each_get_one_outcome() {
        let (engine, stats) = engine();
        let engine = Arc::new(engine);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        engine.deliver("cat", &format!("{i}-{j}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.count_of(Outcome::Delivered), 400);
        assert_eq!(engine.connector().connects.load(Ordering::SeqCst), 1);
    }
}
