//! A `tracing_subscriber::Layer` that ships events to a collector.
//!
//! Each event is laid out as `LEVEL - message k=v ...`, wrapped by
//! [`MessageBuilder`] into `[host] ...` (plus the first error field's
//! cause chain), and handed to [`DeliveryEngine::deliver`].

use crate::engine::DeliveryEngine;
use crate::message::{MessageBuilder, error_frames};
use crate::sink::{ErrorSink, TracingErrorSink};
use crate::transport::{Connector, TcpConnector};
use quill_core::config::ScribeConfig;
use quill_core::error::QuillError;
use std::error::Error;
use std::fmt::{self, Write};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Events from this crate never reach the engine.
const INTERNAL_TARGET: &str = "quill_scribe";

pub struct ScribeLayer<C: Connector> {
    engine: Arc<DeliveryEngine<C>>,
    category: String,
    builder: MessageBuilder,
    max_level: Level,
}

impl ScribeLayer<TcpConnector> {
    /// Validate `config` and build a TCP-backed layer.
    pub fn from_config(config: &ScribeConfig, sink: Arc<dyn ErrorSink>) -> Result<Self, QuillError> {
        config.validate()?;
        let engine = DeliveryEngine::new(TcpConnector::from_config(config), sink);
        Ok(Self::new(
            Arc::new(engine),
            config.category.clone(),
            MessageBuilder::from_config(config),
        ))
    }

    /// Like [`from_config`](Self::from_config), logging drops as warnings.
    pub fn with_tracing_sink(config: &ScribeConfig) -> Result<Self, QuillError> {
        Self::from_config(config, Arc::new(TracingErrorSink))
    }
}

impl<C: Connector> ScribeLayer<C> {
    pub fn new(engine: Arc<DeliveryEngine<C>>, category: impl Into<String>, builder: MessageBuilder) -> Self {
        Self {
            engine,
            category: category.into(),
            builder,
            max_level: Level::TRACE,
        }
    }

    /// Ignore events more verbose than `level`.
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }

    pub fn engine(&self) -> &Arc<DeliveryEngine<C>> {
        &self.engine
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    fn format_event(&self, event: &Event<'_>) -> String {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut body = String::with_capacity(64);
        body.push_str(event.metadata().level().as_str());
        body.push_str(" - ");
        body.push_str(&visitor.message);
        body.push_str(&visitor.fields);
        self.builder.build(&body, &visitor.frames)
    }
}

impl<S, C> Layer<S> for ScribeLayer<C>
where
    S: Subscriber,
    C: Connector + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // Level orders by verbosity: TRACE is the greatest.
        if *meta.level() > self.max_level || meta.target().starts_with(INTERNAL_TARGET) {
            return;
        }
        let line = self.format_event(event);
        self.engine.deliver(&self.category, &line);
    }
}

// ── Field visitor ────────────────────────────────────────────────

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: String,
    frames: Vec<String>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        if self.frames.is_empty() {
            self.frames = error_frames(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
