pub mod evaluator;
pub mod pattern;
pub mod time_cache;
pub mod valve;

pub use evaluator::LineEvaluator;
pub use pattern::{CompiledPattern, LogElement, TimeUnit};
pub use time_cache::TimeCache;
pub use valve::{AccessLogValve, TracingLineSink};
