pub mod config;
pub mod error;
pub mod hostname;
pub mod lifecycle;
pub mod record;
pub mod sink;

pub use config::{AccessLogConfig, QuillConfig, ScribeConfig};
pub use error::QuillError;
pub use lifecycle::{Lifecycle, LifecycleState, start_with};
pub use record::{AccessRecord, Cookie, RecordContext, Session};
pub use sink::LineSink;
