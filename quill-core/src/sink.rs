use std::sync::Arc;

/// Receives rendered log lines.
///
/// Implementations must not block indefinitely and must not panic: a sink
/// that cannot forward a line drops it.
pub trait LineSink: Send + Sync {
    fn log(&self, line: &str);
}

impl<T: LineSink + ?Sized> LineSink for Arc<T> {
    fn log(&self, line: &str) {
        (**self).log(line)
    }
}

impl<T: LineSink + ?Sized> LineSink for Box<T> {
    fn log(&self, line: &str) {
        (**self).log(line)
    }
}
