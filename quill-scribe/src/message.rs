//! Wire message assembly: `[host] body` plus an optional error trace.

use quill_core::config::ScribeConfig;
use quill_core::hostname::local_hostname;
use std::error::Error;

#[derive(Debug, Clone)]
pub struct MessageBuilder {
    hostname: String,
    stack_trace_depth: usize,
}

impl MessageBuilder {
    pub fn new(hostname: impl Into<String>, stack_trace_depth: usize) -> Self {
        Self {
            hostname: hostname.into(),
            stack_trace_depth,
        }
    }

    /// Host from the configured override or local discovery.
    pub fn from_config(config: &ScribeConfig) -> Self {
        Self::new(
            local_hostname(config.local_hostname.as_deref()),
            config.stack_trace_depth,
        )
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn stack_trace_depth(&self) -> usize {
        self.stack_trace_depth
    }

    /// `[host] body`, followed by ` {frames}` when an error is attached.
    ///
    /// The first frame is the error itself; at most `stack_trace_depth`
    /// causes follow it. Frames are joined with a tab.
    pub fn build(&self, body: &str, frames: &[String]) -> String {
        let mut out = String::with_capacity(self.hostname.len() + body.len() + 3);
        out.push('[');
        out.push_str(&self.hostname);
        out.push_str("] ");
        out.push_str(body);

        if let Some((first, causes)) = frames.split_first() {
            out.push_str(" {");
            out.push_str(first);
            for cause in causes.iter().take(self.stack_trace_depth) {
                out.push('\t');
                out.push_str(cause);
            }
            out.push('}');
        }
        out
    }

    pub fn build_with_error(&self, body: &str, error: &(dyn Error + 'static)) -> String {
        self.build(body, &error_frames(error))
    }
}

/// The error's message followed by each `source()` in turn.
pub fn error_frames(error: &(dyn Error + 'static)) -> Vec<String> {
    let mut frames = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        frames.push(cause.to_string());
        source = cause.source();
    }
    frames
}
