use crate::pattern::{CompiledPattern, LogElement, TimeUnit};
use crate::time_cache::TimeCache;
use chrono::{Local, TimeZone, Utc};
use quill_core::record::RecordContext;
use std::time::Duration;

/// Placeholder for any absent field.
const DASH: char = '-';

/// Executes compiled patterns against request records.
///
/// Stateless apart from the shared `TimeCache`, so one evaluator serves all
/// worker threads.
pub struct LineEvaluator<Tz: TimeZone = Local> {
    time_cache: TimeCache<Tz>,
}

impl LineEvaluator<Local> {
    pub fn new() -> Self {
        Self::with_time_cache(TimeCache::local())
    }
}

impl Default for LineEvaluator<Local> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tz: TimeZone> LineEvaluator<Tz> {
    pub fn with_time_cache(time_cache: TimeCache<Tz>) -> Self {
        Self { time_cache }
    }

    pub fn time_cache(&self) -> &TimeCache<Tz> {
        &self.time_cache
    }

    /// Render one line at the current wall-clock instant.
    pub fn render(
        &self,
        pattern: &CompiledPattern,
        ctx: &dyn RecordContext,
        elapsed: Duration,
    ) -> String {
        self.render_at(pattern, ctx, elapsed, Utc::now().timestamp_millis())
    }

    /// Render one line as if the current instant were `now_millis`.
    pub fn render_at(
        &self,
        pattern: &CompiledPattern,
        ctx: &dyn RecordContext,
        elapsed: Duration,
        now_millis: i64,
    ) -> String {
        let elapsed_millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let mut out = String::with_capacity(128);
        for element in pattern.elements() {
            self.append(&mut out, element, ctx, elapsed_millis, now_millis);
        }
        out
    }

    fn append(
        &self,
        out: &mut String,
        element: &LogElement,
        ctx: &dyn RecordContext,
        elapsed_millis: u64,
        now_millis: i64,
    ) {
        let mut num = itoa::Buffer::new();
        match element {
            LogElement::Literal(text) => out.push_str(text),
            LogElement::RemoteAddr => push_or_dash(out, ctx.remote_addr()),
            LogElement::LocalAddr => push_or_dash(out, ctx.local_addr()),
            LogElement::LocalPort => match ctx.local_port() {
                Some(port) => out.push_str(num.format(port)),
                None => out.push(DASH),
            },
            LogElement::Protocol => push_or_dash(out, ctx.protocol()),
            LogElement::Method => push_or_dash(out, ctx.method()),
            LogElement::QueryString => {
                if let Some(query) = ctx.query_string() {
                    out.push('?');
                    out.push_str(query);
                }
            }
            LogElement::RequestLine => {
                push_or_dash(out, ctx.method());
                out.push(' ');
                push_or_dash(out, ctx.request_uri());
                if let Some(query) = ctx.query_string() {
                    out.push('?');
                    out.push_str(query);
                }
                out.push(' ');
                push_or_dash(out, ctx.protocol());
            }
            LogElement::RequestUri => push_or_dash(out, ctx.request_uri()),
            LogElement::HostName => push_or_dash(out, ctx.remote_host().or(ctx.remote_addr())),
            LogElement::ServerName => push_or_dash(out, ctx.server_name()),
            LogElement::Status => match ctx.status() {
                Some(status) => out.push_str(num.format(status)),
                None => out.push(DASH),
            },
            LogElement::SessionId => push_or_dash(out, ctx.session_id()),
            LogElement::User => push_or_dash(out, ctx.remote_user()),
            LogElement::ElapsedTime(TimeUnit::Millis) => out.push_str(num.format(elapsed_millis)),
            LogElement::ElapsedTime(TimeUnit::Seconds) => push_seconds(out, elapsed_millis),
            LogElement::ByteCount { zero_as_dash } => {
                let bytes = ctx.bytes_sent();
                if bytes <= 0 && *zero_as_dash {
                    out.push(DASH);
                } else {
                    out.push_str(num.format(bytes));
                }
            }
            LogElement::DateTime => {
                out.push_str(self.time_cache.current_timestamp(now_millis).text());
            }
            LogElement::ThreadName => match ctx.thread_name() {
                Some(name) => out.push_str(name),
                None => push_or_dash(out, std::thread::current().name()),
            },
            LogElement::Header(name) => push_or_dash(out, ctx.header(name).as_deref()),
            LogElement::Cookie(name) => push_or_dash(
                out,
                ctx.cookies()
                    .iter()
                    .find(|c| c.name == *name)
                    .map(|c| c.value.as_str()),
            ),
            LogElement::RequestAttribute(name) => push_or_dash(out, ctx.request_attribute(name)),
            LogElement::SessionAttribute(name) => push_or_dash(out, ctx.session_attribute(name)),
            LogElement::ResponseHeader(name) => {
                let values = ctx.response_header_values(name);
                if values.is_empty() {
                    out.push(DASH);
                } else {
                    for (i, value) in values.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        out.push_str(value);
                    }
                }
            }
            LogElement::UnknownDirective(Some(ch)) => {
                out.push_str("???");
                out.push(*ch);
                out.push_str("???");
            }
            LogElement::UnknownDirective(None) => out.push_str("???"),
        }
    }
}

#[inline]
fn push_or_dash(out: &mut String, value: Option<&str>) {
    match value {
        Some(v) => out.push_str(v),
        None => out.push(DASH),
    }
}

/// `seconds.hundredths`, truncating the sub-hundredth digit.
fn push_seconds(out: &mut String, millis: u64) {
    let mut num = itoa::Buffer::new();
    out.push_str(num.format(millis / 1000));
    out.push('.');
    let remains = millis % 1000;
    out.push(digit(remains / 100));
    out.push(digit(remains % 100 / 10));
}

#[inline]
fn digit(d: u64) -> char {
    char::from_digit(d as u32, 10).unwrap_or('0')
}
