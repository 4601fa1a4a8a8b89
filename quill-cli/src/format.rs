//! `quill format`: render one access-log line through a started valve.

use anyhow::Context;
use clap::Args;
use http::{HeaderName, HeaderValue};
use quill_access_log::AccessLogValve;
use quill_core::config::QuillConfig;
use quill_core::record::AccessRecord;
use quill_core::sink::LineSink;
use quill_scribe::{DeliveryEngine, EngineLineSink, TcpConnector, TracingErrorSink};
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug, Default)]
pub struct FormatArgs {
    /// Pattern or alias; defaults to the configured access-log pattern
    #[arg(long)]
    pattern: Option<String>,

    #[arg(long)]
    remote_addr: Option<String>,

    #[arg(long)]
    remote_host: Option<String>,

    #[arg(long)]
    method: Option<String>,

    #[arg(long)]
    uri: Option<String>,

    #[arg(long)]
    query: Option<String>,

    #[arg(long)]
    protocol: Option<String>,

    #[arg(long)]
    status: Option<u16>,

    #[arg(long, default_value_t = 0)]
    bytes: i64,

    #[arg(long)]
    user: Option<String>,

    /// Request header as `Name: value`; repeatable
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Response header as `Name: value`; repeatable
    #[arg(long = "response-header")]
    response_headers: Vec<String>,

    /// Cookie as `name=value`; repeatable
    #[arg(long = "cookie")]
    cookies: Vec<String>,

    #[arg(long, default_value_t = 0)]
    elapsed_ms: u64,

    /// Also deliver the line to the configured collector
    #[arg(long)]
    ship: bool,
}

/// Writes lines to stdout.
struct StdoutSink;

impl LineSink for StdoutSink {
    fn log(&self, line: &str) {
        println!("{line}");
    }
}

/// Prints the line, then delivers it.
struct ShippingSink {
    inner: EngineLineSink<TcpConnector>,
}

impl LineSink for ShippingSink {
    fn log(&self, line: &str) {
        StdoutSink.log(line);
        self.inner.log(line);
    }
}

pub fn run(config: &QuillConfig, args: &FormatArgs) -> anyhow::Result<()> {
    let sink: Box<dyn LineSink> = if args.ship {
        let engine = Arc::new(DeliveryEngine::new(
            TcpConnector::from_config(&config.scribe),
            Arc::new(TracingErrorSink),
        ));
        Box::new(ShippingSink {
            inner: EngineLineSink::new(engine, config.scribe.category.clone()),
        })
    } else {
        Box::new(StdoutSink)
    };

    let mut access_log = config.access_log.clone();
    if let Some(ref pattern) = args.pattern {
        access_log.pattern = pattern.clone();
    }
    // Rendering on demand ignores the enable flag and always needs a name.
    access_log.enabled = true;
    access_log.logger_name.get_or_insert_with(|| "quill".to_string());

    let valve = AccessLogValve::from_config(&access_log, sink);
    valve.start()?;
    valve.log_access(&build_record(args)?, Duration::from_millis(args.elapsed_ms));
    valve.stop()?;
    Ok(())
}

fn build_record(args: &FormatArgs) -> anyhow::Result<AccessRecord> {
    let mut record = AccessRecord::new().with_bytes_sent(args.bytes);
    record.remote_addr = args.remote_addr.clone();
    record.remote_host = args.remote_host.clone();
    record.method = args.method.clone();
    record.request_uri = args.uri.clone();
    record.query_string = args.query.clone();
    record.protocol = args.protocol.clone();
    record.status = args.status;
    record.remote_user = args.user.clone();

    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        record.request_headers.append(name, value);
    }
    for raw in &args.response_headers {
        let (name, value) = parse_header(raw)?;
        record.response_headers.append(name, value);
    }
    for raw in &args.cookies {
        let (name, value) = raw
            .split_once('=')
            .with_context(|| format!("cookie {raw:?} is not name=value"))?;
        record = record.with_cookie(name, value);
    }
    Ok(record)
}

fn parse_header(raw: &str) -> anyhow::Result<(HeaderName, HeaderValue)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header {raw:?} is not Name: value"))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .with_context(|| format!("invalid header name in {raw:?}"))?;
    let value = HeaderValue::from_str(value.trim())
        .with_context(|| format!("invalid header value in {raw:?}"))?;
    Ok((name, value))
}
