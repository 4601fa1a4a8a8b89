// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Quill: access-log formatting and Scribe log shipping
//
//  send:    one tracing event through the Scribe layer
//  bench:   concurrent delivery load against a collector
//  collect: a minimal collector printing what it receives
//  format:  render one access-log line
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod collect;
mod format;

use anyhow::Context;
use clap::{Parser, Subcommand};
use quill_core::config::QuillConfig;
use quill_scribe::{
    DeliveryEngine, ErrorSink, FanoutErrorSink, MessageBuilder, ScribeLayer, StatsErrorSink,
    TcpConnector, TracingErrorSink,
};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Level, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "quill", version, about = "Access-log formatting and Scribe log shipping")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "quill.yaml")]
    config: PathBuf,

    /// Log level for quill's own diagnostics
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Collector host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Collector port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Category (overrides config)
    #[arg(long)]
    category: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ship one log event to the collector
    Send {
        /// trace, debug, info, warn or error
        level: Level,
        message: String,
        /// Error chain attached to the event, outermost first
        #[arg(long = "error")]
        errors: Vec<String>,
    },
    /// Deliver messages from several threads and report outcome counts
    Bench {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Messages per thread
        #[arg(long, default_value_t = 1000)]
        messages: usize,
    },
    /// Run a collector that prints every entry it receives
    Collect {
        #[arg(long, default_value = "127.0.0.1:1463")]
        listen: String,
        /// Answer every call with TRY_LATER
        #[arg(long)]
        try_later: bool,
    },
    /// Render one access-log line from request flags
    Format(format::FormatArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Send {
            level,
            ref message,
            ref errors,
        } => send(&cli, &config, level, message, errors),
        Command::Bench { threads, messages } => {
            init_tracing(&cli.log_level);
            bench(&config, threads, messages)
        }
        Command::Collect {
            ref listen,
            try_later,
        } => {
            init_tracing(&cli.log_level);
            collect::run(listen, try_later)
        }
        Command::Format(ref args) => {
            init_tracing(&cli.log_level);
            format::run(&config, args)
        }
    }
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(log_level))
        .with_target(false)
        .init();
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

// ── Config ──

fn load_config(cli: &Cli) -> anyhow::Result<QuillConfig> {
    let mut config = if cli.config.exists() {
        QuillConfig::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        QuillConfig::default()
    };
    if let Some(ref host) = cli.host {
        config.scribe.remote_host = host.clone();
    }
    if let Some(port) = cli.port {
        config.scribe.remote_port = port;
    }
    if let Some(ref category) = cli.category {
        config.scribe.category = category.clone();
    }
    config.validate()?;
    Ok(config)
}

// ── send ──

/// An error message with an optional cause, built from `--error` flags.
#[derive(Debug)]
struct ChainError {
    message: String,
    source: Option<Box<ChainError>>,
}

impl ChainError {
    fn from_messages(messages: &[String]) -> Option<Self> {
        messages.iter().rev().fold(None, |source, message| {
            Some(ChainError {
                message: message.clone(),
                source: source.map(Box::new),
            })
        })
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for ChainError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

fn send(
    cli: &Cli,
    config: &QuillConfig,
    level: Level,
    message: &str,
    errors: &[String],
) -> anyhow::Result<()> {
    let stats = Arc::new(StatsErrorSink::new());
    let sink: Arc<dyn ErrorSink> = Arc::new(FanoutErrorSink::new(vec![
        stats.clone() as Arc<dyn ErrorSink>,
        Arc::new(TracingErrorSink),
    ]));
    let scribe = ScribeLayer::from_config(&config.scribe, sink)?;
    let engine = Arc::clone(scribe.engine());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(env_filter(&cli.log_level)),
        )
        .with(scribe)
        .init();

    let chain = ChainError::from_messages(errors);
    let error = chain.as_ref().map(|e| e as &(dyn Error + 'static));
    emit(level, message, error);
    engine.close();

    println!("{}", serde_json::to_string(&stats.snapshot())?);
    Ok(())
}

fn emit(level: Level, message: &str, error: Option<&(dyn Error + 'static)>) {
    macro_rules! at_level {
        ($lvl:expr) => {
            match error {
                Some(e) => tracing::event!(target: "quill", $lvl, error = e, "{message}"),
                None => tracing::event!(target: "quill", $lvl, "{message}"),
            }
        };
    }
    match level {
        Level::TRACE => at_level!(Level::TRACE),
        Level::DEBUG => at_level!(Level::DEBUG),
        Level::INFO => at_level!(Level::INFO),
        Level::WARN => at_level!(Level::WARN),
        _ => at_level!(Level::ERROR),
    }
}

// ── bench ──

fn bench(config: &QuillConfig, threads: usize, messages: usize) -> anyhow::Result<()> {
    let stats = Arc::new(StatsErrorSink::new());
    let engine = Arc::new(DeliveryEngine::new(
        TcpConnector::from_config(&config.scribe),
        stats.clone(),
    ));
    let builder = MessageBuilder::from_config(&config.scribe);
    info!(
        endpoint = %format!("{}:{}", config.scribe.remote_host, config.scribe.remote_port),
        threads,
        messages,
        "Benchmark starting"
    );

    let started = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let engine = Arc::clone(&engine);
            let builder = builder.clone();
            let category = config.scribe.category.clone();
            std::thread::Builder::new()
                .name(format!("quill-bench-{t}"))
                .spawn(move || {
                    for i in 0..messages {
                        let line = builder.build(&format!("INFO - bench message {t}-{i}"), &[]);
                        engine.deliver(&category, &line);
                    }
                })
        })
        .collect::<Result<_, _>>()
        .context("spawning bench threads")?;
    for handle in handles {
        if handle.join().is_err() {
            anyhow::bail!("bench thread panicked");
        }
    }
    let elapsed = started.elapsed();
    engine.close();

    let total = (threads * messages) as f64;
    let secs = elapsed.as_secs_f64();
    let report = serde_json::json!({
        "threads": threads,
        "messages_per_thread": messages,
        "elapsed_ms": elapsed.as_millis() as u64,
        "per_second": if secs > 0.0 { total / secs } else { 0.0 },
        "outcomes": stats.snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
