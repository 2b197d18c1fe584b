//! Structured logging initialization.
//!
//! Mirrors the teacher's V4 tracing infrastructure: a selectable output
//! format, an `EnvFilter` driven by `RUST_LOG` with a crate-local default
//! directive, and a single `init` entry point called once at process start.
//!
//! ```no_run
//! use daqcore::telemetry::{self, TracingConfig, OutputFormat};
//!
//! telemetry::init(&TracingConfig {
//!     level: tracing::Level::INFO,
//!     format: OutputFormat::Pretty,
//!     with_span_events: false,
//! }).expect("telemetry already initialized");
//!
//! tracing::info!("engine starting");
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format for tracing events.
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Pretty-printed, colored output for interactive development.
    Pretty,
    /// Compact, uncolored output for production logs.
    Compact,
    /// Newline-delimited JSON for log aggregation.
    Json,
}

/// Tracing configuration options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: OutputFormat,
    /// Whether to emit ENTER/EXIT/CLOSE span events, useful when debugging
    /// the per-thread supervised-wrapper lifecycle (see [`crate::sync`]).
    pub with_span_events: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
        }
    }
}

/// Install the global tracing subscriber. Returns an error if a subscriber is
/// already installed (calling this more than once per process is a bug, not
/// a recoverable condition, so the caller gets back the underlying error
/// rather than a panic).
pub fn init(config: &TracingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let span_events = if config.with_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_span_events(span_events)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
}
