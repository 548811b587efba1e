//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use agentflow_observe::tracing_setup::{TracingOptions, init_tracing};
//!
//! // `-vv` on the command line, human-readable output
//! init_tracing(&TracingOptions::from_verbosity(2)).unwrap();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Name of the OTel tracer spans are exported under.
pub const TRACER_NAME: &str = "agentflow";

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// How the global subscriber is set up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TracingOptions {
    /// Count of `-v` flags: 0 warn, 1 info, 2 debug, 3+ trace.
    pub verbosity: u8,
    /// Emit one JSON object per event instead of human-readable lines.
    pub json: bool,
    /// Bridge spans to OpenTelemetry with a stdout exporter.
    pub otel: bool,
}

impl TracingOptions {
    pub fn from_verbosity(verbosity: u8) -> Self {
        Self {
            verbosity,
            ..Self::default()
        }
    }

    /// Filter used when `RUST_LOG` is unset. Only AgentFlow crates get the
    /// raised level; dependencies stay at warn.
    pub fn default_directive(&self) -> String {
        let level = match self.verbosity {
            0 => return "warn".to_string(),
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        ["agentflow", "agentflow_core", "agentflow_infra", "agentflow_api"]
            .iter()
            .fold("warn".to_string(), |acc, target| format!("{acc},{target}={level}"))
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the verbosity-derived filter when set.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set or the
/// filter directive is invalid.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(options.default_directive())?,
    };

    let otel_layer = if options.otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer(TRACER_NAME);

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(otel_layer);

    if options.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// No-op when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}
