//! Tracing/logging initialisation.
//!
//! Installs a `tracing_subscriber` registry whose `EnvFilter` sits behind a
//! reload layer, so the daemon's timed log level can change verbosity while
//! running. Output goes to stderr and, optionally, appended to a log file,
//! either human-readable or as JSON lines.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::{EnvFilter, Layer, Registry, reload};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Crates that are far too chatty at debug level.
const QUIET_TARGETS: &str = "h2=info,hyper=info,hyper_util=info,tower=info";

type Filtered = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

/// A boxed layer stacked on top of the reloadable filter.
pub type BoxedLayer = Box<dyn Layer<Filtered> + Send + Sync>;

/// Where and how to write log output.
#[derive(Debug, Clone, Copy)]
pub struct TracingOptions<'a> {
    /// Starting level. Verbosity is owned by the daemon's `TimedLevel`, so
    /// `RUST_LOG` is not consulted.
    pub default_level: LevelFilter,
    /// Emit JSON lines instead of the human-readable format.
    pub log_json: bool,
    /// Also append log lines to this file.
    pub log_file: Option<&'a Path>,
}

/// Handle to the installed filter, used to change the level at runtime.
#[derive(Clone)]
pub struct LevelHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LevelHandle {
    /// Replace the active filter with one at `level`.
    pub fn apply(&self, level: LevelFilter) -> Result<()> {
        self.handle
            .reload(level_filter(level))
            .map_err(|e| Error::Tracing(e.to_string()))
    }
}

/// The filter installed at startup. It must match what `TimedLevel` applies
/// for the same level.
fn initial_filter(options: &TracingOptions<'_>) -> EnvFilter {
    level_filter(options.default_level)
}

fn level_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::new(format!("{level},{QUIET_TARGETS}"))
}

fn output_layer<W>(json: bool, ansi: bool, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi);
    if json {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

/// Initialise the global tracing subscriber.
pub fn init_tracing(options: TracingOptions<'_>) -> Result<LevelHandle> {
    init_with_layers(options, Vec::new())
}

/// Initialise the global subscriber with additional layers, e.g. an
/// `OpenTelemetry` exporter.
pub fn init_with_layers(
    options: TracingOptions<'_>,
    mut layers: Vec<BoxedLayer>,
) -> Result<LevelHandle> {
    let (filter, handle) = reload::Layer::new(initial_filter(&options));

    layers.push(output_layer(options.log_json, true, std::io::stderr));
    if let Some(path) = options.log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        layers.push(output_layer(options.log_json, false, Mutex::new(file)));
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .map_err(|e| Error::Tracing(e.to_string()))?;

    Ok(LevelHandle { handle })
}

/// Initialise tracing and, when `endpoint` is given, export spans and metrics
/// over OTLP. Hold the returned guard for the lifetime of the process.
#[cfg(feature = "metrics")]
pub fn init_tracing_with_metrics(
    options: TracingOptions<'_>,
    endpoint: Option<&str>,
    service_name: &'static str,
) -> Result<(LevelHandle, Option<crate::metrics::MetricsGuard>)> {
    let Some(endpoint) = endpoint else {
        return init_tracing(options).map(|handle| (handle, None));
    };
    let guard = crate::metrics::init_metrics(endpoint, service_name)
        .map_err(|e| Error::Tracing(e.to_string()))?;
    let otel: BoxedLayer = tracing_opentelemetry::layer()
        .with_tracer(guard.tracer(service_name))
        .boxed();
    let handle = init_with_layers(options, vec![otel])?;
    Ok((handle, Some(guard)))
}
