pub mod config;
pub mod layers;

pub use layers::console::ConsoleOutput;

use crate::logging::config::LoggingConfig;
use crate::logging::layers::{console, file, opentelemetry, BoxLayer};
use crate::Result;
use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::Registry;

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

type Filtered = Layered<EnvFilter, Registry>;

/// Guards that keep logging sinks active for the duration of the command.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
    _otel_guard: Option<opentelemetry::OpenTelemetryGuard>,
    console_output: ConsoleOutput,
    log_file_path: PathBuf,
}

impl LoggingGuard {
    pub fn console_output(&self) -> ConsoleOutput {
        self.console_output
    }

    pub fn log_file_path(&self) -> &Path {
        &self.log_file_path
    }
}

/// Initialize tracing for one CLI invocation.
///
/// `machine_output` is set for `--format json`; the console sink then stays
/// silent unless `logging.console_output` names one explicitly, so stdout
/// carries only the JSON document.
pub fn init(workspace_root: Option<&Path>, machine_output: bool) -> Result<LoggingGuard> {
    if LOGGER_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(anyhow!("logging already initialized"));
    }

    let config = LoggingConfig::load(workspace_root)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_level))
        .context("failed to configure tracing level")?;
    let log_file_path = file::log_file_path(&config, workspace_root)?;

    let mut sinks: Vec<BoxLayer<Filtered>> = Vec::new();

    let (file_layer, file_guard) = file::file_layer::<Filtered>(&log_file_path, config.enable_file)?;
    sinks.push(Box::new(file_layer));

    let console_output = console::select_console_output(machine_output, config.console_output);
    sinks.push(Box::new(console::console_layer::<Filtered>(console_output)));

    let mut otel_guard = None;
    let mut otel_error = None;
    if config.opentelemetry.enabled {
        match opentelemetry::otlp_layer::<Filtered>(&config.opentelemetry) {
            Ok((layer, guard)) => {
                sinks.push(layer);
                otel_guard = Some(guard);
            }
            Err(err) => otel_error = Some(format!("{:#}", err)),
        }
    }

    tracing_subscriber::registry().with(env_filter).with(sinks).init();

    if let Some(err) = otel_error {
        tracing::warn!("OpenTelemetry disabled: {}", err);
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
        _otel_guard: otel_guard,
        console_output,
        log_file_path,
    })
}
