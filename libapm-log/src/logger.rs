// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::writers::{FileWriter, StdTarget, StdWriter};
use anyhow::anyhow;
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::reload::Handle;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

const LOG_METHOD_DISABLED: &str = "disabled";
const LOG_METHOD_STDOUT: &str = "stdout";
const LOG_METHOD_STDERR: &str = "stderr";
const LOG_METHOD_FILE_PREFIX: &str = "file://";

/// Log level for filtering log events.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogEventLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl std::str::FromStr for LogEventLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" | "verbosedebug" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(anyhow!("unknown log level: {other}")),
        }
    }
}

impl From<LogEventLevel> for LevelFilter {
    fn from(level: LogEventLevel) -> Self {
        match level {
            LogEventLevel::Trace => LevelFilter::TRACE,
            LogEventLevel::Debug => LevelFilter::DEBUG,
            LogEventLevel::Info => LevelFilter::INFO,
            LogEventLevel::Warn => LevelFilter::WARN,
            LogEventLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Where log lines go.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Default)]
pub enum LogMethod {
    Stdout,
    Stderr,
    /// JSON lines appended to the given path.
    File(PathBuf),
    #[default]
    Disabled,
}

impl std::fmt::Display for LogMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogMethod::Disabled => write!(f, "{LOG_METHOD_DISABLED}"),
            LogMethod::Stdout => write!(f, "{LOG_METHOD_STDOUT}"),
            LogMethod::Stderr => write!(f, "{LOG_METHOD_STDERR}"),
            LogMethod::File(path) => {
                write!(f, "{LOG_METHOD_FILE_PREFIX}{}", path.to_string_lossy())
            }
        }
    }
}

impl LogMethod {
    /// Parses `disabled`, `stdout`, `stderr` or `file:///path/to/file`. Anything else is
    /// `Disabled`.
    pub fn parse(method: &str) -> Self {
        match method {
            LOG_METHOD_STDOUT => LogMethod::Stdout,
            LOG_METHOD_STDERR => LogMethod::Stderr,
            // not a real uri, just a plain (unencoded) path prefixed with file://
            m if m.starts_with(LOG_METHOD_FILE_PREFIX) => {
                LogMethod::File(PathBuf::from(&m[LOG_METHOD_FILE_PREFIX.len()..]))
            }
            _ => LogMethod::Disabled,
        }
    }
}

type BaseSubscriber = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type BoxedLayer = Box<dyn Layer<BaseSubscriber> + Send + Sync + 'static>;

/// Logger with layer-based architecture.
struct Logger {
    /// Handle for swapping the output layers at runtime.
    layer_handle: Handle<Vec<BoxedLayer>, BaseSubscriber>,
    /// Handle for modifying the log filter at runtime.
    filter_handle: Handle<EnvFilter, Registry>,
    /// Only set for a thread-local subscriber.
    #[allow(dead_code)]
    _guard: Option<DefaultGuard>,
}

impl Logger {
    #[cfg(test)]
    fn setup() -> anyhow::Result<Self> {
        Self::setup_with_global(false)
    }

    fn setup_global() -> anyhow::Result<Self> {
        Self::setup_with_global(true)
    }

    fn setup_with_global(global: bool) -> anyhow::Result<Self> {
        let (filter_layer, filter_handle) = reload::Layer::new(env_filter());
        let (layers_layer, layer_handle) = reload::Layer::new(Vec::<BoxedLayer>::new());

        let subscriber = tracing_subscriber::registry()
            .with(filter_layer)
            .with(layers_layer);

        let _guard = if global {
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| anyhow!("Failed to set global default subscriber: {e}"))?;
            None
        } else {
            Some(tracing::subscriber::set_default(subscriber))
        };

        Ok(Self {
            layer_handle,
            filter_handle,
            _guard,
        })
    }

    fn configure(&self, method: &LogMethod) -> anyhow::Result<()> {
        let layer = match method {
            LogMethod::Disabled => None,
            LogMethod::Stdout => Some(std_layer(StdTarget::Out)),
            LogMethod::Stderr => Some(std_layer(StdTarget::Err)),
            LogMethod::File(path) => Some(file_layer(path)?),
        };

        self.layer_handle
            .modify(|layers| {
                // Outputs are replaced wholesale so that repeated configuration does not stack
                // duplicate layers.
                layers.clear();
                layers.extend(layer);
            })
            .map_err(|e| anyhow!("Failed to update logger configuration: {e}"))
    }

    fn set_log_level(&self, log_level: LogEventLevel) -> anyhow::Result<()> {
        let level_filter = LevelFilter::from(log_level);
        let new_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level_filter.to_string().to_lowercase()));

        self.filter_handle
            .modify(|filter| *filter = new_filter)
            .map_err(|e| anyhow!("Failed to update log level: {e}"))
    }
}

/// Create environment filter with default to INFO level.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string().to_lowercase()))
}

fn std_layer(target: StdTarget) -> BoxedLayer {
    fmt::layer()
        .with_writer(StdWriter::new(target))
        .with_thread_ids(true)
        .with_target(true)
        .with_ansi(false)
        .compact()
        .boxed()
}

fn file_layer(path: &std::path::Path) -> anyhow::Result<BoxedLayer> {
    let writer = FileWriter::new(path)
        .map_err(|e| anyhow!("Failed to create file writer for {}: {e}", path.display()))?;

    Ok(fmt::layer()
        .with_writer(writer)
        .with_thread_ids(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .json()
        .boxed())
}

static LOGGER: LazyLock<Mutex<Option<Logger>>> = LazyLock::new(|| Mutex::new(None));

/// Points the global logger at `method`, installing the global subscriber on first use.
pub fn configure(method: &LogMethod) -> anyhow::Result<()> {
    let mut logger_guard = LOGGER
        .lock()
        .map_err(|e| anyhow!("Failed to acquire logger lock: {e}"))?;

    if let Some(logger) = logger_guard.as_ref() {
        logger.configure(method)
    } else {
        let logger = Logger::setup_global()?;
        logger.configure(method)?;
        *logger_guard = Some(logger);
        Ok(())
    }
}

/// Sets the minimum log level for the global logger. `RUST_LOG`, when set, takes precedence.
pub fn set_log_level(log_level: LogEventLevel) -> anyhow::Result<()> {
    let logger_guard = LOGGER
        .lock()
        .map_err(|e| anyhow!("Failed to acquire logger lock: {e}"))?;

    match logger_guard.as_ref() {
        Some(logger) => logger.set_log_level(log_level),
        None => Err(anyhow!("Logger not initialized")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tracing::field::{Field, Visit};
    use tracing::{debug, info, Event, Subscriber};
    use tracing_subscriber::layer::Context;

    #[derive(Default)]
    struct MessageVisitor {
        message: Option<String>,
    }

    impl Visit for MessageVisitor {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "message" {
                self.message = Some(value.to_string());
            }
        }

        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.message = Some(format!("{value:?}"));
            }
        }
    }

    struct RecordingLayer {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl<S: Subscriber> Layer<S> for RecordingLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            self.events
                .lock()
                .unwrap()
                .push(visitor.message.unwrap_or_default());
        }
    }

    fn recording_logger(method: &LogMethod) -> (Logger, Arc<Mutex<Vec<String>>>) {
        let events: Arc<Mutex<Vec<String>>> = Default::default();
        let logger = Logger::setup().unwrap();
        logger.configure(method).unwrap();
        let recorder = Arc::clone(&events);
        logger
            .layer_handle
            .modify(|layers| layers.push(Box::new(RecordingLayer { events: recorder })))
            .unwrap();
        (logger, events)
    }

    #[test]
    fn test_log_method_parse_and_display() {
        assert_eq!(LogMethod::parse("stdout"), LogMethod::Stdout);
        assert_eq!(LogMethod::parse("stderr"), LogMethod::Stderr);
        assert_eq!(LogMethod::parse("bogus"), LogMethod::Disabled);
        let file = LogMethod::parse("file:///var/log/agent.log");
        assert_eq!(file, LogMethod::File(PathBuf::from("/var/log/agent.log")));
        assert_eq!(file.to_string(), "file:///var/log/agent.log");
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("DEBUG".parse::<LogEventLevel>().unwrap(), LogEventLevel::Debug);
        assert_eq!("warning".parse::<LogEventLevel>().unwrap(), LogEventLevel::Warn);
        assert!("loud".parse::<LogEventLevel>().is_err());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_logger_level_filtering() {
        let (logger, events) = recording_logger(&LogMethod::Disabled);
        logger.set_log_level(LogEventLevel::Info).unwrap();

        debug!("filtered out");
        info!("kept");

        assert_eq!(*events.lock().unwrap(), vec!["kept".to_string()]);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_logger_with_file() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("agent.log");
        let (logger, events) = recording_logger(&LogMethod::File(log_path.clone()));
        logger.set_log_level(LogEventLevel::Info).unwrap();

        info!("File output test message");

        assert_eq!(events.lock().unwrap().len(), 1);
        assert!(log_path.exists(), "Log file should be created at {log_path:?}");
    }
}
