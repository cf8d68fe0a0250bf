//! Unified logging module for gateway services
//!
//! Console output plus a size-rotated log file, with the filter level
//! adjustable at runtime.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Writer},
        FmtContext, FormatEvent, FormatFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Console and text-file event layout: `2026-03-02T10:15:04.120311Z [INFO] message`
struct TaggedFormat;

impl TaggedFormat {
    fn tag(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::TRACE => ("[TRACE]", "\x1b[35m"),
            Level::DEBUG => ("[DEBUG]", "\x1b[34m"),
            Level::INFO => ("[INFO]", "\x1b[32m"),
            Level::WARN => ("[WARN]", "\x1b[33m"),
            Level::ERROR => ("[ERROR]", "\x1b[31m"),
        }
    }
}

impl<S, N> FormatEvent<S, N> for TaggedFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let (tag, color) = Self::tag(*event.metadata().level());
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ");
        if writer.has_ansi_escapes() {
            write!(writer, "{} {}{}\x1b[0m ", stamp, color, tag)?;
        } else {
            write!(writer, "{} {} ", stamp, tag)?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// Non-blocking writer guards live for the whole process
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();
static CURRENT_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const MIN_FILE_SIZE: u64 = 1024;

// ============================================================================
// Size-rotated file writer
// ============================================================================

struct OpenLog {
    date: String,
    /// 0 for the first file of the day
    part: u32,
    file: File,
    size: u64,
}

/// Writes `{YYYYMMDD}_{service}.log`, continuing in `{YYYYMMDD}_{service}.N.log`
/// whenever a file would grow past `max_file_size`. A new day starts over
/// at part 0.
struct RollingWriter {
    service_name: String,
    log_dir: PathBuf,
    max_file_size: u64,
    current: Mutex<OpenLog>,
}

fn today() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> std::io::Error {
    std::io::Error::other(format!("log writer lock poisoned: {}", e))
}

impl RollingWriter {
    fn new(service_name: String, log_dir: PathBuf, max_file_size: u64) -> std::io::Result<Self> {
        let current = open_log(&log_dir, &service_name, today(), 0)?;
        Ok(Self {
            service_name,
            log_dir,
            max_file_size: max_file_size.max(MIN_FILE_SIZE),
            current: Mutex::new(current),
        })
    }
}

fn log_path(log_dir: &Path, service_name: &str, date: &str, part: u32) -> PathBuf {
    let name = match part {
        0 => format!("{}_{}.log", date, service_name),
        n => format!("{}_{}.{}.log", date, service_name, n),
    };
    log_dir.join(name)
}

fn open_log(log_dir: &Path, service_name: &str, date: String, part: u32) -> std::io::Result<OpenLog> {
    fs::create_dir_all(log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path(log_dir, service_name, &date, part))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok(OpenLog {
        date,
        part,
        file,
        size,
    })
}

impl Write for RollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut current = self.current.lock().map_err(poisoned)?;

        let date = today();
        if current.date != date {
            *current = open_log(&self.log_dir, &self.service_name, date, 0)?;
        } else if current.size > 0 && current.size + buf.len() as u64 > self.max_file_size {
            let next = current.part + 1;
            *current = open_log(&self.log_dir, &self.service_name, date, next)?;
        }

        let written = current.file.write(buf)?;
        current.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.current.lock().map_err(poisoned)?.file.flush()
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// File log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// `timestamp [LEVEL] message`
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("Unknown log format: {}", other)),
        }
    }
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "gatewaysrv")
    pub service_name: String,
    /// Base directory for logs
    pub log_dir: PathBuf,
    /// Filter level or directive string (e.g., "info", "info,gatewaysrv=debug")
    pub level: String,
    /// File log format
    pub format: LogFormat,
    /// Maximum bytes per log file before rotation
    pub max_file_size: u64,
    /// Write a log file in addition to the console
    pub enable_file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "gatewaysrv".to_string(),
            log_dir: PathBuf::from("logs"),
            level: "info".to_string(),
            format: LogFormat::Text,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            enable_file: true,
        }
    }
}

/// Build the initial filter string; `RUST_LOG` wins over the configured level
fn initial_filter(config: &LogConfig) -> String {
    match std::env::var("RUST_LOG") {
        Ok(env_str) if !env_str.trim().is_empty() => env_str,
        _ => config.level.clone(),
    }
}

fn file_layer<S>(config: &LogConfig) -> std::io::Result<Box<dyn Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let writer = RollingWriter::new(
        config.service_name.clone(),
        config.log_dir.clone(),
        config.max_file_size,
    )?;
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);
    GUARDS
        .get_or_init(|| Mutex::new(Vec::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push(guard);

    Ok(match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .event_format(TaggedFormat)
            .boxed(),
    })
}

/// Install the global subscriber: console always, file when enabled
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = initial_filter(&config);
    let env_filter = EnvFilter::try_new(&filter)
        .map_err(|e| format!("Invalid log level '{}': {}", filter, e))?;

    let (reload_filter, handle) = reload::Layer::new(env_filter);
    let _ = FILTER_HANDLE.set(handle);
    let _ = CURRENT_LEVEL.set(Mutex::new(filter));

    let console = fmt::layer().with_ansi(true).event_format(TaggedFormat);
    let file = if config.enable_file {
        Some(file_layer(&config)?)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(console)
        .with(file)
        .try_init()?;

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
    Ok(())
}

/// Swap the filter at runtime; accepts "debug" or "info,gatewaysrv=debug"
pub fn set_log_level(level: &str) -> Result<(), String> {
    let handle = FILTER_HANDLE
        .get()
        .ok_or("Logging not initialized with reload support")?;
    let filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;
    handle
        .reload(filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    if let Some(Ok(mut current)) = CURRENT_LEVEL.get().map(|m| m.lock()) {
        *current = level.to_string();
    }
    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

pub fn get_log_level() -> String {
    CURRENT_LEVEL
        .get()
        .and_then(|m| m.lock().ok())
        .map(|level| level.clone())
        .unwrap_or_else(|| "unknown".to_string())
}
