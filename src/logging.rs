//! Tracing setup for applications embedding the analyzer.
//!
//! The library itself only emits `tracing` events; nothing is printed unless
//! the host installs a subscriber. [`init_tracing`] installs one: an
//! `EnvFilter` (honouring `RUST_LOG`), plain or JSON formatting, and either
//! stderr or a rotating log file written through a line-flushing writer.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "phishlens=info,warn";

// ─── Config ──────────────────────────────────────────────────────────────────

/// How to set up logging.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directives; `None` means `RUST_LOG`, then [`DEFAULT_FILTER`].
    pub filter: Option<String>,
    /// Emit one JSON object per event.
    pub json: bool,
    /// Write to `<log_dir>/<file_name>` instead of stderr.
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
    /// Rotated files kept (`phishlens.log.1` .. `.N`).
    pub keep_rotated: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: None,
            json: false,
            log_dir: None,
            file_name: "phishlens.log".to_string(),
            keep_rotated: 3,
        }
    }
}

impl LogConfig {
    /// Log to a file in [`default_log_dir`].
    pub fn to_default_file() -> Self {
        Self {
            log_dir: Some(default_log_dir()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("failed to install tracing subscriber: {reason}")]
    Init { reason: String },
}

/// Platform data directory for PhishLens logs.
///
/// Falls back to `~/.phishlens/` when no data directory can be resolved.
pub fn default_log_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("phishlens");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".phishlens")
}

// ─── Init ────────────────────────────────────────────────────────────────────

/// Install the global tracing subscriber.
///
/// Returns the log file path when logging to a file. Fails if a subscriber
/// is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<Option<PathBuf>, LoggingError> {
    let filter = build_filter(config.filter.as_deref())?;

    let (writer, log_path) = match &config.log_dir {
        Some(dir) => {
            let path = dir.join(&config.file_name);
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::Io {
                path: dir.clone(),
                source,
            })?;
            rotate_log_file(&path, config.keep_rotated);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| LoggingError::Io {
                    path: path.clone(),
                    source,
                })?;
            (BoxMakeWriter::new(FlushingWriter::new(file)), Some(path))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_path.is_none() && !config.json)
        .with_target(true)
        .with_thread_ids(false);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| LoggingError::Init {
        reason: e.to_string(),
    })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?log_path,
        json = config.json,
        "phishlens logging initialized"
    );
    Ok(log_path)
}

/// Explicit directives, else `RUST_LOG`, else [`DEFAULT_FILTER`].
fn build_filter(directives: Option<&str>) -> Result<EnvFilter, LoggingError> {
    match directives {
        Some(d) => EnvFilter::try_new(d).map_err(|e| LoggingError::InvalidFilter {
            filter: d.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Rotate `x.log` → `x.log.1` → … → `x.log.{keep}`, dropping the oldest.
///
/// Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    if keep == 0 {
        let _ = std::fs::remove_file(base_path);
        return;
    }

    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

// ─── FlushingWriter ──────────────────────────────────────────────────────────

/// File writer that flushes after every write, so each event is on disk
/// as soon as it is logged.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<File>>,
}

impl FlushingWriter {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = f.write(buf)?;
        f.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        f.flush()
    }
}

impl<'a> MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
