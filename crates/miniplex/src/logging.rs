//! Structured logging setup: a colored console sink and a size/count-bounded
//! rotating file sink, each independently filtered and each individually
//! disable-able via the `off` level. Mirrors the original program's
//! console + rotating-file `spdlog` setup (see `SPEC_FULL.md` §6.5), with
//! `tracing-appender`'s non-blocking writer standing in for the original's
//! background logging thread.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Holds resources that must outlive the subscriber (the non-blocking
/// writer's worker thread). Drop this only at process exit.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

fn parse_level(level: &str) -> Option<LevelFilter> {
    match level {
        "off" => None,
        "trace" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warn" => Some(LevelFilter::WARN),
        "error" => Some(LevelFilter::ERROR),
        other => {
            // Config validation already rejects unknown levels before this
            // runs; fall back to `info` rather than panicking in a logging
            // setup routine.
            eprintln!("unrecognized log level {other:?}, defaulting to info");
            Some(LevelFilter::INFO)
        }
    }
}

/// Installs the global `tracing` subscriber. Returns a guard that must be
/// held for the lifetime of the process: dropping it flushes and joins the
/// rotating-file writer's worker thread.
pub fn init(console_level: &str, file_level: &str, log_file: &Path, log_size_kb: u64, log_num: usize) -> io::Result<LogGuard> {
    let mut layers: Vec<Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>> = Vec::new();

    if let Some(level) = parse_level(console_level) {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(io::stdout)
            .with_filter(level);
        layers.push(Box::new(layer));
    }

    let file_guard = if let Some(level) = parse_level(file_level) {
        let writer = RotatingWriter::open(log_file, log_size_kb.saturating_mul(1024), log_num)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(writer);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(non_blocking)
            .with_filter(level);
        layers.push(Box::new(layer));
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry().with(layers).init();
    Ok(LogGuard { _file_guard: file_guard })
}

/// A `spdlog`-style rotating file sink: writes append to `path` until the
/// next write would push it over `max_bytes`, at which point the current
/// file is renumbered `path.1`, `path.2`, ... up to `max_files` and a fresh
/// file is opened at `path`. The oldest backup beyond `max_files` is deleted.
struct RotatingWriter {
    inner: Mutex<RotatingState>,
}

struct RotatingState {
    path: PathBuf,
    file: File,
    size: u64,
    max_bytes: u64,
    max_files: usize,
}

impl RotatingWriter {
    fn open(path: &Path, max_bytes: u64, max_files: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(RotatingWriter {
            inner: Mutex::new(RotatingState { path: path.to_path_buf(), file, size, max_bytes, max_files }),
        })
    }
}

impl RotatingState {
    fn rotate(&mut self) -> io::Result<()> {
        if self.max_files > 0 {
            let oldest = self.path.with_extension(format!("{}", self.max_files));
            let _ = fs::remove_file(&oldest);
            for n in (1..self.max_files).rev() {
                let from = self.path.with_extension(format!("{n}"));
                let to = self.path.with_extension(format!("{}", n + 1));
                let _ = fs::rename(&from, &to);
            }
            let _ = fs::rename(&self.path, self.path.with_extension("1"));
        }
        self.file = OpenOptions::new().create(true).truncate(true).write(true).open(&self.path)?;
        self.size = 0;
        Ok(())
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if state.max_bytes > 0 && state.size + buf.len() as u64 > state.max_bytes {
            state.rotate()?;
        }
        let written = state.file.write(buf)?;
        state.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).file.flush()
    }
}
