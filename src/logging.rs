//! Tracing setup.
//!
//! The TUI owns the terminal, so log lines must not go to stdout. They are
//! written to a log file when one is configured, to stderr when `RUST_LOG` is
//! set explicitly, and dropped otherwise.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Default)]
pub struct LogConfig {
    /// One JSON object per line instead of human readable output.
    pub json: bool,
    /// Default level DEBUG instead of INFO.
    pub verbose: bool,
    pub file: Option<PathBuf>,
}

enum Sink {
    File(File),
    Stderr,
    Discard,
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init(config: LogConfig) -> io::Result<()> {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let rust_log_set = std::env::var_os(EnvFilter::DEFAULT_ENV).is_some();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "zmk_flasher={}",
            default_level.as_str().to_lowercase()
        ))
    });

    let sink = match &config.file {
        Some(path) => Sink::File(OpenOptions::new().create(true).append(true).open(path)?),
        None if rust_log_set => Sink::Stderr,
        None => Sink::Discard,
    };
    let ansi = matches!(sink, Sink::Stderr);
    let writer = match sink {
        Sink::File(file) => BoxMakeWriter::new(Mutex::new(file)),
        Sink::Stderr => BoxMakeWriter::new(io::stderr),
        Sink::Discard => BoxMakeWriter::new(io::sink),
    };

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(writer),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .init();
    }

    Ok(())
}

/// Rate limiter for log lines emitted on every poll.
pub struct LogThrottle {
    interval_ms: u64,
    /// Last log time in ms since `start`, or [`NEVER_LOGGED`].
    last_log_ms: AtomicU64,
    start: Instant,
}

const NEVER_LOGGED: u64 = u64::MAX;

impl LogThrottle {
    pub fn new(interval: std::time::Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_log_ms: AtomicU64::new(NEVER_LOGGED),
            start: Instant::now(),
        }
    }

    /// True when nothing was logged within the interval. Thread-safe.
    pub fn should_log(&self) -> bool {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);

        if last != NEVER_LOGGED && now_ms.saturating_sub(last) < self.interval_ms {
            return false;
        }

        // Losing the race means another thread just logged.
        self.last_log_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Allow the next log immediately.
    pub fn reset(&self) {
        self.last_log_ms.store(NEVER_LOGGED, Ordering::Relaxed);
    }
}
