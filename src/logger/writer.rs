//! Log writer module
//!
//! Thread-safe log writing to files or stdout/stderr, with a level filter.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

/// Global log writer instance
static LOG_WRITER: OnceLock<LogWriter> = OnceLock::new();

/// Severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
}

impl Level {
    /// Parse a configured level name; unknown names fall back to `Info`
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "debug" | "trace" => Self::Debug,
            _ => Self::Info,
        }
    }
}

/// Log output target
enum LogTarget {
    Stdout,
    Stderr,
    File(Mutex<File>),
}

/// Thread-safe log writer
pub struct LogWriter {
    /// Access and info lines
    access: LogTarget,
    /// Errors and warnings
    error: LogTarget,
    level: Level,
}

impl LogWriter {
    fn new(
        access_log_file: Option<&str>,
        error_log_file: Option<&str>,
        level: Level,
    ) -> io::Result<Self> {
        let access = match access_log_file {
            Some(path) => LogTarget::File(Mutex::new(open_log_file(path)?)),
            None => LogTarget::Stdout,
        };

        let error = match error_log_file {
            Some(path) => LogTarget::File(Mutex::new(open_log_file(path)?)),
            None => LogTarget::Stderr,
        };

        Ok(Self {
            access,
            error,
            level,
        })
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    /// Write to access log (not subject to the level filter)
    pub fn write_access(&self, message: &str) {
        write_to_target(&self.access, message);
    }

    /// Write an info or debug message to the access log target
    pub fn write_info(&self, level: Level, message: &str) {
        if self.enabled(level) {
            write_to_target(&self.access, message);
        }
    }

    /// Write an error or warning to the error log target
    pub fn write_error(&self, level: Level, message: &str) {
        if self.enabled(level) {
            write_to_target(&self.error, message);
        }
    }
}

/// Open or create a log file for appending
fn open_log_file(path: &str) -> io::Result<File> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    OpenOptions::new().create(true).append(true).open(path)
}

/// Write message to log target
fn write_to_target(target: &LogTarget, message: &str) {
    match target {
        LogTarget::Stdout => {
            println!("{message}");
        }
        LogTarget::Stderr => {
            eprintln!("{message}");
        }
        LogTarget::File(file) => {
            let mut f = file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let _ = writeln!(f, "{message}");
        }
    }
}

/// Initialize the global log writer
///
/// This should be called once at application startup.
/// Returns error if log files cannot be opened.
pub fn init(
    access_log_file: Option<&str>,
    error_log_file: Option<&str>,
    level: Level,
) -> io::Result<()> {
    let writer = LogWriter::new(access_log_file, error_log_file, level)?;
    LOG_WRITER.set(writer).map_err(|_| {
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            "Log writer already initialized",
        )
    })
}

/// Get the global log writer, if `init()` has run
pub fn get() -> Option<&'static LogWriter> {
    LOG_WRITER.get()
}
