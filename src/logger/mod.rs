//! Logger module
//!
//! Provides logging utilities for the pull-through server including:
//! - Server lifecycle logging
//! - Access logging with multiple formats
//! - Error and warning logging
//! - File-based logging support

mod format;
pub mod writer;

pub use format::AccessLogEntry;

use crate::config::Config;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use writer::Level;

/// Initialize the logger with configuration
///
/// Should be called once at application startup.
pub fn init(config: &Config) -> std::io::Result<()> {
    writer::init(
        config.logging.access_log_file.as_deref(),
        config.logging.error_log_file.as_deref(),
        Level::parse(&config.logging.level),
    )
}

/// Write to info/access log
fn write_info(level: Level, message: &str) {
    match writer::get() {
        Some(w) => w.write_info(level, message),
        None => println!("{message}"),
    }
}

/// Write to error log
fn write_error(level: Level, message: &str) {
    match writer::get() {
        Some(w) => w.write_error(level, message),
        None => eprintln!("{message}"),
    }
}

/// Write to access log specifically
fn write_access(message: &str) {
    match writer::get() {
        Some(w) => w.write_access(message),
        None => println!("{message}"),
    }
}

pub fn log_server_start(addr: &SocketAddr, config: &Config, origin: Option<&str>) {
    write_info(Level::Info, "======================================");
    write_info(Level::Info, "Pull-through cache started");
    write_info(Level::Info, &format!("Listening on: http://{addr}"));
    match origin {
        Some(origin) => write_info(Level::Info, &format!("Origin: {origin}")),
        None => write_error(
            Level::Warn,
            "[WARN] ORIGIN_URL not set: every pull will answer 503",
        ),
    }
    write_info(Level::Info, &format!("Web root: {}", config.storage.web_root));
    write_info(
        Level::Info,
        &format!("Origin timeout: {}s", config.origin.timeout_secs),
    );
    write_info(Level::Info, &format!("Log level: {}", config.logging.level));
    if let Some(workers) = config.server.workers {
        write_info(Level::Info, &format!("Worker threads: {workers}"));
    }
    if let Some(ref path) = config.logging.access_log_file {
        write_info(Level::Info, &format!("Access log: {path}"));
    }
    if let Some(ref path) = config.logging.error_log_file {
        write_info(Level::Info, &format!("Error log: {path}"));
    }
    write_info(Level::Info, "======================================\n");
}

pub fn log_connection_accepted(peer_addr: &SocketAddr) {
    write_info(Level::Debug, &format!("[Connection] Accepted from: {peer_addr}"));
}

pub fn log_connection_error(err: &impl std::fmt::Debug) {
    write_error(
        Level::Error,
        &format!("[ERROR] Failed to serve connection: {err:?}"),
    );
}

pub fn log_error(message: &str) {
    write_error(Level::Error, &format!("[ERROR] {message}"));
}

pub fn log_warning(message: &str) {
    write_error(Level::Warn, &format!("[WARN] {message}"));
}

pub fn log_info(message: &str) {
    write_info(Level::Info, &format!("[INFO] {message}"));
}

/// Log a file written from origin
pub fn log_materialized(request_path: &str, disk_path: &Path, size: usize, origin_time: Duration) {
    write_info(
        Level::Info,
        &format!(
            "[Pull] {request_path} -> {} ({size} bytes, origin {} ms)",
            disk_path.display(),
            origin_time.as_millis()
        ),
    );
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry, format: &str) {
    write_access(&entry.format(format));
}

pub fn log_shutdown(active_connections: usize) {
    write_info(
        Level::Info,
        &format!("[Shutdown] Stopped accepting; {active_connections} connection(s) still active"),
    );
}
