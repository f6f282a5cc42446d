// Configuration types module
// Defines all configuration-related data structures

use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
    pub http: HttpConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
    pub origin: OriginConfig,
    pub storage: StorageConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub access_log: bool,
    /// Access log format (combined, common, json, or custom pattern)
    #[serde(default = "default_access_log_format")]
    pub access_log_format: String,
    /// Access log file path (optional, stdout if not set)
    #[serde(default)]
    pub access_log_file: Option<String>,
    /// Error log file path (optional, stderr if not set)
    #[serde(default)]
    pub error_log_file: Option<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_access_log_format() -> String {
    "combined".to_string()
}

/// Performance configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PerformanceConfig {
    pub keep_alive_timeout: u64,
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub max_connections: Option<u64>,
}

/// HTTP configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Sent as `Server` on responses and as `User-Agent` towards the origin
    pub server_name: String,
}

/// Routes handled locally, before the pull-through handler
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RoutesConfig {
    #[serde(default)]
    pub health: HealthConfig,
}

/// Health check configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    /// Enable health check endpoints
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    /// Liveness probe path (default: /healthz)
    #[serde(default = "default_healthz_path")]
    pub liveness_path: String,
    /// Readiness probe path (default: /readyz)
    #[serde(default = "default_readyz_path")]
    pub readiness_path: String,
}

#[allow(clippy::missing_const_for_fn)]
fn default_health_enabled() -> bool {
    true
}

#[allow(clippy::missing_const_for_fn)]
fn default_healthz_path() -> String {
    "/healthz".to_string()
}

#[allow(clippy::missing_const_for_fn)]
fn default_readyz_path() -> String {
    "/readyz".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            liveness_path: default_healthz_path(),
            readiness_path: default_readyz_path(),
        }
    }
}

/// Origin (upstream) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OriginConfig {
    /// Absolute base URL of the authoritative origin; `ORIGIN_URL` overrides it.
    /// Left unset, every pull answers 503.
    #[serde(default)]
    pub url: Option<String>,
    /// Total timeout of one origin fetch, in seconds
    pub timeout_secs: u64,
    /// Redirect hops followed before the fetch is abandoned
    pub max_redirects: usize,
    /// Largest artifact accepted from origin (unlimited when unset)
    #[serde(default)]
    pub max_artifact_bytes: Option<u64>,
}

/// Local storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory all artifacts are written under; `WEB_ROOT` overrides it
    pub web_root: String,
    /// Mode for directories created on demand
    pub dir_mode: u32,
    /// Mode for materialized files
    pub file_mode: u32,
    /// Owner assigned to materialized files (best effort, skipped when unset)
    #[serde(default)]
    pub owner: Option<String>,
    /// Group assigned to materialized files (best effort, skipped when unset)
    #[serde(default)]
    pub group: Option<String>,
}
