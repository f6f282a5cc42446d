// Configuration module entry point
// Loads layered configuration once at startup and freezes it into AppState

mod state;
mod types;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::proxy::{FetchSettings, OriginBase, ProxySettings, StoreSettings};

// Re-export public types
pub use state::AppState;
pub use types::Config;

/// Legacy variable naming the origin base URL
const ORIGIN_URL_ENV: &str = "ORIGIN_URL";
/// Legacy variable naming the local web root
const WEB_ROOT_ENV: &str = "WEB_ROOT";
/// Document root used when neither `WEB_ROOT` nor `storage.web_root` is given
const DEFAULT_WEB_ROOT: &str = "/var/www/html";

impl Config {
    /// Load configuration from specified file path (extension optional)
    ///
    /// Layers, lowest priority first: defaults, the file, `PULLCACHE_*`
    /// variables, then `ORIGIN_URL` / `WEB_ROOT`.
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        Self::build(
            config_path,
            non_empty_env(ORIGIN_URL_ENV),
            non_empty_env(WEB_ROOT_ENV),
        )
    }

    fn build(
        config_path: &str,
        origin_url: Option<String>,
        web_root: Option<String>,
    ) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("PULLCACHE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("performance.keep_alive_timeout", 75)?
            .set_default("performance.read_timeout", 60)?
            .set_default("performance.write_timeout", 60)?
            .set_default("http.server_name", "pullcache/0.1")?
            .set_default("origin.timeout_secs", 30)?
            .set_default("origin.max_redirects", 10)?
            .set_default("storage.web_root", DEFAULT_WEB_ROOT)?
            .set_default("storage.dir_mode", 0o755)?
            .set_default("storage.file_mode", 0o644)?
            .set_default("storage.owner", "www-data")?
            .set_default("storage.group", "www-data")?
            .set_override_option("origin.url", origin_url)?
            .set_override_option("storage.web_root", web_root)?
            .build()?;

        settings.try_deserialize()
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }

    /// Freeze the pull-through part of the configuration.
    ///
    /// A missing origin is allowed here (requests answer 503); a malformed one is not.
    pub fn proxy_settings(&self) -> Result<ProxySettings, String> {
        let origin = match self.origin.url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => Some(OriginBase::parse(url)?),
            None => None,
        };

        if self.origin.timeout_secs == 0 {
            return Err("origin.timeout_secs must be greater than zero".to_string());
        }

        Ok(ProxySettings {
            origin,
            web_root: PathBuf::from(&self.storage.web_root),
            fetch: FetchSettings {
                timeout: Duration::from_secs(self.origin.timeout_secs),
                max_redirects: self.origin.max_redirects,
                max_artifact_bytes: self.origin.max_artifact_bytes,
                user_agent: self.http.server_name.clone(),
            },
            store: StoreSettings {
                dir_mode: self.storage.dir_mode,
                file_mode: self.storage.file_mode,
                owner: self.storage.owner.clone().filter(|o| !o.is_empty()),
                group: self.storage.group.clone().filter(|g| !g.is_empty()),
            },
        })
    }
}

/// Read an environment variable, treating an empty value as absent
fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
