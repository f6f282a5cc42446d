//! Request path validation and origin URL construction
//!
//! Paths are not percent-decoded: `/img/a%20b.png` is stored as `a%20b.png`,
//! so the front-end must test for the file using the undecoded request URI.

use std::path::Path;

use super::error::ProxyError;

/// Token rejected anywhere in a request path
const TRAVERSAL_TOKEN: &str = "..";

/// A validated, slash-rooted request path with the query stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPath(String);

impl RequestPath {
    /// Strip the query component and validate what remains.
    ///
    /// Rejected: empty paths, the root, any `..`, a trailing slash (no file
    /// name to materialize), `.` segments and NUL bytes.
    pub fn parse(raw: &str) -> Result<Self, ProxyError> {
        let path = raw.split_once('?').map_or(raw, |(path, _)| path);

        if path.is_empty() || path == "/" || !path.starts_with('/') {
            return Err(ProxyError::InvalidPath);
        }
        if path.contains(TRAVERSAL_TOKEN) || path.contains('\0') {
            return Err(ProxyError::InvalidPath);
        }
        if path.ends_with('/') || path.split('/').any(|segment| segment == ".") {
            return Err(ProxyError::InvalidPath);
        }

        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path relative to a local root (leading slashes removed)
    pub fn relative(&self) -> &Path {
        Path::new(self.0.trim_start_matches('/'))
    }

    /// Last segment: the name the artifact is stored under
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }
}

/// Absolute origin URL prefix, stored without trailing slashes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginBase(String);

impl OriginBase {
    pub fn parse(url: &str) -> Result<Self, String> {
        let trimmed = url.trim().trim_end_matches('/');
        let parsed =
            reqwest::Url::parse(trimmed).map_err(|e| format!("Invalid origin URL '{url}': {e}"))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!(
                "Invalid origin URL '{url}': scheme must be http or https"
            ));
        }
        if parsed.host_str().is_none() {
            return Err(format!("Invalid origin URL '{url}': missing host"));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fetch URL for a request path; exactly one slash joins the two
    pub fn join(&self, path: &RequestPath) -> String {
        format!("{}{}", self.0, path.as_str())
    }
}
