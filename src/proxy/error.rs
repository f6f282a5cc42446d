//! Pull-through error types
//!
//! Every request ends in exactly one `ProxyError` class or a served artifact.
//! Best-effort failures are `Warning`s and never abort a request.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Failure to obtain an artifact from origin
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Origin returned HTTP {0}")]
    Status(u16),

    #[error("Failed to download from origin: request timed out")]
    Timeout,

    #[error("Failed to download from origin: {0}")]
    Transport(String),

    #[error("Origin artifact exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Failure inside the local store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("web root unavailable: {0}")]
    RootUnavailable(#[source] io::Error),

    #[error("{} resolves outside the web root", .0.display())]
    Escapes(PathBuf),

    #[error("Failed to create directory: {}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write file to {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("storage worker failed: {0}")]
    Worker(String),
}

/// Terminal outcome of a failed pull
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid request path")]
    InvalidPath,

    #[error("Target path outside web root")]
    OutsideRoot,

    #[error("Origin URL not configured. Set ORIGIN_URL environment variable.")]
    NotConfigured,

    #[error(transparent)]
    Origin(#[from] FetchError),

    #[error(transparent)]
    Storage(StoreError),

    #[error("Failed to serve file")]
    Serve(#[source] StoreError),
}

impl ProxyError {
    /// HTTP status reported to the caller
    pub const fn status(&self) -> u16 {
        match self {
            Self::InvalidPath | Self::OutsideRoot => 400,
            Self::NotConfigured => 503,
            Self::Origin(_) => 502,
            Self::Storage(_) | Self::Serve(_) => 500,
        }
    }
}

impl From<StoreError> for ProxyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RootUnavailable(_) | StoreError::Escapes(_) => Self::OutsideRoot,
            StoreError::Read { .. } => Self::Serve(err),
            other => Self::Storage(other),
        }
    }
}

/// Non-fatal outcome of the ownership post-step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    UnknownOwner(String),
    UnknownGroup(String),
    Chown { path: PathBuf, reason: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOwner(name) => write!(f, "unknown owner '{name}', ownership left unchanged"),
            Self::UnknownGroup(name) => write!(f, "unknown group '{name}', group left unchanged"),
            Self::Chown { path, reason } => {
                write!(f, "failed to chown {}: {reason}", path.display())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::InvalidPath.status(), 400);
        assert_eq!(ProxyError::OutsideRoot.status(), 400);
        assert_eq!(ProxyError::NotConfigured.status(), 503);
        assert_eq!(ProxyError::Origin(FetchError::Status(404)).status(), 502);
        assert_eq!(ProxyError::Origin(FetchError::Timeout).status(), 502);

        let write = StoreError::Write {
            path: PathBuf::from("/srv/a.css"),
            source: io::Error::other("disk full"),
        };
        assert_eq!(ProxyError::from(write).status(), 500);
    }

    #[test]
    fn test_store_errors_classify() {
        let escaped = ProxyError::from(StoreError::Escapes(PathBuf::from("/etc")));
        assert!(matches!(escaped, ProxyError::OutsideRoot));

        let read = ProxyError::from(StoreError::Read {
            path: PathBuf::from("/srv/a.css"),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        assert!(matches!(read, ProxyError::Serve(_)));
        assert_eq!(read.to_string(), "Failed to serve file");
    }

    #[test]
    fn test_diagnostics() {
        assert_eq!(
            ProxyError::Origin(FetchError::Status(404)).to_string(),
            "Origin returned HTTP 404"
        );
        let create = ProxyError::from(StoreError::CreateDir {
            path: PathBuf::from("/srv/www/img"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        });
        assert_eq!(create.to_string(), "Failed to create directory: /srv/www/img");
    }
}
