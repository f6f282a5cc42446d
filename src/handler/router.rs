//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: method validation, health probes,
//! then the pull-through handler. Every outcome is written to the access log.

use crate::config::AppState;
use crate::http;
use crate::logger::{self, AccessLogEntry};
use crate::proxy::ProxyError;
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, REFERER, SERVER, USER_AGENT};
use hyper::{Method, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A response plus what the access log needs to know about it
struct Routed {
    response: Response<Full<Bytes>>,
    /// Set when the artifact was materialized from origin
    origin_time: Option<Duration>,
}

impl Routed {
    const fn local(response: Response<Full<Bytes>>) -> Self {
        Self {
            response,
            origin_time: None,
        }
    }
}

/// Main entry point for HTTP request handling
pub async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();
    let (parts, _body) = req.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);

    let routed = route_request(&parts.method, &target, parts.uri.path(), &state).await;
    let mut response = routed.response;

    if let Ok(name) = HeaderValue::from_str(&state.config.http.server_name) {
        response.headers_mut().insert(SERVER, name);
    }

    if state.config.logging.access_log {
        let mut entry = AccessLogEntry::new(
            peer_addr.ip().to_string(),
            parts.method.to_string(),
            parts.uri.path().to_string(),
        );
        entry.query = parts.uri.query().map(ToString::to_string);
        entry.http_version = format_version(parts.version).to_string();
        entry.status = response.status().as_u16();
        entry.body_bytes = usize::try_from(response.body().size_hint().exact().unwrap_or(0))
            .unwrap_or(usize::MAX);
        entry.referer = header_string(&parts.headers, REFERER);
        entry.user_agent = header_string(&parts.headers, USER_AGENT);
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        entry.cache_status = routed.origin_time.map(|_| "MISS");
        entry.origin_time_us = routed
            .origin_time
            .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX));
        logger::log_access(&entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

/// Route a request by method and path
async fn route_request(
    method: &Method,
    target: &str,
    path: &str,
    state: &Arc<AppState>,
) -> Routed {
    // 1. Check HTTP method
    if let Some(resp) = check_http_method(method) {
        return Routed::local(resp);
    }

    // 2. Health check endpoints, never forwarded to origin
    let health = &state.config.routes.health;
    if health.enabled {
        if path == health.liveness_path {
            return Routed::local(http::build_health_response(200, "ok"));
        }
        if path == health.readiness_path {
            return Routed::local(if state.proxy.is_configured() {
                http::build_health_response(200, "ok")
            } else {
                http::build_health_response(503, "origin not configured")
            });
        }
    }

    // 3. Everything else is a miss to materialize
    pull(target, *method == Method::HEAD, state).await
}

/// Check HTTP method and return appropriate response for non-GET/HEAD methods
fn check_http_method(method: &Method) -> Option<Response<Full<Bytes>>> {
    match method {
        &Method::GET | &Method::HEAD => None,
        &Method::OPTIONS => Some(http::build_options_response()),
        _ => {
            logger::log_warning(&format!("Method not allowed: {method}"));
            Some(http::build_405_response())
        }
    }
}

/// Run the pull-through pipeline and turn its outcome into a response
async fn pull(target: &str, is_head: bool, state: &Arc<AppState>) -> Routed {
    let proxy = Arc::clone(&state.proxy);
    let owned_target = target.to_string();

    // Own task: a dropped client connection must not abort a write in progress
    let outcome = tokio::spawn(async move {
        let result = proxy.serve(&owned_target).await;
        if let Ok(artifact) = &result {
            for warning in &artifact.warnings {
                logger::log_warning(&warning.to_string());
            }
            logger::log_materialized(
                &owned_target,
                &artifact.path,
                artifact.body.len(),
                artifact.origin_time,
            );
        }
        result
    })
    .await;

    match outcome {
        Ok(Ok(artifact)) => Routed {
            response: http::build_artifact_response(artifact.body, artifact.content_type, is_head),
            origin_time: Some(artifact.origin_time),
        },
        Ok(Err(err)) => {
            log_pull_error(target, &err);
            Routed::local(error_response(&err))
        }
        Err(join_err) => {
            logger::log_error(&format!("Pull task for {target} failed: {join_err}"));
            Routed::local(http::build_text_response(500, "Failed to serve file"))
        }
    }
}

/// Map a pipeline error to its status and plain-text diagnostic
pub fn error_response(err: &ProxyError) -> Response<Full<Bytes>> {
    http::build_text_response(err.status(), &err.to_string())
}

fn log_pull_error(target: &str, err: &ProxyError) {
    let mut message = format!("{target}: {err}");
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    match err.status() {
        400 => logger::log_warning(&format!("Rejected {message}")),
        _ => logger::log_error(&message),
    }
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

const fn format_version(version: hyper::Version) -> &'static str {
    match version {
        hyper::Version::HTTP_10 => "1.0",
        hyper::Version::HTTP_2 => "2",
        _ => "1.1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::proxy::error::{FetchError, StoreError};
    use http_body_util::BodyExt;
    use std::path::PathBuf;

    async fn body_text(routed: Routed) -> String {
        let bytes = routed.response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn state(origin: Option<&str>, web_root: &std::path::Path) -> Arc<AppState> {
        let mut config = Config::load_from("this-config-file-does-not-exist").unwrap();
        config.origin.url = origin.map(ToString::to_string);
        config.origin.timeout_secs = 2;
        config.storage.web_root = web_root.display().to_string();
        config.storage.owner = None;
        config.storage.group = None;
        Arc::new(AppState::new(&config).unwrap())
    }

    #[test]
    fn test_error_response_bodies() {
        let response = error_response(&ProxyError::InvalidPath);
        assert_eq!(response.status(), 400);

        let response = error_response(&ProxyError::NotConfigured);
        assert_eq!(response.status(), 503);

        let response = error_response(&ProxyError::Origin(FetchError::Status(403)));
        assert_eq!(response.status(), 502);

        let response = error_response(&ProxyError::from(StoreError::Write {
            path: PathBuf::from("/var/www/html/a.css"),
            source: std::io::Error::other("disk full"),
        }));
        assert_eq!(response.status(), 500);
    }

    #[tokio::test]
    async fn test_method_filter() {
        let root = tempfile::tempdir().unwrap();
        let state = state(None, root.path());

        let routed = route_request(&Method::POST, "/a.css", "/a.css", &state).await;
        assert_eq!(routed.response.status(), 405);

        let routed = route_request(&Method::OPTIONS, "/a.css", "/a.css", &state).await;
        assert_eq!(routed.response.status(), 204);
    }

    #[tokio::test]
    async fn test_health_probes() {
        let root = tempfile::tempdir().unwrap();

        let unconfigured = state(None, root.path());
        let routed = route_request(&Method::GET, "/healthz", "/healthz", &unconfigured).await;
        assert_eq!(routed.response.status(), 200);
        let routed = route_request(&Method::GET, "/readyz", "/readyz", &unconfigured).await;
        assert_eq!(routed.response.status(), 503);

        let configured = state(Some("https://origin.example.com"), root.path());
        let routed = route_request(&Method::GET, "/readyz", "/readyz", &configured).await;
        assert_eq!(routed.response.status(), 200);
    }

    #[tokio::test]
    async fn test_unconfigured_origin_answers_503() {
        let root = tempfile::tempdir().unwrap();
        let state = state(None, root.path());

        let routed = route_request(&Method::GET, "/img/a.png?x=1", "/img/a.png", &state).await;
        assert_eq!(routed.response.status(), 503);
        assert!(routed.origin_time.is_none());
        assert_eq!(
            body_text(routed).await,
            "Origin URL not configured. Set ORIGIN_URL environment variable.\n"
        );
        assert!(!root.path().join("img").exists());
    }

    #[tokio::test]
    async fn test_traversal_answers_400() {
        let root = tempfile::tempdir().unwrap();
        let state = state(Some("https://origin.example.com"), root.path());

        let routed = route_request(&Method::GET, "/../etc/passwd", "/../etc/passwd", &state).await;
        assert_eq!(routed.response.status(), 400);
        assert_eq!(body_text(routed).await, "Invalid request path\n");
    }

    #[tokio::test]
    async fn test_unreachable_origin_answers_502() {
        let root = tempfile::tempdir().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let state = state(Some(&format!("http://{addr}")), root.path());

        let routed = route_request(&Method::GET, "/css/site.css", "/css/site.css", &state).await;
        assert_eq!(routed.response.status(), 502);
        assert!(body_text(routed).await.starts_with("Failed to download from origin"));
        assert!(!root.path().join("css/site.css").exists());
    }
}
