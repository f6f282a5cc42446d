//! HTTP response building module
//!
//! Builders for the responses the pull-through server emits, decoupled from
//! the pipeline itself.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;

const ALLOW: &str = "GET, HEAD, OPTIONS";

/// Build a short plain-text diagnostic response
pub fn build_text_response(status: u16, message: &str) -> Response<Full<Bytes>> {
    let body = format!("{message}\n");
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .header("Content-Length", body.len())
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|e| {
            log_build_error(&status.to_string(), &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build 405 Method Not Allowed response
pub fn build_405_response() -> Response<Full<Bytes>> {
    let mut response = build_text_response(405, "405 Method Not Allowed");
    response
        .headers_mut()
        .insert("Allow", hyper::header::HeaderValue::from_static(ALLOW));
    response
}

/// Build OPTIONS response
pub fn build_options_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(204)
        .header("Allow", ALLOW)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|e| {
            log_build_error("OPTIONS", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build health probe response
pub fn build_health_response(status: u16, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap_or_else(|e| {
            log_build_error("health", &e);
            Response::new(Full::new(Bytes::from_static(body.as_bytes())))
        })
}

/// Build the 200 response for a freshly materialized artifact
///
/// `Content-Length` is the size of the file as read back from disk.
pub fn build_artifact_response(
    data: Bytes,
    content_type: &str,
    is_head: bool,
) -> Response<Full<Bytes>> {
    let content_length = data.len();
    let body = if is_head { Bytes::new() } else { data };

    Response::builder()
        .status(200)
        .header("Content-Type", content_type)
        .header("Content-Length", content_length)
        .body(Full::new(body))
        .unwrap_or_else(|e| {
            log_build_error("200", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Log response build error
fn log_build_error(status: &str, error: &hyper::http::Error) {
    crate::logger::log_error(&format!("Failed to build {status} response: {error}"));
}
