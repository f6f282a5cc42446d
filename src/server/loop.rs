// Server loop module
// Accepts connections until shutdown is requested, then drains

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use super::connection::accept_connection;
use crate::config;
use crate::logger;

/// How often the drain phase re-checks the connection counter
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Run the accept loop until `shutdown` fires.
///
/// The listener is closed as soon as shutdown starts. Open connections then
/// get up to the configured write timeout to finish their responses.
#[allow(clippy::ignored_unit_patterns)]
pub async fn start_server_loop(
    listener: TcpListener,
    state: Arc<config::AppState>,
    active_connections: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        accept_connection(stream, peer_addr, &state, &active_connections);
                    }
                    Err(e) => {
                        logger::log_error(&format!("Failed to accept connection: {e}"));
                    }
                }
            }

            _ = shutdown.notified() => break,
        }
    }

    drop(listener);
    logger::log_shutdown(active_connections.load(Ordering::SeqCst));

    let grace = Duration::from_secs(state.config.performance.write_timeout);
    let drained = tokio::time::timeout(grace, async {
        while active_connections.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    })
    .await;

    match drained {
        Ok(()) => logger::log_info("All connections closed"),
        Err(_) => logger::log_warning(&format!(
            "Shutdown grace period of {}s elapsed with {} connection(s) open",
            grace.as_secs(),
            active_connections.load(Ordering::SeqCst)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn state(web_root: &std::path::Path, max_connections: Option<u64>) -> Arc<config::AppState> {
        let mut config = Config::load_from("this-config-file-does-not-exist").unwrap();
        config.origin.url = None;
        config.storage.web_root = web_root.display().to_string();
        config.performance.max_connections = max_connections;
        config.performance.write_timeout = 2;
        config.logging.access_log = false;
        Arc::new(config::AppState::new(&config).unwrap())
    }

    async fn get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let root = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let active = Arc::new(AtomicUsize::new(0));

        let server = tokio::spawn(start_server_loop(
            listener,
            state(root.path(), None),
            Arc::clone(&active),
            Arc::clone(&shutdown),
        ));

        let response = get(addr, "/healthz").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("server: pullcache/0.1"));

        let response = get(addr, "/missing.css").await;
        assert!(response.starts_with("HTTP/1.1 503"), "{response}");
        assert!(response.ends_with("Origin URL not configured. Set ORIGIN_URL environment variable.\n"));

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_connection_limit_rejects_excess() {
        let root = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let active = Arc::new(AtomicUsize::new(0));

        let server = tokio::spawn(start_server_loop(
            listener,
            state(root.path(), Some(1)),
            Arc::clone(&active),
            Arc::clone(&shutdown),
        ));

        // Holds the only slot: connected, request not yet sent
        let held = tokio::net::TcpStream::connect(addr).await.unwrap();
        while active.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut rejected = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        let read = rejected.read_to_end(&mut buf).await;
        assert!(read.is_err() || buf.is_empty());

        shutdown.notify_one();
        drop(held);
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }
}
