//! Origin fetch capability
//!
//! `Fetcher` abstracts "GET bytes from origin"; `HttpFetcher` is the
//! production adapter on top of reqwest.

use std::future::Future;
use std::time::Duration;

use hyper::body::Bytes;
use reqwest::{Client, ClientBuilder};

use super::error::FetchError;

/// Origin client settings, frozen at startup
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Bound on the whole exchange, redirects and body included
    pub timeout: Duration,
    pub max_redirects: usize,
    pub max_artifact_bytes: Option<u64>,
    pub user_agent: String,
}

/// GET an artifact from origin.
///
/// Any origin status >= 400 is an error, never a payload.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Bytes, FetchError>> + Send;
}

/// reqwest-backed fetcher: rustls with certificate validation, bounded redirects
pub struct HttpFetcher {
    client: Client,
    max_artifact_bytes: Option<u64>,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, reqwest::Error> {
        Self::from_builder(client_builder(settings), settings)
    }

    fn from_builder(builder: ClientBuilder, settings: &FetchSettings) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: builder.build()?,
            max_artifact_bytes: settings.max_artifact_bytes,
        })
    }
}

fn client_builder(settings: &FetchSettings) -> ClientBuilder {
    Client::builder()
        .timeout(settings.timeout)
        .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
        .user_agent(settings.user_agent.as_str())
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let mut response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let (Some(limit), Some(length)) = (self.max_artifact_bytes, response.content_length()) {
            if length > limit {
                return Err(FetchError::TooLarge { limit });
            }
        }

        let Some(limit) = self.max_artifact_bytes else {
            return response.bytes().await.map_err(classify);
        };

        // Enforce the cap while streaming: Content-Length may be absent
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(body))
    }
}

/// Map a reqwest failure to a fetch error, keeping the cause chain in the message
fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout;
    }

    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    FetchError::Transport(message)
}
