//! Byte-level HTTP fetching used by the static list and remote check
//! readers (and the JSON-grid tabular backend).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
}

/// Fetches a URL and returns the raw body. Non-2xx statuses are errors.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<Vec<u8>, FetchError>;
}

/// Production fetcher over a shared `reqwest` client with a per-request
/// timeout.
pub fn default_fetcher(timeout: Duration) -> Arc<dyn HttpFetcher> {
    Arc::new(ReqwestFetcher::new(timeout))
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestFetcher {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url).timeout(self.timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(|error| FetchError::Transport {
            url: url.to_string(),
            message: error.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|error| FetchError::Transport {
                url: url.to_string(),
                message: error.to_string(),
            })?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::{FetchError, HttpFetcher, ReqwestFetcher};

    struct StubHandle {
        base_url: String,
        shutdown: oneshot::Sender<()>,
    }

    async fn spawn_stub() -> Result<StubHandle> {
        let app = Router::new()
            .route("/list", get(|| async { "alice\nbob\n" }))
            .route(
                "/echo-auth",
                get(|headers: HeaderMap| async move {
                    headers
                        .get("authorization")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("")
                        .to_string()
                }),
            )
            .route(
                "/missing",
                get(|| async { (StatusCode::NOT_FOUND, "nope") }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });

        Ok(StubHandle {
            base_url: format!("http://{addr}"),
            shutdown: shutdown_tx,
        })
    }

    #[tokio::test]
    async fn fetches_bodies_and_passes_headers() -> Result<()> {
        let stub = spawn_stub().await?;
        let fetcher = ReqwestFetcher::new(Duration::from_secs(5));

        let body = fetcher
            .fetch(&format!("{}/list", stub.base_url), &[])
            .await?;
        assert_eq!(body, b"alice\nbob\n");

        let echoed = fetcher
            .fetch(
                &format!("{}/echo-auth", stub.base_url),
                &[("authorization".to_string(), "Bearer tkn".to_string())],
            )
            .await?;
        assert_eq!(echoed, b"Bearer tkn");

        drop(stub.shutdown);
        Ok(())
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() -> Result<()> {
        let stub = spawn_stub().await?;
        let fetcher = ReqwestFetcher::new(Duration::from_secs(5));

        let error = fetcher
            .fetch(&format!("{}/missing", stub.base_url), &[])
            .await;
        assert!(matches!(error, Err(FetchError::Status { status: 404, .. })));

        drop(stub.shutdown);
        Ok(())
    }
}
