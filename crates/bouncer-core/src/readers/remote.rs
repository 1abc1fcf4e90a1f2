//! Sources that delegate each membership check to an external service.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::fetch::HttpFetcher;
use crate::identity;

use super::{ReaderError, SourceReader, WhitelistSource};

/// Keys consulted, in order, when a remote answers with a JSON object.
const VERDICT_KEYS: [&str; 5] = ["result", "allowed", "allow", "ok", "in_whitelist"];

/// Reader that asks a remote endpoint about one identity at a time.
/// Nothing is cached; the remote stays the source of truth.
pub fn http(fetcher: Arc<dyn HttpFetcher>, default_token: Option<String>) -> Arc<dyn SourceReader> {
    Arc::new(RemoteReader {
        fetcher,
        default_token,
    })
}

struct RemoteReader {
    fetcher: Arc<dyn HttpFetcher>,
    default_token: Option<String>,
}

#[async_trait]
impl SourceReader for RemoteReader {
    async fn check_allowed(
        &self,
        source: &WhitelistSource,
        identity: &str,
    ) -> Result<bool, ReaderError> {
        let WhitelistSource::Remote(params) = source else {
            return Err(ReaderError::SourceMismatch);
        };
        // Case is preserved for the remote; only surrounding whitespace
        // and the @ prefix are removed.
        let handle = identity::strip_handle(identity);
        let url = if params.location.contains("{username}") {
            params.location.replace("{username}", &handle)
        } else {
            let mut url =
                reqwest::Url::parse(&params.location).map_err(|error| ReaderError::Location {
                    location: params.location.clone(),
                    message: error.to_string(),
                })?;
            url.query_pairs_mut().append_pair("username", &handle);
            url.to_string()
        };

        let mut headers = Vec::new();
        // An explicitly empty token falls back to the process default.
        let token = params
            .token
            .as_ref()
            .filter(|token| !token.is_empty())
            .or(self.default_token.as_ref());
        if let Some(token) = token {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }

        let body = self.fetcher.fetch(&url, &headers).await?;
        Ok(interpret_response(&body))
    }
}

/// A JSON boolean answers directly; a JSON object answers through the
/// first known verdict key. Every other body, JSON or not, falls back
/// to a small set of affirmative words over the raw text.
fn interpret_response(body: &[u8]) -> bool {
    if let Ok(document) = serde_json::from_slice::<Value>(body) {
        match &document {
            Value::Bool(flag) => return *flag,
            Value::Object(map) => {
                return VERDICT_KEYS
                    .iter()
                    .find_map(|key| map.get(*key))
                    .is_some_and(truthy);
            }
            _ => {}
        }
    }
    let text = String::from_utf8_lossy(body);
    matches!(
        text.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "ok"
    )
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use axum::Router;
    use axum::extract::{Path, Query};
    use axum::http::HeaderMap;
    use axum::routing::get;
    use tokio::net::TcpListener;
    use tokio::sync::{Mutex, oneshot};

    use super::{http, interpret_response};
    use crate::fetch::ReqwestFetcher;
    use crate::readers::{ReaderError, RemoteParams, WhitelistSource};

    fn remote_source(location: &str, token: Option<&str>) -> WhitelistSource {
        WhitelistSource::Remote(RemoteParams {
            location: location.to_string(),
            token: token.map(str::to_string),
        })
    }

    async fn spawn_stub(app: Router) -> Result<(String, oneshot::Sender<()>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });
        Ok((format!("http://{addr}"), shutdown_tx))
    }

    #[test]
    fn responses_interpret_as_verdicts() {
        assert!(interpret_response(b"true"));
        assert!(interpret_response(b"1"));
        assert!(interpret_response(b"yes"));
        assert!(interpret_response(b" OK \n"));
        assert!(interpret_response(br#"{"result": true}"#));
        assert!(interpret_response(br#"{"allowed": 1}"#));
        assert!(interpret_response(br#"{"in_whitelist": "yes"}"#));

        assert!(!interpret_response(b"false"));
        assert!(!interpret_response(b"0"));
        assert!(!interpret_response(b"no"));
        assert!(!interpret_response(b""));
        assert!(!interpret_response(br#"{"result": false, "allowed": true}"#));
        assert!(!interpret_response(br#"{"status": "ok"}"#));

        // JSON that is neither a boolean nor an object follows the
        // raw-text rule, so quoted or structured affirmatives deny.
        assert!(!interpret_response(br#""no""#));
        assert!(!interpret_response(br#""yes""#));
        assert!(!interpret_response(br#"["member"]"#));
        assert!(!interpret_response(b"5"));
        assert!(!interpret_response(br#""""#));
        assert!(!interpret_response(b"[]"));
    }

    #[tokio::test]
    async fn query_url_carries_the_handle_with_case_preserved() -> Result<()> {
        let app = Router::new().route(
            "/check",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let allowed = params.get("username").is_some_and(|name| name == "Eve");
                format!(r#"{{"result": {allowed}}}"#)
            }),
        );
        let (base, shutdown) = spawn_stub(app).await?;
        let reader = http(Arc::new(ReqwestFetcher::new(Duration::from_secs(5))), None);

        let source = remote_source(&format!("{base}/check"), None);
        assert!(reader.check_allowed(&source, " @Eve ").await?);
        assert!(!reader.check_allowed(&source, "eve").await?);

        drop(shutdown);
        Ok(())
    }

    #[tokio::test]
    async fn template_locations_substitute_the_handle() -> Result<()> {
        let app = Router::new().route(
            "/users/:name/check",
            get(|Path(name): Path<String>| async move {
                let allowed = name == "Eve";
                format!(r#"{{"result": {allowed}}}"#)
            }),
        );
        let (base, shutdown) = spawn_stub(app).await?;
        let reader = http(Arc::new(ReqwestFetcher::new(Duration::from_secs(5))), None);

        let source = remote_source(&format!("{base}/users/{{username}}/check"), None);
        assert!(reader.check_allowed(&source, "@Eve").await?);

        drop(shutdown);
        Ok(())
    }

    #[tokio::test]
    async fn source_token_outranks_the_default_unless_empty() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = seen.clone();
        let app = Router::new().route(
            "/check",
            get(move |headers: HeaderMap| {
                let sink = sink.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    sink.lock().await.push(auth);
                    r#"{"result": true}"#
                }
            }),
        );
        let (base, shutdown) = spawn_stub(app).await?;
        let reader = http(
            Arc::new(ReqwestFetcher::new(Duration::from_secs(5))),
            Some("process-token".to_string()),
        );

        let url = format!("{base}/check");
        reader
            .check_allowed(&remote_source(&url, Some("group-token")), "eve")
            .await?;
        reader.check_allowed(&remote_source(&url, None), "eve").await?;
        reader
            .check_allowed(&remote_source(&url, Some("")), "eve")
            .await?;

        let calls = seen.lock().await;
        assert_eq!(
            *calls,
            vec![
                "Bearer group-token".to_string(),
                "Bearer process-token".to_string(),
                "Bearer process-token".to_string(),
            ]
        );

        drop(shutdown);
        Ok(())
    }

    #[tokio::test]
    async fn unparseable_locations_are_reported() {
        let reader = http(Arc::new(ReqwestFetcher::new(Duration::from_secs(1))), None);
        let source = remote_source("not a url", None);
        let result = reader.check_allowed(&source, "eve").await;
        assert!(matches!(result, Err(ReaderError::Location { .. })));
    }

    #[tokio::test]
    async fn remote_sources_cannot_enumerate_members() {
        let reader = http(Arc::new(ReqwestFetcher::new(Duration::from_secs(1))), None);
        let source = remote_source("https://allow.example/check", None);
        assert!(!reader.supports_listing());
        let result = reader.read_users(&source, 3).await;
        assert!(matches!(result, Err(ReaderError::ListingUnsupported)));
    }
}
