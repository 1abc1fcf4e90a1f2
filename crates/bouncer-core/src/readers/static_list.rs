//! Plain-text member lists fetched over HTTP, one identity per line.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::fetch::HttpFetcher;
use crate::identity;

use super::{ReaderError, SourceReader, WhitelistSource};

/// Reader over line-oriented lists: blank lines and `#` comments are
/// skipped, entries are normalized on load. A list is fetched once per
/// location and cached for the life of the process.
pub fn http(fetcher: Arc<dyn HttpFetcher>) -> Arc<dyn SourceReader> {
    Arc::new(StaticListReader {
        fetcher,
        cache: Mutex::new(HashMap::new()),
    })
}

struct StaticListReader {
    fetcher: Arc<dyn HttpFetcher>,
    cache: Mutex<HashMap<String, Arc<Vec<String>>>>,
}

impl StaticListReader {
    /// The cache lock stays held across the fetch so concurrent checks
    /// against the same location collapse into one download.
    async fn members(&self, location: &str) -> Result<Arc<Vec<String>>, ReaderError> {
        let mut cache = self.cache.lock().await;
        if let Some(members) = cache.get(location) {
            return Ok(members.clone());
        }
        let body = self.fetcher.fetch(location, &[]).await?;
        let members = Arc::new(parse_members(&decode_text(&body)));
        cache.insert(location.to_string(), members.clone());
        Ok(members)
    }
}

#[async_trait]
impl SourceReader for StaticListReader {
    async fn check_allowed(
        &self,
        source: &WhitelistSource,
        identity: &str,
    ) -> Result<bool, ReaderError> {
        let WhitelistSource::Static(params) = source else {
            return Err(ReaderError::SourceMismatch);
        };
        let members = self.members(&params.location).await?;
        let target = identity::normalize(identity);
        Ok(members.iter().any(|member| *member == target))
    }

    fn supports_listing(&self) -> bool {
        true
    }

    async fn read_users(
        &self,
        source: &WhitelistSource,
        limit: usize,
    ) -> Result<Vec<String>, ReaderError> {
        let WhitelistSource::Static(params) = source else {
            return Err(ReaderError::SourceMismatch);
        };
        let members = self.members(&params.location).await?;
        Ok(members.iter().take(limit).cloned().collect())
    }
}

/// UTF-8 when the bytes allow it, Latin-1 otherwise.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&byte| char::from(byte)).collect(),
    }
}

fn parse_members(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(identity::normalize)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::Result;
    use axum::Router;
    use axum::routing::get;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::{decode_text, http, parse_members};
    use crate::fetch::ReqwestFetcher;
    use crate::readers::{ListParams, ReaderError, RemoteParams, WhitelistSource};

    fn static_source(location: &str) -> WhitelistSource {
        WhitelistSource::Static(ListParams {
            location: location.to_string(),
            column: 1,
            sheet: 1,
            condition: None,
        })
    }

    #[test]
    fn comments_and_blanks_are_skipped_and_entries_normalized() {
        let members = parse_members("@alice\nBOB\n# comment\n\n  Charlie  \n");
        assert_eq!(members, vec!["alice", "bob", "charlie"]);
    }

    #[test]
    fn non_utf8_bodies_fall_back_to_latin1() {
        assert_eq!(decode_text(b"Jos\xe9"), "Jos\u{e9}");
        assert_eq!(decode_text("José".as_bytes()), "José");
    }

    #[tokio::test]
    async fn membership_is_case_insensitive_and_fetched_once() -> Result<()> {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/list.txt",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "@alice\nBOB\n# staff below\nCharlie\n"
                }
            }),
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

        let reader = http(Arc::new(ReqwestFetcher::new(Duration::from_secs(5))));
        let source = static_source(&format!("http://{addr}/list.txt"));

        assert!(reader.check_allowed(&source, "@Alice").await?);
        assert!(reader.check_allowed(&source, "bob").await?);
        assert!(!reader.check_allowed(&source, "mallory").await?);
        assert_eq!(
            reader.read_users(&source, 2).await?,
            vec!["alice".to_string(), "bob".to_string()]
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        drop(shutdown_tx);
        Ok(())
    }

    #[tokio::test]
    async fn other_source_shapes_are_rejected() {
        let reader = http(Arc::new(ReqwestFetcher::new(Duration::from_secs(1))));
        let source = WhitelistSource::Remote(RemoteParams {
            location: "https://allow.example/check".to_string(),
            token: None,
        });
        let result = reader.check_allowed(&source, "alice").await;
        assert!(matches!(result, Err(ReaderError::SourceMismatch)));
    }
}
