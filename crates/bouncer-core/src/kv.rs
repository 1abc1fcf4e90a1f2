//! Key-value persistence behind the engine and the options store.
//!
//! Keys follow `{namespace}:{group}[:{field}]`. The trait mirrors what a
//! hosted store offers (string get/set with optional TTL plus JSON
//! helpers); [`memory`] keeps everything in the process and
//! [`json_file`] persists a single JSON document with atomic rewrites.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::GroupId;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("failed to encode value for {key}: {message}")]
    Encode { key: String, message: String },
    #[error("failed to decode value for {key}: {message}")]
    Decode { key: String, message: String },
    #[error("{message}")]
    Persistence { message: String },
}

/// String/JSON store keyed by `{namespace}:{group}[:{field}]`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    async fn get_json(&self, key: &str) -> Result<Option<Value>, KvError> {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|error| KvError::Decode {
                key: key.to_string(),
                message: error.to_string(),
            })
    }

    async fn set_json(&self, key: &str, value: &Value) -> Result<(), KvError> {
        let raw = serde_json::to_string(value).map_err(|error| KvError::Encode {
            key: key.to_string(),
            message: error.to_string(),
        })?;
        self.set(key, &raw, None).await
    }
}

pub fn group_key(namespace: &str, group: GroupId) -> String {
    format!("{namespace}:{group}")
}

pub fn field_key(namespace: &str, group: GroupId, field: &str) -> String {
    format!("{namespace}:{group}:{field}")
}

/// In-process store for tests and single-node deployments.
pub fn memory() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryKv::default())
}

/// File-backed store: one JSON document, rewritten atomically on every
/// write.
pub fn json_file(path: PathBuf) -> Arc<dyn KeyValueStore> {
    Arc::new(JsonFileKv::open(path))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

fn deadline(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl?).ok()?;
    Utc::now().checked_add_signed(ttl)
}

#[derive(Default)]
struct MemoryKv {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        match entries.get(key) {
            Some(entry) if entry.live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_string(),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }
}

#[derive(Default, Serialize, Deserialize)]
struct FileKvState {
    entries: HashMap<String, StoredEntry>,
}

struct JsonFileKv {
    path: PathBuf,
    state: Mutex<FileKvState>,
}

impl JsonFileKv {
    fn open(path: PathBuf) -> Self {
        let state = Self::load_state(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    fn load_state(path: &Path) -> FileKvState {
        let raw = match std::fs::read_to_string(path) {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return FileKvState::default();
            }
            Err(error) => {
                tracing::warn!(
                    target: "bouncer.kv",
                    path = %path.display(),
                    error = %error,
                    "failed to read key-value state; booting empty",
                );
                return FileKvState::default();
            }
        };

        match serde_json::from_str::<FileKvState>(&raw) {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(
                    target: "bouncer.kv",
                    path = %path.display(),
                    error = %error,
                    "failed to parse key-value state; booting empty",
                );
                FileKvState::default()
            }
        }
    }

    async fn persist_state(&self, state: &FileKvState) -> Result<(), KvError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| KvError::Persistence {
                    message: format!("failed to prepare state directory: {error}"),
                })?;
        }

        let payload = serde_json::to_vec(state).map_err(|error| KvError::Persistence {
            message: format!("failed to encode state: {error}"),
        })?;

        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, payload)
            .await
            .map_err(|error| KvError::Persistence {
                message: format!("failed to write state: {error}"),
            })?;

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|error| KvError::Persistence {
                message: format!("failed to finalize state: {error}"),
            })
    }
}

#[async_trait]
impl KeyValueStore for JsonFileKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        match state.entries.get(key) {
            Some(entry) if entry.live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                state.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        state.entries.retain(|_, entry| entry.live(now));
        state.entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_string(),
                expires_at: deadline(ttl),
            },
        );
        self.persist_state(&state).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use serde_json::json;

    use super::{field_key, group_key, json_file, memory};

    #[tokio::test]
    async fn memory_round_trips_strings_and_json() -> Result<()> {
        let store = memory();
        store.set("whitelist:1", "hello", None).await?;
        assert_eq!(store.get("whitelist:1").await?, Some("hello".to_string()));
        assert_eq!(store.get("whitelist:2").await?, None);

        let value = json!({"reader_type": "static"});
        store.set_json("whitelist:3", &value).await?;
        assert_eq!(store.get_json("whitelist:3").await?, Some(value));
        Ok(())
    }

    #[tokio::test]
    async fn zero_ttl_expires_immediately() -> Result<()> {
        let store = memory();
        store
            .set("options:1:enabled", "true", Some(Duration::ZERO))
            .await?;
        assert_eq!(store.get("options:1:enabled").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn file_store_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state.json");

        let store = json_file(path.clone());
        store.set("whitelist:42", "row", None).await?;
        drop(store);

        let reopened = json_file(path);
        assert_eq!(reopened.get("whitelist:42").await?, Some("row".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_state_file_boots_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"not json").await?;

        let store = json_file(path);
        assert_eq!(store.get("whitelist:1").await?, None);
        Ok(())
    }

    #[test]
    fn keys_follow_the_namespace_convention() {
        assert_eq!(group_key("whitelist", 42), "whitelist:42");
        assert_eq!(field_key("options", -7, "enabled"), "options:-7:enabled");
    }
}
