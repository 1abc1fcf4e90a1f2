//! Per-group whitelist configuration and the admission check built on
//! top of it.
//!
//! The engine owns three things: the persisted per-group source rows,
//! one lazily created reader per source kind, and the process-wide
//! default source that groups can opt into. Everything else is
//! delegated to the readers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::GroupId;
use crate::condition::{self, ConditionParseError};
use crate::fetch::HttpFetcher;
use crate::kv::{self, KeyValueStore, KvError};
use crate::params::{self, ParamError};
use crate::readers::{self, ReaderError, ReaderKind, SourceReader, WhitelistSource};
use crate::table::TableProvider;

const WHITELIST_NAMESPACE: &str = "whitelist";

/// Identity used when probing a remote source from [`WhitelistEngine::test`].
const PROBE_IDENTITY: &str = "bob";
const SAMPLE_LIMIT: usize = 3;
const MASK_CHARS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum WhitelistError {
    #[error("no whitelist is configured for group {0}")]
    NoWhitelistConfigured(GroupId),
    #[error("unsupported reader type {token:?}: {reason}")]
    UnsupportedReaderType { token: String, reason: &'static str },
    #[error("group {0} defers to the default source; set an explicit source before adding a condition")]
    ConditionOnDefault(GroupId),
    #[error("{0} sources do not take a condition")]
    ConditionUnsupported(&'static str),
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Condition(#[from] ConditionParseError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Storage(#[from] KvError),
}

impl WhitelistError {
    /// Stable machine-readable code, used by callers that map errors
    /// onto wire responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoWhitelistConfigured(_) => "no_whitelist_configured",
            Self::UnsupportedReaderType { .. } => "unsupported_reader_type",
            Self::ConditionOnDefault(_) => "condition_on_default",
            Self::ConditionUnsupported(_) => "condition_unsupported",
            Self::Param(ParamError::ParameterFormat { .. }) => "invalid_parameter",
            Self::Param(ParamError::MissingParameter(_)) => "missing_parameter",
            Self::Condition(_) => "invalid_condition",
            Self::Reader(error) => error.code(),
            Self::Storage(_) => "storage",
        }
    }
}

/// A group's configuration as callers see it: the source that will
/// answer checks, plus whether it came from the process-wide default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedWhitelist {
    #[serde(flatten)]
    pub source: WhitelistSource,
    pub is_default: bool,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of probing a group's source without involving a real
/// candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestReport {
    /// Masked sample of entries from a listable source.
    Sample { entries: Vec<String> },
    /// One live check against a remote source, reported as text.
    Probe { identity: String, outcome: String },
    NotApplicable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRow {
    #[serde(flatten)]
    source: WhitelistSource,
    updated_at: DateTime<Utc>,
}

pub struct WhitelistEngine {
    kv: Arc<dyn KeyValueStore>,
    fetcher: Arc<dyn HttpFetcher>,
    tables: Option<Arc<dyn TableProvider>>,
    default_source: Option<WhitelistSource>,
    default_token: Option<String>,
    readers: Mutex<HashMap<ReaderKind, Arc<dyn SourceReader>>>,
}

impl WhitelistEngine {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            kv,
            fetcher,
            tables: None,
            default_source: None,
            default_token: None,
            readers: Mutex::new(HashMap::new()),
        }
    }

    /// Attaches a tabular backend. Without one, table sources fail at
    /// first use instead of at construction.
    #[must_use]
    pub fn with_tables(mut self, tables: Arc<dyn TableProvider>) -> Self {
        self.tables = Some(tables);
        self
    }

    /// Process-wide source that groups opt into by configuring `default`.
    #[must_use]
    pub fn with_default_source(mut self, source: WhitelistSource) -> Self {
        self.default_source = Some(source);
        self
    }

    /// Fallback bearer token for remote sources that carry none.
    #[must_use]
    pub fn with_default_token(mut self, token: impl Into<String>) -> Self {
        self.default_token = Some(token.into());
        self
    }

    /// Parses a `reader_type;key=value;…` descriptor, the shape the
    /// process-wide default source is configured in.
    pub fn parse_source_descriptor(text: &str) -> Result<WhitelistSource, WhitelistError> {
        let mut tokens = text
            .split(';')
            .map(str::trim)
            .filter(|token| !token.is_empty());
        let head = tokens
            .next()
            .ok_or_else(|| ParamError::MissingParameter("reader_type".to_string()))?;
        let kind =
            ReaderKind::parse(head).ok_or_else(|| WhitelistError::UnsupportedReaderType {
                token: head.to_string(),
                reason: "not a known source kind",
            })?;
        if kind == ReaderKind::Default {
            return Err(WhitelistError::UnsupportedReaderType {
                token: head.to_string(),
                reason: "the process-wide default must name a concrete source",
            });
        }
        let args: Vec<String> = tokens.map(str::to_string).collect();
        let values = params::parse(&args, &kind.schema(), true, true)?;
        Ok(WhitelistSource::from_params(kind, &values)?)
    }

    /// The stored configuration for `group`, with a `default` row
    /// swapped for the process-wide source at read time. `None` means
    /// the group was never configured.
    pub async fn get_whitelist(
        &self,
        group: GroupId,
    ) -> Result<Option<ResolvedWhitelist>, WhitelistError> {
        let Some(row) = self.load_row(group).await? else {
            return Ok(None);
        };
        Ok(Some(self.resolve_row(row)?))
    }

    /// Replaces `group`'s source with one parsed from `args`: the
    /// reader type first, then `key=value` parameters. Nothing is
    /// written unless every parameter parses.
    pub async fn set_whitelist(
        &self,
        group: GroupId,
        args: &[String],
    ) -> Result<ResolvedWhitelist, WhitelistError> {
        let (head, rest) = args
            .split_first()
            .ok_or_else(|| ParamError::MissingParameter("reader_type".to_string()))?;
        let kind =
            ReaderKind::parse(head).ok_or_else(|| WhitelistError::UnsupportedReaderType {
                token: head.trim().to_string(),
                reason: "not a known source kind",
            })?;
        if kind == ReaderKind::Default && self.default_source.is_none() {
            return Err(WhitelistError::UnsupportedReaderType {
                token: head.trim().to_string(),
                reason: "no process-wide default source is configured",
            });
        }
        let values = params::parse(rest, &kind.schema(), true, true)?;
        let source = WhitelistSource::from_params(kind, &values)?;
        self.store_row(group, source).await
    }

    /// Merges a condition into `group`'s existing source. The row must
    /// exist and name a concrete list-backed source; everything else
    /// about it is left untouched.
    pub async fn set_whitelist_condition(
        &self,
        group: GroupId,
        condition_text: &str,
    ) -> Result<ResolvedWhitelist, WhitelistError> {
        let row = self
            .load_row(group)
            .await?
            .ok_or(WhitelistError::NoWhitelistConfigured(group))?;
        let source = match row.source {
            WhitelistSource::Default => return Err(WhitelistError::ConditionOnDefault(group)),
            WhitelistSource::Remote(_) => return Err(WhitelistError::ConditionUnsupported("remote")),
            WhitelistSource::Static(mut params) => {
                params.condition = Some(condition::parse(condition_text)?);
                WhitelistSource::Static(params)
            }
            WhitelistSource::Table(mut params) => {
                params.condition = Some(condition::parse(condition_text)?);
                WhitelistSource::Table(params)
            }
        };
        self.store_row(group, source).await
    }

    /// Whether `identity` may join `group`. Absence of a configured
    /// source is an error, never a silent verdict.
    pub async fn check_allowed(
        &self,
        group: GroupId,
        identity: &str,
    ) -> Result<bool, WhitelistError> {
        let resolved = self
            .get_whitelist(group)
            .await?
            .ok_or(WhitelistError::NoWhitelistConfigured(group))?;
        let reader = self.reader_for(resolved.source.kind()).await?;
        let allowed = reader.check_allowed(&resolved.source, identity).await?;
        tracing::debug!(
            target: "bouncer.engine",
            group,
            allowed,
            source = resolved.source.kind().as_str(),
            "admission check",
        );
        Ok(allowed)
    }

    /// Diagnostic probe of `group`'s source: a masked sample for
    /// listable sources, one live check for remote ones. Sample
    /// entries are truncated so full identities never leak.
    pub async fn test(&self, group: GroupId) -> Result<TestReport, WhitelistError> {
        let resolved = self
            .get_whitelist(group)
            .await?
            .ok_or(WhitelistError::NoWhitelistConfigured(group))?;
        let kind = resolved.source.kind();
        let reader = self.reader_for(kind).await?;

        if reader.supports_listing() {
            let members = reader.read_users(&resolved.source, SAMPLE_LIMIT).await?;
            let entries = members.iter().map(|member| mask(member)).collect();
            return Ok(TestReport::Sample { entries });
        }
        if kind == ReaderKind::Remote {
            let outcome = match reader.check_allowed(&resolved.source, PROBE_IDENTITY).await {
                Ok(true) => "allowed".to_string(),
                Ok(false) => "denied".to_string(),
                Err(error) => format!("error: {error}"),
            };
            return Ok(TestReport::Probe {
                identity: PROBE_IDENTITY.to_string(),
                outcome,
            });
        }
        Ok(TestReport::NotApplicable)
    }

    fn resolve_row(&self, row: StoredRow) -> Result<ResolvedWhitelist, WhitelistError> {
        let StoredRow { source, updated_at } = row;
        if source != WhitelistSource::Default {
            return Ok(ResolvedWhitelist {
                source,
                is_default: false,
                updated_at,
            });
        }
        match self.default_source.clone() {
            Some(default) if default != WhitelistSource::Default => Ok(ResolvedWhitelist {
                source: default,
                is_default: true,
                updated_at,
            }),
            _ => Err(WhitelistError::UnsupportedReaderType {
                token: "default".to_string(),
                reason: "no process-wide default source is configured",
            }),
        }
    }

    /// One reader per source kind, created on first use so a missing
    /// backend only fails the kinds that need it.
    async fn reader_for(&self, kind: ReaderKind) -> Result<Arc<dyn SourceReader>, WhitelistError> {
        let mut readers = self.readers.lock().await;
        if let Some(reader) = readers.get(&kind) {
            return Ok(reader.clone());
        }
        let reader = match kind {
            ReaderKind::Static => readers::static_list::http(self.fetcher.clone()),
            ReaderKind::Table => {
                let tables = self.tables.clone().ok_or_else(|| {
                    ReaderError::Init("no tabular backend is configured".to_string())
                })?;
                readers::tabular::grid(tables)
            }
            ReaderKind::Remote => {
                readers::remote::http(self.fetcher.clone(), self.default_token.clone())
            }
            ReaderKind::Default => {
                return Err(WhitelistError::UnsupportedReaderType {
                    token: "default".to_string(),
                    reason: "the default source resolves before dispatch",
                });
            }
        };
        readers.insert(kind, reader.clone());
        Ok(reader)
    }

    async fn store_row(
        &self,
        group: GroupId,
        source: WhitelistSource,
    ) -> Result<ResolvedWhitelist, WhitelistError> {
        let row = StoredRow {
            source,
            updated_at: Utc::now(),
        };
        let key = kv::group_key(WHITELIST_NAMESPACE, group);
        let value = serde_json::to_value(&row).map_err(|error| KvError::Encode {
            key: key.clone(),
            message: error.to_string(),
        })?;
        self.kv.set_json(&key, &value).await?;
        tracing::info!(
            target: "bouncer.engine",
            group,
            source = row.source.kind().as_str(),
            "whitelist source updated",
        );
        self.resolve_row(row)
    }

    async fn load_row(&self, group: GroupId) -> Result<Option<StoredRow>, WhitelistError> {
        let key = kv::group_key(WHITELIST_NAMESPACE, group);
        let Some(value) = self.kv.get_json(&key).await? else {
            return Ok(None);
        };
        let row = serde_json::from_value(value).map_err(|error| KvError::Decode {
            key,
            message: error.to_string(),
        })?;
        Ok(Some(row))
    }
}

fn mask(identity: &str) -> String {
    let head: String = identity.chars().take(MASK_CHARS).collect();
    format!("{head}…")
}
