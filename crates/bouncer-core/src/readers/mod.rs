//! Source readers: the pluggable backends the engine asks "is this
//! identity allowed?".
//!
//! Each reader kind owns a parameter schema; the engine parses
//! `key=value` arguments against it before a source row is ever stored,
//! so readers can trust the shape of [`WhitelistSource`] they receive.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::fetch::FetchError;
use crate::params::{ParamError, ParamKind, ParamSchema, ParamSpec, ParamValue};
use crate::table::TableError;

pub mod remote;
pub mod static_list;
pub mod tabular;

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("reader is not available: {0}")]
    Init(String),
    #[error("source configuration does not match this reader")]
    SourceMismatch,
    #[error("{name} index {value} is out of range (indices are 1-based)")]
    IndexOutOfRange { name: &'static str, value: i64 },
    #[error("condition parameter {param:?} does not name a 1-based column")]
    ConditionColumn { param: String },
    #[error("remote location {location} is not a valid URL: {message}")]
    Location { location: String, message: String },
    #[error("this source cannot enumerate its members")]
    ListingUnsupported,
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl ReaderError {
    /// Stable machine-readable code, used by callers that map errors
    /// onto wire responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Init(_) => "reader_init",
            Self::SourceMismatch => "reader_mismatch",
            Self::IndexOutOfRange { .. } | Self::Location { .. } => "invalid_parameter",
            Self::ConditionColumn { .. } => "invalid_condition",
            Self::ListingUnsupported => "listing_unsupported",
            Self::Table(_) => "table_read",
            Self::Fetch(_) => "remote_fetch",
        }
    }
}

/// Identifier tokens accepted as the first argument of a source
/// configuration, and the registry key for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderKind {
    Default,
    Static,
    Table,
    Remote,
}

impl ReaderKind {
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "default" => Some(Self::Default),
            "static" => Some(Self::Static),
            "table" => Some(Self::Table),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Static => "static",
            Self::Table => "table",
            Self::Remote => "remote",
        }
    }

    /// The `key=value` parameters this kind of source accepts.
    #[must_use]
    pub fn schema(self) -> ParamSchema {
        match self {
            Self::Default => ParamSchema::new(vec![]),
            Self::Static | Self::Table => ParamSchema::new(vec![
                ParamSpec::required("location", ParamKind::Str),
                ParamSpec::with_default("column", ParamKind::Int, ParamValue::Int(1)),
                ParamSpec::with_default("sheet", ParamKind::Int, ParamValue::Int(1)),
                ParamSpec::optional("condition", ParamKind::Condition),
            ]),
            Self::Remote => ParamSchema::new(vec![
                ParamSpec::required("location", ParamKind::Str),
                ParamSpec::optional("token", ParamKind::Str),
            ]),
        }
    }
}

/// Parameters for sources backed by a list or a grid of cells.
///
/// `column` and `sheet` stay 1-based here; readers translate when they
/// index into a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListParams {
    pub location: String,
    #[serde(default = "default_index")]
    pub column: i64,
    #[serde(default = "default_index")]
    pub sheet: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

fn default_index() -> i64 {
    1
}

/// Parameters for sources that delegate each check to a remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteParams {
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// A fully configured whitelist source, as persisted per group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reader_type", rename_all = "lowercase")]
pub enum WhitelistSource {
    Default,
    Static(ListParams),
    Table(ListParams),
    Remote(RemoteParams),
}

impl WhitelistSource {
    #[must_use]
    pub fn kind(&self) -> ReaderKind {
        match self {
            Self::Default => ReaderKind::Default,
            Self::Static(_) => ReaderKind::Static,
            Self::Table(_) => ReaderKind::Table,
            Self::Remote(_) => ReaderKind::Remote,
        }
    }

    /// Builds a source from values parsed against [`ReaderKind::schema`].
    pub fn from_params(
        kind: ReaderKind,
        values: &HashMap<String, ParamValue>,
    ) -> Result<Self, ParamError> {
        match kind {
            ReaderKind::Default => Ok(Self::Default),
            ReaderKind::Static | ReaderKind::Table => {
                let params = ListParams {
                    location: require_str("location", values)?,
                    column: require_index("column", values)?,
                    sheet: require_index("sheet", values)?,
                    condition: values
                        .get("condition")
                        .and_then(ParamValue::as_condition)
                        .cloned(),
                };
                if kind == ReaderKind::Static {
                    Ok(Self::Static(params))
                } else {
                    Ok(Self::Table(params))
                }
            }
            ReaderKind::Remote => Ok(Self::Remote(RemoteParams {
                location: require_str("location", values)?,
                token: values
                    .get("token")
                    .and_then(ParamValue::as_str)
                    .map(str::to_string),
            })),
        }
    }
}

fn require_str(name: &str, values: &HashMap<String, ParamValue>) -> Result<String, ParamError> {
    values
        .get(name)
        .and_then(ParamValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| ParamError::MissingParameter(name.to_string()))
}

/// Column and sheet numbers are 1-based at the configuration boundary;
/// rejecting zero here keeps stored rows free of unusable indices.
fn require_index(name: &str, values: &HashMap<String, ParamValue>) -> Result<i64, ParamError> {
    let value = values
        .get(name)
        .and_then(ParamValue::as_int)
        .ok_or_else(|| ParamError::MissingParameter(name.to_string()))?;
    if value < 1 {
        return Err(ParamError::ParameterFormat {
            name: name.to_string(),
            expected: "1-based index",
            value: value.to_string(),
        });
    }
    Ok(value)
}

/// A backend that can answer admission checks for one kind of source.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Whether `identity` is allowed according to `source`.
    async fn check_allowed(&self, source: &WhitelistSource, identity: &str)
    -> Result<bool, ReaderError>;

    /// Whether this reader can enumerate members for diagnostics.
    fn supports_listing(&self) -> bool {
        false
    }

    /// Up to `limit` member identities, for readers that support listing.
    async fn read_users(
        &self,
        _source: &WhitelistSource,
        _limit: usize,
    ) -> Result<Vec<String>, ReaderError> {
        Err(ReaderError::ListingUnsupported)
    }
}
