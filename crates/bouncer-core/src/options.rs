//! Per-group typed settings with schema defaults.
//!
//! The schema is declared once by the embedding service; values are
//! stored per group under `options:{group}:{name}`. Reads are total for
//! known names: a missing or undecodable stored value falls back to the
//! schema default, then to the kind's zero value.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::GroupId;
use crate::kv::{self, KeyValueStore, KvError};

const OPTIONS_NAMESPACE: &str = "options";

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("unknown option: {0}")]
    UnknownOption(String),
    #[error("invalid {expected} value for option {name}: {value}")]
    InvalidValue {
        name: String,
        expected: &'static str,
        value: String,
    },
    #[error(transparent)]
    Storage(#[from] KvError),
}

impl OptionsError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownOption(_) => "unknown_option",
            Self::InvalidValue { .. } => "invalid_value",
            Self::Storage(_) => "storage",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Int,
    Str,
}

impl OptionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Str => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl OptionValue {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value}"),
        }
    }
}

/// One declared option: name, kind, optional default, description.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub default: Option<OptionValue>,
    pub description: &'static str,
}

impl OptionSpec {
    #[must_use]
    pub fn bool(name: &'static str, default: bool, description: &'static str) -> Self {
        Self {
            name,
            kind: OptionKind::Bool,
            default: Some(OptionValue::Bool(default)),
            description,
        }
    }

    #[must_use]
    pub fn int(name: &'static str, default: i64, description: &'static str) -> Self {
        Self {
            name,
            kind: OptionKind::Int,
            default: Some(OptionValue::Int(default)),
            description,
        }
    }

    #[must_use]
    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: OptionKind::Str,
            default: None,
            description,
        }
    }
}

pub struct OptionsStore {
    kv: Arc<dyn KeyValueStore>,
    schema: Vec<OptionSpec>,
}

impl OptionsStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, schema: Vec<OptionSpec>) -> Self {
        Self { kv, schema }
    }

    #[must_use]
    pub fn specs(&self) -> &[OptionSpec] {
        &self.schema
    }

    /// Stored value if present and well-shaped, else the schema
    /// default, else the kind's zero value. Total for known names.
    pub async fn get(&self, group: GroupId, name: &str) -> Result<OptionValue, OptionsError> {
        let spec = self.spec(name)?;
        let key = kv::field_key(OPTIONS_NAMESPACE, group, spec.name);
        if let Some(stored) = self.kv.get_json(&key).await? {
            match typed(spec.kind, &stored) {
                Some(value) => return Ok(value),
                None => {
                    tracing::warn!(
                        target: "bouncer.options",
                        group,
                        option = spec.name,
                        "stored value does not match the declared kind; using default",
                    );
                }
            }
        }
        Ok(fallback(spec))
    }

    /// Coerces `raw` per the option's declared kind and stores it.
    pub async fn set(
        &self,
        group: GroupId,
        name: &str,
        raw: &str,
    ) -> Result<OptionValue, OptionsError> {
        let spec = self.spec(name)?;
        let value = coerce(spec, raw)?;
        let key = kv::field_key(OPTIONS_NAMESPACE, group, spec.name);
        let encoded = serde_json::to_value(&value).map_err(|error| KvError::Encode {
            key: key.clone(),
            message: error.to_string(),
        })?;
        self.kv.set_json(&key, &encoded).await?;
        tracing::info!(target: "bouncer.options", group, option = spec.name, "option updated");
        Ok(value)
    }

    /// Human-readable schema listing, one option per line.
    #[must_use]
    pub fn reference(&self) -> String {
        self.schema
            .iter()
            .map(|spec| {
                let default = spec
                    .default
                    .as_ref()
                    .map_or_else(|| "unset".to_string(), ToString::to_string);
                format!(
                    "{} ({}; default {}): {}",
                    spec.name,
                    spec.kind.as_str(),
                    default,
                    spec.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn spec(&self, name: &str) -> Result<&OptionSpec, OptionsError> {
        self.schema
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| OptionsError::UnknownOption(name.to_string()))
    }
}

fn typed(kind: OptionKind, stored: &Value) -> Option<OptionValue> {
    match (kind, stored) {
        (OptionKind::Bool, Value::Bool(value)) => Some(OptionValue::Bool(*value)),
        (OptionKind::Int, Value::Number(value)) => value.as_i64().map(OptionValue::Int),
        (OptionKind::Str, Value::String(value)) => Some(OptionValue::Str(value.clone())),
        _ => None,
    }
}

fn fallback(spec: &OptionSpec) -> OptionValue {
    spec.default.clone().unwrap_or(match spec.kind {
        OptionKind::Bool => OptionValue::Bool(false),
        OptionKind::Int => OptionValue::Int(0),
        OptionKind::Str => OptionValue::Str(String::new()),
    })
}

fn coerce(spec: &OptionSpec, raw: &str) -> Result<OptionValue, OptionsError> {
    match spec.kind {
        OptionKind::Bool => Ok(OptionValue::Bool(matches!(
            raw.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ))),
        OptionKind::Int => raw
            .trim()
            .parse::<i64>()
            .map(OptionValue::Int)
            .map_err(|_| OptionsError::InvalidValue {
                name: spec.name.to_string(),
                expected: "integer",
                value: raw.to_string(),
            }),
        OptionKind::Str => Ok(OptionValue::Str(raw.to_string())),
    }
}
