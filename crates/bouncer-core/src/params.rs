//! `key=value` parameter lists and the schemas they parse against.
//!
//! Each reader type declares an ordered schema; configuration commands
//! hand over their raw tokens and get back a typed map. Unknown keys are
//! skipped so older deployments survive newer commands.

use std::collections::HashMap;

use thiserror::Error;

use crate::condition::{self, Condition};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("invalid {expected} value for parameter {name}: {value}")]
    ParameterFormat {
        name: String,
        expected: &'static str,
        value: String,
    },
    #[error("required parameter {0} is missing")]
    MissingParameter(String),
}

/// Value kind a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Str,
    Condition,
}

/// A typed parameter value produced by [`parse`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Str(String),
    Condition(Condition),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_condition(&self) -> Option<&Condition> {
        match self {
            Self::Condition(value) => Some(value),
            _ => None,
        }
    }
}

/// One schema entry. `required` entries carry no default and must be
/// supplied; `optional` entries may be absent from the result.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Option<ParamValue>,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            default: None,
            required: true,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            default: None,
            required: false,
        }
    }

    pub fn with_default(name: &'static str, kind: ParamKind, default: ParamValue) -> Self {
        Self {
            name,
            kind,
            default: Some(default),
            required: false,
        }
    }
}

/// Ordered parameter schema. Declaration order decides which missing
/// parameter gets reported first.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSchema {
    entries: Vec<ParamSpec>,
}

impl ParamSchema {
    #[must_use]
    pub fn new(entries: Vec<ParamSpec>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ParamSpec] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.entries.iter().find(|spec| spec.name == name)
    }
}

/// Parses `key=value` tokens into a typed map.
///
/// Tokens without `=` are ignored; only the first `=` splits, so values
/// may contain `=` themselves. Keys the schema does not declare are
/// skipped. With `apply_defaults`, schema defaults are seeded before the
/// tokens run, so explicit tokens win. With `check_missing`, every
/// required entry must end up present.
pub fn parse(
    args: &[String],
    schema: &ParamSchema,
    check_missing: bool,
    apply_defaults: bool,
) -> Result<HashMap<String, ParamValue>, ParamError> {
    let mut values = HashMap::new();
    if apply_defaults {
        for spec in schema.entries() {
            if let Some(default) = &spec.default {
                values.insert(spec.name.to_string(), default.clone());
            }
        }
    }
    for token in args {
        let Some((key, raw)) = token.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let Some(spec) = schema.get(key) else {
            continue;
        };
        values.insert(key.to_string(), typed_value(spec, raw)?);
    }
    if check_missing {
        for spec in schema.entries() {
            if spec.required && !values.contains_key(spec.name) {
                return Err(ParamError::MissingParameter(spec.name.to_string()));
            }
        }
    }
    Ok(values)
}

fn typed_value(spec: &ParamSpec, raw: &str) -> Result<ParamValue, ParamError> {
    match spec.kind {
        ParamKind::Str => Ok(ParamValue::Str(raw.to_string())),
        ParamKind::Int => raw
            .trim()
            .parse::<i64>()
            .map(ParamValue::Int)
            .map_err(|_| ParamError::ParameterFormat {
                name: spec.name.to_string(),
                expected: "integer",
                value: raw.to_string(),
            }),
        ParamKind::Condition => condition::parse(raw)
            .map(ParamValue::Condition)
            .map_err(|_| ParamError::ParameterFormat {
                name: spec.name.to_string(),
                expected: "condition",
                value: raw.to_string(),
            }),
    }
}
