//! The condition mini-language: a single comparison applied to a value
//! pulled from a whitelist source.
//!
//! Grammar, tried in this order; first match wins, since `!=`, `<` and
//! `>` are textual infixes that an `=`-first scan would mis-split:
//!
//! 1. `<name> not in (<csv>)`
//! 2. `<name> in (<csv>)`
//! 3. `<name>!=<value>`
//! 4. `<name><<value>`
//! 5. `<name>><value>`
//! 6. `<name>=<value>`
//!
//! Values are opportunistically typed: quotes stripped, then a token
//! containing `.` parses as a float, else as an integer, else stays a
//! string. Evaluation is a total function: malformed or incomparable
//! inputs resolve to `false`, never an error.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// No grammar rule matched the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid condition format: {0}")]
pub struct ConditionParseError(pub String);

/// Comparison operator, serialized with the grammar's spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
}

/// A literal from the condition text: `10`, `1.5` or `vip`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&str> for Scalar {
    fn from(text: &str) -> Self {
        Self::Str(text.to_string())
    }
}

/// Reference side of a comparison: one scalar, or a list for the
/// membership operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CondValue {
    One(Scalar),
    Many(Vec<Scalar>),
}

/// A parsed condition. `param` names the input the condition applies to;
/// tabular sources read it as a 1-based column index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "operator")]
    pub op: CmpOp,
    pub value: CondValue,
    pub param: String,
}

/// Parses `input` against the grammar above.
pub fn parse(input: &str) -> Result<Condition, ConditionParseError> {
    let text = input.trim();
    if let Some((param, csv)) = split_membership(text, true) {
        return Ok(Condition {
            op: CmpOp::NotIn,
            value: CondValue::Many(parse_csv(csv)),
            param,
        });
    }
    if let Some((param, csv)) = split_membership(text, false) {
        return Ok(Condition {
            op: CmpOp::In,
            value: CondValue::Many(parse_csv(csv)),
            param,
        });
    }
    for (symbol, op) in [
        ("!=", CmpOp::Ne),
        ("<", CmpOp::Lt),
        (">", CmpOp::Gt),
        ("=", CmpOp::Eq),
    ] {
        if let Some((param, raw)) = split_infix(text, symbol) {
            return Ok(Condition {
                op,
                value: CondValue::One(parse_scalar(raw)),
                param,
            });
        }
    }
    Err(ConditionParseError(input.to_string()))
}

/// Evaluates `value` against `condition`. Total: incomparable operands,
/// list references under scalar operators and scalar references under
/// membership operators all come out `false` (except `!=`, whose
/// negation of an always-false equality is `true`).
#[must_use]
pub fn check(condition: &Condition, value: &Scalar, case_insensitive: bool) -> bool {
    match (condition.op, &condition.value) {
        (CmpOp::In, CondValue::Many(items)) => contains(items, value, case_insensitive),
        (CmpOp::NotIn, CondValue::Many(items)) => !contains(items, value, case_insensitive),
        (CmpOp::In | CmpOp::NotIn, CondValue::One(_)) => false,
        (CmpOp::Ne, CondValue::Many(_)) => true,
        (CmpOp::Eq | CmpOp::Lt | CmpOp::Gt, CondValue::Many(_)) => false,
        (op, CondValue::One(reference)) => {
            let (reference, value) = coerce_pair(reference, value);
            match op {
                CmpOp::Eq => scalar_eq(&reference, &value, case_insensitive),
                CmpOp::Ne => !scalar_eq(&reference, &value, case_insensitive),
                CmpOp::Lt => {
                    matches!(
                        scalar_cmp(&value, &reference, case_insensitive),
                        Some(Ordering::Less)
                    )
                }
                CmpOp::Gt => {
                    matches!(
                        scalar_cmp(&value, &reference, case_insensitive),
                        Some(Ordering::Greater)
                    )
                }
                CmpOp::In | CmpOp::NotIn => false,
            }
        }
    }
}

/// Membership with per-element numeric coercion before the plain
/// (optionally lower-cased) equality fallback.
fn contains(items: &[Scalar], value: &Scalar, case_insensitive: bool) -> bool {
    items.iter().any(|item| {
        let (item, value) = coerce_pair(item, value);
        scalar_eq(&item, &value, case_insensitive)
    })
}

/// Ordered coercion pipeline: reference numeric → pull the value toward
/// it (int first, float fallback); reference string against a numeric
/// value → promote the reference symmetrically; anything that fails
/// leaves both sides untouched.
fn coerce_pair(reference: &Scalar, value: &Scalar) -> (Scalar, Scalar) {
    match (reference, value) {
        (Scalar::Int(r), _) => {
            if let Some(v) = as_int(value) {
                return (Scalar::Int(*r), Scalar::Int(v));
            }
            if let Some(v) = as_float(value) {
                return (Scalar::Float(*r as f64), Scalar::Float(v));
            }
            (reference.clone(), value.clone())
        }
        (Scalar::Float(r), _) => {
            if let Some(v) = as_float(value) {
                return (Scalar::Float(*r), Scalar::Float(v));
            }
            (reference.clone(), value.clone())
        }
        (Scalar::Str(_), Scalar::Int(v)) => {
            if let Some(r) = as_int(reference) {
                return (Scalar::Int(r), Scalar::Int(*v));
            }
            if let Some(r) = as_float(reference) {
                return (Scalar::Float(r), Scalar::Float(*v as f64));
            }
            (reference.clone(), value.clone())
        }
        (Scalar::Str(_), Scalar::Float(v)) => {
            if let Some(r) = as_float(reference) {
                return (Scalar::Float(r), Scalar::Float(*v));
            }
            (reference.clone(), value.clone())
        }
        (Scalar::Str(_), Scalar::Str(_)) => (reference.clone(), value.clone()),
    }
}

fn as_int(value: &Scalar) -> Option<i64> {
    match value {
        Scalar::Int(v) => Some(*v),
        Scalar::Float(_) => None,
        Scalar::Str(text) => text.trim().parse().ok(),
    }
}

fn as_float(value: &Scalar) -> Option<f64> {
    match value {
        Scalar::Int(v) => Some(*v as f64),
        Scalar::Float(v) => Some(*v),
        Scalar::Str(text) => text.trim().parse().ok(),
    }
}

fn scalar_eq(a: &Scalar, b: &Scalar, case_insensitive: bool) -> bool {
    match (a, b) {
        (Scalar::Int(x), Scalar::Int(y)) => x == y,
        (Scalar::Float(x), Scalar::Float(y)) => x == y,
        (Scalar::Int(x), Scalar::Float(y)) | (Scalar::Float(y), Scalar::Int(x)) => {
            (*x as f64) == *y
        }
        (Scalar::Str(x), Scalar::Str(y)) => {
            if case_insensitive {
                x.to_lowercase() == y.to_lowercase()
            } else {
                x == y
            }
        }
        _ => false,
    }
}

fn scalar_cmp(a: &Scalar, b: &Scalar, case_insensitive: bool) -> Option<Ordering> {
    match (a, b) {
        (Scalar::Int(x), Scalar::Int(y)) => Some(x.cmp(y)),
        (Scalar::Int(_) | Scalar::Float(_), Scalar::Int(_) | Scalar::Float(_)) => {
            let x = as_float(a)?;
            let y = as_float(b)?;
            x.partial_cmp(&y)
        }
        (Scalar::Str(x), Scalar::Str(y)) => {
            if case_insensitive {
                Some(x.to_lowercase().cmp(&y.to_lowercase()))
            } else {
                Some(x.cmp(y))
            }
        }
        _ => None,
    }
}

/// Splits `<name> [not ]in (<csv>)`. The keyword must be separated from
/// the name by whitespace and followed by whitespace before `(`; the CSV
/// runs to the closing `)` ending the input. Candidate `(` positions are
/// tried left to right so a parenthesis inside the CSV never truncates
/// the list.
fn split_membership(text: &str, negated: bool) -> Option<(String, &str)> {
    if !text.ends_with(')') {
        return None;
    }
    let inner_end = text.len() - 1;
    for (open, _) in text.match_indices('(') {
        if open >= inner_end {
            break;
        }
        let Some(param) = membership_param(&text[..open], negated) else {
            continue;
        };
        let inner = &text[open + 1..inner_end];
        if inner.trim().is_empty() {
            continue;
        }
        return Some((param, inner));
    }
    None
}

fn membership_param(head: &str, negated: bool) -> Option<String> {
    if !head.ends_with(char::is_whitespace) {
        return None;
    }
    let rest = head.trim_end().strip_suffix("in")?;
    if !rest.ends_with(char::is_whitespace) {
        return None;
    }
    let rest = if negated {
        let rest = rest.trim_end().strip_suffix("not")?;
        if !rest.ends_with(char::is_whitespace) {
            return None;
        }
        rest
    } else {
        rest
    };
    let param = rest.trim();
    if param.is_empty() {
        None
    } else {
        Some(param.to_string())
    }
}

fn split_infix<'a>(text: &'a str, symbol: &str) -> Option<(String, &'a str)> {
    let (head, tail) = text.split_once(symbol)?;
    let param = head.trim();
    let raw = tail.trim();
    if param.is_empty() || raw.is_empty() {
        return None;
    }
    Some((param.to_string(), raw))
}

fn parse_csv(inner: &str) -> Vec<Scalar> {
    inner.split(',').map(parse_scalar).collect()
}

fn parse_scalar(raw: &str) -> Scalar {
    let text = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    if text.contains('.') {
        if let Ok(v) = text.parse::<f64>() {
            return Scalar::Float(v);
        }
    } else if let Ok(v) = text.parse::<i64>() {
        return Scalar::Int(v);
    }
    Scalar::Str(text.to_string())
}
