//! Whitelist-driven admission control: pluggable source readers, a small
//! condition language for row-gated membership, and per-group options.

#![forbid(unsafe_code)]

pub mod admission;
pub mod condition;
pub mod engine;
pub mod fetch;
pub mod identity;
pub mod kv;
pub mod options;
pub mod params;
pub mod readers;
pub mod table;

/// Identifier of a moderated group.
pub type GroupId = i64;
