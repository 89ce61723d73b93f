//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the Relata engine:
//! - Record storage (`Record`, `IndexId`)
//! - Query vocabulary (`Direction`, `Comparator`)
//! - Error types (`RelataError`)
//!
//! ## Ordering Guarantees
//!
//! `IndexId` implements a natural `Ord`: ids that are canonical unsigned
//! integers sort numerically and before every other id, the rest sort
//! lexicographically. Tables are `BTreeMap`s keyed by `IndexId`, so a table
//! always iterates in this order regardless of write order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// RECORDS
// =============================================================================

/// A plain field map. Flat records, pivot rows and write payloads share it.
pub type Record = serde_json::Map<String, Value>;

/// The index id of a flat record within its entity table.
///
/// Single primary keys index by the stringified value; composite keys index by
/// the JSON array of their values in declared order (`[1,2]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexId(String);

impl IndexId {
    /// Create an index id from its string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the index id of a single key value.
    ///
    /// Returns `None` for `null`, which never identifies a record.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            Value::Bool(b) => Some(Self(b.to_string())),
            other => Some(Self(other.to_string())),
        }
    }

    /// Derive the index id of a composite key from its values in declared order.
    #[must_use]
    pub fn composite(values: &[Value]) -> Self {
        Self(Value::Array(values.to_vec()).to_string())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as a JSON string value, the form stored under `$id`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::String(self.0.clone())
    }

    fn numeric(&self) -> Option<u64> {
        let s = self.0.as_str();
        let canonical = !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && (s == "0" || !s.starts_with('0'));
        if canonical { s.parse().ok() } else { None }
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IndexId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Ord for IndexId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for IndexId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Loose key equality used to join relation sides.
///
/// `1` and `"1"` address the same record, as they do in an index id.
#[must_use]
pub fn keys_match(a: &Value, b: &Value) -> bool {
    match (IndexId::from_value(a), IndexId::from_value(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

// =============================================================================
// QUERY VOCABULARY
// =============================================================================

/// Sort direction of an `order_by` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl FromStr for Direction {
    type Err = RelataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(RelataError::InvalidArgument(format!(
                "unknown sort direction `{other}`"
            ))),
        }
    }
}

/// Comparison applied to a relation count by `has` style conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparator {
    /// Parse `=`, `>`, `>=`, `<`, `<=`. Anything else is not a comparator.
    #[must_use]
    pub fn parse(op: &str) -> Option<Self> {
        match op.trim() {
            "=" | "==" => Some(Self::Eq),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            _ => None,
        }
    }

    /// Apply the comparison `count <op> target`.
    #[must_use]
    pub const fn test(self, count: usize, target: usize) -> bool {
        match self {
            Self::Eq => count == target,
            Self::Gt => count > target,
            Self::Ge => count >= target,
            Self::Lt => count < target,
            Self::Le => count <= target,
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the Relata engine.
///
/// Only structural misuse is an error: unknown entities or relations,
/// malformed arguments, broken schemas and failing host hooks. Incomplete
/// data (missing keys, unknown discriminators, dangling references) is
/// recovered where it is found.
#[derive(Debug, Error)]
pub enum RelataError {
    /// The named entity is not registered.
    #[error("[relata] entity `{0}` is not registered")]
    EntityNotFound(String),

    /// The entity does not declare the named relation.
    #[error("[relata] relation `{relation}` is not declared on entity `{entity}`")]
    RelationNotFound { entity: String, relation: String },

    /// An argument does not have the shape the operation requires.
    #[error("[relata] invalid argument: {0}")]
    InvalidArgument(String),

    /// A schema declaration is structurally unusable.
    #[error("[relata] invalid schema: {0}")]
    InvalidSchema(String),

    /// A host-installed hook callback failed.
    #[error("[relata] hook failed: {0}")]
    Hook(String),
}

// =============================================================================
// TESTS
// =============================================================================
