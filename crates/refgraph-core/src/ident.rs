// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Entity identifiers and the composite keys used by the reference index.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

/// Canonical identifier of an entity within its schema.
///
/// Payloads may carry ids as JSON strings or numbers. Both are folded into
/// the string form; integral numbers render as integer text whatever their
/// JSON spelling, so `1`, `1.0` and `"1"` address the same entity. Ordering
/// is plain string ordering.
#[repr(transparent)]
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an id from its canonical string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Reads an id out of a JSON value; only strings and numbers qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(canonical_number(n))),
            _ => None,
        }
    }

    /// Returns `true` when `value` is an id equal to this one.
    pub fn matches(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => *s == self.0,
            Value::Number(n) => canonical_number(n) == self.0,
            _ => false,
        }
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Str(String),
            Num(serde_json::Number),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Str(s) => Self(s),
            RawId::Num(n) => Self(canonical_number(&n)),
        })
    }
}

// Integral floats (`1.0`, `-0.0`, `1e3`) take the text of the integer they
// equal; everything else keeps its JSON rendering.
#[allow(clippy::float_cmp)]
fn canonical_number(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f == 0.0 => "0".to_owned(),
        Some(f) if f.is_finite() && f.trunc() == f => format!("{f:.0}"),
        _ => n.to_string(),
    }
}

/// Global identity of one entity: `(schema, id)`.
///
/// Used both as the target key of the reference index and as the source half
/// of a [`ReferenceKey`]. Renders and parses as `schema:id`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EntityKey {
    /// Schema name.
    pub schema: String,
    /// Entity id within the schema.
    pub id: EntityId,
}

impl EntityKey {
    /// Builds a key from its parts.
    pub fn new(schema: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self {
            schema: schema.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema, self.id)
    }
}

/// Error returned when parsing an [`EntityKey`] from `schema:id` text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected `schema:id`, got `{0}`")]
pub struct ParseEntityKeyError(String);

impl FromStr for EntityKey {
    type Err = ParseEntityKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((schema, id)) if !schema.is_empty() && !id.is_empty() => {
                Ok(Self::new(schema, id))
            }
            _ => Err(ParseEntityKeyError(s.to_owned())),
        }
    }
}

/// Identity of one reference slot: a source entity plus the field holding
/// the reference.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ReferenceKey {
    /// Entity owning the reference field.
    pub source: EntityKey,
    /// Reference field name on the source schema.
    pub field: String,
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.field)
    }
}
