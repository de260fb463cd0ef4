//! Content hashing for intents and graphs
//!
//! Provides [`ContentHash`], a strongly-typed 32-byte BLAKE3 digest, and the
//! canonical hashing rules every backend and replay run must agree on.
//!
//! The intent digest is BLAKE3 over a domain tag and the compact canonical
//! JSON of every immutable field. `stability` is excluded.

use crate::model::{Constraint, Evidence, Intent, InterfaceSpec};
use chrono::{DateTime, SecondsFormat, Utc};
use rs_merkle::{Hasher, MerkleTree};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

const INTENT_DOMAIN: &[u8] = b"concord/intent/v1";

/// A 32-byte content hash (BLAKE3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create hash from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| HashError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// BLAKE3 of arbitrary data
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// All zeros: the digest of an empty graph
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl Default for ContentHash {
    fn default() -> Self {
        Self([0; 32])
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = ContentHash;

            fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str("a 32-byte hash as hex string or bytes")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                value.parse().map_err(E::custom)
            }

            fn visit_bytes<E>(self, value: &[u8]) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                ContentHash::from_slice(value).map_err(E::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(Visitor)
        } else {
            deserializer.deserialize_bytes(Visitor)
        }
    }
}

/// Errors that can occur when parsing content hashes
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

/// BLAKE3 adapter for `rs_merkle`
#[derive(Debug, Clone, Copy)]
pub struct Blake3Hasher;

impl Hasher for Blake3Hasher {
    type Hash = [u8; 32];

    fn hash(data: &[u8]) -> Self::Hash {
        *blake3::hash(data).as_bytes()
    }
}

fn object<const N: usize>(mut fields: [(&str, Value); N]) -> Value {
    fields.sort_by(|a, b| a.0.cmp(b.0));
    Value::Object(
        fields
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value))
            .collect::<Map<String, Value>>(),
    )
}

fn string_set(items: &BTreeSet<String>) -> Value {
    Value::Array(items.iter().cloned().map(Value::String).collect())
}

fn timestamp(ts: &DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn spec_json(spec: &InterfaceSpec) -> Value {
    object([
        ("name", Value::from(spec.name.as_str())),
        ("kind", Value::from(spec.kind.as_str())),
        ("signature", Value::from(spec.signature.as_str())),
        ("module_path", Value::from(spec.module_path.as_str())),
        ("tags", string_set(&spec.tags)),
    ])
}

fn constraint_json(constraint: &Constraint) -> Value {
    object([
        ("target", Value::from(constraint.target.as_str())),
        ("requirement", Value::from(constraint.requirement.as_str())),
        ("severity", Value::from(constraint.severity.as_str())),
        ("affects_tags", string_set(&constraint.affects_tags)),
    ])
}

fn evidence_json(evidence: &Evidence) -> Value {
    object([
        ("kind", Value::from(evidence.kind.as_str())),
        ("description", Value::from(evidence.description.as_str())),
        ("timestamp", timestamp(&evidence.timestamp)),
    ])
}

/// Canonical JSON of an intent's immutable fields
///
/// Same field names and value shapes as the serde record, minus `stability`,
/// with object keys in sorted order and tag sets as sorted arrays.
#[must_use]
pub fn canonical_json(intent: &Intent) -> Value {
    object([
        ("id", Value::from(intent.id.as_str())),
        ("agent_id", Value::from(intent.agent_id.as_str())),
        ("timestamp", timestamp(&intent.timestamp)),
        ("intent", Value::from(intent.intent.as_str())),
        ("provides", intent.provides.iter().map(spec_json).collect()),
        ("requires", intent.requires.iter().map(spec_json).collect()),
        (
            "constraints",
            intent.constraints.iter().map(constraint_json).collect(),
        ),
        ("evidence", intent.evidence.iter().map(evidence_json).collect()),
        (
            "parent_id",
            intent
                .parent_id
                .as_deref()
                .map_or(Value::Null, Value::from),
        ),
    ])
}

/// Digest of every immutable field of an intent
///
/// BLAKE3 over the domain tag followed by the compact [`canonical_json`]
/// text. `stability` is excluded: it is a recomputable projection.
#[must_use]
pub fn content_hash_intent(intent: &Intent) -> ContentHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(INTENT_DOMAIN);
    hasher.update(canonical_json(intent).to_string().as_bytes());
    ContentHash(*hasher.finalize().as_bytes())
}

/// Merkle root over per-intent digests, in the order given
///
/// Order-sensitive; use [`canonical_graph_hash`] for an order-independent
/// digest. The empty list hashes to zero.
#[must_use]
pub fn content_hash_intents<'a, I>(intents: I) -> ContentHash
where
    I: IntoIterator<Item = &'a Intent>,
{
    let leaves: Vec<[u8; 32]> = intents
        .into_iter()
        .map(|intent| content_hash_intent(intent).0)
        .collect();
    MerkleTree::<Blake3Hasher>::from_leaves(&leaves)
        .root()
        .map_or_else(ContentHash::default, ContentHash)
}

/// Digest of a graph's intent set, independent of insertion order
#[must_use]
pub fn canonical_graph_hash<'a, I>(intents: I) -> ContentHash
where
    I: IntoIterator<Item = &'a Intent>,
{
    let mut sorted: Vec<&Intent> = intents.into_iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    content_hash_intents(sorted)
}
