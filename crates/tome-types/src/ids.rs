use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a blob in the content store.
///
/// Ids are generated by the store on `put` and are never reused. A bundle
/// carries the ids that were live when it was exported; those are only
/// lookup keys inside the bundle and never become live ids on import.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    /// Generate a fresh, time-ordered blob id (UUID v7).
    pub fn generate() -> Self {
        Self(format!("blob-{}", uuid::Uuid::now_v7()))
    }

    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form used in log lines.
    pub fn short_id(&self) -> &str {
        let s = self.0.strip_prefix("blob-").unwrap_or(&self.0);
        match s.char_indices().nth(8) {
            Some((end, _)) => &s[..end],
            None => s,
        }
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.0)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a text record.
///
/// Unlike blob ids, text keys are chosen by the caller (usually one logical
/// note slot per entity) and survive export/import unchanged.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextKey(String);

impl TextKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The note slot belonging to a tracker entity or other owner.
    pub fn for_entity(kind: &str, id: &str) -> Self {
        Self(format!("note:{kind}:{id}"))
    }

    /// A key for a slot without a logical owner.
    pub fn generate() -> Self {
        Self(format!("text-{}", uuid::Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TextKey({})", self.0)
    }
}

impl fmt::Display for TextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a map entry.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(String);

impl MapId {
    pub fn generate() -> Self {
        Self(format!("map-{}", uuid::Uuid::now_v7()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapId({})", self.0)
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
