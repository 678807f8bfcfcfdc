use serde_json::{Map, Value};
use tome_types::CURRENT_SCHEMA_VERSION;

/// A raw stored snapshot, discriminated by layout before any field is read.
///
/// This is the only place where historical shapes are named; the rest of
/// the workspace only ever sees a migrated [`AppState`](tome_types::AppState).
#[derive(Debug)]
pub enum StoredSnapshot<'a> {
    /// Not a JSON object at all.
    Unreadable,
    /// Schema 1–2: one implicit map whose background, drawing, brush and
    /// colour live on the `map` object or at the top level.
    SingleMap {
        version: u32,
        root: &'a Map<String, Value>,
    },
    /// Schema 3 and later: `map.maps` is a list of entries.
    MultiMap {
        version: u32,
        root: &'a Map<String, Value>,
    },
}

impl<'a> StoredSnapshot<'a> {
    pub fn classify(raw: &'a Value) -> Self {
        let Some(root) = raw.as_object() else {
            return StoredSnapshot::Unreadable;
        };
        let version = declared_version(root);
        let multi = root
            .get("map")
            .and_then(|m| m.get("maps"))
            .map(Value::is_array)
            .unwrap_or(false);
        if multi {
            StoredSnapshot::MultiMap { version, root }
        } else {
            StoredSnapshot::SingleMap { version, root }
        }
    }

    /// The declared schema version (1 when absent or malformed).
    pub fn version(&self) -> Option<u32> {
        match self {
            StoredSnapshot::Unreadable => None,
            StoredSnapshot::SingleMap { version, .. } | StoredSnapshot::MultiMap { version, .. } => {
                Some(*version)
            }
        }
    }

    /// Whether the document was written by a newer build.
    pub fn is_future(&self) -> bool {
        self.version().map(|v| v > CURRENT_SCHEMA_VERSION).unwrap_or(false)
    }
}

fn declared_version(root: &Map<String, Value>) -> u32 {
    root.get("schemaVersion")
        .and_then(Value::as_u64)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
        .filter(|v| *v > 0)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_layouts() {
        let single = json!({ "schemaVersion": 2, "map": { "brushSize": 3 } });
        assert!(matches!(
            StoredSnapshot::classify(&single),
            StoredSnapshot::SingleMap { version: 2, .. }
        ));

        let multi = json!({ "schemaVersion": 3, "map": { "maps": [] } });
        assert!(matches!(
            StoredSnapshot::classify(&multi),
            StoredSnapshot::MultiMap { version: 3, .. }
        ));

        assert!(matches!(
            StoredSnapshot::classify(&json!("text")),
            StoredSnapshot::Unreadable
        ));
    }

    #[test]
    fn missing_or_bad_version_is_one() {
        for raw in [json!({}), json!({ "schemaVersion": "3" }), json!({ "schemaVersion": 0 })] {
            assert_eq!(StoredSnapshot::classify(&raw).version(), Some(1));
        }
    }

    #[test]
    fn future_versions_are_flagged() {
        let raw = json!({ "schemaVersion": 99, "map": { "maps": [] } });
        let snapshot = StoredSnapshot::classify(&raw);
        assert!(snapshot.is_future());
        assert_eq!(snapshot.version(), Some(99));
    }
}
