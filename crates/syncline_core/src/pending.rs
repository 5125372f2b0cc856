//! Locally queued mutations awaiting a successful resend.

use crate::value::{merge_fields, FieldMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A field-level mutation that failed to reach the remote source.
///
/// Created when a partial update fails; destroyed when a later flush for its
/// target succeeds or the owning engine clears its caches. Repeated writes
/// to the same target merge into one entry (later values win) while the
/// `created_at` of the original write is retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    /// Merge target. Absent for single-document engines, whose bound id is
    /// implicit; mandatory for collection engines.
    pub target_id: Option<String>,
    /// The queued field values.
    pub fields: FieldMap,
    /// When the original failed write was queued.
    pub created_at: DateTime<Utc>,
}

impl PendingWrite {
    /// Creates a new pending write timestamped now.
    pub fn new(target_id: Option<&str>, fields: FieldMap) -> Self {
        Self {
            target_id: target_id.map(str::to_string),
            fields,
            created_at: Utc::now(),
        }
    }

    /// Merges later field values into this entry.
    ///
    /// Keys in `fields` override existing values; unmatched keys are
    /// preserved, and `created_at` is left untouched.
    pub fn merge(&mut self, fields: &FieldMap) {
        merge_fields(&mut self.fields, fields);
    }
}

/// Persisted form: one flat object merging metadata and payload fields.
///
/// `{ "target_id"?, "created_at": <epoch ms>, ...fields }`
#[derive(Serialize, Deserialize)]
struct PersistedWrite {
    #[serde(skip_serializing_if = "Option::is_none")]
    target_id: Option<String>,
    created_at: i64,
    #[serde(flatten)]
    fields: FieldMap,
}

impl Serialize for PendingWrite {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PersistedWrite {
            target_id: self.target_id.clone(),
            created_at: self.created_at.timestamp_millis(),
            fields: self.fields.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PendingWrite {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let persisted = PersistedWrite::deserialize(deserializer)?;
        let created_at = DateTime::from_timestamp_millis(persisted.created_at)
            .ok_or_else(|| serde::de::Error::custom("created_at out of range"))?;
        Ok(Self {
            target_id: persisted.target_id,
            fields: persisted.fields,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn fields(pairs: &[(&str, Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn merge_keeps_created_at_and_unmatched_fields() {
        let mut write = PendingWrite::new(Some("u1"), fields(&[("name", Value::from("old"))]));
        let created_at = write.created_at;

        write.merge(&fields(&[
            ("name", Value::from("new")),
            ("count", Value::from(3)),
        ]));

        assert_eq!(write.created_at, created_at);
        assert_eq!(write.fields.get("name"), Some(&Value::from("new")));
        assert_eq!(write.fields.get("count"), Some(&Value::Integer(3)));
    }

    #[test]
    fn persisted_form_is_one_flat_object() {
        let write = PendingWrite::new(Some("u1"), fields(&[("name", Value::from("X"))]));

        let json: serde_json::Value = serde_json::to_value(&write).unwrap();
        assert_eq!(json["target_id"], "u1");
        assert_eq!(json["name"], "X");
        assert!(json["created_at"].is_i64());
    }

    #[test]
    fn absent_target_id_is_omitted() {
        let write = PendingWrite::new(None, fields(&[("a", Value::from(1))]));
        let json: serde_json::Value = serde_json::to_value(&write).unwrap();
        assert!(json.get("target_id").is_none());
    }

    #[test]
    fn round_trip_preserves_entry_to_millisecond() {
        let original = PendingWrite::new(
            Some("doc-1"),
            fields(&[
                ("title", Value::from("hello")),
                ("revision", Value::from(4)),
                ("tags", Value::from(vec!["a", "b"])),
            ]),
        );

        let json = serde_json::to_string(&original).unwrap();
        let restored: PendingWrite = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.target_id, original.target_id);
        assert_eq!(restored.fields, original.fields);
        let drift = (restored.created_at - original.created_at).num_milliseconds().abs();
        assert!(drift <= 1, "created_at drifted by {drift}ms");
    }
}
