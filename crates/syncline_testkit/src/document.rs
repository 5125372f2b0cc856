//! A small concrete document for tests.

use serde::{Deserialize, Serialize};
use syncline_core::{Document, FieldMap, Value};

/// A minimal synchronizable document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDocument {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Monotonic revision, bumped by the in-memory services on patch.
    pub revision: i64,
}

impl TestDocument {
    /// Creates a document at revision zero.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            revision: 0,
        }
    }

    /// Applies a field map the way the in-memory services do: `name` is
    /// the only patchable field, and any patch bumps the revision.
    pub fn apply_fields(&mut self, fields: &FieldMap) {
        if let Some(Value::Text(name)) = fields.get("name") {
            self.name = name.clone();
        }
        self.revision += 1;
    }
}

impl Document for TestDocument {
    fn id(&self) -> &str {
        &self.id
    }
}
