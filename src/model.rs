//! Record and catalog types.
//!
//! A [`Record`] is keyed by `(item_id, timestamp)` within an identity. Its
//! producer fields come from the agent and are overwritten by every merge;
//! its [`LocalFields`] belong to the user and a merge only fills the ones
//! that are still empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One submission as reported by the agent inside a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub item_id: String,
    pub timestamp: i64,
    pub status: String,
    #[serde(default)]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(flatten)]
    pub local: LocalFields,
}

/// Fields a user may edit directly on a stored record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Minutes spent on the attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_hints: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl LocalFields {
    /// Keep every value already set, take the incoming value for the rest.
    pub fn fill_from(self, incoming: LocalFields) -> LocalFields {
        LocalFields {
            code: self.code.or(incoming.code),
            time_spent: self.time_spent.or(incoming.time_spent),
            notes: self.notes.or(incoming.notes),
            used_hints: self.used_hints.or(incoming.used_hints),
            tags: self.tags.or(incoming.tags),
        }
    }

    /// Apply a direct user edit: every value present in `edit` wins.
    pub fn apply_edit(&mut self, edit: LocalFields) {
        if edit.code.is_some() {
            self.code = edit.code;
        }
        if edit.time_spent.is_some() {
            self.time_spent = edit.time_spent;
        }
        if edit.notes.is_some() {
            self.notes = edit.notes;
        }
        if edit.used_hints.is_some() {
            self.used_hints = edit.used_hints;
        }
        if edit.tags.is_some() {
            self.tags = edit.tags;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == LocalFields::default()
    }
}

/// Storage key of a record within one identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub item_id: String,
    pub timestamp: i64,
}

impl RecordKey {
    pub fn new(item_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            item_id: item_id.into(),
            timestamp,
        }
    }
}

/// A merged, storage-resident submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub item_id: String,
    pub timestamp: i64,
    pub status: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    pub title: String,
    pub difficulty: String,
    #[serde(flatten)]
    pub local: LocalFields,
}

impl Record {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.item_id.clone(), self.timestamp)
    }

    /// Merge a reported submission over whatever is stored for the same key.
    ///
    /// Producer fields always take the reported value. Local fields keep the
    /// stored value when one exists. Merging the same raw record twice gives
    /// the same result.
    pub fn merge(existing: Option<Record>, raw: RawRecord, entry: &CatalogEntry) -> Record {
        let local = match existing {
            Some(stored) => stored.local.fill_from(raw.local),
            None => raw.local,
        };

        Record {
            item_id: raw.item_id,
            timestamp: raw.timestamp,
            status: raw.status,
            language: raw.language,
            runtime: raw.runtime,
            memory: raw.memory,
            title: entry.title.clone(),
            difficulty: entry.difficulty.clone(),
            local,
        }
    }
}

/// Reference metadata for one trackable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub item_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
