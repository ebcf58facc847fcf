//! Persistent sync state.
//!
//! [`Store`] is the raw key-value contract: three spaces, point reads and
//! writes, prefix scans and an atomic multi-key batch. [`Repository`] puts
//! typed access on top for watermarks, records and the catalog.
//!
//! Key layout:
//!
//! ```text
//! records  {identity}\0{item_id}\0{timestamp:020}  -> Record (JSON)
//! catalog  {item_id}                               -> CatalogEntry (JSON)
//! meta     watermark\0{identity}                   -> i64 (JSON)
//! meta     catalog_refreshed_at                    -> DateTime<Utc> (JSON)
//! ```

pub mod disk;
pub mod memory;

use crate::error::StoreError;
use crate::model::{CatalogEntry, LocalFields, Record, RecordKey};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub use self::disk::FjallStore;
pub use self::memory::MemoryStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

const SEP: char = '\0';
const CATALOG_REFRESHED_AT: &str = "catalog_refreshed_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Space {
    Records,
    Catalog,
    Meta,
}

impl Space {
    pub fn as_str(&self) -> &'static str {
        match self {
            Space::Records => "records",
            Space::Catalog => "catalog",
            Space::Meta => "meta",
        }
    }
}

/// Writes applied all-or-nothing by [`Store::commit`].
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    pub(crate) puts: Vec<(Space, String, Vec<u8>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, space: Space, key: impl Into<String>, value: Vec<u8>) {
        self.puts.push((space, key.into(), value));
    }

    pub fn put_json<T: Serialize>(
        &mut self,
        space: Space,
        key: impl Into<String>,
        value: &T,
    ) -> StoreResult<()> {
        self.put(space, key, serde_json::to_vec(value)?);
        Ok(())
    }
}

/// Key-value backend. Single-key writes and whole batches are atomic.
pub trait Store: Send + Sync {
    fn get(&self, space: Space, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn put(&self, space: Space, key: &str, value: &[u8]) -> StoreResult<()>;

    /// All pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, space: Space, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    fn commit(&self, batch: WriteBatch) -> StoreResult<()>;
}

/// Typed access to sync state.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
}

impl Repository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn get_json<T: DeserializeOwned>(&self, space: Space, key: &str) -> StoreResult<Option<T>> {
        match self.store.get(space, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, space: Space, key: &str, value: &T) -> StoreResult<()> {
        self.store.put(space, key, &serde_json::to_vec(value)?)
    }

    // -------------------------------------------------------------------------
    // Watermark
    // -------------------------------------------------------------------------

    fn watermark_key(identity: &str) -> String {
        format!("watermark{SEP}{identity}")
    }

    /// Highest merged timestamp for `identity`, 0 if never synced.
    pub fn watermark(&self, identity: &str) -> StoreResult<i64> {
        Ok(self
            .get_json::<i64>(Space::Meta, &Self::watermark_key(identity))?
            .unwrap_or(0))
    }

    /// Store `max(current, candidate)` and return the stored value.
    pub fn advance_watermark(&self, identity: &str, candidate: i64) -> StoreResult<i64> {
        let current = self.watermark(identity)?;
        if candidate <= current {
            return Ok(current);
        }
        self.put_json(Space::Meta, &Self::watermark_key(identity), &candidate)?;
        Ok(candidate)
    }

    // -------------------------------------------------------------------------
    // Records
    // -------------------------------------------------------------------------

    fn record_prefix(identity: &str) -> String {
        format!("{identity}{SEP}")
    }

    fn record_key(identity: &str, key: &RecordKey) -> String {
        // Sign bit flipped and zero-padded: distinct for every i64 and sorted
        // by timestamp within an item, negatives included
        let ordered = (key.timestamp as u64) ^ (1 << 63);
        format!("{identity}{SEP}{}{SEP}{:020}", key.item_id, ordered)
    }

    pub fn record(&self, identity: &str, key: &RecordKey) -> StoreResult<Option<Record>> {
        self.get_json(Space::Records, &Self::record_key(identity, key))
    }

    pub fn upsert_record(&self, identity: &str, record: &Record) -> StoreResult<()> {
        self.put_json(
            Space::Records,
            &Self::record_key(identity, &record.key()),
            record,
        )
    }

    /// All stored records for `identity`, newest first.
    pub fn records(&self, identity: &str) -> StoreResult<Vec<Record>> {
        let mut records = self
            .store
            .scan_prefix(Space::Records, &Self::record_prefix(identity))?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice::<Record>(&bytes))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Apply a direct user edit to a stored record. Returns the updated
    /// record, or `None` when no record exists under `key`.
    pub fn update_local_fields(
        &self,
        identity: &str,
        key: &RecordKey,
        edit: LocalFields,
    ) -> StoreResult<Option<Record>> {
        let Some(mut record) = self.record(identity, key)? else {
            return Ok(None);
        };
        record.local.apply_edit(edit);
        self.upsert_record(identity, &record)?;
        Ok(Some(record))
    }

    // -------------------------------------------------------------------------
    // Catalog
    // -------------------------------------------------------------------------

    pub fn catalog_entry(&self, item_id: &str) -> StoreResult<Option<CatalogEntry>> {
        self.get_json(Space::Catalog, item_id)
    }

    pub fn catalog_refreshed_at(&self) -> StoreResult<Option<DateTime<Utc>>> {
        self.get_json(Space::Meta, CATALOG_REFRESHED_AT)
    }

    /// Write `entries` and the refresh time in one atomic batch.
    pub fn store_catalog(
        &self,
        entries: &[CatalogEntry],
        refreshed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        for entry in entries {
            batch.put_json(Space::Catalog, entry.item_id.clone(), entry)?;
        }
        batch.put_json(Space::Meta, CATALOG_REFRESHED_AT, &refreshed_at)?;
        self.store.commit(batch)
    }

    pub fn catalog_len(&self) -> StoreResult<usize> {
        Ok(self.store.scan_prefix(Space::Catalog, "")?.len())
    }
}
