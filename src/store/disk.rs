//! Persistent store on a fjall keyspace, one partition per [`Space`].

use super::{Space, Store, StoreResult, WriteBatch};
use crate::error::StoreError;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;

pub struct FjallStore {
    keyspace: Keyspace,
    records: PartitionHandle,
    catalog: PartitionHandle,
    meta: PartitionHandle,
}

impl FjallStore {
    /// Open or create the keyspace under `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(path)?;

        let keyspace = Config::new(path).open()?;
        let open = |space: Space| {
            keyspace.open_partition(space.as_str(), PartitionCreateOptions::default())
        };

        let records = open(Space::Records)?;
        let catalog = open(Space::Catalog)?;
        let meta = open(Space::Meta)?;

        tracing::debug!("Opened sync store at {}", path.display());

        Ok(Self {
            keyspace,
            records,
            catalog,
            meta,
        })
    }

    fn partition(&self, space: Space) -> &PartitionHandle {
        match space {
            Space::Records => &self.records,
            Space::Catalog => &self.catalog,
            Space::Meta => &self.meta,
        }
    }

    /// Flush the journal to disk.
    pub fn persist(&self) -> StoreResult<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

fn decode_key(bytes: &[u8]) -> StoreResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| StoreError::CorruptKey(e.to_string()))
}

impl Store for FjallStore {
    fn get(&self, space: Space, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.partition(space).get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, space: Space, key: &str, value: &[u8]) -> StoreResult<()> {
        self.partition(space).insert(key, value)?;
        Ok(())
    }

    fn scan_prefix(&self, space: Space, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.partition(space).prefix(prefix) {
            let (key, value) = item?;
            out.push((decode_key(&key)?, value.to_vec()));
        }
        Ok(out)
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut fj_batch = self.keyspace.batch();
        for (space, key, value) in batch.puts {
            fj_batch.insert(self.partition(space), key.into_bytes(), value);
        }
        fj_batch.commit()?;
        Ok(())
    }
}
