//! In-memory store for tests and dry runs.

use super::{Space, Store, StoreResult, WriteBatch};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct MemoryStore {
    spaces: RwLock<HashMap<Space, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, space: Space) -> usize {
        self.spaces.read().get(&space).map_or(0, |m| m.len())
    }
}

impl Store for MemoryStore {
    fn get(&self, space: Space, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .spaces
            .read()
            .get(&space)
            .and_then(|m| m.get(key).cloned()))
    }

    fn put(&self, space: Space, key: &str, value: &[u8]) -> StoreResult<()> {
        self.spaces
            .write()
            .entry(space)
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn scan_prefix(&self, space: Space, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let spaces = self.spaces.read();
        let Some(map) = spaces.get(&space) else {
            return Ok(Vec::new());
        };
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        // One write lock for the whole batch
        let mut spaces = self.spaces.write();
        for (space, key, value) in batch.puts {
            spaces.entry(space).or_default().insert(key, value);
        }
        Ok(())
    }
}
