//! In-memory key-value store

use crate::{DbResult, KeyValueDB};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Thread-safe in-memory [`KeyValueDB`]
#[derive(Debug, Default)]
pub struct MemoryDB {
    inner: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDB {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl KeyValueDB for MemoryDB {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.inner.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> DbResult<()> {
        self.inner.write().remove(key);
        Ok(())
    }
}
