//! Database traits and interfaces

use crate::DbResult;
use std::sync::Arc;

/// Permanent key-value store
pub trait KeyValueDB: Send + Sync {
    /// Get value by key
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    /// Put key-value pair
    fn set(&self, key: &[u8], value: &[u8]) -> DbResult<()>;

    /// Delete key
    fn delete(&self, key: &[u8]) -> DbResult<()>;

    /// Check if key exists
    fn exists(&self, key: &[u8]) -> DbResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Shared database reference
pub type SharedDatabase = Arc<dyn KeyValueDB>;

/// Database operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered list of writes applied to a store in one pass
#[derive(Debug, Default)]
pub struct WriteBatch {
    operations: Vec<Operation>,
}

impl WriteBatch {
    /// Create new write batch
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    /// Add put operation
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> &mut Self {
        self.operations.push(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self
    }

    /// Add delete operation
    pub fn delete(&mut self, key: &[u8]) -> &mut Self {
        self.operations.push(Operation::Delete { key: key.to_vec() });
        self
    }

    /// Apply all operations in order
    pub fn execute(self, db: &dyn KeyValueDB) -> DbResult<()> {
        for operation in self.operations {
            match operation {
                Operation::Put { key, value } => db.set(&key, &value)?,
                Operation::Delete { key } => db.delete(&key)?,
            }
        }
        Ok(())
    }

    /// Get number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if batch is empty
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
