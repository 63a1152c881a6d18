//! Journaled key-value overlay
//!
//! Writes land in an arena of changesets indexed by monotonic checkpoint ids.
//! Nested checkpoints form a stack: discarding a checkpoint prunes it together
//! with everything recorded after it, committing splices it (and everything
//! after it) into its parent. Nothing reaches the permanent store until
//! [`JournalDB::persist`] is called on the root journal.

use crate::{DbError, DbResult, SharedDatabase, WriteBatch};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Identifier returned by [`JournalDB::record`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckpointId(u64);

impl CheckpointId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum JournalValue {
    Set(Vec<u8>),
    Deleted,
}

type Changes = BTreeMap<Vec<u8>, JournalValue>;

#[derive(Debug)]
struct Changeset {
    id: CheckpointId,
    changes: Changes,
}

/// Journaled overlay over a permanent store
pub struct JournalDB {
    db: SharedDatabase,
    /// Changes not covered by any open checkpoint
    root: Changes,
    /// Open checkpoints, oldest first
    changesets: Vec<Changeset>,
    next_id: u64,
}

impl JournalDB {
    pub fn new(db: SharedDatabase) -> Self {
        Self {
            db,
            root: Changes::new(),
            changesets: Vec::new(),
            next_id: 0,
        }
    }

    /// Underlying permanent store
    pub fn permanent_store(&self) -> &SharedDatabase {
        &self.db
    }

    pub fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        let layers = self
            .changesets
            .iter()
            .rev()
            .map(|changeset| &changeset.changes)
            .chain(std::iter::once(&self.root));

        for changes in layers {
            match changes.get(key) {
                Some(JournalValue::Set(value)) => return Ok(Some(value.clone())),
                Some(JournalValue::Deleted) => return Ok(None),
                None => {}
            }
        }

        self.db.get(key)
    }

    pub fn exists(&self, key: &[u8]) -> DbResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.current_mut()
            .insert(key.to_vec(), JournalValue::Set(value.to_vec()));
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.current_mut().insert(key.to_vec(), JournalValue::Deleted);
    }

    fn current_mut(&mut self) -> &mut Changes {
        match self.changesets.last_mut() {
            Some(changeset) => &mut changeset.changes,
            None => &mut self.root,
        }
    }

    /// Open a new checkpoint
    pub fn record(&mut self) -> CheckpointId {
        let id = CheckpointId(self.next_id);
        self.next_id += 1;
        self.changesets.push(Changeset {
            id,
            changes: Changes::new(),
        });
        id
    }

    fn position(&self, id: CheckpointId) -> DbResult<usize> {
        self.changesets
            .iter()
            .position(|changeset| changeset.id == id)
            .ok_or(DbError::UnknownCheckpoint(id.0))
    }

    /// Roll back every change made since `id`, including nested checkpoints
    pub fn discard(&mut self, id: CheckpointId) -> DbResult<()> {
        let position = self.position(id)?;
        let dropped = self.changesets.len() - position;
        self.changesets.truncate(position);
        debug!("Discarded checkpoint {} ({} changeset(s))", id, dropped);
        Ok(())
    }

    /// Merge every change made since `id` into the enclosing scope
    pub fn commit(&mut self, id: CheckpointId) -> DbResult<()> {
        let position = self.position(id)?;
        let merged: Vec<Changeset> = self.changesets.drain(position..).collect();

        let target = match self.changesets.last_mut() {
            Some(parent) => &mut parent.changes,
            None => &mut self.root,
        };
        for changeset in merged {
            target.extend(changeset.changes);
        }
        Ok(())
    }

    /// Number of checkpoints currently open
    pub fn open_checkpoints(&self) -> usize {
        self.changesets.len()
    }

    /// True if any change is pending in the journal
    pub fn has_changes(&self) -> bool {
        !self.root.is_empty() || self.changesets.iter().any(|c| !c.changes.is_empty())
    }

    /// Flush the root journal to the permanent store
    pub fn persist(&mut self) -> DbResult<()> {
        if !self.changesets.is_empty() {
            return Err(DbError::PersistWithOpenCheckpoints(self.changesets.len()));
        }

        let mut batch = WriteBatch::new();
        for (key, value) in std::mem::take(&mut self.root) {
            match value {
                JournalValue::Set(value) => batch.put(&key, &value),
                JournalValue::Deleted => batch.delete(&key),
            };
        }

        debug!("Persisting {} journal entries", batch.len());
        batch.execute(self.db.as_ref())
    }

    /// Drop every pending change, including open checkpoints
    pub fn reset(&mut self) {
        self.root.clear();
        self.changesets.clear();
    }
}

impl fmt::Debug for JournalDB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JournalDB")
            .field("root_entries", &self.root.len())
            .field("open_checkpoints", &self.changesets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyValueDB, MemoryDB};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn new_journal() -> (Arc<MemoryDB>, JournalDB) {
        let db = Arc::new(MemoryDB::new());
        let journal = JournalDB::new(db.clone());
        (db, journal)
    }

    #[test]
    fn test_reads_fall_through_to_permanent_store() {
        let (db, mut journal) = new_journal();
        db.set(b"a", b"1").unwrap();

        assert_eq!(journal.get(b"a").unwrap(), Some(b"1".to_vec()));
        journal.delete(b"a");
        assert_eq!(journal.get(b"a").unwrap(), None);
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_discard_restores_previous_values() {
        let (_db, mut journal) = new_journal();
        journal.set(b"a", b"1");

        let checkpoint = journal.record();
        journal.set(b"a", b"2");
        journal.set(b"b", b"3");
        journal.discard(checkpoint).unwrap();

        assert_eq!(journal.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(journal.get(b"b").unwrap(), None);
        assert_eq!(journal.open_checkpoints(), 0);
    }

    #[test]
    fn test_nested_discard_then_commit() {
        let (_db, mut journal) = new_journal();

        let outer = journal.record();
        journal.set(b"a", b"1");
        let inner = journal.record();
        journal.set(b"b", b"2");
        journal.discard(inner).unwrap();
        journal.commit(outer).unwrap();

        assert_eq!(journal.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(journal.get(b"b").unwrap(), None);
    }

    #[test]
    fn test_discarding_outer_drops_descendants() {
        let (_db, mut journal) = new_journal();

        let outer = journal.record();
        journal.set(b"a", b"1");
        let inner = journal.record();
        journal.set(b"b", b"2");
        journal.discard(outer).unwrap();

        assert_eq!(journal.get(b"a").unwrap(), None);
        assert_eq!(journal.get(b"b").unwrap(), None);
        assert!(matches!(
            journal.commit(inner),
            Err(DbError::UnknownCheckpoint(_))
        ));
    }

    #[test]
    fn test_commit_does_not_touch_permanent_store() {
        let (db, mut journal) = new_journal();

        let checkpoint = journal.record();
        journal.set(b"a", b"1");
        journal.commit(checkpoint).unwrap();

        assert_eq!(db.get(b"a").unwrap(), None);
        journal.persist().unwrap();
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(!journal.has_changes());
    }

    #[test]
    fn test_persist_requires_root_journal() {
        let (db, mut journal) = new_journal();
        journal.set(b"a", b"1");
        let checkpoint = journal.record();

        assert!(matches!(
            journal.persist(),
            Err(DbError::PersistWithOpenCheckpoints(1))
        ));
        assert_eq!(db.get(b"a").unwrap(), None);

        journal.commit(checkpoint).unwrap();
        journal.persist().unwrap();
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_persist_applies_deletions() {
        let (db, mut journal) = new_journal();
        db.set(b"a", b"1").unwrap();

        journal.delete(b"a");
        journal.persist().unwrap();
        assert_eq!(db.get(b"a").unwrap(), None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(u8, u8),
        Delete(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6, any::<u8>()).prop_map(|(k, v)| Op::Set(k, v)),
            (0u8..6).prop_map(Op::Delete),
        ]
    }

    fn apply(journal: &mut JournalDB, ops: &[Op]) {
        for op in ops {
            match op {
                Op::Set(k, v) => journal.set(&[*k], &[*v]),
                Op::Delete(k) => journal.delete(&[*k]),
            }
        }
    }

    fn view(journal: &JournalDB) -> Vec<Option<Vec<u8>>> {
        (0u8..6).map(|k| journal.get(&[k]).unwrap()).collect()
    }

    proptest! {
        #[test]
        fn prop_discard_restores_state(
            before in prop::collection::vec(op_strategy(), 0..12),
            after in prop::collection::vec(op_strategy(), 0..12),
        ) {
            let (_db, mut journal) = new_journal();
            apply(&mut journal, &before);
            let expected = view(&journal);

            let checkpoint = journal.record();
            apply(&mut journal, &after);
            journal.discard(checkpoint).unwrap();

            prop_assert_eq!(view(&journal), expected);
        }

        #[test]
        fn prop_nested_discard_keeps_outer_changes(
            a in prop::collection::vec(op_strategy(), 0..12),
            b in prop::collection::vec(op_strategy(), 0..12),
        ) {
            let (_db, mut reference) = new_journal();
            apply(&mut reference, &a);

            let (_db, mut journal) = new_journal();
            let outer = journal.record();
            apply(&mut journal, &a);
            let inner = journal.record();
            apply(&mut journal, &b);
            journal.discard(inner).unwrap();
            journal.commit(outer).unwrap();

            prop_assert_eq!(view(&journal), view(&reference));
        }
    }
}
