//! Read and write transactions over the partition store.

use crate::snapshot;
use crate::tree::{PartitionMap, TreeInner};
use burrow_common::Result;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

/// A read transaction. Holds a shared lock; the view is stable for the
/// lifetime of the transaction.
pub struct ReadTx<'a> {
    guard: RwLockReadGuard<'a, TreeInner>,
}

impl<'a> ReadTx<'a> {
    pub(crate) fn new(guard: RwLockReadGuard<'a, TreeInner>) -> Self {
        Self { guard }
    }

    /// Returns a handle to the named partition, if it exists.
    pub fn partition(&self, name: &[u8]) -> Option<Partition<'_>> {
        self.guard
            .partitions
            .get(name)
            .map(|map| Partition { map })
    }
}

/// A read-only view of one partition.
pub struct Partition<'a> {
    map: &'a PartitionMap,
}

impl<'a> Partition<'a> {
    /// Looks up a key.
    pub fn get(&self, key: &[u8]) -> Option<&'a [u8]> {
        self.map.get(key).map(Vec::as_slice)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the partition holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        self.map.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Iterates entries in descending key order.
    pub fn iter_rev(&self) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        self.map
            .iter()
            .rev()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Cursor seek: iterates entries with key >= `start` in ascending order.
    pub fn range_from(&self, start: &[u8]) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        self.map
            .range((Bound::Included(start.to_vec()), Bound::Unbounded))
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }
}

#[derive(Default)]
struct PartitionEdit {
    created: bool,
    edits: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

/// A write transaction. Holds the exclusive lock; edits are staged and only
/// become visible (and durable) at [`WriteTx::commit`]. Dropping the
/// transaction discards the staged edits.
pub struct WriteTx<'a> {
    path: &'a Path,
    guard: RwLockWriteGuard<'a, TreeInner>,
    staged: BTreeMap<Vec<u8>, PartitionEdit>,
}

impl<'a> WriteTx<'a> {
    pub(crate) fn new(path: &'a Path, guard: RwLockWriteGuard<'a, TreeInner>) -> Self {
        Self {
            path,
            guard,
            staged: BTreeMap::new(),
        }
    }

    /// Ensures the named partition exists after commit.
    pub fn create_partition(&mut self, name: &[u8]) {
        self.staged.entry(name.to_vec()).or_default().created = true;
    }

    /// Stages an insert or overwrite.
    pub fn put(&mut self, partition: &[u8], key: &[u8], value: &[u8]) {
        self.staged
            .entry(partition.to_vec())
            .or_default()
            .edits
            .insert(key.to_vec(), Some(value.to_vec()));
    }

    /// Stages a removal. Removing an absent key is a no-op.
    pub fn delete(&mut self, partition: &[u8], key: &[u8]) {
        self.staged
            .entry(partition.to_vec())
            .or_default()
            .edits
            .insert(key.to_vec(), None);
    }

    /// Applies the staged edits and persists the result.
    pub fn commit(mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        for (name, edit) in std::mem::take(&mut self.staged) {
            let partition = self.guard.partitions.entry(name).or_default();
            for (key, value) in edit.edits {
                match value {
                    Some(value) => {
                        partition.insert(key, value);
                    }
                    None => {
                        partition.remove(&key);
                    }
                }
            }
        }

        snapshot::persist(self.path, &self.guard.partitions)
    }
}
