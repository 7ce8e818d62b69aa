//! Partition engine: named, ordered byte-keyed maps with transactional
//! access and single-file persistence.

use crate::snapshot;
use crate::tx::{ReadTx, WriteTx};
use burrow_common::{BurrowError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One named partition: an ordered mapping from byte keys to byte values.
pub(crate) type PartitionMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// The full partition set held in memory.
#[derive(Default, Debug)]
pub(crate) struct TreeInner {
    pub(crate) partitions: BTreeMap<Vec<u8>, PartitionMap>,
}

/// An ordered partition store backed by a single file.
///
/// Readers run without writers (shared lock); at most one write transaction
/// is open at a time (exclusive lock). A write transaction stages its edits
/// and applies them on commit; the committed state is persisted by writing a
/// fresh snapshot to a temporary file and renaming it over the store file.
/// Dropping a write transaction without committing discards its edits.
#[derive(Debug)]
pub struct Tree {
    path: PathBuf,
    pub(crate) inner: RwLock<TreeInner>,
}

impl Tree {
    /// Opens the partition store at `path`, creating it if absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let inner = match std::fs::read(&path) {
            Ok(data) if data.is_empty() => TreeInner::default(),
            Ok(data) => TreeInner {
                partitions: snapshot::decode(&path, &data)?,
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let inner = TreeInner::default();
                snapshot::persist(&path, &inner.partitions)?;
                inner
            }
            Err(e) => {
                return Err(BurrowError::FileSystem {
                    path,
                    operation: "open",
                    source: e,
                });
            }
        };
        Ok(Self {
            path,
            inner: RwLock::new(inner),
        })
    }

    /// Returns the store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begins a read transaction.
    pub fn begin_read(&self) -> ReadTx<'_> {
        ReadTx::new(self.inner.read())
    }

    /// Begins a write transaction.
    pub fn begin_write(&self) -> WriteTx<'_> {
        WriteTx::new(&self.path, self.inner.write())
    }

    /// Persists the current state to disk.
    pub fn persist(&self) -> Result<()> {
        let inner = self.inner.read();
        snapshot::persist(&self.path, &inner.partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let _tree = Tree::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_put_and_get() {
        let dir = tempdir().unwrap();
        let tree = Tree::open(dir.path().join("test.db")).unwrap();

        let mut tx = tree.begin_write();
        tx.create_partition(b"users");
        tx.put(b"users", b"k1", b"v1");
        tx.commit().unwrap();

        let read = tree.begin_read();
        let partition = read.partition(b"users").unwrap();
        assert_eq!(partition.get(b"k1"), Some(&b"v1"[..]));
        assert_eq!(partition.get(b"missing"), None);
    }

    #[test]
    fn test_missing_partition() {
        let dir = tempdir().unwrap();
        let tree = Tree::open(dir.path().join("test.db")).unwrap();
        let read = tree.begin_read();
        assert!(read.partition(b"absent").is_none());
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let tree = Tree::open(dir.path().join("test.db")).unwrap();

        let mut tx = tree.begin_write();
        tx.create_partition(b"users");
        tx.put(b"users", b"k1", b"v1");
        tx.commit().unwrap();

        let mut tx = tree.begin_write();
        tx.delete(b"users", b"k1");
        tx.commit().unwrap();

        let read = tree.begin_read();
        assert_eq!(read.partition(b"users").unwrap().get(b"k1"), None);
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let dir = tempdir().unwrap();
        let tree = Tree::open(dir.path().join("test.db")).unwrap();

        {
            let mut tx = tree.begin_write();
            tx.create_partition(b"users");
            tx.put(b"users", b"k1", b"v1");
            // dropped without commit
        }

        let read = tree.begin_read();
        assert!(read.partition(b"users").is_none());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let tree = Tree::open(&path).unwrap();
            let mut tx = tree.begin_write();
            tx.create_partition(b"users");
            tx.put(b"users", b"k1", b"v1");
            tx.put(b"users", b"k2", b"v2");
            tx.commit().unwrap();
        }

        let tree = Tree::open(&path).unwrap();
        let read = tree.begin_read();
        let partition = read.partition(b"users").unwrap();
        assert_eq!(partition.get(b"k1"), Some(&b"v1"[..]));
        assert_eq!(partition.get(b"k2"), Some(&b"v2"[..]));
        assert_eq!(partition.len(), 2);
    }

    #[test]
    fn test_iteration_is_ordered() {
        let dir = tempdir().unwrap();
        let tree = Tree::open(dir.path().join("test.db")).unwrap();

        let mut tx = tree.begin_write();
        tx.create_partition(b"p");
        tx.put(b"p", b"c", b"3");
        tx.put(b"p", b"a", b"1");
        tx.put(b"p", b"b", b"2");
        tx.commit().unwrap();

        let read = tree.begin_read();
        let partition = read.partition(b"p").unwrap();
        let keys: Vec<_> = partition.iter().map(|(k, _)| k.to_vec()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        let rev: Vec<_> = partition.iter_rev().map(|(k, _)| k.to_vec()).collect();
        assert_eq!(rev, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_range_from_seeks() {
        let dir = tempdir().unwrap();
        let tree = Tree::open(dir.path().join("test.db")).unwrap();

        let mut tx = tree.begin_write();
        tx.create_partition(b"p");
        for key in [&b"apple"[..], b"banana", b"cherry"] {
            tx.put(b"p", key, b"");
        }
        tx.commit().unwrap();

        let read = tree.begin_read();
        let partition = read.partition(b"p").unwrap();
        let keys: Vec<_> = partition
            .range_from(b"banana")
            .map(|(k, _)| k.to_vec())
            .collect();
        assert_eq!(keys, vec![b"banana".to_vec(), b"cherry".to_vec()]);
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let tree = Tree::open(&path).unwrap();
            let mut tx = tree.begin_write();
            tx.create_partition(b"users");
            tx.put(b"users", b"k1", b"v1");
            tx.commit().unwrap();
        }

        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();

        let err = Tree::open(&path).unwrap_err();
        assert!(matches!(err, BurrowError::TreeCorrupted { .. }));
    }

    #[test]
    fn test_read_does_not_see_open_write() {
        let dir = tempdir().unwrap();
        let tree = Tree::open(dir.path().join("test.db")).unwrap();

        let mut tx = tree.begin_write();
        tx.create_partition(b"p");
        tx.put(b"p", b"k", b"v");
        tx.commit().unwrap();

        let mut tx = tree.begin_write();
        tx.put(b"p", b"k", b"updated");
        drop(tx);

        let read = tree.begin_read();
        assert_eq!(read.partition(b"p").unwrap().get(b"k"), Some(&b"v"[..]));
    }
}
