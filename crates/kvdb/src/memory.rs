//! In-memory store backed by an ordered map.

use std::{collections::BTreeMap, ops::Bound, sync::Arc};

use parking_lot::RwLock;

use crate::{
    upper_bound, Batch, Batcher, Iteratee, KeyValueReader, KeyValueStore, KeyValueWriter, KvError,
    KvIterator, KvResult, KvSnapshot,
};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// An ordered in-memory key-value store.
///
/// Clones share the same underlying map. Closing any clone closes all of them.
#[derive(Debug, Clone, Default)]
pub struct MemoryDb {
    inner: Arc<RwLock<Option<Map>>>,
}

impl MemoryDb {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(Some(Map::new()))) }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.inner.read().as_ref().map_or(0, |m| m.len())
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn collect_range(map: &Map, prefix: &[u8], start: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut from = prefix.to_vec();
    from.extend_from_slice(start);
    let to = match upper_bound(prefix) {
        Some(limit) => Bound::Excluded(limit),
        None => Bound::Unbounded,
    };
    map.range((Bound::Included(from), to)).map(|(k, v)| (k.clone(), v.clone())).collect()
}

impl KeyValueReader for MemoryDb {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        let guard = self.inner.read();
        let map = guard.as_ref().ok_or(KvError::Closed)?;
        Ok(map.get(key).cloned())
    }
}

impl KeyValueWriter for MemoryDb {
    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let mut guard = self.inner.write();
        let map = guard.as_mut().ok_or(KvError::Closed)?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> KvResult<()> {
        let mut guard = self.inner.write();
        let map = guard.as_mut().ok_or(KvError::Closed)?;
        map.remove(key);
        Ok(())
    }
}

impl Iteratee for MemoryDb {
    fn new_iterator(&self, prefix: &[u8], start: &[u8]) -> KvResult<KvIterator> {
        let guard = self.inner.read();
        let map = guard.as_ref().ok_or(KvError::Closed)?;
        Ok(Box::new(collect_range(map, prefix, start).into_iter()))
    }
}

impl Batcher for MemoryDb {
    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(MemoryBatch { db: self.clone(), writes: Vec::new(), size: 0 })
    }
}

impl KeyValueStore for MemoryDb {
    fn get_snapshot(&self) -> KvResult<Arc<dyn KvSnapshot>> {
        let guard = self.inner.read();
        let map = guard.as_ref().ok_or(KvError::Closed)?;
        Ok(Arc::new(MemorySnapshot { map: Arc::new(map.clone()) }))
    }

    fn close(&self) -> KvResult<()> {
        self.inner.write().take();
        Ok(())
    }

    fn drop_db(&self) -> KvResult<()> {
        self.close()
    }

    fn stat(&self, property: &str) -> KvResult<String> {
        let guard = self.inner.read();
        let map = guard.as_ref().ok_or(KvError::Closed)?;
        match property {
            "entries" => Ok(map.len().to_string()),
            "size" => Ok(map.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>().to_string()),
            other => Err(KvError::UnknownProperty(other.to_string())),
        }
    }
}

#[derive(Debug)]
enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Write batch of a [`MemoryDb`].
#[derive(Debug)]
pub struct MemoryBatch {
    db: MemoryDb,
    writes: Vec<BatchOp>,
    size: usize,
}

impl Batch for MemoryBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.size += key.len() + value.len();
        self.writes.push(BatchOp::Put(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> KvResult<()> {
        self.size += key.len();
        self.writes.push(BatchOp::Delete(key.to_vec()));
        Ok(())
    }

    fn value_size(&self) -> usize {
        self.size
    }

    fn write(&mut self) -> KvResult<()> {
        let mut guard = self.db.inner.write();
        let map = guard.as_mut().ok_or(KvError::Closed)?;
        for op in &self.writes {
            match op {
                BatchOp::Put(k, v) => {
                    map.insert(k.clone(), v.clone());
                }
                BatchOp::Delete(k) => {
                    map.remove(k);
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.writes.clear();
        self.size = 0;
    }

    fn replay(&self, writer: &dyn KeyValueWriter) -> KvResult<()> {
        for op in &self.writes {
            match op {
                BatchOp::Put(k, v) => writer.put(k, v)?,
                BatchOp::Delete(k) => writer.delete(k)?,
            }
        }
        Ok(())
    }
}

/// Frozen copy of a [`MemoryDb`].
#[derive(Debug)]
pub struct MemorySnapshot {
    map: Arc<Map>,
}

impl KeyValueReader for MemorySnapshot {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        Ok(self.map.get(key).cloned())
    }
}

impl Iteratee for MemorySnapshot {
    fn new_iterator(&self, prefix: &[u8], start: &[u8]) -> KvResult<KvIterator> {
        Ok(Box::new(collect_range(&self.map, prefix, start).into_iter()))
    }
}

impl KvSnapshot for MemorySnapshot {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterator_prefix_and_start() {
        let db = MemoryDb::new();
        for key in ["a1", "b1", "b2", "b3", "c1"] {
            let key = key.as_bytes();
            db.put(key, b"v").unwrap();
        }
        let keys: Vec<_> = db.new_iterator(b"b", b"2").unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b2".to_vec(), b"b3".to_vec()]);
    }

    #[test]
    fn test_batch_write_and_replay() {
        let db = MemoryDb::new();
        db.put(b"gone", b"x").unwrap();
        let mut batch = db.new_batch();
        batch.put(b"k", b"value").unwrap();
        batch.delete(b"gone").unwrap();
        assert_eq!(batch.value_size(), 1 + 5 + 4);
        assert_eq!(db.get(b"k").unwrap(), None);
        batch.write().unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"value".to_vec()));
        assert!(!db.has(b"gone").unwrap());

        let other = MemoryDb::new();
        batch.replay(&other).unwrap();
        assert_eq!(other.get(b"k").unwrap(), Some(b"value".to_vec()));
        batch.reset();
        assert_eq!(batch.value_size(), 0);
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let db = MemoryDb::new();
        db.put(b"k", b"1").unwrap();
        let snap = db.get_snapshot().unwrap();
        db.put(b"k", b"2").unwrap();
        assert_eq!(snap.get(b"k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(b"k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let db = MemoryDb::new();
        db.close().unwrap();
        assert_eq!(db.get(b"k"), Err(KvError::Closed));
        assert_eq!(db.put(b"k", b"v"), Err(KvError::Closed));
        assert!(db.stat("entries").is_err());
    }
}
