//! Prefixed views over a shared store.

use std::{fmt, sync::Arc};

use crate::{
    Batch, Batcher, Iteratee, KeyValueReader, KeyValueStore, KeyValueWriter, KvIterator, KvResult,
    KvSnapshot,
};

fn prefixed(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + key.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(key);
    out
}

fn strip(prefix: Vec<u8>, it: KvIterator) -> KvIterator {
    Box::new(it.map(move |(k, v)| (k[prefix.len()..].to_vec(), v)))
}

/// A table: every key is transparently prefixed with the table's short code.
///
/// Tables share the parent store; iterating a table yields keys with the prefix stripped.
#[derive(Clone)]
pub struct Table {
    store: Arc<dyn KeyValueStore>,
    prefix: Vec<u8>,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table").field("prefix", &String::from_utf8_lossy(&self.prefix)).finish()
    }
}

impl Table {
    /// Opens the table `prefix` inside `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl AsRef<[u8]>) -> Self {
        Self { store, prefix: prefix.as_ref().to_vec() }
    }

    /// Returns the table prefix.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Opens a nested table.
    pub fn sub_table(&self, prefix: impl AsRef<[u8]>) -> Self {
        Self { store: self.store.clone(), prefix: prefixed(&self.prefix, prefix.as_ref()) }
    }
}

impl KeyValueReader for Table {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        self.store.get(&prefixed(&self.prefix, key))
    }

    fn has(&self, key: &[u8]) -> KvResult<bool> {
        self.store.has(&prefixed(&self.prefix, key))
    }
}

impl KeyValueWriter for Table {
    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.store.put(&prefixed(&self.prefix, key), value)
    }

    fn delete(&self, key: &[u8]) -> KvResult<()> {
        self.store.delete(&prefixed(&self.prefix, key))
    }
}

impl Iteratee for Table {
    fn new_iterator(&self, prefix: &[u8], start: &[u8]) -> KvResult<KvIterator> {
        let it = self.store.new_iterator(&prefixed(&self.prefix, prefix), start)?;
        Ok(strip(self.prefix.clone(), it))
    }
}

impl Batcher for Table {
    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(TableBatch { inner: self.store.new_batch(), prefix: self.prefix.clone() })
    }
}

impl KeyValueStore for Table {
    fn get_snapshot(&self) -> KvResult<Arc<dyn KvSnapshot>> {
        Ok(Arc::new(TableSnapshot { inner: self.store.get_snapshot()?, prefix: self.prefix.clone() }))
    }

    /// Tables do not own the parent store, closing one is a no-op.
    fn close(&self) -> KvResult<()> {
        Ok(())
    }

    /// Deletes every entry of the table.
    fn drop_db(&self) -> KvResult<()> {
        let mut batch = self.store.new_batch();
        for (key, _) in self.store.new_iterator(&self.prefix, &[])? {
            batch.delete(&key)?;
        }
        batch.write()
    }

    fn stat(&self, property: &str) -> KvResult<String> {
        self.store.stat(property)
    }
}

struct TableBatch {
    inner: Box<dyn Batch>,
    prefix: Vec<u8>,
}

impl Batch for TableBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.inner.put(&prefixed(&self.prefix, key), value)
    }

    fn delete(&mut self, key: &[u8]) -> KvResult<()> {
        self.inner.delete(&prefixed(&self.prefix, key))
    }

    fn value_size(&self) -> usize {
        self.inner.value_size()
    }

    fn write(&mut self) -> KvResult<()> {
        self.inner.write()
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    fn replay(&self, writer: &dyn KeyValueWriter) -> KvResult<()> {
        self.inner.replay(writer)
    }
}

struct TableSnapshot {
    inner: Arc<dyn KvSnapshot>,
    prefix: Vec<u8>,
}

impl KeyValueReader for TableSnapshot {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        self.inner.get(&prefixed(&self.prefix, key))
    }
}

impl Iteratee for TableSnapshot {
    fn new_iterator(&self, prefix: &[u8], start: &[u8]) -> KvResult<KvIterator> {
        let it = self.inner.new_iterator(&prefixed(&self.prefix, prefix), start)?;
        Ok(strip(self.prefix.clone(), it))
    }
}

impl KvSnapshot for TableSnapshot {
    fn release(&self) {
        self.inner.release()
    }
}
