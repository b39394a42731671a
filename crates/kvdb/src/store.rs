//! Storage traits consumed by the node.

use std::sync::Arc;

use auto_impl::auto_impl;

use crate::KvResult;

/// A key-value pair yielded by an iterator.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Owned, ascending-by-key iterator over a store or snapshot.
pub type KvIterator = Box<dyn Iterator<Item = KvPair> + Send>;

/// Point reads.
#[auto_impl(&, Box, Arc)]
pub trait KeyValueReader: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Returns `true` if a value is stored under `key`.
    fn has(&self, key: &[u8]) -> KvResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Point writes.
#[auto_impl(&, Box, Arc)]
pub trait KeyValueWriter: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    fn delete(&self, key: &[u8]) -> KvResult<()>;
}

/// Ordered iteration.
#[auto_impl(&, Box, Arc)]
pub trait Iteratee: Send + Sync {
    /// Iterates over every entry whose key starts with `prefix`, beginning at `prefix ++ start`.
    fn new_iterator(&self, prefix: &[u8], start: &[u8]) -> KvResult<KvIterator>;
}

/// A set of writes applied atomically by [`Batch::write`].
pub trait Batch: Send {
    /// Queues a put.
    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Queues a delete.
    fn delete(&mut self, key: &[u8]) -> KvResult<()>;

    /// Amount of data queued so far, in bytes.
    fn value_size(&self) -> usize;

    /// Flushes the queued writes to the store.
    fn write(&mut self) -> KvResult<()>;

    /// Discards the queued writes.
    fn reset(&mut self);

    /// Replays the queued writes onto another writer.
    fn replay(&self, writer: &dyn KeyValueWriter) -> KvResult<()>;
}

/// Batch factory.
#[auto_impl(&, Box, Arc)]
pub trait Batcher: Send + Sync {
    /// Creates an empty batch bound to this store.
    fn new_batch(&self) -> Box<dyn Batch>;
}

/// A frozen, read-only view of a store.
pub trait KvSnapshot: KeyValueReader + Iteratee {
    /// Releases resources held by the snapshot. Reads after release are undefined.
    fn release(&self) {}
}

/// A full key-value store.
pub trait KeyValueStore: KeyValueReader + KeyValueWriter + Iteratee + Batcher {
    /// Captures a frozen snapshot of the current contents.
    fn get_snapshot(&self) -> KvResult<Arc<dyn KvSnapshot>>;

    /// Closes the store. Subsequent operations fail with [`crate::KvError::Closed`].
    fn close(&self) -> KvResult<()>;

    /// Closes the store and removes all of its data.
    fn drop_db(&self) -> KvResult<()>;

    /// Returns a driver statistic by name.
    fn stat(&self, property: &str) -> KvResult<String>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get_snapshot(&self) -> KvResult<Arc<dyn KvSnapshot>> {
        (**self).get_snapshot()
    }

    fn close(&self) -> KvResult<()> {
        (**self).close()
    }

    fn drop_db(&self) -> KvResult<()> {
        (**self).drop_db()
    }

    fn stat(&self, property: &str) -> KvResult<String> {
        (**self).stat(property)
    }
}

/// Returns the smallest key strictly greater than every key starting with `prefix`, or `None`
/// when no such key exists (empty prefix or all `0xff`).
pub fn upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut limit = prefix.to_vec();
    while let Some(last) = limit.pop() {
        if last < 0xff {
            limit.push(last + 1);
            return Some(limit);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_bound() {
        assert_eq!(upper_bound(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(upper_bound(&[0x01, 0xff]), Some(vec![0x02]));
        assert_eq!(upper_bound(&[0xff, 0xff]), None);
        assert_eq!(upper_bound(&[]), None);
    }
}
