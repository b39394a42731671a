use std::sync::Arc;

use parking_lot::RwLock;

use crate::KvSnapshot;

/// Holds the snapshot served to concurrent readers and swaps it atomically.
///
/// The previous snapshot is released only after the new one is installed, so a reader always
/// observes either the old or the new view.
#[derive(Default)]
pub struct SwappableSnapshot {
    current: RwLock<Option<Arc<dyn KvSnapshot>>>,
}

impl std::fmt::Debug for SwappableSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwappableSnapshot")
            .field("installed", &self.current.read().is_some())
            .finish()
    }
}

impl SwappableSnapshot {
    /// Creates an empty holder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the installed snapshot.
    pub fn get(&self) -> Option<Arc<dyn KvSnapshot>> {
        self.current.read().clone()
    }

    /// Installs `next` and releases the previously installed snapshot.
    pub fn switch(&self, next: Arc<dyn KvSnapshot>) {
        let old = self.current.write().replace(next);
        if let Some(old) = old {
            old.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyValueReader, KeyValueStore, KeyValueWriter, MemoryDb};

    #[test]
    fn test_switch_replaces_view() {
        let db = MemoryDb::new();
        let holder = SwappableSnapshot::new();
        assert!(holder.get().is_none());

        db.put(b"k", b"1").unwrap();
        holder.switch(db.get_snapshot().unwrap());
        db.put(b"k", b"2").unwrap();
        assert_eq!(holder.get().unwrap().get(b"k").unwrap(), Some(b"1".to_vec()));

        holder.switch(db.get_snapshot().unwrap());
        assert_eq!(holder.get().unwrap().get(b"k").unwrap(), Some(b"2".to_vec()));
    }
}
