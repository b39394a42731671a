//! Named database producer.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use crate::{KeyValueStore, KvResult, MemoryDb};

/// Opens and drops named databases.
///
/// The node keeps long-lived tables in one root database and opens a fresh `gossip-N` database
/// for each epoch, dropping the previous one on rotation.
#[auto_impl::auto_impl(&, Box, Arc)]
pub trait DbProducer: Send + Sync {
    /// Opens (creating if needed) the database called `name`.
    fn open_db(&self, name: &str) -> KvResult<Arc<dyn KeyValueStore>>;

    /// Drops the database called `name` together with its contents.
    fn drop_db(&self, name: &str) -> KvResult<()>;

    /// Names of all databases currently known to the producer.
    fn names(&self) -> Vec<String>;
}

/// [`DbProducer`] handing out [`MemoryDb`] instances.
#[derive(Debug, Default)]
pub struct MemoryDbProducer {
    dbs: Mutex<HashMap<String, MemoryDb>>,
}

impl MemoryDbProducer {
    /// Creates a producer with no databases.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DbProducer for MemoryDbProducer {
    fn open_db(&self, name: &str) -> KvResult<Arc<dyn KeyValueStore>> {
        let mut dbs = self.dbs.lock();
        let db = dbs.entry(name.to_string()).or_insert_with(MemoryDb::new).clone();
        Ok(Arc::new(db))
    }

    fn drop_db(&self, name: &str) -> KvResult<()> {
        if let Some(db) = self.dbs.lock().remove(name) {
            debug!(target: "kvdb", name, "dropping database");
            db.drop_db()?;
        }
        Ok(())
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.dbs.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyValueReader, KeyValueWriter};

    #[test]
    fn test_reopen_and_drop() {
        let producer = MemoryDbProducer::new();
        producer.open_db("gossip-1").unwrap().put(b"k", b"v").unwrap();
        assert_eq!(producer.open_db("gossip-1").unwrap().get(b"k").unwrap(), Some(b"v".to_vec()));

        producer.drop_db("gossip-1").unwrap();
        assert_eq!(producer.names(), Vec::<String>::new());
        assert_eq!(producer.open_db("gossip-1").unwrap().get(b"k").unwrap(), None);
    }
}
