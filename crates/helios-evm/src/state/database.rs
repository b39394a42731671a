//! Node and code storage of one state domain.

use std::sync::Arc;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::Decodable;
use alloy_trie::{EMPTY_ROOT_HASH, KECCAK_EMPTY};
use hashlink::LruCache;
use helios_kvdb::{KeyValueReader, KeyValueStore, KeyValueWriter, Table};
use parking_lot::Mutex;
use tracing::debug;

use crate::{AccountDiff, AccountRecord, MerkleTrie, Snapshots, StateError, TrieDatabase};

fn decode_leaf<T: Decodable>(key: B256, blob: &[u8]) -> Result<T, StateError> {
    T::decode(&mut &blob[..])
        .map_err(|err| StateError::CorruptedNode { hash: key, reason: err.to_string() })
}

/// Storage root an account leaf keeps referenced.
pub(crate) fn account_storage_ref(leaf: &[u8]) -> Option<B256> {
    AccountRecord::decode(&mut &leaf[..])
        .ok()
        .map(|account| account.storage_root)
        .filter(|root| *root != EMPTY_ROOT_HASH)
}

/// Cache sizes of a [`StateDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateDatabaseConfig {
    /// Number of committed storage slots kept in memory.
    pub storage_cache: usize,
    /// Number of contract codes kept in memory.
    pub code_cache: usize,
    /// Number of flat snapshot layers. Zero disables snapshots.
    pub snapshot_layers: usize,
}

impl Default for StateDatabaseConfig {
    fn default() -> Self {
        Self { storage_cache: 65_536, code_cache: 1_024, snapshot_layers: 128 }
    }
}

/// Storage backing the states of one trie domain (world or SFC).
///
/// Accounts live in a Merkle-Patricia trie keyed by the hash of their address, and every account
/// leaf points at the storage trie of the account, keyed by the hash of the slot.
#[derive(Debug)]
pub struct StateDatabase {
    trie: TrieDatabase,
    code: Table,
    storage_cache: Mutex<LruCache<(B256, B256), U256>>,
    code_cache: Mutex<LruCache<B256, Bytes>>,
    snapshots: Snapshots,
}

impl StateDatabase {
    /// Opens the domain stored under table `prefix` of `store`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        prefix: impl AsRef<[u8]>,
        config: StateDatabaseConfig,
    ) -> Self {
        let table = Table::new(store, prefix);
        Self {
            trie: TrieDatabase::new(table.sub_table("n")),
            code: table.sub_table("c"),
            storage_cache: Mutex::new(LruCache::new(config.storage_cache.max(1))),
            code_cache: Mutex::new(LruCache::new(config.code_cache.max(1))),
            snapshots: Snapshots::new(config.snapshot_layers),
        }
    }

    /// Opens a domain over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(helios_kvdb::MemoryDb::new()), "M", StateDatabaseConfig::default())
    }

    /// Node database of the domain.
    pub const fn trie(&self) -> &TrieDatabase {
        &self.trie
    }

    /// Snapshot layers of the domain.
    pub const fn snapshots(&self) -> &Snapshots {
        &self.snapshots
    }

    /// Returns `true` if the node of `root` is available in memory or on disk.
    pub fn has_state(&self, root: &B256) -> bool {
        self.trie.contains(root)
    }

    /// Opens the trie of `root`, an account trie or a storage trie.
    pub fn open_trie(&self, root: B256) -> MerkleTrie<'_> {
        MerkleTrie::new(&self.trie, root)
    }

    /// Reads the account at `address` in the state of `root`.
    pub fn account(&self, root: B256, address: Address) -> Result<Option<AccountRecord>, StateError> {
        if root == EMPTY_ROOT_HASH {
            return Ok(None);
        }
        let key = keccak256(address);
        if let Some(account) = self.snapshots.account(&root, &key) {
            return Ok(account);
        }
        self.open_trie(root).get(key)?.map(|leaf| decode_leaf(key, &leaf)).transpose()
    }

    /// Reads a committed storage slot from the storage trie of `storage_root`.
    pub fn storage_slot(&self, storage_root: B256, slot: B256) -> Result<U256, StateError> {
        if storage_root == EMPTY_ROOT_HASH {
            return Ok(U256::ZERO);
        }
        if let Some(value) = self.storage_cache.lock().get(&(storage_root, slot)) {
            return Ok(*value);
        }
        let key = keccak256(slot);
        let value = match self.open_trie(storage_root).get(key)? {
            Some(leaf) => decode_leaf(key, &leaf)?,
            None => U256::ZERO,
        };
        self.storage_cache.lock().insert((storage_root, slot), value);
        Ok(value)
    }

    /// Every account of `root`, keyed by the hash of its address.
    pub fn accounts(&self, root: B256) -> Result<AccountDiff, StateError> {
        self.open_trie(root)
            .entries()?
            .into_iter()
            .map(|(key, leaf)| Ok((key, Some(decode_leaf(key, &leaf)?))))
            .collect()
    }

    /// Loads the code of `code_hash`.
    pub fn code(&self, code_hash: B256) -> Result<Bytes, StateError> {
        if code_hash == KECCAK_EMPTY {
            return Ok(Bytes::new());
        }
        if let Some(code) = self.code_cache.lock().get(&code_hash) {
            return Ok(code.clone());
        }
        let code = self
            .code
            .get(code_hash.as_slice())?
            .map(Bytes::from)
            .ok_or(StateError::MissingCode(code_hash))?;
        self.code_cache.lock().insert(code_hash, code.clone());
        Ok(code)
    }

    /// Stores contract code. Code bypasses the dirty-node set and goes straight to disk.
    pub fn insert_code(&self, code: &Bytes) -> Result<B256, StateError> {
        if code.is_empty() {
            return Ok(KECCAK_EMPTY);
        }
        let hash = keccak256(code);
        self.code.put(hash.as_slice(), code)?;
        self.code_cache.lock().insert(hash, code.clone());
        Ok(hash)
    }

    /// Rebuilds the snapshot layers from the nodes of `root`.
    pub fn generate_snapshot(&self, root: B256) -> Result<(), StateError> {
        self.snapshots.pause();
        let accounts = self.accounts(root)?;
        debug!(target: "state", %root, accounts = accounts.len(), "generated snapshot");
        self.snapshots.rebuild(root, accounts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_account(db: &StateDatabase, root: B256, address: Address, account: AccountRecord) -> B256 {
        let mut trie = db.open_trie(root);
        trie.insert(keccak256(address), alloy_rlp::encode(account)).unwrap();
        trie.commit(&account_storage_ref)
    }

    #[test]
    fn test_account_and_slot_reads() {
        let db = StateDatabase::in_memory();
        let mut storage = db.open_trie(EMPTY_ROOT_HASH);
        storage.insert(keccak256(B256::with_last_byte(1)), alloy_rlp::encode(U256::from(7))).unwrap();
        let storage_root = storage.commit(&|_| None);

        let account = AccountRecord { nonce: 3, storage_root, ..Default::default() };
        let root = commit_account(&db, EMPTY_ROOT_HASH, Address::with_last_byte(1), account);

        assert_eq!(db.account(root, Address::with_last_byte(1)).unwrap(), Some(account));
        assert_eq!(db.account(root, Address::with_last_byte(2)).unwrap(), None);
        assert_eq!(db.storage_slot(storage_root, B256::with_last_byte(1)).unwrap(), U256::from(7));
        assert_eq!(db.storage_slot(storage_root, B256::with_last_byte(2)).unwrap(), U256::ZERO);
        // the account leaf keeps its storage trie referenced
        assert_eq!(db.trie().parents(&storage_root), Some(1));
    }

    #[test]
    fn test_snapshot_generation_serves_reads() {
        let db = StateDatabase::in_memory();
        let account = AccountRecord { nonce: 1, ..Default::default() };
        let root = commit_account(&db, EMPTY_ROOT_HASH, Address::with_last_byte(1), account);
        db.generate_snapshot(root).unwrap();
        assert_eq!(
            db.snapshots().account(&root, &keccak256(Address::with_last_byte(1))),
            Some(Some(account))
        );
        assert_eq!(db.accounts(root).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_root_and_code() {
        let db = StateDatabase::in_memory();
        let root = B256::with_last_byte(9);
        assert_eq!(
            db.account(root, Address::ZERO).unwrap_err(),
            StateError::MissingTrieNode(root)
        );
        assert_eq!(db.code(root).unwrap_err(), StateError::MissingCode(root));
        assert_eq!(db.account(EMPTY_ROOT_HASH, Address::ZERO).unwrap(), None);
    }

    #[test]
    fn test_code_storage() {
        let db = StateDatabase::in_memory();
        let code = Bytes::from_static(&[0x60, 0x00]);
        let hash = db.insert_code(&code).unwrap();
        assert_eq!(hash, keccak256(&code));
        assert_eq!(db.code(hash).unwrap(), code);
        assert_eq!(db.insert_code(&Bytes::new()).unwrap(), KECCAK_EMPTY);
    }
}
