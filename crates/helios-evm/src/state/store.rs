//! The dual-state store.

use std::{collections::BTreeMap, sync::Arc};

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_trie::EMPTY_ROOT_HASH;
use helios_kvdb::KeyValueStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    constants::TRIES_IN_MEMORY, DualState, EvmState, StateDatabase, StateDatabaseConfig, StateDb,
    StateError, TrieGc,
};

/// Table of the world state.
pub const WORLD_STATE_TABLE: &[u8] = b"M";

/// Table of the SFC state.
pub const SFC_STATE_TABLE: &[u8] = b"A";

/// What to do when the snapshot layer cannot be generated at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotFailurePolicy {
    /// Log the failure and continue without snapshots.
    #[default]
    Warn,
    /// Abort start-up.
    Abort,
}

/// Configuration of the [`StateStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Number of recent blocks whose roots stay referenced in memory.
    pub tries_in_memory: u64,
    /// Dirty node budget in bytes before old nodes are flushed to disk.
    pub trie_dirty_limit: usize,
    /// Commit every root to disk immediately and never collect.
    pub archive: bool,
    /// Maintain the SFC state next to the world state.
    pub sfc_enabled: bool,
    /// Committed storage slots kept in memory per domain.
    pub storage_cache: usize,
    /// Contract codes kept in memory per domain.
    pub code_cache: usize,
    /// Flat snapshot layers per domain. Zero disables snapshots.
    pub snapshot_layers: usize,
    /// Reaction to a failed snapshot generation.
    pub snapshot_failure: SnapshotFailurePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let cache = StateDatabaseConfig::default();
        Self {
            tries_in_memory: TRIES_IN_MEMORY,
            trie_dirty_limit: 256 * 1024 * 1024,
            archive: false,
            sfc_enabled: true,
            storage_cache: cache.storage_cache,
            code_cache: cache.code_cache,
            snapshot_layers: cache.snapshot_layers,
            snapshot_failure: SnapshotFailurePolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Sets the dirty node budget.
    pub const fn with_trie_dirty_limit(mut self, limit: usize) -> Self {
        self.trie_dirty_limit = limit;
        self
    }

    /// Enables or disables archive mode.
    pub const fn with_archive(mut self, archive: bool) -> Self {
        self.archive = archive;
        self
    }

    /// Enables or disables the SFC state.
    pub const fn with_sfc(mut self, enabled: bool) -> Self {
        self.sfc_enabled = enabled;
        self
    }

    /// Sets the number of snapshot layers.
    pub const fn with_snapshot_layers(mut self, layers: usize) -> Self {
        self.snapshot_layers = layers;
        self
    }

    /// Sets the snapshot failure policy.
    pub const fn with_snapshot_failure(mut self, policy: SnapshotFailurePolicy) -> Self {
        self.snapshot_failure = policy;
        self
    }

    const fn cache(&self) -> StateDatabaseConfig {
        StateDatabaseConfig {
            storage_cache: self.storage_cache,
            code_cache: self.code_cache,
            snapshot_layers: self.snapshot_layers,
        }
    }
}

/// Initial content of an account.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenesisAccount {
    /// Balance.
    pub balance: U256,
    /// Nonce.
    pub nonce: u64,
    /// Code.
    pub code: Bytes,
    /// Storage slots.
    pub storage: BTreeMap<B256, U256>,
}

impl GenesisAccount {
    /// An account holding `balance`.
    pub fn with_balance(balance: U256) -> Self {
        Self { balance, ..Default::default() }
    }
}

#[derive(Debug, Default)]
struct GcQueues {
    world: TrieGc,
    sfc: TrieGc,
}

/// Owner of the world and SFC state domains, their garbage collection and flushing.
#[derive(Debug)]
pub struct StateStore {
    world: Arc<StateDatabase>,
    sfc: Arc<StateDatabase>,
    gc: Mutex<GcQueues>,
    config: StoreConfig,
}

impl StateStore {
    /// Opens both domains inside `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, config: StoreConfig) -> Self {
        Self {
            world: Arc::new(StateDatabase::new(store.clone(), WORLD_STATE_TABLE, config.cache())),
            sfc: Arc::new(StateDatabase::new(store, SFC_STATE_TABLE, config.cache())),
            gc: Mutex::new(GcQueues::default()),
            config,
        }
    }

    /// Opens a store over a fresh in-memory database.
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::new(Arc::new(helios_kvdb::MemoryDb::new()), config)
    }

    /// Store configuration.
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// World-state domain.
    pub const fn world(&self) -> &Arc<StateDatabase> {
        &self.world
    }

    /// SFC-state domain.
    pub const fn sfc(&self) -> &Arc<StateDatabase> {
        &self.sfc
    }

    /// Opens the world state at `root` alone.
    pub fn world_state(&self, root: B256) -> Result<StateDb, StateError> {
        StateDb::new(root, self.world.clone())
    }

    /// Opens the execution state at the given pair of roots.
    pub fn open(&self, root: B256, sfc_root: B256) -> Result<DualState, StateError> {
        let world = StateDb::new(root, self.world.clone())?;
        let sfc = if self.config.sfc_enabled {
            Some(StateDb::new(sfc_root, self.sfc.clone())?)
        } else {
            None
        };
        Ok(DualState::new(world, sfc))
    }

    /// Returns `true` if both roots can be opened.
    pub fn has_state(&self, root: &B256, sfc_root: &B256) -> bool {
        self.world.has_state(root) && (!self.config.sfc_enabled || self.sfc.has_state(sfc_root))
    }

    /// Writes `alloc` on top of empty state, flushes it and returns the world and SFC roots.
    ///
    /// Accounts at the SFC precompile addresses land in both domains.
    pub fn apply_alloc(
        &self,
        alloc: &BTreeMap<Address, GenesisAccount>,
    ) -> Result<(B256, B256), StateError> {
        let mut state = self.open(EMPTY_ROOT_HASH, EMPTY_ROOT_HASH)?;
        for (address, account) in alloc {
            state.create_account(*address);
            state.set_balance(*address, account.balance);
            state.set_nonce(*address, account.nonce);
            if !account.code.is_empty() {
                state.set_code(*address, account.code.clone());
            }
            for (slot, value) in &account.storage {
                state.set_storage(*address, *slot, *value);
            }
        }
        let (root, sfc_root) = state.commit(true)?;
        self.flush(root, sfc_root)?;
        Ok((root, sfc_root))
    }

    /// Registers the roots committed by `block` and runs garbage collection.
    ///
    /// The roots stay referenced for [`StoreConfig::tries_in_memory`] blocks; older roots are
    /// dereferenced. When the dirty node set outgrows [`StoreConfig::trie_dirty_limit`] the
    /// oldest nodes are flushed. In archive mode every root is written to disk immediately.
    pub fn commit_block(&self, block: u64, root: B256, sfc_root: B256) -> Result<(), StateError> {
        if self.config.archive {
            self.world.trie().commit(&root)?;
            if self.config.sfc_enabled {
                self.sfc.trie().commit(&sfc_root)?;
            }
            return Ok(());
        }

        let mut gc = self.gc.lock();
        self.world.trie().reference(&root);
        gc.world.push(block, root);
        if self.config.sfc_enabled {
            self.sfc.trie().reference(&sfc_root);
            gc.sfc.push(block, sfc_root);
        }

        let keep = self.config.tries_in_memory;
        let world = gc.world.collect(block, keep, |root| self.world.trie().dereference(&root));
        let sfc = gc.sfc.collect(block, keep, |root| self.sfc.trie().dereference(&root));
        if world + sfc > 0 {
            debug!(target: "state::store", block, world, sfc, "collected stale state roots");
        }

        self.world.trie().cap(self.config.trie_dirty_limit)?;
        self.sfc.trie().cap(self.config.trie_dirty_limit)?;
        Ok(())
    }

    /// Writes the given roots with all their nodes to disk.
    pub fn flush(&self, root: B256, sfc_root: B256) -> Result<(), StateError> {
        self.world.trie().commit(&root)?;
        if self.config.sfc_enabled {
            self.sfc.trie().commit(&sfc_root)?;
        }
        info!(target: "state::store", %root, %sfc_root, "flushed state");
        Ok(())
    }

    /// Rebuilds the snapshot layers of both domains.
    ///
    /// A failure is returned only under [`SnapshotFailurePolicy::Abort`]; otherwise it is
    /// logged and snapshots stay paused.
    pub fn generate_snapshot(&self, root: B256, sfc_root: B256) -> Result<(), StateError> {
        let mut result = self.world.generate_snapshot(root);
        if result.is_ok() && self.config.sfc_enabled {
            result = self.sfc.generate_snapshot(sfc_root);
        }
        match (result, self.config.snapshot_failure) {
            (Ok(()), _) => Ok(()),
            (Err(err), SnapshotFailurePolicy::Abort) => Err(err),
            (Err(err), SnapshotFailurePolicy::Warn) => {
                warn!(target: "state::store", %root, %err, "snapshot generation failed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, U256};
    use alloy_trie::EMPTY_ROOT_HASH;

    use super::*;
    use crate::EvmState;

    fn commit_with_balance(store: &StateStore, root: B256, balance: u64) -> B256 {
        let mut state = store.open(root, EMPTY_ROOT_HASH).unwrap();
        state.set_balance(Address::with_last_byte(1), U256::from(balance));
        state.commit(true).unwrap().0
    }

    #[test]
    fn test_roots_outside_window_are_collected() {
        let store = StateStore::in_memory(StoreConfig::default().with_sfc(false));
        let mut roots = Vec::new();
        let mut root = EMPTY_ROOT_HASH;
        for block in 1..=20u64 {
            root = commit_with_balance(&store, root, block);
            store.commit_block(block, root, B256::ZERO).unwrap();
            roots.push(root);
        }
        for (i, root) in roots.iter().enumerate() {
            let block = i as u64 + 1;
            assert_eq!(store.has_state(root, &B256::ZERO), block > 4, "block {block}");
        }
    }

    #[test]
    fn test_archive_keeps_everything() {
        let store = StateStore::in_memory(StoreConfig::default().with_sfc(false).with_archive(true));
        let first = commit_with_balance(&store, EMPTY_ROOT_HASH, 1);
        store.commit_block(1, first, B256::ZERO).unwrap();
        let mut root = first;
        for block in 2..=40u64 {
            root = commit_with_balance(&store, root, block);
            store.commit_block(block, root, B256::ZERO).unwrap();
        }
        assert!(store.has_state(&first, &B256::ZERO));
        assert_eq!(store.world().trie().stats().nodes, 0);
    }

    #[test]
    fn test_snapshot_failure_policy() {
        let missing = B256::with_last_byte(1);
        let lenient = StateStore::in_memory(StoreConfig::default());
        assert!(lenient.generate_snapshot(missing, EMPTY_ROOT_HASH).is_ok());
        let strict = StateStore::in_memory(
            StoreConfig::default().with_snapshot_failure(SnapshotFailurePolicy::Abort),
        );
        assert_eq!(
            strict.generate_snapshot(missing, EMPTY_ROOT_HASH),
            Err(StateError::MissingTrieNode(missing))
        );
    }
}
