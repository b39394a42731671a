//! Persistent storage of the gossip layer.
//!
//! Long-lived tables live in the root `gossip` database; tables scoped to one epoch live in a
//! `gossip-N` database that is dropped when the epoch rotates. Both are opened through a
//! [`DbProducer`], and the state tries of both domains share the root database.

mod block;
pub use block::*;

mod epoch;
use epoch::EpochDb;
pub use epoch::*;

mod event;

mod evm;
pub use evm::*;

mod logs;
pub use logs::*;

mod upgrades;
pub use upgrades::*;

mod llr;
pub use llr::*;

use std::sync::Arc;

use alloy_rlp::{Decodable, Encodable};
use hashlink::LruCache;
use helios_evm::{EvmBlock, StateStore, StoreConfig};
use helios_kvdb::{DbProducer, KeyValueReader, KeyValueStore, KeyValueWriter, Table};
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::{Block, BlockEpochState, BlockIdx, GossipConfig, StoreError};

/// Name of the root database.
pub const MAIN_DB_NAME: &str = "gossip";

#[derive(Debug, Clone)]
struct Tables {
    blocks: Table,
    block_hashes: Table,
    block_epoch_states: Table,
    block_epoch_history: Table,
    events: Table,
    receipts: Table,
    tx_positions: Table,
    txs: Table,
    upgrade_heights: Table,
    network_version: Table,
    traces: Table,
    logs: Table,
    llr_state: Table,
    llr_block_votes: Table,
    llr_epoch_votes: Table,
    llr_block_results: Table,
    llr_epoch_results: Table,
}

impl Tables {
    fn new(db: &Arc<dyn KeyValueStore>) -> Self {
        let table = |prefix: &str| Table::new(db.clone(), prefix);
        Self {
            blocks: table("b"),
            block_hashes: table("B"),
            block_epoch_states: table("D"),
            block_epoch_history: table("D").sub_table("h"),
            events: table("e"),
            receipts: table("r"),
            tx_positions: table("x"),
            txs: table("X"),
            upgrade_heights: table("U"),
            network_version: table("V"),
            traces: table("t"),
            logs: table("L"),
            llr_state: table("Q"),
            llr_block_votes: table("S"),
            llr_epoch_votes: table("R"),
            llr_block_results: table("T"),
            llr_epoch_results: table("J"),
        }
    }
}

struct Caches {
    blocks: Mutex<LruCache<BlockIdx, Arc<Block>>>,
    block_hashes: Mutex<LruCache<alloy_primitives::B256, BlockIdx>>,
    tx_positions: Mutex<LruCache<alloy_primitives::B256, TxPosition>>,
    block_epoch_history: Mutex<LruCache<crate::Epoch, Arc<BlockEpochState>>>,
    evm_blocks: Mutex<LruCache<BlockIdx, Arc<EvmBlock>>>,
}

/// The gossip store.
pub struct Store {
    cfg: GossipConfig,
    producer: Arc<dyn DbProducer>,
    main: Arc<dyn KeyValueStore>,
    table: Tables,
    cache: Caches,
    block_epoch_state: RwLock<Option<Arc<BlockEpochState>>>,
    epoch_db: RwLock<Option<EpochDb>>,
    upgrades: UpgradeHeights,
    llr: LlrIndex,
    evm: Arc<StateStore>,
}

impl core::fmt::Debug for Store {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Store").field("cfg", &self.cfg).finish_non_exhaustive()
    }
}

impl Store {
    /// Opens the store through `producer`, creating the root database if needed.
    pub fn new(
        producer: Arc<dyn DbProducer>,
        cfg: GossipConfig,
        state: StoreConfig,
    ) -> Result<Self, StoreError> {
        let main = producer.open_db(MAIN_DB_NAME)?;
        let table = Tables::new(&main);
        let capacity = |n: usize| n.max(1);
        let cache = Caches {
            blocks: Mutex::new(LruCache::new(capacity(cfg.cache.blocks))),
            block_hashes: Mutex::new(LruCache::new(capacity(cfg.cache.block_hashes))),
            tx_positions: Mutex::new(LruCache::new(capacity(cfg.cache.tx_positions))),
            block_epoch_history: Mutex::new(LruCache::new(capacity(cfg.cache.block_epoch_states))),
            evm_blocks: Mutex::new(LruCache::new(capacity(cfg.cache.evm_blocks))),
        };
        let upgrades = UpgradeHeights::load(&table.upgrade_heights)?;
        let llr = LlrIndex::load(
            table.llr_state.clone(),
            table.llr_block_votes.clone(),
            table.llr_epoch_votes.clone(),
            cfg.cache.llr_votes_weight,
        )?;
        let evm = Arc::new(StateStore::new(main.clone(), state));
        let store = Self {
            cfg,
            producer,
            main,
            table,
            cache,
            block_epoch_state: RwLock::new(None),
            epoch_db: RwLock::new(None),
            upgrades,
            llr,
            evm,
        };
        if let Some(state) = store.load_block_epoch_state()? {
            store.open_epoch_db(state.epoch_state.epoch)?;
            *store.block_epoch_state.write() = Some(Arc::new(state));
        }
        Ok(store)
    }

    /// Opens a store over fresh in-memory databases.
    pub fn in_memory(cfg: GossipConfig, state: StoreConfig) -> Result<Self, StoreError> {
        Self::new(Arc::new(helios_kvdb::MemoryDbProducer::new()), cfg, state)
    }

    /// Store configuration.
    pub const fn config(&self) -> &GossipConfig {
        &self.cfg
    }

    /// State tries of both domains.
    pub const fn evm(&self) -> &Arc<StateStore> {
        &self.evm
    }

    /// Root database.
    pub fn main_db(&self) -> &Arc<dyn KeyValueStore> {
        &self.main
    }

    /// Returns `true` once genesis has been applied.
    pub fn is_initialized(&self) -> bool {
        self.block_epoch_state.read().is_some()
    }

    /// Writes buffered LLR votes and closes the databases.
    pub fn close(&self) -> Result<(), StoreError> {
        self.llr.flush()?;
        if let Some(epoch) = self.epoch_db.write().take() {
            epoch.db.close()?;
        }
        self.main.close()?;
        info!(target: "gossip::store", "closed store");
        Ok(())
    }
}

fn get_rlp<T: Decodable>(
    table: &Table,
    name: &'static str,
    key: &[u8],
) -> Result<Option<T>, StoreError> {
    table
        .get(key)?
        .map(|blob| T::decode(&mut blob.as_slice()).map_err(|err| StoreError::decode(name, err)))
        .transpose()
}

fn put_rlp<T: Encodable>(table: &Table, key: &[u8], value: &T) -> Result<(), StoreError> {
    Ok(table.put(key, &alloy_rlp::encode(value))?)
}

fn get_json<T: DeserializeOwned>(
    table: &Table,
    name: &'static str,
    key: &[u8],
) -> Result<Option<T>, StoreError> {
    table
        .get(key)?
        .map(|blob| serde_json::from_slice(&blob).map_err(|err| StoreError::decode(name, err)))
        .transpose()
}

fn put_json<T: Serialize>(table: &Table, key: &[u8], value: &T) -> Result<(), StoreError> {
    let blob = serde_json::to_vec(value).map_err(|err| StoreError::decode("json", err))?;
    Ok(table.put(key, &blob)?)
}

fn decode_u64(name: &'static str, blob: &[u8]) -> Result<u64, StoreError> {
    let bytes: [u8; 8] = blob.try_into().map_err(|_| StoreError::decode(name, "expected 8 bytes"))?;
    Ok(u64::from_be_bytes(bytes))
}
