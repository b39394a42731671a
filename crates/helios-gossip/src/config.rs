//! Configuration of the node core.

use alloy_primitives::Address;
use helios_evm::{StoreConfig, TxTypeSet, VmConfig};
use serde::{Deserialize, Serialize};

/// Configuration of the block processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessorConfig {
    /// Run the tail of block finalization on the worker thread.
    pub async_tail: bool,
    /// Capacity of the worker queue.
    pub queue_capacity: usize,
    /// Flush the state tries to disk every this many blocks. Epoch seals always flush.
    pub flush_interval: u64,
    /// Interpreter settings.
    pub vm: VmConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { async_tail: true, queue_capacity: 16, flush_interval: 64, vm: VmConfig::default() }
    }
}

impl ProcessorConfig {
    /// Enables or disables the asynchronous tail.
    pub const fn with_async_tail(mut self, async_tail: bool) -> Self {
        self.async_tail = async_tail;
        self
    }

    /// Sets the flush interval.
    pub const fn with_flush_interval(mut self, blocks: u64) -> Self {
        self.flush_interval = blocks;
        self
    }

    /// Sets the interpreter settings.
    pub const fn with_vm(mut self, vm: VmConfig) -> Self {
        self.vm = vm;
        self
    }
}

/// Sizes of the in-memory caches of the gossip store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Decoded blocks.
    pub blocks: usize,
    /// Block index by Atropos.
    pub block_hashes: usize,
    /// Transaction positions.
    pub tx_positions: usize,
    /// Historical block-epoch states.
    pub block_epoch_states: usize,
    /// Executed blocks with their transactions.
    pub evm_blocks: usize,
    /// Total weight of buffered LLR vote entries.
    pub llr_votes_weight: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            blocks: 5_000,
            block_hashes: 5_000,
            tx_positions: 20_000,
            block_epoch_states: 8,
            evm_blocks: 512,
            llr_votes_weight: 4_096,
        }
    }
}

/// Configuration of the gossip store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GossipConfig {
    /// Cache sizes.
    pub cache: CacheConfig,
    /// Keep receipts and the log index of finalized blocks.
    pub tx_index: bool,
    /// Store traces produced by transaction tracing.
    pub store_traces: bool,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self { cache: CacheConfig::default(), tx_index: true, store_traces: true }
    }
}

impl GossipConfig {
    /// Enables or disables the transaction index.
    pub const fn with_tx_index(mut self, enabled: bool) -> Self {
        self.tx_index = enabled;
        self
    }

    /// Sets the cache sizes.
    pub const fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// Configuration of the transaction pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    /// Accepted transaction types.
    pub accept: TxTypeSet,
    /// Maximum encoded transaction size.
    pub max_size: usize,
    /// Minimum priority fee of remote transactions.
    pub min_tip: u128,
    /// Transactions each sender may hold.
    pub account_slots: usize,
    /// Transactions the pool may hold.
    pub global_slots: usize,
    /// Minimum fee increase of a replacement, in percent.
    pub price_bump: u64,
    /// Reject transactions leaving a nonce gap.
    pub reject_nonce_gaps: bool,
    /// Senders whose transactions are treated as local.
    pub locals: Vec<Address>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            accept: TxTypeSet::default(),
            max_size: 128 * 1024,
            min_tip: 0,
            account_slots: 16,
            global_slots: 4_096,
            price_bump: 10,
            reject_nonce_gaps: false,
            locals: Vec::new(),
        }
    }
}

impl PoolConfig {
    /// Sets the accepted types.
    pub const fn with_accept(mut self, accept: TxTypeSet) -> Self {
        self.accept = accept;
        self
    }

    /// Sets the per-sender limit.
    pub const fn with_account_slots(mut self, slots: usize) -> Self {
        self.account_slots = slots;
        self
    }

    /// Sets the global limit.
    pub const fn with_global_slots(mut self, slots: usize) -> Self {
        self.global_slots = slots;
        self
    }

    /// Sets the remote tip floor.
    pub const fn with_min_tip(mut self, tip: u128) -> Self {
        self.min_tip = tip;
        self
    }

    /// Enables or disables gapless admission.
    pub const fn with_reject_nonce_gaps(mut self, reject: bool) -> Self {
        self.reject_nonce_gaps = reject;
        self
    }

    /// Adds a local sender.
    pub fn with_local(mut self, sender: Address) -> Self {
        self.locals.push(sender);
        self
    }
}

/// Configuration of the whole node core.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    /// State tries.
    pub state: StoreConfig,
    /// Gossip store.
    pub gossip: GossipConfig,
    /// Block processor.
    pub processor: ProcessorConfig,
    /// Transaction pool.
    pub pool: PoolConfig,
}
