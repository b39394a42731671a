//! Interface the RPC layer consumes.

use std::{sync::Arc, time::Duration};

use alloy_primitives::B256;
use auto_impl::auto_impl;
use crossbeam_channel::Receiver;
use helios_evm::{
    DualState, Evm, EvmBlock, EvmHeader, ExecutionResult, IndexedLog, Message, Receipt,
    TxEnvelope, VmConfig,
};
use helios_kvdb::KeyValueStore;
use serde::{Deserialize, Serialize};

use crate::{BackendError, BlockIdx, Epoch, EventId, LogFilter, PoolContent};

/// Reference to a block by position or by hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockRef {
    /// The last finalized block.
    #[default]
    Latest,
    /// Block by index.
    Number(BlockIdx),
    /// Block by hash.
    Hash(B256),
}

impl From<BlockIdx> for BlockRef {
    fn from(idx: BlockIdx) -> Self {
        Self::Number(idx)
    }
}

impl From<B256> for BlockRef {
    fn from(hash: B256) -> Self {
        Self::Hash(hash)
    }
}

/// Position of the node in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Current epoch.
    pub epoch: Epoch,
    /// Last finalized block.
    pub block: BlockIdx,
    /// Atropos of the last finalized block.
    pub atropos: EventId,
    /// Time of the last finalized block, in nanoseconds.
    pub time: u64,
}

/// Chain access for the API layer.
#[auto_impl(&, Arc, Box)]
pub trait Backend: Send + Sync {
    /// Position of the node in the chain.
    fn progress(&self) -> Progress;

    /// Root database of the chain.
    fn chain_db(&self) -> Arc<dyn KeyValueStore>;

    /// Header of block `at`.
    fn header_by_number(&self, at: BlockRef) -> Result<Option<EvmHeader>, BackendError>;

    /// State after block `at` together with its header.
    fn state_and_header_by_number_or_hash(
        &self,
        at: BlockRef,
    ) -> Result<(DualState, EvmHeader), BackendError>;

    /// Executed block at index `at`.
    fn block_by_number(&self, at: BlockRef) -> Result<Option<Arc<EvmBlock>>, BackendError>;

    /// Executed block with hash `hash`.
    fn block_by_hash(&self, hash: &B256) -> Result<Option<Arc<EvmBlock>>, BackendError> {
        self.block_by_number(BlockRef::Hash(*hash))
    }

    /// Receipts of block `at`.
    fn receipts_by_number(&self, at: BlockRef) -> Result<Option<Vec<Receipt>>, BackendError>;

    /// Uncle `index` of block `at`.
    ///
    /// The chain has no uncles: a block that is found yields `None`, and so does a missing
    /// one. Only failures of the lookup are returned as errors.
    fn uncle_by_number_and_index(
        &self,
        at: BlockRef,
        _index: usize,
    ) -> Result<Option<EvmHeader>, BackendError> {
        self.header_by_number(at).map(|_| None)
    }

    /// EVM over `state` in the environment of `header`.
    fn get_evm(&self, state: DualState, header: &EvmHeader, vm: VmConfig) -> Evm<DualState>;

    /// Executes `msg` on the state after block `at` without persisting anything.
    ///
    /// Execution is cancelled after `timeout`.
    fn call(
        &self,
        msg: &Message,
        at: BlockRef,
        timeout: Duration,
    ) -> Result<ExecutionResult, BackendError>;

    /// Submits a signed transaction to the pool.
    fn send_tx(&self, tx: TxEnvelope) -> Result<B256, BackendError>;

    /// Pooled transactions.
    fn tx_pool_content(&self) -> PoolContent;

    /// Subscribes to transactions admitted to the pool.
    fn subscribe_new_txs(&self, capacity: usize) -> Receiver<Arc<Vec<TxEnvelope>>>;

    /// Call trace of the finalized transaction `hash`.
    fn tx_trace_by_hash(&self, hash: &B256) -> Result<Option<serde_json::Value>, BackendError>;

    /// Logs matching `filter`.
    fn logs(&self, filter: &LogFilter) -> Result<Vec<IndexedLog>, BackendError>;
}
