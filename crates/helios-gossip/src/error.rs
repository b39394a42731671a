use alloy_primitives::B256;
use helios_evm::{CallError, InvalidTransaction, ProcessorError, StateError, TraceError};
use helios_kvdb::KvError;

use crate::EventId;

/// Failures of the gossip store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Key-value store failure.
    #[error(transparent)]
    Kv(#[from] KvError),
    /// A stored value does not decode.
    #[error("corrupted {table} entry: {reason}")]
    Decode {
        /// Short code of the table.
        table: &'static str,
        /// Decoder message.
        reason: String,
    },
    /// The block-epoch state has not been written yet.
    #[error("block epoch state is missing")]
    MissingBlockEpochState,
}

impl StoreError {
    pub(crate) fn decode(table: &'static str, reason: impl ToString) -> Self {
        Self::Decode { table, reason: reason.to_string() }
    }
}

/// Errors of a network-rules update.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    /// The diff or the merged rules are not valid JSON of the expected shape.
    #[error("malformed rules: {0}")]
    Json(String),
    /// The merged rules break a bound.
    #[error("invalid rules: {0}")]
    Invalid(&'static str),
}

/// Errors of block finalization.
///
/// Every variant is fatal for the node: the caller hands it to the [`crate::Crit`] handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockProcessorError {
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Trie database failure.
    #[error(transparent)]
    State(#[from] StateError),
    /// Transaction processing failure, including a dual-state mismatch.
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    /// A block refers to an event that is not stored.
    #[error("block event {0} not found")]
    MissingEvent(EventId),
    /// A block refers to a transaction that is not stored.
    #[error("block {block} transaction {hash} not found")]
    MissingTx {
        /// Block index.
        block: u64,
        /// Transaction hash.
        hash: B256,
    },
    /// A block is missing while rebuilding state.
    #[error("block {0} not found")]
    MissingBlock(u64),
    /// Re-execution produced different roots than the stored block.
    #[error("block {block} root mismatch: stored {stored}, executed {executed}")]
    RootMismatch {
        /// Block index.
        block: u64,
        /// Root in the stored block.
        stored: B256,
        /// Root of the re-execution.
        executed: B256,
    },
    /// The background block worker cannot be started.
    #[error("block worker: {0}")]
    Worker(String),
    /// No stored block has its state available.
    #[error("no block with available state in the last {0} blocks")]
    NoRecoverableState(u64),
}

/// Rejections of the transaction pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The transaction fails validation.
    #[error(transparent)]
    Invalid(#[from] InvalidTransaction),
    /// The transaction is already pooled.
    #[error("already known: {0}")]
    AlreadyKnown(B256),
    /// A replacement does not pay enough more than the pooled transaction.
    #[error("replacement transaction underpriced")]
    ReplacementUnderpriced,
    /// The pool holds its maximum number of transactions.
    #[error("txpool is full")]
    PoolFull,
    /// The head state cannot be opened.
    #[error(transparent)]
    State(#[from] StateError),
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors of the API backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The requested block is unknown.
    #[error("block not found")]
    BlockNotFound,
    /// The requested transaction is unknown.
    #[error("transaction {0} not found")]
    TxNotFound(B256),
    /// The state of the requested block is no longer available.
    #[error(transparent)]
    State(#[from] StateError),
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Block re-execution failed.
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    /// Tracing failed.
    #[error(transparent)]
    Trace(#[from] TraceError),
    /// A simulated call failed before execution or timed out.
    #[error(transparent)]
    Call(#[from] CallError),
    /// The pool rejected a transaction.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Errors of writing the genesis.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenesisError {
    /// The store already holds a chain.
    #[error("store is already initialized")]
    AlreadyInitialized,
    /// The genesis names no validator with stake.
    #[error("genesis has no validators")]
    NoValidators,
    /// The genesis rules are out of bounds.
    #[error(transparent)]
    Rules(#[from] RulesError),
    /// Trie database failure.
    #[error(transparent)]
    State(#[from] StateError),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors of starting or driving the node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Genesis failure.
    #[error(transparent)]
    Genesis(#[from] GenesisError),
    /// Block processing failure.
    #[error(transparent)]
    BlockProcessor(#[from] BlockProcessorError),
    /// Pool failure.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// The producing validator is not in the current epoch.
    #[error("validator {0} is not in the current epoch")]
    NotValidator(u32),
    /// A background thread cannot be started.
    #[error("spawning {name}: {reason}")]
    Spawn {
        /// Thread name.
        name: &'static str,
        /// OS message.
        reason: String,
    },
}
