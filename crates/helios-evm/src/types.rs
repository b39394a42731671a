use alloy_primitives::{Address, Bloom, Log, B256};
use hashlink::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{InvalidTransaction, Transaction, TxEnvelope, TxType};

/// Block-level execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockEnv {
    /// Block number.
    pub number: u64,
    /// Block time in seconds.
    pub timestamp: u64,
    /// Fee recipient.
    pub coinbase: Address,
    /// Block gas limit as seen by the EVM.
    pub gas_limit: u64,
    /// Base fee, `None` before London.
    pub base_fee: Option<u128>,
    /// Randomness source exposed to contracts. The Atropos id on this chain.
    pub prev_randao: B256,
}

/// Header of an executed block, as produced by the EVM processor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmHeader {
    /// Block number.
    pub number: u64,
    /// Block hash: the Atropos event id.
    pub hash: B256,
    /// Hash of the previous block.
    pub parent_hash: B256,
    /// World-state root after the block.
    pub root: B256,
    /// SFC-state root after the block.
    pub sfc_root: B256,
    /// Ordered-trie root over the included transactions.
    pub tx_hash: B256,
    /// Block time in nanoseconds.
    pub time: u64,
    /// Fee recipient.
    pub coinbase: Address,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas used by the included transactions.
    pub gas_used: u64,
    /// Base fee.
    pub base_fee: u128,
}

impl EvmHeader {
    /// Block time in seconds.
    pub const fn timestamp(&self) -> u64 {
        self.time / 1_000_000_000
    }

    /// EVM environment of this header.
    pub fn block_env(&self, london: bool) -> BlockEnv {
        BlockEnv {
            number: self.number,
            timestamp: self.timestamp(),
            coinbase: self.coinbase,
            gas_limit: self.gas_limit,
            base_fee: london.then_some(self.base_fee),
            prev_randao: self.hash,
        }
    }
}

/// An executed block: header plus the transactions that were not skipped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvmBlock {
    /// Header.
    pub header: EvmHeader,
    /// Included transactions, in execution order.
    pub transactions: Vec<TxEnvelope>,
}

/// A log together with its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_more::Deref)]
#[serde(rename_all = "camelCase")]
pub struct IndexedLog {
    /// The log.
    #[deref]
    pub log: Log,
    /// Block number.
    pub block_number: u64,
    /// Block hash.
    pub block_hash: B256,
    /// Hash of the emitting transaction.
    pub tx_hash: B256,
    /// Position of the transaction in the block.
    pub tx_index: u32,
    /// Position of the log in the block.
    pub log_index: u32,
}

/// Outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Envelope type of the transaction.
    pub tx_type: TxType,
    /// `true` on success. Meaningful from Byzantium on.
    pub status: bool,
    /// Intermediate state root. Set before Byzantium only.
    pub post_state: Option<B256>,
    /// Gas used by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Gas used by this transaction.
    pub gas_used: u64,
    /// Emitted logs.
    pub logs: Vec<IndexedLog>,
    /// Bloom filter over `logs`.
    pub bloom: Bloom,
    /// Transaction hash.
    pub tx_hash: B256,
    /// Address of the created contract, for creations.
    pub contract_address: Option<Address>,
    /// Price paid per gas.
    pub effective_gas_price: u128,
    /// Block hash.
    pub block_hash: B256,
    /// Block number.
    pub block_number: u64,
    /// Position of the transaction in the block.
    pub transaction_index: u32,
}

impl Receipt {
    /// Numeric status as exposed over RPC.
    pub const fn status_code(&self) -> u64 {
        self.status as u64
    }

    /// Recomputes the bloom filter of the receipt logs.
    pub fn logs_bloom(logs: &[IndexedLog]) -> Bloom {
        let mut bloom = Bloom::ZERO;
        for log in logs {
            bloom.accrue_log(&log.log);
        }
        bloom
    }
}

/// Sender recovery with a cache keyed by transaction hash.
#[derive(Debug)]
pub struct Signer {
    chain_id: u64,
    cache: Mutex<LruCache<B256, Address>>,
}

impl Signer {
    /// Default number of cached senders.
    pub const DEFAULT_CACHE_SIZE: usize = 16_384;

    /// Creates a signer for `chain_id`.
    pub fn new(chain_id: u64) -> Self {
        Self::with_capacity(chain_id, Self::DEFAULT_CACHE_SIZE)
    }

    /// Creates a signer caching at most `capacity` senders.
    pub fn with_capacity(chain_id: u64, capacity: usize) -> Self {
        Self { chain_id, cache: Mutex::new(LruCache::new(capacity.max(1))) }
    }

    /// Chain id accepted by this signer.
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Recovers the sender of `tx`.
    ///
    /// Transactions bound to another chain are rejected with
    /// [`InvalidTransaction::InvalidSender`]. Internal transactions resolve to the zero address.
    pub fn sender(&self, tx: &TxEnvelope) -> Result<Address, InvalidTransaction> {
        if tx.is_internal() {
            return Ok(Address::ZERO);
        }
        if tx.chain_id().is_some_and(|id| id != self.chain_id) {
            return Err(InvalidTransaction::InvalidSender);
        }
        let hash = tx.hash();
        if let Some(sender) = self.cache.lock().get(&hash) {
            return Ok(*sender);
        }
        let sender = tx.recover_signer(true)?;
        self.cache.lock().insert(hash, sender);
        Ok(sender)
    }
}
