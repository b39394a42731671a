use alloy_primitives::B256;
use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

use crate::{BlockIdx, EventId, ValidatorId};

/// A consensus decision: the elected Atropos and the cheaters observed by it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsensusBlock {
    /// Elected Atropos.
    pub atropos: EventId,
    /// Validators caught double-signing.
    pub cheaters: Vec<ValidatorId>,
}

/// Identity of a block within the block state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockCtx {
    /// Block index.
    pub idx: BlockIdx,
    /// Block time in nanoseconds.
    pub time: u64,
    /// Atropos naming the block.
    pub atropos: EventId,
}

/// A finalized block as persisted by the node.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct Block {
    /// Block time in nanoseconds.
    pub time: u64,
    /// Atropos naming the block. Its raw bytes are the block hash.
    pub atropos: EventId,
    /// Hash of the previous block.
    pub parent_hash: B256,
    /// Confirmed events contributing transactions, after spilling, in execution order.
    pub events: Vec<EventId>,
    /// Hashes of the node-issued transactions, executed first.
    pub internal_txs: Vec<B256>,
    /// Hashes of the event transactions, including skipped ones.
    pub txs: Vec<B256>,
    /// Positions of the skipped transactions in the assembled list `internal_txs ++ txs`.
    pub skipped_txs: Vec<u32>,
    /// Gas used by the included transactions.
    pub gas_used: u64,
    /// World-state root after the block.
    pub root: B256,
    /// SFC-state root after the block.
    pub sfc_root: B256,
    /// Ordered-trie root over the included transactions.
    pub tx_hash: B256,
    /// Base fee the block executed under.
    pub base_fee: u128,
}

impl Block {
    /// Block hash.
    pub const fn hash(&self) -> B256 {
        self.atropos.0
    }

    /// Every transaction hash in execution order, skipped ones included.
    pub fn assembled_txs(&self) -> impl Iterator<Item = &B256> {
        self.internal_txs.iter().chain(&self.txs)
    }
}
