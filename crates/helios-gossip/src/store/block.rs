use std::sync::Arc;

use alloy_primitives::B256;
use helios_evm::{BlockHashes, EvmBlock, EvmHeader};
use helios_kvdb::{KeyValueReader, KeyValueWriter};
use tracing::{trace, warn};

use super::{decode_u64, get_rlp, put_rlp, Store};
use crate::{Block, BlockIdx, StoreError};

impl Store {
    /// Stores block `idx`.
    pub fn set_block(&self, idx: BlockIdx, block: &Block) -> Result<(), StoreError> {
        put_rlp(&self.table.blocks, &idx.to_be_bytes(), block)?;
        self.cache.blocks.lock().insert(idx, Arc::new(block.clone()));
        trace!(target: "gossip::store", idx, atropos = %block.atropos, "stored block");
        Ok(())
    }

    /// Block `idx`, if stored.
    pub fn get_block(&self, idx: BlockIdx) -> Result<Option<Arc<Block>>, StoreError> {
        if let Some(block) = self.cache.blocks.lock().get(&idx) {
            return Ok(Some(block.clone()));
        }
        let Some(block) = get_rlp::<Block>(&self.table.blocks, "b", &idx.to_be_bytes())? else {
            return Ok(None);
        };
        let block = Arc::new(block);
        self.cache.blocks.lock().insert(idx, block.clone());
        Ok(Some(block))
    }

    /// Returns `true` if block `idx` is stored.
    pub fn has_block(&self, idx: BlockIdx) -> Result<bool, StoreError> {
        Ok(self.get_block(idx)?.is_some())
    }

    /// Indexes block `idx` by its hash.
    pub fn set_block_index(&self, hash: B256, idx: BlockIdx) -> Result<(), StoreError> {
        self.table.block_hashes.put(hash.as_slice(), &idx.to_be_bytes())?;
        self.cache.block_hashes.lock().insert(hash, idx);
        Ok(())
    }

    /// Index of the block named `hash`.
    pub fn get_block_index(&self, hash: &B256) -> Result<Option<BlockIdx>, StoreError> {
        if let Some(idx) = self.cache.block_hashes.lock().get(hash) {
            return Ok(Some(*idx));
        }
        let Some(blob) = self.table.block_hashes.get(hash.as_slice())? else {
            return Ok(None);
        };
        let idx = decode_u64("B", &blob)?;
        self.cache.block_hashes.lock().insert(*hash, idx);
        Ok(Some(idx))
    }

    /// Index of the last finalized block.
    pub fn get_latest_block_index(&self) -> BlockIdx {
        self.get_block_state().map(|bs| bs.last_block.idx).unwrap_or_default()
    }

    /// Caches the executed form of block `idx`.
    pub fn cache_evm_block(&self, idx: BlockIdx, block: Arc<EvmBlock>) {
        self.cache.evm_blocks.lock().insert(idx, block);
    }

    /// Block `idx` in its executed form, rebuilt from the stored block and transactions when
    /// not cached.
    pub fn get_evm_block(&self, idx: BlockIdx) -> Result<Option<Arc<EvmBlock>>, StoreError> {
        if let Some(block) = self.cache.evm_blocks.lock().get(&idx) {
            return Ok(Some(block.clone()));
        }
        let Some(block) = self.get_block(idx)? else {
            return Ok(None);
        };
        let mut skipped = block.skipped_txs.iter().copied().peekable();
        let mut transactions = Vec::with_capacity(block.internal_txs.len() + block.txs.len());
        for (position, hash) in block.assembled_txs().enumerate() {
            if skipped.peek() == Some(&(position as u32)) {
                skipped.next();
                continue;
            }
            let Some(tx) = self.get_tx(hash)? else {
                return Ok(None);
            };
            transactions.push(tx);
        }
        let header = Self::evm_header(idx, &block);
        let block = Arc::new(EvmBlock { header, transactions });
        self.cache.evm_blocks.lock().insert(idx, block.clone());
        Ok(Some(block))
    }

    /// Header of the executed block `idx`.
    ///
    /// Blocks are bounded by spilling events rather than by the header gas limit.
    pub fn evm_header(idx: BlockIdx, block: &Block) -> EvmHeader {
        EvmHeader {
            number: idx,
            hash: block.hash(),
            parent_hash: block.parent_hash,
            root: block.root,
            sfc_root: block.sfc_root,
            tx_hash: block.tx_hash,
            time: block.time,
            coinbase: Default::default(),
            gas_limit: u64::MAX,
            gas_used: block.gas_used,
            base_fee: block.base_fee,
        }
    }
}

impl BlockHashes for Store {
    fn block_hash(&self, number: u64) -> Option<B256> {
        match self.get_block(number) {
            Ok(block) => block.map(|block| block.hash()),
            Err(err) => {
                warn!(target: "gossip::store", number, %err, "failed to read block for BLOCKHASH");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use helios_evm::StoreConfig;

    use super::*;
    use crate::{EventId, GossipConfig};

    #[test]
    fn test_block_hashes_resolve_stored_blocks() {
        let store = Store::in_memory(GossipConfig::default(), StoreConfig::default()).unwrap();
        let atropos = EventId(B256::with_last_byte(0x42));
        store.set_block(3, &Block { atropos, ..Default::default() }).unwrap();

        let hashes: &dyn BlockHashes = &store;
        assert_eq!(hashes.block_hash(3), Some(atropos.0));
        assert_eq!(hashes.block_hash(4), None);
    }
}
