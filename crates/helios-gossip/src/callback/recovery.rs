use std::sync::Arc;

use helios_evm::{EvmProcessor, StateProcessor};
use tracing::{info, warn};

use super::BlockProcessor;
use crate::{BlockIdx, BlockProcessorError, StoreError};

/// Number of most recent blocks searched for a block with available state.
pub const MAX_RECOVERY_DEPTH: u64 = 20_000;

impl BlockProcessor {
    /// Rebuilds the state of the latest blocks after an abrupt shutdown.
    ///
    /// Finds the newest of the last [`MAX_RECOVERY_DEPTH`] blocks whose roots are available and
    /// re-executes every later block on top of it, checking the reproduced roots. Returns the
    /// number of re-executed blocks.
    pub fn recover(&self) -> Result<u64, BlockProcessorError> {
        let _guard = self.engine_mu.write();
        self.wait_block_end();

        let store = &self.store;
        let latest = store.get_latest_block_index();
        let lowest = latest.saturating_sub(MAX_RECOVERY_DEPTH);
        let mut base = None;
        for idx in (lowest..=latest).rev() {
            let block = store.get_block(idx)?.ok_or(BlockProcessorError::MissingBlock(idx))?;
            if store.evm().has_state(&block.root, &block.sfc_root) {
                base = Some(idx);
                break;
            }
        }
        let base = base.ok_or(BlockProcessorError::NoRecoverableState(MAX_RECOVERY_DEPTH))?;
        if base == latest {
            return Ok(0);
        }
        warn!(target: "gossip::recovery", base, latest, "state of latest blocks is missing, re-executing");

        let rules = store.get_rules().ok_or(StoreError::MissingBlockEpochState)?;
        let chain = Arc::new(store.evm_chain_config(&rules));
        for idx in base + 1..=latest {
            self.reexecute(idx, &chain)?;
        }
        if let Some(block) = store.get_block(latest)? {
            store.evm().flush(block.root, block.sfc_root)?;
        }
        info!(target: "gossip::recovery", blocks = latest - base, "recovered state");
        Ok(latest - base)
    }

    fn reexecute(
        &self,
        idx: BlockIdx,
        chain: &Arc<helios_evm::ChainConfig>,
    ) -> Result<(), BlockProcessorError> {
        let store = &self.store;
        let parent = store.get_block(idx - 1)?.ok_or(BlockProcessorError::MissingBlock(idx - 1))?;
        let block = store.get_block(idx)?.ok_or(BlockProcessorError::MissingBlock(idx))?;

        let mut txs = Vec::with_capacity(block.internal_txs.len() + block.txs.len());
        for hash in block.assembled_txs() {
            let tx = store.get_tx(hash)?.ok_or(BlockProcessorError::MissingTx { block: idx, hash: *hash })?;
            txs.push(tx);
        }

        let state = store.evm().open(parent.root, parent.sfc_root)?;
        let processor = StateProcessor::new(chain.clone(), self.interpreter.clone())
            .with_vm_config(self.cfg.vm)
            .with_block_hashes(self.store.clone());
        let mut evm = EvmProcessor::new(crate::Store::evm_header(idx, &block), state, processor);
        evm.execute(txs)?;
        let (finalized, _) = evm.finalize()?;

        let header = &finalized.block.header;
        if header.root != block.root {
            return Err(BlockProcessorError::RootMismatch { block: idx, stored: block.root, executed: header.root });
        }
        if header.sfc_root != block.sfc_root {
            return Err(BlockProcessorError::RootMismatch {
                block: idx,
                stored: block.sfc_root,
                executed: header.sfc_root,
            });
        }
        store.evm().commit_block(idx, header.root, header.sfc_root)?;
        Ok(())
    }
}
