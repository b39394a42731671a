//! Per-block execution.
//!
//! An [`EvmProcessor`] accumulates the transactions of one block across several chunks (the
//! pre-internal, post-internal and user transactions are executed separately) and commits the
//! state once the block is complete.

mod spill;
pub use spill::*;

use tracing::{debug, error, info};

use crate::{
    ordered_trie_root, DualState, EvmBlock, EvmHeader, GasPool, IndexedLog, ProcessorError,
    Receipt, SpecId, StateProcessor, TxEnvelope,
};

/// Callback invoked with every log of every receipt.
pub type LogListener = Box<dyn FnMut(&IndexedLog) + Send>;

/// Outcome of a finalized block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedBlock {
    /// The executed block. Its header carries the committed roots.
    pub block: EvmBlock,
    /// Positions of the skipped transactions in the assembled list.
    pub skipped: Vec<u32>,
    /// Receipts of the included transactions.
    pub receipts: Vec<Receipt>,
}

/// Builder of one block.
pub struct EvmProcessor {
    header: EvmHeader,
    state: DualState,
    processor: StateProcessor,
    gas_pool: GasPool,
    gas_used: u64,
    incoming: Vec<TxEnvelope>,
    skipped: Vec<u32>,
    receipts: Vec<Receipt>,
    on_new_log: Option<LogListener>,
}

impl core::fmt::Debug for EvmProcessor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EvmProcessor")
            .field("number", &self.header.number)
            .field("hash", &self.header.hash)
            .field("incoming", &self.incoming.len())
            .field("skipped", &self.skipped)
            .field("gas_used", &self.gas_used)
            .finish_non_exhaustive()
    }
}

impl EvmProcessor {
    /// Starts the block described by `header` on top of `state`.
    ///
    /// Roots, transaction hash and gas used of `header` are filled in by
    /// [`EvmProcessor::finalize`].
    pub fn new(header: EvmHeader, state: DualState, processor: StateProcessor) -> Self {
        Self {
            gas_pool: GasPool::new(header.gas_limit),
            header,
            state,
            processor,
            gas_used: 0,
            incoming: Vec::new(),
            skipped: Vec::new(),
            receipts: Vec::new(),
            on_new_log: None,
        }
    }

    /// Notifies `listener` of every log, in execution order.
    pub fn with_log_listener(mut self, listener: LogListener) -> Self {
        self.on_new_log = Some(listener);
        self
    }

    /// Header of the block being built.
    pub const fn header(&self) -> &EvmHeader {
        &self.header
    }

    /// Execution state.
    pub const fn state(&self) -> &DualState {
        &self.state
    }

    /// Mutable execution state.
    pub const fn state_mut(&mut self) -> &mut DualState {
        &mut self.state
    }

    /// Gas used so far.
    pub const fn gas_used(&self) -> u64 {
        self.gas_used
    }

    /// Receipts produced so far.
    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    /// Positions skipped so far.
    pub fn skipped(&self) -> &[u32] {
        &self.skipped
    }

    /// Executes the next chunk of the block and returns its receipts.
    ///
    /// Transaction positions continue from the previous chunks.
    pub fn execute(&mut self, txs: Vec<TxEnvelope>) -> Result<&[Receipt], ProcessorError> {
        let offset = self.incoming.len() as u32;
        let start = self.receipts.len();
        let mut noop = |_: &IndexedLog| {};
        let on_new_log: &mut dyn FnMut(&IndexedLog) = match &mut self.on_new_log {
            Some(listener) => listener,
            None => &mut noop,
        };
        let output = self
            .processor
            .process(
                &self.header,
                &mut self.state,
                &txs,
                offset,
                &mut self.gas_pool,
                &mut self.gas_used,
                on_new_log,
            )
            .inspect_err(|err| {
                error!(target: "evm::block", number = self.header.number, %err, "block execution failed");
            })?;

        debug!(
            target: "evm::block",
            number = self.header.number,
            offset,
            txs = txs.len(),
            skipped = output.skipped.len(),
            "executed transactions"
        );
        self.incoming.extend(txs);
        self.skipped.extend(output.skipped);
        self.receipts.extend(output.receipts);
        Ok(&self.receipts[start..])
    }

    /// Drops the skipped transactions, commits both states and seals the header.
    ///
    /// Returns the block together with the state it was committed from.
    pub fn finalize(mut self) -> Result<(FinalizedBlock, DualState), ProcessorError> {
        self.state.check_dual_state()?;

        let spec = self.processor.chain().spec_at(self.header.number);
        let (root, sfc_root) = self.state.commit(spec.is_enabled(SpecId::SPURIOUS_DRAGON))?;

        let mut skipped = self.skipped.iter().copied().peekable();
        let transactions: Vec<_> = self
            .incoming
            .into_iter()
            .enumerate()
            .filter(|(i, _)| {
                if skipped.peek() == Some(&(*i as u32)) {
                    skipped.next();
                    false
                } else {
                    true
                }
            })
            .map(|(_, tx)| tx)
            .collect();
        let encoded: Vec<_> = transactions.iter().map(TxEnvelope::encoded_2718).collect();

        let mut header = self.header;
        header.root = root;
        header.sfc_root = sfc_root;
        header.tx_hash = ordered_trie_root(&encoded);
        header.gas_used = self.gas_used;
        info!(
            target: "evm::block",
            number = header.number,
            txs = transactions.len(),
            skipped = self.skipped.len(),
            gas_used = header.gas_used,
            %root,
            %sfc_root,
            "finalized block"
        );

        let block = EvmBlock { header, transactions };
        Ok((FinalizedBlock { block, skipped: self.skipped, receipts: self.receipts }, self.state))
    }
}
