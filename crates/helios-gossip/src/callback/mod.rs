//! Block finalization: turns consensus decisions into executed, persisted blocks.
//!
//! Consensus opens a block with [`BlockProcessor::begin_block`], streams the events confirmed
//! by the Atropos through [`BlockCallbacks::apply_event`] and closes it with
//! [`BlockCallbacks::end_block`]. Everything up to epoch sealing and the pre-internal
//! transactions runs synchronously under the engine lock; the rest of the block (user
//! transactions, persistence, commitment, notifications) may run on a background worker.

mod proofs;
pub use proofs::*;

mod worker;
pub use worker::*;

mod recovery;
pub use recovery::*;

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use alloy_primitives::B256;
use helios_evm::{
    spill_events, EvmBlock, EvmHeader, EvmProcessor, IndexedLog, Interpreter, Receipt,
    StateProcessor, TxEnvelope,
};
use parking_lot::{lock_api::ArcRwLockWriteGuard, RawRwLock, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::{
    Block, BlockCtx, BlockProcessorError, BlockState, ConsensusBlock, Crit,
    DriverTxListener, DriverTxPostTransactor, DriverTxPreTransactor, Epoch, EpochSealer,
    EpochState, Event, EventId, Feed, InternalTxTransactor, ProcessorConfig, Store,
    StoreError, TxPosition, UpgradeHeight, ValidatorEventsProcessor, ValidatorId, Validators,
};

/// Notifications emitted for every finalized block.
#[derive(Debug)]
pub struct BlockFeeds {
    /// New chain heads.
    pub new_blocks: Feed<Arc<EvmBlock>>,
    /// Logs of each new block.
    pub new_logs: Feed<Arc<Vec<IndexedLog>>>,
}

impl Default for BlockFeeds {
    fn default() -> Self {
        Self { new_blocks: Feed::new("new_blocks"), new_logs: Feed::new("new_logs") }
    }
}

/// Finalizes the blocks decided by consensus.
#[derive(Debug)]
pub struct BlockProcessor {
    store: Arc<Store>,
    cfg: ProcessorConfig,
    interpreter: Arc<dyn Interpreter>,
    pre_transactor: Arc<dyn InternalTxTransactor>,
    post_transactor: Arc<dyn InternalTxTransactor>,
    feeds: Arc<BlockFeeds>,
    crit: Crit,
    engine_mu: Arc<RwLock<()>>,
    block_busy: Arc<AtomicU32>,
    wg: Arc<WaitGroup>,
    worker: Option<Worker>,
}

impl BlockProcessor {
    /// Creates a processor over `store` running bytecode with `interpreter`.
    pub fn new(
        store: Arc<Store>,
        interpreter: Arc<dyn Interpreter>,
        cfg: ProcessorConfig,
    ) -> Result<Self, BlockProcessorError> {
        let worker = if cfg.async_tail {
            Some(
                Worker::spawn("block-tail", cfg.queue_capacity)
                    .map_err(|err| BlockProcessorError::Worker(err.to_string()))?,
            )
        } else {
            None
        };
        Ok(Self {
            store,
            cfg,
            interpreter,
            pre_transactor: Arc::new(DriverTxPreTransactor),
            post_transactor: Arc::new(DriverTxPostTransactor),
            feeds: Arc::default(),
            crit: Crit::default(),
            engine_mu: Arc::default(),
            block_busy: Arc::default(),
            wg: Arc::default(),
            worker,
        })
    }

    /// Hands fatal failures to `crit`.
    pub fn with_crit(mut self, crit: Crit) -> Self {
        self.crit = crit;
        self
    }

    /// Replaces the sources of internal transactions.
    pub fn with_transactors(
        mut self,
        pre: Arc<dyn InternalTxTransactor>,
        post: Arc<dyn InternalTxTransactor>,
    ) -> Self {
        self.pre_transactor = pre;
        self.post_transactor = post;
        self
    }

    /// Publishes blocks and logs to `feeds`.
    pub fn with_feeds(mut self, feeds: Arc<BlockFeeds>) -> Self {
        self.feeds = feeds;
        self
    }

    /// Block and log notifications.
    pub const fn feeds(&self) -> &Arc<BlockFeeds> {
        &self.feeds
    }

    /// Underlying store.
    pub const fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Takes the engine lock for a read-only query. Blocks are not processed meanwhile.
    pub fn engine_read(&self) -> RwLockReadGuard<'_, ()> {
        self.engine_mu.read()
    }

    /// Returns `true` while the tail of a block is running.
    pub fn is_busy(&self) -> bool {
        self.block_busy.load(Ordering::Acquire) != 0
    }

    /// Blocks until the tails of all finalized blocks are done.
    pub fn wait_block_end(&self) {
        self.wg.wait();
    }

    /// Opens the block decided by `block`.
    ///
    /// Holds the engine lock until the callbacks are closed. Waits for the previous block to
    /// be fully processed first.
    pub fn begin_block(&self, block: ConsensusBlock) -> Result<BlockCallbacks<'_>, BlockProcessorError> {
        let guard = self.engine_mu.write_arc();
        self.wait_block_end();

        let state = self.store.get_block_epoch_state().ok_or(StoreError::MissingBlockEpochState)?;
        let mut bs = state.block_state.clone();
        let es = state.epoch_state.clone();
        bs.merge_cheaters(&block.cheaters);

        debug!(target: "gossip::blockproc", atropos = %block.atropos, cheaters = block.cheaters.len(), "begin block");
        Ok(BlockCallbacks {
            processor: self,
            _guard: guard,
            events: ValidatorEventsProcessor::new(bs.clone(), es.clone()),
            atropos_time: bs.last_block.time + 1,
            atropos_degenerate: true,
            confirmed: Vec::new(),
            mp_cheaters: Vec::new(),
            block,
            bs,
            es,
        })
    }
}

/// Callbacks of one block in progress.
pub struct BlockCallbacks<'a> {
    processor: &'a BlockProcessor,
    _guard: ArcRwLockWriteGuard<RawRwLock, ()>,
    block: ConsensusBlock,
    bs: BlockState,
    es: EpochState,
    events: ValidatorEventsProcessor,
    atropos_time: u64,
    atropos_degenerate: bool,
    confirmed: Vec<Event>,
    mp_cheaters: Vec<ValidatorId>,
}

impl core::fmt::Debug for BlockCallbacks<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockCallbacks")
            .field("atropos", &self.block.atropos)
            .field("confirmed", &self.confirmed.len())
            .field("degenerate", &self.atropos_degenerate)
            .finish_non_exhaustive()
    }
}

impl BlockCallbacks<'_> {
    /// Applies an event confirmed by the block's Atropos.
    pub fn apply_event(&mut self, event: &Event) {
        let id = event.id();
        if id == self.block.atropos {
            self.atropos_time = event.median_time;
            self.atropos_degenerate = false;
        }
        if event.has_txs() {
            self.confirmed.push(event.clone());
        }
        for proof in &event.misbehaviour_proofs {
            match proof_cheaters(&self.processor.store, &self.es.validators, proof) {
                Ok(cheaters) => {
                    for cheater in cheaters {
                        if !self.mp_cheaters.contains(&cheater) {
                            self.mp_cheaters.push(cheater);
                        }
                    }
                }
                Err(err) => self.processor.crit.fail("misbehaviour proof check", &err),
            }
        }
        self.events.process_confirmed_event(event);
    }

    /// Closes the block.
    ///
    /// Returns the validators of the new epoch when the block sealed one. Fatal failures are
    /// handed to the [`Crit`] handler.
    pub fn end_block(self) -> Option<Validators> {
        let crit = self.processor.crit.clone();
        match self.finish() {
            Ok(validators) => validators,
            Err(err) => {
                crit.fail("block processing", &err);
                None
            }
        }
    }

    fn finish(self) -> Result<Option<Validators>, BlockProcessorError> {
        let Self {
            processor,
            _guard,
            block,
            mut bs,
            mut es,
            events,
            mut atropos_time,
            atropos_degenerate,
            confirmed,
            mp_cheaters,
        } = self;
        let store = &processor.store;

        if atropos_time <= bs.last_block.time {
            atropos_time = bs.last_block.time + 1;
        }
        let block_ctx = BlockCtx { idx: bs.last_block.idx + 1, time: atropos_time, atropos: block.atropos };

        let empty = confirmed.is_empty() && block.cheaters.is_empty();
        let skip = atropos_degenerate
            || (empty
                && block_ctx.time
                    < bs.last_block.time.saturating_add(es.rules.blocks.max_empty_block_skip_period));

        let parent_hash = bs.last_block.atropos.0;
        bs = events.finalize(&block_ctx);
        bs.merge_cheaters(&mp_cheaters);

        if skip {
            debug!(
                target: "gossip::blockproc",
                atropos = %block.atropos,
                degenerate = atropos_degenerate,
                "block skipped"
            );
            store.set_block_epoch_state(bs, es)?;
            return Ok(None);
        }

        let chain = Arc::new(store.evm_chain_config(&es.rules));
        let header = EvmHeader {
            number: block_ctx.idx,
            hash: block_ctx.atropos.0,
            parent_hash,
            time: block_ctx.time,
            gas_limit: u64::MAX,
            base_fee: es.rules.economy.min_gas_price,
            ..Default::default()
        };
        let state = store.evm().open(bs.finalized_state_root, bs.sfc_state_root)?;
        let state_processor = StateProcessor::new(chain, processor.interpreter.clone())
            .with_vm_config(processor.cfg.vm)
            .with_block_hashes(store.clone());
        let mut evm = EvmProcessor::new(header, state, state_processor);

        let mut sealer = EpochSealer::new(block_ctx, bs.clone(), es.clone());
        let sealing = sealer.epoch_sealing();
        let mut listener = DriverTxListener::new(bs.clone(), es.clone());

        let pre_internal = processor.pre_transactor.pop_internal_txs(
            &block_ctx,
            &bs,
            &es,
            sealing,
            evm.state_mut(),
        );
        let receipts = evm.execute(pre_internal.clone())?;
        for receipt in receipts {
            notify_logs(&mut listener, receipt);
            if !receipt.status {
                warn!(target: "gossip::blockproc", tx = %receipt.tx_hash, "pre-internal transaction reverted");
            }
        }
        bs = listener.finalize();

        let mut new_validators = None;
        let mut sealed_epoch = None;
        if sealing {
            let prev_upgrades = es.rules.upgrades;
            sealed_epoch = Some(es.epoch);
            sealer.update(bs, es);
            (bs, es) = sealer.seal_epoch();
            if es.rules.upgrades != prev_upgrades {
                store.add_upgrade_height(UpgradeHeight { upgrades: es.rules.upgrades, height: block_ctx.idx + 1 })?;
            }
            store.set_block_epoch_state(bs.clone(), es.clone())?;
            new_validators = Some(es.validators.clone());
            listener.update(bs.clone(), es.clone());
        }

        let tail = BlockTail {
            store: store.clone(),
            post_transactor: processor.post_transactor.clone(),
            feeds: processor.feeds.clone(),
            flush_interval: processor.cfg.flush_interval,
            block_ctx,
            parent_hash,
            bs,
            es,
            sealing,
            sealed_epoch,
            evm,
            listener,
            pre_internal,
            confirmed,
        };

        match &processor.worker {
            Some(worker) if !tail.confirmed.is_empty() => {
                processor.block_busy.store(1, Ordering::Release);
                processor.wg.add();
                let done = TailDone { busy: processor.block_busy.clone(), wg: processor.wg.clone() };
                let crit = processor.crit.clone();
                let task: Task = Box::new(move || {
                    let _done = done;
                    if let Err(err) = tail.run() {
                        crit.fail("block processing", &err);
                    }
                });
                if let Err(task) = worker.enqueue(task) {
                    warn!(target: "gossip::blockproc", "block worker is gone, finishing inline");
                    task();
                }
            }
            _ => tail.run()?,
        }
        Ok(new_validators)
    }
}

/// Releases the busy flag and the wait group when a block tail ends, even by panicking.
struct TailDone {
    busy: Arc<AtomicU32>,
    wg: Arc<WaitGroup>,
}

impl Drop for TailDone {
    fn drop(&mut self) {
        self.busy.store(0, Ordering::Release);
        self.wg.done();
    }
}

fn notify_logs(listener: &mut DriverTxListener, receipt: &Receipt) {
    for log in &receipt.logs {
        listener.on_new_log(log);
    }
}

/// Work of a block after epoch sealing.
struct BlockTail {
    store: Arc<Store>,
    post_transactor: Arc<dyn InternalTxTransactor>,
    feeds: Arc<BlockFeeds>,
    flush_interval: u64,
    block_ctx: BlockCtx,
    parent_hash: B256,
    bs: BlockState,
    es: EpochState,
    sealing: bool,
    sealed_epoch: Option<Epoch>,
    evm: EvmProcessor,
    listener: DriverTxListener,
    pre_internal: Vec<TxEnvelope>,
    confirmed: Vec<Event>,
}

#[derive(Clone, Copy)]
struct EventTxPosition {
    event: EventId,
    offset: u32,
    creator: ValidatorId,
}

impl BlockTail {
    fn run(self) -> Result<(), BlockProcessorError> {
        let Self {
            store,
            post_transactor,
            feeds,
            flush_interval,
            block_ctx,
            parent_hash,
            bs,
            es,
            sealing,
            sealed_epoch,
            mut evm,
            mut listener,
            pre_internal,
            mut confirmed,
        } = self;
        let idx = block_ctx.idx;

        let post_internal =
            post_transactor.pop_internal_txs(&block_ctx, &bs, &es, sealing, evm.state_mut());
        for receipt in evm.execute(post_internal.clone())? {
            notify_logs(&mut listener, receipt);
        }

        confirmed.sort_by(|a, b| (a.lamport, a.id()).cmp(&(b.lamport, b.id())));
        let block_events = spill_events(&confirmed, es.rules.blocks.max_block_gas, |e| e.gas_power_used);
        let user_txs: Vec<TxEnvelope> = block_events.iter().flat_map(|e| e.txs.iter().cloned()).collect();
        for receipt in evm.execute(user_txs.clone())? {
            notify_logs(&mut listener, receipt);
        }

        let (finalized, _) = evm.finalize()?;
        let evm_block = finalized.block;

        let mut event_positions = std::collections::HashMap::new();
        for event in block_events {
            let id = event.id();
            for (offset, tx) in event.txs.iter().enumerate() {
                event_positions.entry(tx.hash()).or_insert(EventTxPosition {
                    event: id,
                    offset: offset as u32,
                    creator: event.creator,
                });
            }
        }
        let mut positions = Vec::with_capacity(evm_block.transactions.len());
        for (offset, tx) in evm_block.transactions.iter().enumerate() {
            let hash = tx.hash();
            let from_event = event_positions.get(&hash).copied();
            positions.push((
                hash,
                TxPosition {
                    block: idx,
                    event: from_event.map(|p| p.event).unwrap_or_default(),
                    event_offset: from_event.map_or(0, |p| p.offset),
                    block_offset: offset as u32,
                },
            ));
            let mut creator = from_event.map_or(0, |p| p.creator);
            if creator != 0 && !es.validators.exists(creator) {
                creator = 0;
            }
            if let Some(receipt) = finalized.receipts.get(offset) {
                listener.on_new_receipt(tx, receipt, creator);
            }
        }

        let mut bs = listener.finalize();
        bs.finalized_state_root = evm_block.header.root;
        bs.sfc_state_root = evm_block.header.sfc_root;
        bs.last_block = block_ctx;
        bs.cheaters_written = bs.epoch_cheaters.len() as u32;

        for tx in pre_internal.iter().chain(&post_internal).chain(&user_txs) {
            store.set_tx(tx)?;
        }
        let block = Block {
            time: block_ctx.time,
            atropos: block_ctx.atropos,
            parent_hash,
            events: block_events.iter().map(Event::id).collect(),
            internal_txs: pre_internal.iter().chain(&post_internal).map(TxEnvelope::hash).collect(),
            txs: user_txs.iter().map(TxEnvelope::hash).collect(),
            skipped_txs: finalized.skipped,
            gas_used: evm_block.header.gas_used,
            root: evm_block.header.root,
            sfc_root: evm_block.header.sfc_root,
            tx_hash: evm_block.header.tx_hash,
            base_fee: evm_block.header.base_fee,
        };
        store.set_block(idx, &block)?;
        store.set_block_index(block.hash(), idx)?;

        let logs: Vec<IndexedLog> =
            finalized.receipts.iter().flat_map(|r| r.logs.iter().cloned()).collect();
        if store.config().tx_index {
            for (hash, position) in positions {
                store.set_tx_position(hash, position)?;
            }
            store.set_receipts(idx, &finalized.receipts)?;
            store.index_logs(&logs)?;
        }
        if let Some(version) = listener.take_network_version() {
            store.set_network_version(version)?;
        }

        store.set_block_epoch_state(bs, es)?;
        let evm_block = Arc::new(evm_block);
        store.cache_evm_block(idx, evm_block.clone());
        store.advance_llr_watermarks(idx, sealed_epoch)?;

        let (root, sfc_root) = (evm_block.header.root, evm_block.header.sfc_root);
        store.evm().commit_block(idx, root, sfc_root)?;
        if sealing || (flush_interval > 0 && idx % flush_interval == 0) {
            store.evm().flush(root, sfc_root)?;
            store.flush_llr()?;
        }

        info!(
            target: "gossip::blockproc",
            idx,
            atropos = %block_ctx.atropos,
            events = block.events.len(),
            txs = evm_block.transactions.len(),
            skipped = block.skipped_txs.len(),
            gas_used = block.gas_used,
            %root,
            "new block"
        );
        feeds.new_blocks.send(evm_block);
        if !logs.is_empty() {
            feeds.new_logs.send(Arc::new(logs));
        }
        Ok(())
    }
}
