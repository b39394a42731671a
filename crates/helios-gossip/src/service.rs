//! The node core: store, block processor and pool wired together, serving the [`Backend`]
//! interface.

use std::{sync::Arc, thread::JoinHandle, time::Duration};

use alloy_primitives::B256;
use crossbeam_channel::Receiver;
use helios_evm::{
    apply_message_with_timeout, trace_transaction, CallTracer, DualState, Evm, EvmBlock,
    EvmHeader, ExecutionResult, GasPool, IndexedLog, Interpreter, Message, Receipt, Signer,
    SpecId, StateProcessor, TraceError, Transaction, TxEnvelope, VmConfig,
};
use helios_kvdb::{DbProducer, KeyValueStore};
use tracing::{debug, info, warn};

use crate::{
    Backend, BackendError, Block, BlockIdx, BlockProcessor, BlockRef, ConsensusBlock, Crit,
    Event, Genesis, LogFilter, NodeConfig, NodeError, NonceLock, PoolContent, PoolError, Progress, Rules,
    Store, StoreError, TxPool, ValidatorId, Validators,
};

/// A running node core.
#[derive(Debug)]
pub struct Node {
    cfg: NodeConfig,
    store: Arc<Store>,
    processor: BlockProcessor,
    pool: Arc<TxPool>,
    interpreter: Arc<dyn Interpreter>,
    signer: Arc<Signer>,
    nonce_lock: NonceLock,
    head_watcher: Option<JoinHandle<()>>,
}

impl Node {
    /// Opens the node over the databases of `producer`.
    ///
    /// An empty store is initialized from `genesis`; a populated one is recovered up to its
    /// last finalized block.
    pub fn new(
        producer: Arc<dyn DbProducer>,
        cfg: NodeConfig,
        genesis: &Genesis,
        interpreter: Arc<dyn Interpreter>,
    ) -> Result<Self, NodeError> {
        Self::with_crit(producer, cfg, genesis, interpreter, Crit::default())
    }

    /// Opens the node like [`Node::new`], handing fatal failures to `crit`.
    pub fn with_crit(
        producer: Arc<dyn DbProducer>,
        cfg: NodeConfig,
        genesis: &Genesis,
        interpreter: Arc<dyn Interpreter>,
        crit: Crit,
    ) -> Result<Self, NodeError> {
        let store = Arc::new(Store::new(producer, cfg.gossip, cfg.state.clone())?);
        let processor = BlockProcessor::new(store.clone(), interpreter.clone(), cfg.processor)?
            .with_crit(crit);
        if store.is_initialized() {
            let recovered = processor.recover()?;
            info!(target: "gossip::node", block = store.get_latest_block_index(), recovered, "opened existing chain");
        } else {
            store.apply_genesis(genesis)?;
        }

        let chain_id = genesis.rules.network_id;
        let signer = Arc::new(Signer::new(chain_id));
        let pool = Arc::new(
            TxPool::new(store.clone(), cfg.pool.clone(), chain_id).with_signer(signer.clone()),
        );
        let head_watcher = spawn_head_watcher(pool.clone(), processor.feeds().new_blocks.subscribe(64))?;

        Ok(Self {
            cfg,
            store,
            processor,
            pool,
            interpreter,
            signer,
            nonce_lock: NonceLock::new(),
            head_watcher: Some(head_watcher),
        })
    }

    /// Gossip store.
    pub const fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Block processor, the consensus-facing side of the node.
    pub const fn processor(&self) -> &BlockProcessor {
        &self.processor
    }

    /// Transaction pool.
    pub const fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }

    /// Per-sender locks of locally signed submissions.
    pub const fn nonce_lock(&self) -> &NonceLock {
        &self.nonce_lock
    }

    /// Emits one event of `creator` carrying the pending pool transactions and finalizes the
    /// block it decides, as a single-validator devnet does.
    ///
    /// Returns the validators of the next epoch when the block sealed the epoch.
    pub fn produce_block(
        &self,
        creator: ValidatorId,
        time: u64,
    ) -> Result<Option<Validators>, NodeError> {
        let es = self.store.get_epoch_state().ok_or(StoreError::MissingBlockEpochState)?;
        if !es.validators.exists(creator) {
            return Err(NodeError::NotValidator(creator));
        }
        let parent = self.store.get_last_event(creator)?;
        let seq = match parent {
            Some(id) => self.store.get_event(&id)?.map_or(1, |event| event.seq + 1),
            None => 1,
        };
        let lamport = self.store.get_highest_lamport()? + 1;

        let gas_rules = &es.rules.economy.gas;
        let mut gas = gas_rules.event_gas;
        let mut txs = Vec::new();
        for tx in self.pool.pending() {
            let tx_gas = tx.gas_limit();
            if gas.saturating_add(tx_gas) > gas_rules.max_event_gas {
                break;
            }
            gas += tx_gas;
            txs.push(tx);
        }

        let event = Event {
            epoch: es.epoch,
            seq,
            frame: seq,
            creator,
            lamport,
            creation_time: time,
            median_time: time,
            parents: parent.into_iter().collect(),
            gas_power_left: gas_rules.max_event_gas.saturating_sub(gas),
            gas_power_used: gas,
            txs,
            misbehaviour_proofs: Vec::new(),
        };
        let id = self.store.set_event(&event)?;
        self.store.set_highest_lamport(lamport)?;
        self.store.set_last_event(creator, id)?;
        debug!(target: "gossip::node", %id, creator, txs = event.txs.len(), "emitted event");

        let mut callbacks = self.processor.begin_block(ConsensusBlock { atropos: id, cheaters: Vec::new() })?;
        callbacks.apply_event(&event);
        let sealed = callbacks.end_block();
        self.processor.wait_block_end();
        Ok(sealed)
    }

    /// Waits for the block in progress, then closes the store.
    pub fn stop(self) -> Result<(), NodeError> {
        let Self { store, processor, head_watcher, .. } = self;
        processor.wait_block_end();
        drop(processor);
        if let Some(handle) = head_watcher {
            if handle.join().is_err() {
                warn!(target: "gossip::node", "head watcher panicked");
            }
        }
        store.close()?;
        info!(target: "gossip::node", "stopped");
        Ok(())
    }

    fn resolve(&self, at: BlockRef) -> Result<Option<BlockIdx>, BackendError> {
        let latest = self.store.get_latest_block_index();
        Ok(match at {
            BlockRef::Latest => Some(latest),
            BlockRef::Number(idx) => (idx <= latest).then_some(idx),
            BlockRef::Hash(hash) => self.store.get_block_index(&hash)?,
        })
    }

    fn block(&self, at: BlockRef) -> Result<Option<(BlockIdx, Arc<Block>)>, BackendError> {
        let Some(idx) = self.resolve(at)? else {
            return Ok(None);
        };
        Ok(self.store.get_block(idx)?.map(|block| (idx, block)))
    }

    fn state_processor(&self) -> Result<StateProcessor, BackendError> {
        let rules = self.store.get_rules().ok_or(StoreError::MissingBlockEpochState)?;
        Ok(StateProcessor::new(Arc::new(self.store.evm_chain_config(&rules)), self.interpreter.clone())
            .with_vm_config(self.cfg.processor.vm)
            .with_signer(self.signer.clone())
            .with_block_hashes(self.store.clone()))
    }

    fn trace(&self, hash: &B256) -> Result<Option<serde_json::Value>, BackendError> {
        let Some(position) = self.store.get_tx_position(hash)? else {
            return Ok(None);
        };
        let idx = position.block;
        let block = self.store.get_block(idx)?.ok_or(BackendError::BlockNotFound)?;
        let parent = self.store.get_block(idx.saturating_sub(1))?.ok_or(BackendError::BlockNotFound)?;
        let evm_block = self.store.get_evm_block(idx)?.ok_or(BackendError::BlockNotFound)?;
        let index = evm_block
            .transactions
            .iter()
            .position(|tx| tx.hash() == *hash)
            .ok_or(BackendError::TxNotFound(*hash))?;
        let tx = &evm_block.transactions[index];

        let processor = self.state_processor()?;
        let header = Store::evm_header(idx, &block);
        let mut state = self.store.evm().open(parent.root, parent.sfc_root)?;
        processor.process(
            &header,
            &mut state,
            &evm_block.transactions[..index],
            0,
            &mut GasPool::new(u64::MAX),
            &mut 0,
            &mut |_| {},
        )?;

        let from = self.signer.sender(tx).map_err(TraceError::from)?;
        let env = processor.env(&header);
        let msg = Message::from_tx(tx, from, env.block.base_fee);
        let evm = processor.evm(env, state);
        let trace = trace_transaction(evm, &msg, Box::new(CallTracer::new()))?;
        if self.store.config().store_traces {
            let raw = serde_json::to_vec(&trace).map_err(|err| StoreError::decode("t", err))?;
            self.store.set_tx_trace(*hash, &raw)?;
        }
        Ok(Some(trace))
    }
}

fn spawn_head_watcher(
    pool: Arc<TxPool>,
    heads: Receiver<Arc<EvmBlock>>,
) -> Result<JoinHandle<()>, NodeError> {
    std::thread::Builder::new()
        .name("pool-head-watcher".to_string())
        .spawn(move || {
            for head in heads {
                match pool.reset() {
                    Ok(dropped) => {
                        debug!(target: "gossip::node", number = head.header.number, dropped, "pool reset");
                    }
                    Err(err) => warn!(target: "gossip::node", %err, "pool reset failed"),
                }
            }
        })
        .map_err(|err| NodeError::Spawn { name: "pool-head-watcher", reason: err.to_string() })
}

impl Backend for Node {
    fn progress(&self) -> Progress {
        let Some(state) = self.store.get_block_epoch_state() else {
            return Progress::default();
        };
        let last = state.block_state.last_block;
        Progress { epoch: state.epoch_state.epoch, block: last.idx, atropos: last.atropos, time: last.time }
    }

    fn chain_db(&self) -> Arc<dyn KeyValueStore> {
        self.store.main_db().clone()
    }

    fn header_by_number(&self, at: BlockRef) -> Result<Option<EvmHeader>, BackendError> {
        Ok(self.block(at)?.map(|(idx, block)| Store::evm_header(idx, &block)))
    }

    fn state_and_header_by_number_or_hash(
        &self,
        at: BlockRef,
    ) -> Result<(DualState, EvmHeader), BackendError> {
        let _engine = self.processor.engine_read();
        let header = self.header_by_number(at)?.ok_or(BackendError::BlockNotFound)?;
        let state = self.store.evm().open(header.root, header.sfc_root)?;
        Ok((state, header))
    }

    fn block_by_number(&self, at: BlockRef) -> Result<Option<Arc<EvmBlock>>, BackendError> {
        let Some(idx) = self.resolve(at)? else {
            return Ok(None);
        };
        Ok(self.store.get_evm_block(idx)?)
    }

    fn receipts_by_number(&self, at: BlockRef) -> Result<Option<Vec<Receipt>>, BackendError> {
        let Some(idx) = self.resolve(at)? else {
            return Ok(None);
        };
        Ok(self.store.get_receipts(idx)?)
    }

    fn get_evm(&self, state: DualState, header: &EvmHeader, vm: VmConfig) -> Evm<DualState> {
        let rules = self.store.get_rules().unwrap_or_else(Rules::main_net);
        let chain = self.store.evm_chain_config(&rules);
        let spec = chain.spec_at(header.number);
        let env = helios_evm::EvmEnv::new(header.block_env(spec.is_enabled(SpecId::LONDON)), spec, chain.chain_id)
            .with_config(vm);
        Evm::new(env, state, self.interpreter.clone()).with_block_hashes(self.store.clone())
    }

    fn call(
        &self,
        msg: &Message,
        at: BlockRef,
        timeout: Duration,
    ) -> Result<ExecutionResult, BackendError> {
        let (state, header) = self.state_and_header_by_number_or_hash(at)?;
        let vm = self.cfg.processor.vm.with_no_base_fee(true);
        let mut evm = self.get_evm(state, &header, vm);
        let mut gas_pool = GasPool::new(msg.gas_limit);
        Ok(apply_message_with_timeout(&mut evm, msg, &mut gas_pool, timeout)?)
    }

    fn send_tx(&self, tx: TxEnvelope) -> Result<B256, BackendError> {
        let sender = self.signer.sender(&tx).map_err(PoolError::from)?;
        let _nonce = self.nonce_lock.lock_addr(sender);
        Ok(self.pool.add_local(tx)?)
    }

    fn tx_pool_content(&self) -> PoolContent {
        self.pool.content()
    }

    fn subscribe_new_txs(&self, capacity: usize) -> Receiver<Arc<Vec<TxEnvelope>>> {
        self.pool.subscribe_new_txs(capacity)
    }

    fn tx_trace_by_hash(&self, hash: &B256) -> Result<Option<serde_json::Value>, BackendError> {
        if let Some(raw) = self.store.get_tx_trace(hash)? {
            let trace = serde_json::from_slice(&raw).map_err(|err| StoreError::decode("t", err))?;
            return Ok(Some(trace));
        }
        let _engine = self.processor.engine_read();
        self.trace(hash)
    }

    fn logs(&self, filter: &LogFilter) -> Result<Vec<IndexedLog>, BackendError> {
        Ok(self.store.find_logs(filter)?)
    }
}
