//! Ordered execution of a block's transactions.

use std::sync::Arc;

use tracing::{debug, error};

use crate::{
    apply_message, BlockHashes, ChainConfig, DualState, Evm, EvmEnv, EvmHeader, EvmState, GasPool,
    IndexedLog, Interpreter, Message, ProcessorError, Receipt, Signer, SpecId, Transaction,
    TxEnvelope, VmConfig,
};

/// Receipts and skipped positions of one processed chunk of transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Receipts of the included transactions, in execution order.
    pub receipts: Vec<Receipt>,
    /// Positions of the transactions that could not be applied, increasing.
    pub skipped: Vec<u32>,
}

/// Runs transactions one by one on a [`DualState`] and builds their receipts.
///
/// A transaction whose sender cannot be recovered, or that fails the state-transition
/// pre-checks, is skipped: it gets no receipt and leaves no trace in the state. A database
/// failure or a divergence between the world and the SFC state aborts processing.
#[derive(Debug, Clone)]
pub struct StateProcessor {
    chain: Arc<ChainConfig>,
    signer: Arc<Signer>,
    interpreter: Arc<dyn Interpreter>,
    block_hashes: Option<Arc<dyn BlockHashes>>,
    vm_config: VmConfig,
}

impl StateProcessor {
    /// Creates a processor for `chain` executing code with `interpreter`.
    pub fn new(chain: Arc<ChainConfig>, interpreter: Arc<dyn Interpreter>) -> Self {
        let signer = Arc::new(Signer::new(chain.chain_id));
        Self { chain, signer, interpreter, block_hashes: None, vm_config: VmConfig::default() }
    }

    /// Sets the source of past block hashes read by `BLOCKHASH`.
    pub fn with_block_hashes(mut self, block_hashes: Arc<dyn BlockHashes>) -> Self {
        self.block_hashes = Some(block_hashes);
        self
    }

    /// Shares a sender cache with other components.
    pub fn with_signer(mut self, signer: Arc<Signer>) -> Self {
        self.signer = signer;
        self
    }

    /// Sets the transition switches.
    pub const fn with_vm_config(mut self, config: VmConfig) -> Self {
        self.vm_config = config;
        self
    }

    /// Chain configuration.
    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    /// Sender cache.
    pub const fn signer(&self) -> &Arc<Signer> {
        &self.signer
    }

    /// Interpreter.
    pub const fn interpreter(&self) -> &Arc<dyn Interpreter> {
        &self.interpreter
    }

    /// EVM environment of the block `header`.
    pub fn env(&self, header: &EvmHeader) -> EvmEnv {
        let spec = self.chain.spec_at(header.number);
        EvmEnv::new(header.block_env(spec.is_enabled(SpecId::LONDON)), spec, self.chain.chain_id)
            .with_config(self.vm_config)
    }

    /// An EVM over `state` running this processor's interpreter.
    pub fn evm<S: EvmState>(&self, env: EvmEnv, state: S) -> Evm<S> {
        let evm = Evm::new(env, state, self.interpreter.clone());
        match &self.block_hashes {
            Some(block_hashes) => evm.with_block_hashes(block_hashes.clone()),
            None => evm,
        }
    }

    /// Executes `txs` in order on `state`.
    ///
    /// Transaction positions start at `offset`; `used_gas` accumulates the gas of the included
    /// transactions and feeds the cumulative gas of the receipts. `on_new_log` sees the logs of
    /// every receipt, once the receipt is complete.
    pub fn process(
        &self,
        header: &EvmHeader,
        state: &mut DualState,
        txs: &[TxEnvelope],
        offset: u32,
        gas_pool: &mut GasPool,
        used_gas: &mut u64,
        on_new_log: &mut dyn FnMut(&IndexedLog),
    ) -> Result<ProcessOutput, ProcessorError> {
        let env = self.env(header);
        let spec = env.spec;
        let base_fee = env.block.base_fee;
        let mut evm = self.evm(env, state);
        let mut output = ProcessOutput::default();

        for (i, tx) in txs.iter().enumerate() {
            let index = offset + i as u32;
            let hash = tx.hash();
            let from = match self.signer.sender(tx) {
                Ok(from) => from,
                Err(err) => {
                    debug!(target: "evm::processor", block = header.number, index, %hash, %err, "skipping transaction");
                    output.skipped.push(index);
                    continue;
                }
            };
            let msg = Message::from_tx(tx, from, base_fee);

            evm.state_mut().prepare(hash, index);
            let result = match apply_message(&mut evm, &msg, gas_pool) {
                Ok(result) => result,
                Err(err) => {
                    debug!(target: "evm::processor", block = header.number, index, %hash, %from, %err, "skipping transaction");
                    output.skipped.push(index);
                    continue;
                }
            };

            let state = evm.state_mut();
            if let Some(err) = state.error() {
                error!(target: "evm::processor", block = header.number, index, %hash, %err, "state failure");
                return Err(err.into());
            }
            state.check_dual_state()?;

            let post_state = if spec.is_enabled(SpecId::BYZANTIUM) {
                state.finalise(true);
                None
            } else {
                Some(state.intermediate_root(spec.is_enabled(SpecId::SPURIOUS_DRAGON)).0)
            };

            *used_gas += result.used_gas;
            let logs = state.logs(&hash, header.number, header.hash);
            let receipt = Receipt {
                tx_type: tx.tx_type(),
                status: !result.failed(),
                post_state,
                cumulative_gas_used: *used_gas,
                gas_used: result.used_gas,
                bloom: Receipt::logs_bloom(&logs),
                logs,
                tx_hash: hash,
                contract_address: tx.is_create().then(|| from.create(tx.nonce())),
                effective_gas_price: msg.gas_price,
                block_hash: header.hash,
                block_number: header.number,
                transaction_index: index,
            };
            for log in &receipt.logs {
                on_new_log(log);
            }
            output.receipts.push(receipt);
        }
        Ok(output)
    }
}
