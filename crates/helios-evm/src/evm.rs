//! Frame plumbing around the pluggable interpreter.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_trie::KECCAK_EMPTY;
use auto_impl::auto_impl;
use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    constants::{
        gas::CREATE_DATA_GAS, BLOCK_HASH_HISTORY, CALL_DEPTH_LIMIT, MAX_CODE_SIZE,
        PRECOMPILE_COUNT,
    },
    parse_delegation, BlockEnv, CallKind, CallRequest, CreateRequest, EvmState, Frame, FrameKind,
    FrameResult, Host, Interpreter, SpecId, Tracer, VmError,
};

/// Addresses of the precompiled contracts, warm from the start of every transaction.
pub fn precompile_addresses() -> Vec<Address> {
    (1..=PRECOMPILE_COUNT).map(Address::with_last_byte).collect()
}

/// Switches of the state transition that are not part of the protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VmConfig {
    /// Skip the base-fee checks for zero-priced calls, as RPC simulations do.
    pub no_base_fee: bool,
    /// Charge 10% of the gas left unused by non-internal transactions.
    pub charge_idle_gas: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self { no_base_fee: false, charge_idle_gas: true }
    }
}

impl VmConfig {
    /// Enables or disables the idle-gas charge.
    pub const fn with_idle_gas_charge(mut self, charge: bool) -> Self {
        self.charge_idle_gas = charge;
        self
    }

    /// Enables or disables the base-fee checks for zero-priced calls.
    pub const fn with_no_base_fee(mut self, no_base_fee: bool) -> Self {
        self.no_base_fee = no_base_fee;
        self
    }
}

/// Block and chain environment of an [`Evm`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvmEnv {
    /// Block context.
    pub block: BlockEnv,
    /// Protocol version.
    pub spec: SpecId,
    /// Chain id.
    pub chain_id: u64,
    /// Transition switches.
    pub config: VmConfig,
}

impl EvmEnv {
    /// Creates an environment.
    pub const fn new(block: BlockEnv, spec: SpecId, chain_id: u64) -> Self {
        Self { block, spec, chain_id, config: VmConfig { no_base_fee: false, charge_idle_gas: true } }
    }

    /// Sets the transition switches.
    pub const fn with_config(mut self, config: VmConfig) -> Self {
        self.config = config;
        self
    }
}

/// Transaction-level environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxEnv {
    /// Transaction sender.
    pub origin: Address,
    /// Effective gas price.
    pub gas_price: u128,
}

/// Source of the hashes of past blocks, read by `BLOCKHASH`.
#[auto_impl(&, Box, Arc)]
pub trait BlockHashes: Send + Sync + core::fmt::Debug {
    /// Hash of block `number`, `None` if unknown.
    fn block_hash(&self, number: u64) -> Option<B256>;
}

/// Stops an [`Evm`] at a deadline unless dropped first.
#[derive(Debug)]
pub struct CancelTimer {
    stop: Option<crossbeam_channel::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for CancelTimer {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Executes message calls and creations on top of an [`Interpreter`].
pub struct Evm<S> {
    env: EvmEnv,
    tx: TxEnv,
    state: S,
    interpreter: Arc<dyn Interpreter>,
    block_hashes: Option<Arc<dyn BlockHashes>>,
    cancelled: Arc<AtomicBool>,
    depth: usize,
    tracer: Option<Box<dyn Tracer>>,
}

impl<S> core::fmt::Debug for Evm<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Evm")
            .field("env", &self.env)
            .field("tx", &self.tx)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl<S: EvmState> Evm<S> {
    /// Creates an EVM over `state`.
    pub fn new(env: EvmEnv, state: S, interpreter: Arc<dyn Interpreter>) -> Self {
        Self {
            env,
            tx: TxEnv::default(),
            state,
            interpreter,
            block_hashes: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            depth: 0,
            tracer: None,
        }
    }

    /// Sets the source of past block hashes. Without one `BLOCKHASH` reads zero.
    pub fn with_block_hashes(mut self, block_hashes: Arc<dyn BlockHashes>) -> Self {
        self.block_hashes = Some(block_hashes);
        self
    }

    /// Attaches a tracer.
    pub fn with_tracer(mut self, tracer: Box<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Detaches the tracer.
    pub fn take_tracer(&mut self) -> Option<Box<dyn Tracer>> {
        self.tracer.take()
    }

    /// Attached tracer.
    pub fn tracer_mut(&mut self) -> Option<&mut (dyn Tracer + 'static)> {
        self.tracer.as_deref_mut()
    }

    /// Sets the transaction-level environment.
    pub const fn set_tx_env(&mut self, tx: TxEnv) {
        self.tx = tx;
    }

    /// Block and chain environment.
    pub const fn env(&self) -> &EvmEnv {
        &self.env
    }

    /// The state.
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// Mutable state.
    pub const fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Consumes the EVM, returning its state.
    pub fn into_state(self) -> S {
        self.state
    }

    /// Stops execution at the next instruction.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Arms a watcher thread that cancels execution after `timeout`.
    ///
    /// Dropping the returned timer disarms it.
    pub fn cancel_after(&self, timeout: Duration) -> CancelTimer {
        let (stop, wait) = crossbeam_channel::bounded::<()>(0);
        let cancelled = self.cancelled.clone();
        let handle = std::thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = wait.recv_timeout(timeout) {
                cancelled.store(true, Ordering::Release);
            }
        });
        CancelTimer { stop: Some(stop), handle: Some(handle) }
    }

    fn is_enabled(&self, spec: SpecId) -> bool {
        self.env.spec.is_enabled(spec)
    }

    fn is_precompile(address: &Address) -> bool {
        address.0[..19].iter().all(|b| *b == 0) && (1..=PRECOMPILE_COUNT).contains(&address.0[19])
    }

    fn transfer(&mut self, from: Address, to: Address, value: U256) {
        self.state.sub_balance(from, value);
        self.state.add_balance(to, value);
    }

    /// Loads the code executed when calling `address`, following an EIP-7702 delegation.
    fn load_code(&mut self, address: Address) -> (Address, Bytes, B256) {
        let code = self.state.code(address);
        if let Some(target) = parse_delegation(&code) {
            if self.is_enabled(SpecId::BERLIN) {
                self.state.add_address_to_access_list(target);
            }
            let hash = self.state.code_hash(target);
            return (target, self.state.code(target), hash);
        }
        let hash = self.state.code_hash(address);
        (address, code, hash)
    }

    fn run(&mut self, frame: Frame) -> FrameResult {
        if self.depth > 0 {
            if let Some(tracer) = &mut self.tracer {
                tracer.capture_enter(&frame);
            }
        }
        let mut result = if self.is_cancelled() {
            FrameResult::halt(VmError::Cancelled)
        } else if frame.code.is_empty() {
            FrameResult::success(frame.gas, Bytes::new())
        } else {
            let interpreter = self.interpreter.clone();
            self.depth += 1;
            let result = interpreter.run(&frame, self);
            self.depth -= 1;
            result
        };
        if matches!(result.status, crate::FrameStatus::Halt(_)) {
            result.gas_left = 0;
        }
        result.gas_left = result.gas_left.min(frame.gas);
        if self.depth > 0 {
            if let Some(tracer) = &mut self.tracer {
                tracer.capture_exit(&result);
            }
        }
        result
    }

    /// Executes a message call from `caller` to `to`.
    ///
    /// On failure every state change of the frame is reverted. A halt consumes all gas, a
    /// revert returns the gas left.
    pub fn call(
        &mut self,
        caller: Address,
        to: Address,
        input: Bytes,
        gas: u64,
        value: U256,
    ) -> FrameResult {
        self.execute_call(CallRequest::call(caller, to, input, gas, value))
    }

    /// Executes a message call of any scheme.
    pub fn execute_call(&mut self, call: CallRequest) -> FrameResult {
        let CallRequest { kind, caller, address, code_address, input, gas, value, is_static } = call;
        if self.depth > CALL_DEPTH_LIMIT {
            return FrameResult::fail_early(VmError::Depth, gas);
        }
        let transfer = matches!(kind, CallKind::Call | CallKind::CallCode);
        if transfer && !value.is_zero() && self.state.balance(caller) < value {
            return FrameResult::fail_early(VmError::InsufficientBalance, gas);
        }
        let snapshot = self.state.snapshot();
        if kind == CallKind::Call {
            if !self.state.exist(address) {
                if value.is_zero() &&
                    self.is_enabled(SpecId::SPURIOUS_DRAGON) &&
                    !Self::is_precompile(&address)
                {
                    return FrameResult::success(gas, Bytes::new());
                }
                self.state.create_account(address);
            }
            self.transfer(caller, address, value);
        }

        let result = match self.interpreter.precompile(self.env.spec, code_address, &input, gas) {
            Some(result) => result,
            None => {
                let (code_address, code, code_hash) = self.load_code(code_address);
                let frame = Frame {
                    kind: kind.into(),
                    caller,
                    address,
                    code_address,
                    code,
                    code_hash,
                    input,
                    value,
                    gas,
                    depth: self.depth,
                    is_static,
                };
                self.run(frame)
            }
        };
        if !result.is_success() {
            self.state.revert_to_snapshot(snapshot);
        }
        trace!(target: "evm", ?kind, %caller, %address, gas, gas_left = result.gas_left, status = ?result.status, "call");
        result
    }

    /// Creates a contract at `create(caller, nonce)` by running `init_code`.
    ///
    /// Returns the new address on success.
    pub fn create(
        &mut self,
        caller: Address,
        init_code: Bytes,
        gas: u64,
        value: U256,
    ) -> (FrameResult, Option<Address>) {
        self.execute_create(CreateRequest::create(caller, init_code, gas, value))
    }

    /// Creates a contract at `create2(caller, salt, keccak(init_code))`.
    pub fn create2(
        &mut self,
        caller: Address,
        init_code: Bytes,
        salt: B256,
        gas: u64,
        value: U256,
    ) -> (FrameResult, Option<Address>) {
        self.execute_create(CreateRequest::create(caller, init_code, gas, value).with_salt(salt))
    }

    /// Executes a creation of either scheme.
    pub fn execute_create(&mut self, create: CreateRequest) -> (FrameResult, Option<Address>) {
        let CreateRequest { caller, init_code, gas, value, salt } = create;
        if self.depth > CALL_DEPTH_LIMIT {
            return (FrameResult::fail_early(VmError::Depth, gas), None);
        }
        if self.state.balance(caller) < value {
            return (FrameResult::fail_early(VmError::InsufficientBalance, gas), None);
        }
        let nonce = self.state.nonce(caller);
        let Some(next) = nonce.checked_add(1) else {
            return (FrameResult::fail_early(VmError::NonceUintOverflow, gas), None);
        };
        self.state.set_nonce(caller, next);
        let code_hash = keccak256(&init_code);
        let (kind, address) = match salt {
            Some(salt) => (FrameKind::Create2, caller.create2(salt, code_hash)),
            None => (FrameKind::Create, caller.create(nonce)),
        };
        if self.is_enabled(SpecId::BERLIN) {
            self.state.add_address_to_access_list(address);
        }

        let existing = self.state.code_hash(address);
        if self.state.nonce(address) != 0 || (existing != B256::ZERO && existing != KECCAK_EMPTY) {
            return (FrameResult::halt(VmError::ContractAddressCollision), None);
        }

        let snapshot = self.state.snapshot();
        self.state.create_account(address);
        if self.is_enabled(SpecId::SPURIOUS_DRAGON) {
            self.state.set_nonce(address, 1);
        }
        self.transfer(caller, address, value);

        let frame = Frame {
            kind,
            caller,
            address,
            code_address: address,
            code_hash,
            code: init_code,
            input: Bytes::new(),
            value,
            gas,
            depth: self.depth,
            is_static: false,
        };
        let mut result = self.run(frame);
        if result.is_success() {
            result = self.deposit_code(address, result);
        }
        trace!(target: "evm", %caller, %address, gas, gas_left = result.gas_left, status = ?result.status, "create");
        if !result.is_success() {
            self.state.revert_to_snapshot(snapshot);
            return (result, None);
        }
        (result, Some(address))
    }

    fn deposit_code(&mut self, address: Address, result: FrameResult) -> FrameResult {
        let code = result.output;
        if self.is_enabled(SpecId::SPURIOUS_DRAGON) && code.len() > MAX_CODE_SIZE {
            return FrameResult::halt(VmError::MaxCodeSizeExceeded);
        }
        if self.is_enabled(SpecId::LONDON) && code.first() == Some(&0xef) {
            return FrameResult::halt(VmError::InvalidCode);
        }
        let cost = code.len() as u64 * CREATE_DATA_GAS;
        let Some(gas_left) = result.gas_left.checked_sub(cost) else {
            if self.is_enabled(SpecId::HOMESTEAD) {
                return FrameResult::halt(VmError::CodeStoreOutOfGas);
            }
            return FrameResult::success(result.gas_left, Bytes::new());
        };
        self.state.set_code(address, code.clone());
        FrameResult::success(gas_left, code)
    }
}

impl<S: EvmState> Host for Evm<S> {
    fn env(&self) -> &EvmEnv {
        &self.env
    }

    fn tx_env(&self) -> &TxEnv {
        &self.tx
    }

    fn state(&mut self) -> &mut dyn EvmState {
        &mut self.state
    }

    fn call(&mut self, call: CallRequest) -> FrameResult {
        self.execute_call(call)
    }

    fn create(&mut self, create: CreateRequest) -> (FrameResult, Option<Address>) {
        self.execute_create(create)
    }

    fn block_hash(&mut self, number: u64) -> B256 {
        let current = self.env.block.number;
        if number >= current || current - number > BLOCK_HASH_HISTORY {
            return B256::ZERO;
        }
        self.block_hashes.as_ref().and_then(|hashes| hashes.block_hash(number)).unwrap_or_default()
    }

    fn capture_state(&mut self, pc: u64, op: u8, gas: u64, cost: u64, depth: usize) {
        if let Some(tracer) = &mut self.tracer {
            tracer.capture_state(pc, op, gas, cost, depth);
        }
    }

    fn is_cancelled(&self) -> bool {
        Self::is_cancelled(self)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;
    use alloy_trie::EMPTY_ROOT_HASH;

    use super::*;
    use crate::{RevmInterpreter, StateDatabase, StateDb};

    const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");
    const BOB: Address = address!("0x0000000000000000000000000000000000000b0b");

    fn evm(spec: SpecId) -> Evm<StateDb> {
        let state = StateDb::new(EMPTY_ROOT_HASH, Arc::new(StateDatabase::in_memory())).unwrap();
        Evm::new(EvmEnv::new(BlockEnv::default(), spec, 1), state, Arc::new(RevmInterpreter))
    }

    #[test]
    fn test_call_transfers_value() {
        let mut evm = evm(SpecId::LONDON);
        evm.state_mut().set_balance(ALICE, U256::from(100));
        let result = evm.call(ALICE, BOB, Bytes::new(), 1_000, U256::from(40));
        assert!(result.is_success());
        assert_eq!(result.gas_left, 1_000);
        assert_eq!(evm.state_mut().balance(BOB), U256::from(40));
        assert_eq!(evm.state_mut().balance(ALICE), U256::from(60));
    }

    #[test]
    fn test_call_with_insufficient_balance_keeps_gas() {
        let mut evm = evm(SpecId::LONDON);
        let result = evm.call(ALICE, BOB, Bytes::new(), 1_000, U256::from(1));
        assert_eq!(result.error(), Some(VmError::InsufficientBalance));
        assert_eq!(result.gas_left, 1_000);
    }

    #[test]
    fn test_zero_value_call_to_missing_account_creates_nothing() {
        let mut evm = evm(SpecId::LONDON);
        assert!(evm.call(ALICE, BOB, Bytes::new(), 10, U256::ZERO).is_success());
        assert!(!evm.state_mut().exist(BOB));
    }

    #[test]
    fn test_create_bumps_nonce_and_detects_collision() {
        let mut evm = evm(SpecId::LONDON);
        let (result, address) = evm.create(ALICE, Bytes::new(), 5_000, U256::ZERO);
        assert!(result.is_success());
        assert_eq!(address, Some(ALICE.create(0)));
        assert_eq!(evm.state_mut().nonce(ALICE), 1);
        assert_eq!(evm.state_mut().nonce(ALICE.create(0)), 1);

        evm.state_mut().set_nonce(ALICE.create(1), 7);
        let (result, address) = evm.create(ALICE, Bytes::new(), 5_000, U256::ZERO);
        assert_eq!(result.error(), Some(VmError::ContractAddressCollision));
        assert_eq!(result.gas_left, 0);
        assert_eq!(address, None);
    }

    #[test]
    fn test_precompile_range() {
        assert!(Evm::<StateDb>::is_precompile(&Address::with_last_byte(1)));
        assert!(Evm::<StateDb>::is_precompile(&Address::with_last_byte(9)));
        assert!(!Evm::<StateDb>::is_precompile(&Address::with_last_byte(10)));
        assert_eq!(precompile_addresses().len(), 9);
    }

    #[test]
    fn test_cancel_timer_fires() {
        let evm = evm(SpecId::LONDON);
        let timer = evm.cancel_after(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(50));
        assert!(evm.is_cancelled());
        drop(timer);

        let evm = self::evm(SpecId::LONDON);
        drop(evm.cancel_after(Duration::from_secs(60)));
        assert!(!evm.is_cancelled());
    }
}
