use alloy_primitives::{Address, Bytes, Log, B256, U256};
use revm::{
    context_interface::journaled_state::AccountLoad,
    interpreter::{SStoreResult, SelfDestructResult, StateLoad},
};

use crate::{constants::MAX_INIT_CODE_SIZE, parse_delegation, EvmState, Host, SpecId};

/// Exposes a [`Host`] to the revm instruction set.
///
/// Every access warms what it touches and reports whether it was cold, which is what the
/// EIP-2929 gas rules of the instructions key off.
pub(super) struct FrameHost<'a> {
    pub(super) inner: &'a mut dyn Host,
    spec: SpecId,
}

impl<'a> FrameHost<'a> {
    pub(super) fn new(inner: &'a mut dyn Host) -> Self {
        let spec = inner.env().spec;
        Self { inner, spec }
    }

    fn state(&mut self) -> &mut dyn EvmState {
        self.inner.state()
    }

    fn warm_address(&mut self, address: Address) -> bool {
        let state = self.state();
        let cold = !state.address_in_access_list(address);
        if cold {
            state.add_address_to_access_list(address);
        }
        cold
    }

    fn warm_slot(&mut self, address: Address, slot: B256) -> bool {
        let state = self.state();
        let cold = !state.slot_in_access_list(address, slot);
        if cold {
            state.add_slot_to_access_list(address, slot);
        }
        cold
    }

    /// EIP-161 emptiness once it is active, non-existence before.
    fn is_dead(&mut self, address: Address) -> bool {
        if self.spec.is_enabled(SpecId::SPURIOUS_DRAGON) {
            self.state().is_empty(address)
        } else {
            !self.state().exist(address)
        }
    }
}

fn slot_key(key: U256) -> B256 {
    B256::from(key)
}

impl revm::interpreter::Host for FrameHost<'_> {
    fn basefee(&self) -> U256 {
        U256::from(self.inner.env().block.base_fee.unwrap_or_default())
    }

    fn blob_gasprice(&self) -> U256 {
        U256::ZERO
    }

    fn gas_limit(&self) -> U256 {
        U256::from(self.inner.env().block.gas_limit)
    }

    fn difficulty(&self) -> U256 {
        U256::ZERO
    }

    fn prevrandao(&self) -> Option<U256> {
        Some(U256::from_be_bytes(self.inner.env().block.prev_randao.0))
    }

    fn block_number(&self) -> U256 {
        U256::from(self.inner.env().block.number)
    }

    fn timestamp(&self) -> U256 {
        U256::from(self.inner.env().block.timestamp)
    }

    fn beneficiary(&self) -> Address {
        self.inner.env().block.coinbase
    }

    fn chain_id(&self) -> U256 {
        U256::from(self.inner.env().chain_id)
    }

    fn effective_gas_price(&self) -> U256 {
        U256::from(self.inner.tx_env().gas_price)
    }

    fn caller(&self) -> Address {
        self.inner.tx_env().origin
    }

    fn blob_hash(&self, _number: usize) -> Option<U256> {
        None
    }

    fn max_initcode_size(&self) -> usize {
        MAX_INIT_CODE_SIZE
    }

    fn block_hash(&mut self, number: u64) -> Option<B256> {
        Some(self.inner.block_hash(number))
    }

    fn selfdestruct(
        &mut self,
        address: Address,
        target: Address,
    ) -> Option<StateLoad<SelfDestructResult>> {
        let is_cold = self.warm_address(target);
        let target_exists = !self.is_dead(target);
        let state = self.state();
        let balance = state.balance(address);
        let previously_destroyed = state.has_self_destructed(address);
        if address != target {
            state.add_balance(target, balance);
        }
        state.self_destruct(address);
        Some(StateLoad::new(
            SelfDestructResult { had_value: !balance.is_zero(), target_exists, previously_destroyed },
            is_cold,
        ))
    }

    fn log(&mut self, log: Log) {
        self.state().add_log(log);
    }

    fn sstore(
        &mut self,
        address: Address,
        key: U256,
        value: U256,
    ) -> Option<StateLoad<SStoreResult>> {
        let slot = slot_key(key);
        let is_cold = self.warm_slot(address, slot);
        let state = self.state();
        let original_value = state.committed_storage(address, slot);
        let present_value = state.storage(address, slot);
        state.set_storage(address, slot, value);
        Some(StateLoad::new(
            SStoreResult { original_value, present_value, new_value: value },
            is_cold,
        ))
    }

    fn sload(&mut self, address: Address, key: U256) -> Option<StateLoad<U256>> {
        let slot = slot_key(key);
        let is_cold = self.warm_slot(address, slot);
        Some(StateLoad::new(self.state().storage(address, slot), is_cold))
    }

    // transient storage is Cancun; the instruction table rejects both opcodes before that
    fn tstore(&mut self, _address: Address, _key: U256, _value: U256) {}

    fn tload(&mut self, _address: Address, _key: U256) -> U256 {
        U256::ZERO
    }

    fn balance(&mut self, address: Address) -> Option<StateLoad<U256>> {
        let is_cold = self.warm_address(address);
        Some(StateLoad::new(self.state().balance(address), is_cold))
    }

    fn load_account_delegated(&mut self, address: Address) -> Option<StateLoad<AccountLoad>> {
        let is_cold = self.warm_address(address);
        let is_empty = self.is_dead(address);
        let code = self.state().code(address);
        let is_delegate_account_cold = if self.spec.is_enabled(SpecId::PHAETHON) {
            parse_delegation(&code).map(|target| self.warm_address(target))
        } else {
            None
        };
        Some(StateLoad::new(AccountLoad { is_delegate_account_cold, is_empty }, is_cold))
    }

    fn load_account_code(&mut self, address: Address) -> Option<StateLoad<Bytes>> {
        let is_cold = self.warm_address(address);
        Some(StateLoad::new(self.state().code(address), is_cold))
    }

    fn load_account_code_hash(&mut self, address: Address) -> Option<StateLoad<B256>> {
        let is_cold = self.warm_address(address);
        let state = self.state();
        let hash = if state.is_empty(address) { B256::ZERO } else { state.code_hash(address) };
        Some(StateLoad::new(hash, is_cold))
    }
}
