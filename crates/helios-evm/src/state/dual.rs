//! World state with an SFC mirror.

use alloy_primitives::{Address, Bytes, Log, B256, U256};
use delegate::delegate;
use helios_system_contracts::{is_sfc_precompile, SFC_PRECOMPILES};
use tracing::error;

use crate::{AccessList, EvmState, IndexedLog, ProcessorError, StateDb, StateError};

/// Execution state spanning the world trie and the SFC trie.
///
/// Reads are served by the world state. Every write to an SFC precompile address is applied to
/// both tries, so the two must agree on those accounts after every transaction; see
/// [`DualState::check_dual_state`]. Logs, refunds and the access list live in the world state.
#[derive(Debug, Clone)]
pub struct DualState {
    world: StateDb,
    sfc: Option<StateDb>,
    revisions: Vec<(usize, usize)>,
}

impl DualState {
    /// Pairs a world state with an optional SFC state.
    pub const fn new(world: StateDb, sfc: Option<StateDb>) -> Self {
        Self { world, sfc, revisions: Vec::new() }
    }

    /// World state.
    pub const fn world(&self) -> &StateDb {
        &self.world
    }

    /// Mutable world state.
    pub const fn world_mut(&mut self) -> &mut StateDb {
        &mut self.world
    }

    /// SFC state, if enabled.
    pub const fn sfc(&self) -> Option<&StateDb> {
        self.sfc.as_ref()
    }

    /// Mutable SFC state, if enabled.
    pub const fn sfc_mut(&mut self) -> Option<&mut StateDb> {
        self.sfc.as_mut()
    }

    /// Splits into the world and SFC states.
    pub fn into_parts(self) -> (StateDb, Option<StateDb>) {
        (self.world, self.sfc)
    }

    fn mirror(&mut self, address: Address) -> Option<&mut StateDb> {
        if is_sfc_precompile(&address) {
            self.sfc.as_mut()
        } else {
            None
        }
    }

    /// Prepares both states for the transaction `tx_hash` at `tx_index`.
    pub fn prepare(&mut self, tx_hash: B256, tx_index: u32) {
        self.world.prepare(tx_hash, tx_index);
        if let Some(sfc) = &mut self.sfc {
            sfc.prepare(tx_hash, tx_index);
        }
    }

    /// Finalises both states.
    pub fn finalise(&mut self, delete_empty: bool) {
        self.revisions.clear();
        self.world.finalise(delete_empty);
        if let Some(sfc) = &mut self.sfc {
            sfc.finalise(delete_empty);
        }
    }

    /// Intermediate roots of both states. The SFC root is zero when disabled.
    pub fn intermediate_root(&mut self, delete_empty: bool) -> (B256, B256) {
        self.revisions.clear();
        let world = self.world.intermediate_root(delete_empty);
        let sfc = self.sfc.as_mut().map(|sfc| sfc.intermediate_root(delete_empty)).unwrap_or_default();
        (world, sfc)
    }

    /// Commits both states and returns their roots. The SFC root is zero when disabled.
    pub fn commit(&mut self, delete_empty: bool) -> Result<(B256, B256), StateError> {
        self.revisions.clear();
        let world = self.world.commit(delete_empty)?;
        let sfc = match &mut self.sfc {
            Some(sfc) => sfc.commit(delete_empty)?,
            None => B256::ZERO,
        };
        Ok((world, sfc))
    }

    /// First database error of either state.
    pub fn error(&self) -> Option<StateError> {
        self.world.error().or_else(|| self.sfc.as_ref().and_then(StateDb::error)).cloned()
    }

    /// Logs of `tx_hash` stamped with the including block.
    pub fn logs(&self, tx_hash: &B256, block_number: u64, block_hash: B256) -> Vec<IndexedLog> {
        self.world.logs(tx_hash, block_number, block_hash)
    }

    /// Verifies that every SFC precompile has the same storage root, balance and nonce in the
    /// world and the SFC state.
    pub fn check_dual_state(&mut self) -> Result<(), ProcessorError> {
        let Some(sfc) = &mut self.sfc else { return Ok(()) };
        for address in SFC_PRECOMPILES {
            let (world_root, sfc_root) =
                (self.world.storage_root(address), sfc.storage_root(address));
            if world_root != sfc_root {
                return Err(mismatch(address, "storage root", world_root, sfc_root));
            }
            let (world_balance, sfc_balance) = (self.world.balance(address), sfc.balance(address));
            if world_balance != sfc_balance {
                return Err(mismatch(address, "balance", world_balance, sfc_balance));
            }
            let (world_nonce, sfc_nonce) = (self.world.nonce(address), sfc.nonce(address));
            if world_nonce != sfc_nonce {
                return Err(mismatch(address, "nonce", world_nonce, sfc_nonce));
            }
        }
        Ok(())
    }
}

fn mismatch(
    address: Address,
    field: &'static str,
    world: impl ToString,
    sfc: impl ToString,
) -> ProcessorError {
    let err = ProcessorError::DualStateMismatch {
        address,
        field,
        world: world.to_string(),
        sfc: sfc.to_string(),
    };
    error!(target: "state::dual", %err, "dual state diverged");
    err
}

impl EvmState for DualState {
    delegate! {
        to self.world {
            fn exist(&mut self, address: Address) -> bool;
            fn is_empty(&mut self, address: Address) -> bool;
            fn balance(&mut self, address: Address) -> U256;
            fn nonce(&mut self, address: Address) -> u64;
            fn code(&mut self, address: Address) -> Bytes;
            fn code_hash(&mut self, address: Address) -> B256;
            fn storage(&mut self, address: Address, slot: B256) -> U256;
            fn committed_storage(&mut self, address: Address, slot: B256) -> U256;
            fn storage_root(&mut self, address: Address) -> B256;
            fn has_self_destructed(&mut self, address: Address) -> bool;
            fn add_refund(&mut self, gas: u64);
            fn sub_refund(&mut self, gas: u64);
            fn refund(&mut self) -> u64;
            fn add_log(&mut self, log: Log);
            fn prepare_access_list(
                &mut self,
                sender: Address,
                dst: Option<Address>,
                precompiles: &[Address],
                list: &AccessList,
            );
            fn add_address_to_access_list(&mut self, address: Address);
            fn add_slot_to_access_list(&mut self, address: Address, slot: B256);
            fn address_in_access_list(&mut self, address: Address) -> bool;
            fn slot_in_access_list(&mut self, address: Address, slot: B256) -> bool;
        }
    }

    fn create_account(&mut self, address: Address) {
        self.world.create_account(address);
        if let Some(sfc) = self.mirror(address) {
            sfc.create_account(address);
        }
    }

    fn set_balance(&mut self, address: Address, balance: U256) {
        self.world.set_balance(address, balance);
        if let Some(sfc) = self.mirror(address) {
            sfc.set_balance(address, balance);
        }
    }

    fn add_balance(&mut self, address: Address, amount: U256) {
        self.world.add_balance(address, amount);
        if let Some(sfc) = self.mirror(address) {
            sfc.add_balance(address, amount);
        }
    }

    fn sub_balance(&mut self, address: Address, amount: U256) {
        self.world.sub_balance(address, amount);
        if let Some(sfc) = self.mirror(address) {
            sfc.sub_balance(address, amount);
        }
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.world.set_nonce(address, nonce);
        if let Some(sfc) = self.mirror(address) {
            sfc.set_nonce(address, nonce);
        }
    }

    fn set_code(&mut self, address: Address, code: Bytes) {
        if let Some(sfc) = self.mirror(address) {
            sfc.set_code(address, code.clone());
        }
        self.world.set_code(address, code);
    }

    fn set_storage(&mut self, address: Address, slot: B256, value: U256) {
        self.world.set_storage(address, slot, value);
        if let Some(sfc) = self.mirror(address) {
            sfc.set_storage(address, slot, value);
        }
    }

    fn self_destruct(&mut self, address: Address) {
        self.world.self_destruct(address);
        if let Some(sfc) = self.mirror(address) {
            sfc.self_destruct(address);
        }
    }

    fn snapshot(&mut self) -> usize {
        let world = self.world.snapshot();
        let sfc = self.sfc.as_mut().map(EvmState::snapshot).unwrap_or_default();
        self.revisions.push((world, sfc));
        self.revisions.len() - 1
    }

    fn revert_to_snapshot(&mut self, revision: usize) {
        let Some(&(world, sfc)) = self.revisions.get(revision) else { return };
        self.revisions.truncate(revision);
        self.world.revert_to_snapshot(world);
        if let Some(state) = &mut self.sfc {
            state.revert_to_snapshot(sfc);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::address;
    use alloy_trie::EMPTY_ROOT_HASH;
    use helios_system_contracts::SFC_ADDRESS;

    use super::*;
    use crate::StateDatabase;

    fn dual() -> DualState {
        let world = StateDb::new(EMPTY_ROOT_HASH, Arc::new(StateDatabase::in_memory())).unwrap();
        let sfc = StateDb::new(EMPTY_ROOT_HASH, Arc::new(StateDatabase::in_memory())).unwrap();
        DualState::new(world, Some(sfc))
    }

    #[test]
    fn test_precompile_writes_are_mirrored() {
        let mut state = dual();
        let user = address!("0x0000000000000000000000000000000000001234");
        state.add_balance(SFC_ADDRESS, U256::from(5));
        state.set_storage(SFC_ADDRESS, B256::ZERO, U256::from(1));
        state.add_balance(user, U256::from(9));

        assert!(state.check_dual_state().is_ok());
        assert_eq!(state.sfc_mut().unwrap().balance(SFC_ADDRESS), U256::from(5));
        assert!(!state.sfc_mut().unwrap().exist(user));
    }

    #[test]
    fn test_divergence_is_detected() {
        let mut state = dual();
        state.world_mut().set_nonce(SFC_ADDRESS, 1);
        state.sfc_mut().unwrap().set_nonce(SFC_ADDRESS, 1);
        state.world_mut().set_storage(SFC_ADDRESS, B256::ZERO, U256::from(1));
        assert!(matches!(
            state.check_dual_state(),
            Err(ProcessorError::DualStateMismatch { field: "storage root", .. })
        ));
    }

    #[test]
    fn test_paired_revert() {
        let mut state = dual();
        let rev = state.snapshot();
        state.add_balance(SFC_ADDRESS, U256::from(5));
        let inner = state.snapshot();
        state.set_nonce(SFC_ADDRESS, 3);
        state.revert_to_snapshot(inner);
        assert_eq!(state.nonce(SFC_ADDRESS), 0);
        assert_eq!(state.sfc_mut().unwrap().nonce(SFC_ADDRESS), 0);
        state.revert_to_snapshot(rev);
        assert_eq!(state.sfc_mut().unwrap().balance(SFC_ADDRESS), U256::ZERO);
        assert!(!state.exist(SFC_ADDRESS));
    }
}
