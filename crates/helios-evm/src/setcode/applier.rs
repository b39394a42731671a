use alloy_primitives::{Address, Log, B256, U256};
use alloy_sol_types::SolEvent;
use helios_system_contracts::{delegation::DelegationSet, EIP7702_DELEGATION_ADDRESS};
use tracing::debug;

use crate::{
    delegation_slot, parse_delegation, transition::StateTransition, Delegation, Evm, EvmState,
    ExecutionResult, GasPool, InvalidTransaction, Message, SetCodeTx,
};

/// Outcome of [`SetCodeApplier::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetCodeOutcome {
    /// Result of the message execution.
    pub result: ExecutionResult,
    /// Delegations installed or cleared, in authorization order.
    pub delegations: Vec<Delegation>,
}

/// Stand-alone executor of SetCode transactions.
///
/// Runs the regular state transition and, for every applied authorization, records the
/// delegation in the registry at [`EIP7702_DELEGATION_ADDRESS`] and emits a `DelegationSet`
/// log from that address.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetCodeApplier;

impl SetCodeApplier {
    /// Applies `tx` sent by `from`.
    pub fn apply<S: EvmState>(
        evm: &mut Evm<S>,
        tx: &SetCodeTx,
        from: Address,
        gas_pool: &mut GasPool,
    ) -> Result<SetCodeOutcome, InvalidTransaction> {
        if tx.to.is_create() {
            return Err(InvalidTransaction::SetCodeTxCreate);
        }
        let base_fee = evm.env().block.base_fee;
        let msg = Message::from_tx(&tx.clone().into(), from, base_fee);

        let mut record = |state: &mut S, delegation: &Delegation| {
            Self::record_delegation(state, delegation);
        };
        let (result, delegations) =
            StateTransition::new(evm, &msg, gas_pool).with_delegation_hook(&mut record).run()?;
        debug!(target: "evm::setcode", %from, delegations = delegations.len(), used_gas = result.used_gas, "applied set code transaction");
        Ok(SetCodeOutcome { result, delegations })
    }

    /// Writes `delegation` to the registry and emits its log.
    pub fn record_delegation<S: EvmState + ?Sized>(state: &mut S, delegation: &Delegation) {
        let value = U256::from_be_bytes(delegation.code_address.into_word().0);
        state.set_storage(EIP7702_DELEGATION_ADDRESS, delegation_slot(delegation.authority), value);
        let event =
            DelegationSet { authority: delegation.authority, codeAddress: delegation.code_address };
        state.add_log(Log { address: EIP7702_DELEGATION_ADDRESS, data: event.encode_log_data() });
    }

    /// Code address `authority` delegates to according to the registry.
    pub fn registered_delegation<S: EvmState + ?Sized>(
        state: &mut S,
        authority: Address,
    ) -> Option<Address> {
        let value = state.storage(EIP7702_DELEGATION_ADDRESS, delegation_slot(authority));
        (!value.is_zero()).then(|| Address::from_word(B256::from(value)))
    }

    /// Code address `authority` delegates to according to its code.
    pub fn delegation<S: EvmState + ?Sized>(state: &mut S, authority: Address) -> Option<Address> {
        parse_delegation(&state.code(authority))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::{address, keccak256, TxKind};
    use alloy_trie::EMPTY_ROOT_HASH;

    use super::*;
    use crate::{
        delegation_code, test_utils::TestSigner, BlockEnv, EvmEnv, RevmInterpreter, SpecId,
        StateDatabase, StateDb, VmConfig,
    };

    const CODE: Address = address!("0x00000000000000000000000000000000000000c0");
    const CHAIN_ID: u64 = 250;

    fn evm(sender: Address) -> Evm<StateDb> {
        let mut state =
            StateDb::new(EMPTY_ROOT_HASH, Arc::new(StateDatabase::in_memory())).unwrap();
        state.set_balance(sender, U256::from(1_000_000_000_000_000_000u128));
        let block = BlockEnv { gas_limit: 30_000_000, base_fee: Some(1), ..Default::default() };
        let env = EvmEnv::new(block, SpecId::PHAETHON, CHAIN_ID)
            .with_config(VmConfig::default().with_idle_gas_charge(false));
        Evm::new(env, state, Arc::new(RevmInterpreter))
    }

    fn set_code_tx(nonce: u64, authorization_list: Vec<crate::AuthorizationTuple>) -> SetCodeTx {
        SetCodeTx {
            chain_id: CHAIN_ID,
            nonce,
            max_priority_fee_per_gas: 1,
            max_fee_per_gas: 1,
            gas: 100_000,
            to: TxKind::Call(Address::with_last_byte(0xaa)),
            authorization_list,
            ..Default::default()
        }
    }

    #[test]
    fn test_apply_writes_registry_slot_and_log() {
        let sender = TestSigner::from_seed(1);
        let authority = TestSigner::from_seed(2);
        let mut evm = evm(sender.address());
        evm.state_mut().set_nonce(authority.address(), 42);

        let tx = set_code_tx(0, vec![authority.sign_authorization(CHAIN_ID, CODE, 42)]);
        let mut pool = GasPool::new(30_000_000);
        let outcome = SetCodeApplier::apply(&mut evm, &tx, sender.address(), &mut pool).unwrap();
        assert!(!outcome.result.failed());
        assert_eq!(
            outcome.delegations,
            vec![Delegation { authority: authority.address(), code_address: CODE, existed: true }]
        );

        let state = evm.state_mut();
        assert_eq!(state.nonce(authority.address()), 43);
        assert_eq!(state.code(authority.address()), delegation_code(CODE));

        let mut seed = b"EIP7702_DELEGATION_".to_vec();
        seed.extend_from_slice(authority.address().as_slice());
        assert_eq!(
            state.storage(EIP7702_DELEGATION_ADDRESS, keccak256(seed)),
            U256::from_be_slice(CODE.as_slice())
        );
        assert_eq!(SetCodeApplier::registered_delegation(state, authority.address()), Some(CODE));
        assert_eq!(SetCodeApplier::delegation(state, authority.address()), Some(CODE));

        let logs = state.logs(&B256::ZERO, 0, B256::ZERO);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].address, EIP7702_DELEGATION_ADDRESS);
        assert_eq!(
            logs[0].topics(),
            &[DelegationSet::SIGNATURE_HASH, authority.address().into_word()]
        );
        assert_eq!(logs[0].data.data.as_ref(), CODE.into_word().as_slice());
    }

    #[test]
    fn test_clearing_delegation_zeroes_registry_slot() {
        let sender = TestSigner::from_seed(1);
        let authority = TestSigner::from_seed(2);
        let mut evm = evm(sender.address());
        let mut pool = GasPool::new(30_000_000);

        let install = set_code_tx(0, vec![authority.sign_authorization(CHAIN_ID, CODE, 0)]);
        SetCodeApplier::apply(&mut evm, &install, sender.address(), &mut pool).unwrap();
        let clear = set_code_tx(1, vec![authority.sign_authorization(CHAIN_ID, Address::ZERO, 1)]);
        let outcome = SetCodeApplier::apply(&mut evm, &clear, sender.address(), &mut pool).unwrap();
        assert_eq!(outcome.delegations[0].code_address, Address::ZERO);

        let state = evm.state_mut();
        assert_eq!(SetCodeApplier::registered_delegation(state, authority.address()), None);
        assert_eq!(SetCodeApplier::delegation(state, authority.address()), None);
        assert!(state.code(authority.address()).is_empty());
        assert_eq!(state.nonce(authority.address()), 2);
    }

    #[test]
    fn test_create_is_rejected() {
        let sender = TestSigner::from_seed(1);
        let mut evm = evm(sender.address());
        let tx = SetCodeTx { to: TxKind::Create, ..set_code_tx(0, Vec::new()) };
        assert_eq!(
            SetCodeApplier::apply(&mut evm, &tx, sender.address(), &mut GasPool::new(30_000_000)),
            Err(InvalidTransaction::SetCodeTxCreate)
        );
    }
}
