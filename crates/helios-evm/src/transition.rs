//! Per-transaction state transition.
//!
//! A transition buys gas, charges the intrinsic gas, warms the access list, applies the
//! EIP-7702 authorizations, runs the message through the [`Evm`] and settles the refund.
//! Failures of the pre-checks are consensus errors: the state and the gas pool are left exactly
//! as they were. Failures inside the EVM are not; they end up in [`ExecutionResult::err`].

use core::time::Duration;

use alloy_primitives::{Address, Bytes, U256};
use alloy_trie::KECCAK_EMPTY;
use tracing::trace;

use crate::{
    apply_authorization,
    constants::{
        gas::{PER_AUTH_BASE_COST, PER_EMPTY_ACCOUNT_COST, REFUND_QUOTIENT, REFUND_QUOTIENT_EIP3529},
        MAX_AUTHORIZATION_LIST_SIZE,
    },
    intrinsic_gas, parse_delegation, precompile_addresses, AccessList, AuthorizationTuple,
    CallError, Delegation, Evm, EvmState, IntrinsicGasRules, InvalidTransaction, SpecId,
    Transaction, TxEnv, TxEnvelope, VmError,
};

/// A transaction reduced to what the state transition needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Sender.
    pub from: Address,
    /// Recipient, `None` for creations.
    pub to: Option<Address>,
    /// Sender nonce.
    pub nonce: u64,
    /// Transferred value.
    pub value: U256,
    /// Gas limit.
    pub gas_limit: u64,
    /// Effective gas price.
    pub gas_price: u128,
    /// Fee cap per gas.
    pub gas_fee_cap: u128,
    /// Priority fee per gas.
    pub gas_tip_cap: u128,
    /// Calldata or init code.
    pub data: Bytes,
    /// EIP-2930 access list.
    pub access_list: AccessList,
    /// EIP-7702 authorizations, `Some` for SetCode transactions only.
    pub authorization_list: Option<Vec<AuthorizationTuple>>,
    /// Skip the nonce and EOA checks, as call simulations do.
    pub skip_account_checks: bool,
    /// Node-issued transaction.
    pub is_internal: bool,
}

impl Message {
    /// Builds the message of `tx` sent by `from` under `base_fee`.
    pub fn from_tx(tx: &TxEnvelope, from: Address, base_fee: Option<u128>) -> Self {
        Self {
            from,
            to: tx.to(),
            nonce: tx.nonce(),
            value: tx.value(),
            gas_limit: tx.gas_limit(),
            gas_price: tx.effective_gas_price(base_fee),
            gas_fee_cap: tx.max_fee_per_gas(),
            gas_tip_cap: tx.max_priority_fee_per_gas(),
            data: tx.input().clone(),
            access_list: tx.access_list().cloned().unwrap_or_default(),
            authorization_list: tx.authorization_list().map(<[_]>::to_vec),
            skip_account_checks: false,
            is_internal: tx.is_internal(),
        }
    }

    /// Returns `true` for contract creations.
    pub const fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// Enables or disables the nonce and EOA checks.
    pub const fn with_skip_account_checks(mut self, skip: bool) -> Self {
        self.skip_account_checks = skip;
        self
    }
}

/// Gas available to the transactions of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[display("{_0}")]
pub struct GasPool(u64);

impl GasPool {
    /// Creates a pool holding `gas`.
    pub const fn new(gas: u64) -> Self {
        Self(gas)
    }

    /// Gas left.
    pub const fn gas(&self) -> u64 {
        self.0
    }

    /// Takes `amount` out of the pool.
    pub const fn sub_gas(&mut self, amount: u64) -> Result<(), InvalidTransaction> {
        match self.0.checked_sub(amount) {
            Some(left) => {
                self.0 = left;
                Ok(())
            }
            None => Err(InvalidTransaction::GasLimit { have: self.0, want: amount }),
        }
    }

    /// Returns `amount` to the pool.
    pub const fn add_gas(&mut self, amount: u64) {
        self.0 = self.0.saturating_add(amount);
    }
}

/// Outcome of a successful state transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionResult {
    /// Gas charged to the sender.
    pub used_gas: u64,
    /// Gas refunded to the sender, already deducted from `used_gas`.
    pub refunded_gas: u64,
    /// EVM error, if execution failed.
    pub err: Option<VmError>,
    /// Return data, or the revert reason.
    pub return_data: Bytes,
    /// Address of the created contract.
    pub contract_address: Option<Address>,
}

impl ExecutionResult {
    /// Returns `true` if execution failed.
    pub const fn failed(&self) -> bool {
        self.err.is_some()
    }

    /// Revert reason, if execution reverted.
    pub fn revert(&self) -> Option<&Bytes> {
        matches!(self.err, Some(VmError::ExecutionReverted)).then_some(&self.return_data)
    }
}

/// Applies `msg` to the state held by `evm`.
///
/// On a consensus error the state and `gas_pool` are restored and the error is returned.
pub fn apply_message<S: EvmState>(
    evm: &mut Evm<S>,
    msg: &Message,
    gas_pool: &mut GasPool,
) -> Result<ExecutionResult, InvalidTransaction> {
    StateTransition::new(evm, msg, gas_pool).run().map(|(result, _)| result)
}

/// Applies `msg` like [`apply_message`], cancelling execution after `timeout`.
pub fn apply_message_with_timeout<S: EvmState>(
    evm: &mut Evm<S>,
    msg: &Message,
    gas_pool: &mut GasPool,
    timeout: Duration,
) -> Result<ExecutionResult, CallError> {
    let timer = evm.cancel_after(timeout);
    let result = apply_message(evm, msg, gas_pool);
    drop(timer);
    if evm.is_cancelled() {
        return Err(CallError::Timeout(timeout));
    }
    Ok(result?)
}

pub(crate) struct StateTransition<'a, S> {
    evm: &'a mut Evm<S>,
    msg: &'a Message,
    gas_pool: &'a mut GasPool,
    gas: u64,
    on_delegation: Option<&'a mut dyn FnMut(&mut S, &Delegation)>,
}

impl<'a, S: EvmState> StateTransition<'a, S> {
    pub(crate) fn new(evm: &'a mut Evm<S>, msg: &'a Message, gas_pool: &'a mut GasPool) -> Self {
        Self { evm, msg, gas_pool, gas: 0, on_delegation: None }
    }

    /// Calls `hook` after every applied authorization.
    pub(crate) fn with_delegation_hook(
        mut self,
        hook: &'a mut dyn FnMut(&mut S, &Delegation),
    ) -> Self {
        self.on_delegation = Some(hook);
        self
    }

    fn spec(&self) -> SpecId {
        self.evm.env().spec
    }

    /// Runs the transition, returning the result and the applied delegations.
    pub(crate) fn run(mut self) -> Result<(ExecutionResult, Vec<Delegation>), InvalidTransaction> {
        let snapshot = self.evm.state_mut().snapshot();
        let pool = *self.gas_pool;
        match self.transition() {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.evm.state_mut().revert_to_snapshot(snapshot);
                *self.gas_pool = pool;
                trace!(target: "evm::transition", from = %self.msg.from, nonce = self.msg.nonce, %err, "message rejected");
                Err(err)
            }
        }
    }

    fn pre_check(&mut self) -> Result<(), InvalidTransaction> {
        let msg = self.msg;
        let state = self.evm.state_mut();
        if !msg.skip_account_checks {
            let nonce = state.nonce(msg.from);
            if nonce < msg.nonce {
                return Err(InvalidTransaction::NonceTooHigh {
                    address: msg.from,
                    tx: msg.nonce,
                    state: nonce,
                });
            }
            if nonce > msg.nonce {
                return Err(InvalidTransaction::NonceTooLow {
                    address: msg.from,
                    tx: msg.nonce,
                    state: nonce,
                });
            }
            if nonce == u64::MAX {
                return Err(InvalidTransaction::NonceMax(msg.from));
            }

            let code_hash = state.code_hash(msg.from);
            if !code_hash.is_zero() &&
                code_hash != KECCAK_EMPTY &&
                parse_delegation(&state.code(msg.from)).is_none()
            {
                return Err(InvalidTransaction::SenderNoEOA(msg.from));
            }
        }

        if let Some(auths) = &msg.authorization_list {
            if msg.to.is_none() {
                return Err(InvalidTransaction::SetCodeTxCreate);
            }
            if auths.is_empty() {
                return Err(InvalidTransaction::EmptyAuthList);
            }
            if auths.len() > MAX_AUTHORIZATION_LIST_SIZE {
                return Err(InvalidTransaction::AuthorizationListTooLarge(auths.len()));
            }
        }

        let env = self.evm.env();
        if env.spec.is_enabled(SpecId::LONDON) && !msg.is_internal {
            let skip = env.config.no_base_fee && msg.gas_fee_cap == 0 && msg.gas_tip_cap == 0;
            if !skip {
                if msg.gas_tip_cap > msg.gas_fee_cap {
                    return Err(InvalidTransaction::TipAboveFeeCap {
                        tip: msg.gas_tip_cap,
                        fee_cap: msg.gas_fee_cap,
                    });
                }
                let base_fee = env.block.base_fee.unwrap_or_default();
                if msg.gas_fee_cap < base_fee {
                    return Err(InvalidTransaction::FeeCapTooLow {
                        fee_cap: msg.gas_fee_cap,
                        base_fee,
                    });
                }
            }
        }

        self.buy_gas()
    }

    fn buy_gas(&mut self) -> Result<(), InvalidTransaction> {
        let msg = self.msg;
        let cost = U256::from(msg.gas_limit).saturating_mul(U256::from(msg.gas_price));
        let balance = self.evm.state_mut().balance(msg.from);
        if balance < cost {
            return Err(InvalidTransaction::InsufficientFunds {
                address: msg.from,
                have: balance,
                want: cost,
            });
        }
        self.gas_pool.sub_gas(msg.gas_limit)?;
        self.gas = msg.gas_limit;
        self.evm.state_mut().sub_balance(msg.from, cost);
        Ok(())
    }

    fn charge_intrinsic_gas(&mut self) -> Result<(), InvalidTransaction> {
        let msg = self.msg;
        let gas = intrinsic_gas(
            &msg.data,
            Some(&msg.access_list),
            msg.authorization_list.as_deref(),
            msg.is_create(),
            IntrinsicGasRules::for_spec(self.spec()),
        )?;
        if self.gas < gas {
            return Err(InvalidTransaction::IntrinsicGas { have: self.gas, want: gas });
        }
        self.gas -= gas;
        Ok(())
    }

    fn apply_authorizations(&mut self) -> Vec<Delegation> {
        let msg = self.msg;
        let Some(auths) = &msg.authorization_list else { return Vec::new() };
        let chain_id = self.evm.env().chain_id;
        let mut applied = Vec::with_capacity(auths.len());
        for auth in auths {
            let state = self.evm.state_mut();
            match apply_authorization(state, chain_id, auth) {
                Ok(delegation) => {
                    if delegation.existed {
                        state.add_refund(PER_EMPTY_ACCOUNT_COST - PER_AUTH_BASE_COST);
                    }
                    if let Some(hook) = self.on_delegation.as_mut() {
                        hook(state, &delegation);
                    }
                    applied.push(delegation);
                }
                Err(err) => {
                    trace!(target: "evm::transition", nonce = auth.nonce, %err, "skipped authorization");
                }
            }
        }
        applied
    }

    fn transition(&mut self) -> Result<(ExecutionResult, Vec<Delegation>), InvalidTransaction> {
        self.pre_check()?;
        self.charge_intrinsic_gas()?;

        let msg = self.msg;
        let spec = self.spec();
        if spec.is_enabled(SpecId::BERLIN) {
            let precompiles = precompile_addresses();
            self.evm.state_mut().prepare_access_list(
                msg.from,
                msg.to,
                &precompiles,
                &msg.access_list,
            );
        }

        let delegations = self.apply_authorizations();

        self.evm.set_tx_env(TxEnv { origin: msg.from, gas_price: msg.gas_price });
        if let Some(tracer) = self.evm.tracer_mut() {
            tracer.capture_start(msg.from, msg.to, &msg.data, self.gas, msg.value);
        }

        let (frame, contract_address) = match msg.to {
            Some(to) => {
                let state = self.evm.state_mut();
                let next = if msg.skip_account_checks {
                    state.nonce(msg.from).saturating_add(1)
                } else {
                    msg.nonce + 1
                };
                state.set_nonce(msg.from, next);
                (self.evm.call(msg.from, to, msg.data.clone(), self.gas, msg.value), None)
            }
            None => self.evm.create(msg.from, msg.data.clone(), self.gas, msg.value),
        };
        self.gas = frame.gas_left;

        if self.evm.env().config.charge_idle_gas && !msg.is_internal {
            self.gas -= self.gas / 10;
        }
        let quotient =
            if spec.is_enabled(SpecId::LONDON) { REFUND_QUOTIENT_EIP3529 } else { REFUND_QUOTIENT };
        let refunded_gas = self.refund_gas(quotient);

        let used_gas = msg.gas_limit - self.gas;
        let err = frame.error();
        if let Some(tracer) = self.evm.tracer_mut() {
            tracer.capture_end(&frame.output, used_gas, err.as_ref());
        }
        let result = ExecutionResult {
            used_gas,
            refunded_gas,
            err,
            return_data: frame.output,
            contract_address,
        };
        Ok((result, delegations))
    }

    fn refund_gas(&mut self, quotient: u64) -> u64 {
        let msg = self.msg;
        let used = msg.gas_limit - self.gas;
        let state = self.evm.state_mut();
        let refund = (used / quotient).min(state.refund());
        self.gas += refund;

        let remaining = U256::from(self.gas).saturating_mul(U256::from(msg.gas_price));
        state.add_balance(msg.from, remaining);
        self.gas_pool.add_gas(self.gas);
        refund
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::address;
    use alloy_trie::EMPTY_ROOT_HASH;
    use rstest::rstest;

    use super::*;
    use crate::{
        delegation_code, test_utils::TestSigner, BlockEnv, EvmEnv, RevmInterpreter, StateDatabase,
        StateDb, VmConfig,
    };

    const SENDER: Address = address!("0x703c4b2bd70c169f5717101caee543299fc946c7");
    const RECIPIENT: Address = address!("0x0d3ab14bbad3d99f4203bd7a11acb94882050e7e");

    fn evm(spec: SpecId) -> Evm<StateDb> {
        let mut state =
            StateDb::new(EMPTY_ROOT_HASH, Arc::new(StateDatabase::in_memory())).unwrap();
        state.set_balance(SENDER, U256::from(1_000_000_000_000_000_000u128));
        let block = BlockEnv { gas_limit: 30_000_000, base_fee: Some(1), ..Default::default() };
        let env = EvmEnv::new(block, spec, 1)
            .with_config(VmConfig::default().with_idle_gas_charge(false));
        Evm::new(env, state, Arc::new(RevmInterpreter))
    }

    fn transfer(nonce: u64) -> Message {
        Message {
            from: SENDER,
            to: Some(RECIPIENT),
            nonce,
            value: U256::from(1_000),
            gas_limit: 21_000,
            gas_price: 1,
            gas_fee_cap: 1,
            gas_tip_cap: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_transfer_charges_intrinsic_gas() {
        let mut evm = evm(SpecId::LONDON);
        let mut pool = GasPool::new(30_000_000);
        let result = apply_message(&mut evm, &transfer(0), &mut pool).unwrap();
        assert_eq!(result.used_gas, 21_000);
        assert!(!result.failed());
        assert_eq!(pool.gas(), 30_000_000 - 21_000);
        assert_eq!(evm.state_mut().nonce(SENDER), 1);
        assert_eq!(evm.state_mut().balance(RECIPIENT), U256::from(1_000));
    }

    #[test]
    fn test_nonce_errors_leave_state_untouched() {
        let mut evm = evm(SpecId::LONDON);
        let mut pool = GasPool::new(30_000_000);
        let before = evm.state_mut().balance(SENDER);
        let err = apply_message(&mut evm, &transfer(5), &mut pool).unwrap_err();
        assert!(err.is_nonce_too_high());
        assert_eq!(pool.gas(), 30_000_000);
        assert_eq!(evm.state_mut().balance(SENDER), before);

        apply_message(&mut evm, &transfer(0), &mut pool).unwrap();
        let err = apply_message(&mut evm, &transfer(0), &mut pool).unwrap_err();
        assert!(err.is_nonce_too_low());
    }

    #[test]
    fn test_intrinsic_gas_shortfall_restores_pool() {
        let mut evm = evm(SpecId::LONDON);
        let mut pool = GasPool::new(30_000_000);
        let msg = Message { gas_limit: 20_000, ..transfer(0) };
        assert_eq!(
            apply_message(&mut evm, &msg, &mut pool),
            Err(InvalidTransaction::IntrinsicGas { have: 20_000, want: 21_000 })
        );
        assert_eq!(pool.gas(), 30_000_000);
        assert_eq!(evm.state_mut().nonce(SENDER), 0);
    }

    #[test]
    fn test_gas_pool_exhaustion() {
        let mut evm = evm(SpecId::LONDON);
        let mut pool = GasPool::new(10_000);
        assert_eq!(
            apply_message(&mut evm, &transfer(0), &mut pool),
            Err(InvalidTransaction::GasLimit { have: 10_000, want: 21_000 })
        );
    }

    #[test]
    fn test_fee_cap_below_base_fee() {
        let mut evm = evm(SpecId::LONDON);
        let mut pool = GasPool::new(30_000_000);
        let msg = Message { gas_fee_cap: 0, gas_tip_cap: 0, ..transfer(0) };
        assert_eq!(
            apply_message(&mut evm, &msg, &mut pool),
            Err(InvalidTransaction::FeeCapTooLow { fee_cap: 0, base_fee: 1 })
        );
    }

    #[test]
    fn test_value_shortfall_is_a_vm_error() {
        let mut evm = evm(SpecId::LONDON);
        let mut pool = GasPool::new(30_000_000);
        let msg = Message { value: U256::MAX, ..transfer(0) };
        let result = apply_message(&mut evm, &msg, &mut pool).unwrap();
        assert_eq!(result.err, Some(VmError::InsufficientBalance));
        assert_eq!(evm.state_mut().nonce(SENDER), 1);
    }

    #[test]
    fn test_idle_gas_charge() {
        let mut evm = evm(SpecId::LONDON);
        let mut pool = GasPool::new(30_000_000);
        let env = evm.env().clone().with_config(VmConfig::default());
        let state = evm.into_state();
        let mut evm = Evm::new(env, state, Arc::new(RevmInterpreter));
        let msg = Message { gas_limit: 31_000, ..transfer(0) };
        let result = apply_message(&mut evm, &msg, &mut pool).unwrap();
        assert_eq!(result.used_gas, 22_000);

        let internal = Message {
            from: Address::ZERO,
            nonce: 0,
            gas_price: 0,
            value: U256::ZERO,
            is_internal: true,
            ..msg
        };
        let result = apply_message(&mut evm, &internal, &mut pool).unwrap();
        assert_eq!(result.used_gas, 21_000);
    }

    #[test]
    fn test_set_code_create_rejected() {
        let mut evm = evm(SpecId::PHAETHON);
        let mut pool = GasPool::new(30_000_000);
        let msg = Message {
            to: None,
            authorization_list: Some(vec![AuthorizationTuple {
                chain_id: U256::from(1),
                address: RECIPIENT,
                nonce: 0,
                y_parity: 0,
                r: U256::from(1),
                s: U256::from(1),
            }]),
            ..transfer(0)
        };
        assert_eq!(
            apply_message(&mut evm, &msg, &mut pool),
            Err(InvalidTransaction::SetCodeTxCreate)
        );
        let msg = Message { to: Some(RECIPIENT), authorization_list: Some(Vec::new()), ..msg };
        assert_eq!(apply_message(&mut evm, &msg, &mut pool), Err(InvalidTransaction::EmptyAuthList));
    }

    const CODE_TARGET: Address = address!("0x00000000000000000000000000000000000c0de0");

    fn set_code(nonce: u64, auths: Vec<AuthorizationTuple>) -> Message {
        Message { gas_limit: 200_000, authorization_list: Some(auths), ..transfer(nonce) }
    }

    #[rstest]
    #[case::wrong_chain_id(7, 0, Bytes::new())]
    #[case::nonce_overflow(1, u64::MAX, Bytes::new())]
    #[case::authority_has_code(1, 0, Bytes::from_static(&[0x60, 0x00, 0x60, 0x00, 0xf3]))]
    #[case::nonce_mismatch(1, 3, Bytes::new())]
    fn test_invalid_authorization_is_skipped(
        #[case] chain_id: u64,
        #[case] nonce: u64,
        #[case] code: Bytes,
    ) {
        let mut evm = evm(SpecId::PHAETHON);
        let mut pool = GasPool::new(30_000_000);
        let skipped = TestSigner::from_seed(1);
        let applied = TestSigner::from_seed(2);
        if !code.is_empty() {
            evm.state_mut().set_code(skipped.address(), code.clone());
        }

        let msg = set_code(
            0,
            vec![
                skipped.sign_authorization(chain_id, CODE_TARGET, nonce),
                applied.sign_authorization(1, CODE_TARGET, 0),
            ],
        );
        let result = apply_message(&mut evm, &msg, &mut pool).unwrap();
        assert!(!result.failed());

        let state = evm.state_mut();
        assert_eq!(state.nonce(skipped.address()), 0);
        assert_eq!(state.code(skipped.address()), code);
        assert_eq!(state.nonce(applied.address()), 1);
        assert_eq!(state.code(applied.address()), delegation_code(CODE_TARGET));
        assert_eq!(state.nonce(SENDER), 1);
        assert_eq!(state.balance(RECIPIENT), U256::from(1_000));
    }

    #[test]
    fn test_repeated_authorization_applies_once() {
        let mut evm = evm(SpecId::PHAETHON);
        let mut pool = GasPool::new(30_000_000);
        let authority = TestSigner::from_seed(3);
        let auth = authority.sign_authorization(1, CODE_TARGET, 0);

        apply_message(&mut evm, &set_code(0, vec![auth.clone(), auth.clone()]), &mut pool)
            .unwrap();
        assert_eq!(evm.state_mut().nonce(authority.address()), 1);
        assert_eq!(evm.state_mut().code(authority.address()), delegation_code(CODE_TARGET));

        // the stale tuple is skipped, the transaction itself still goes through
        let result = apply_message(&mut evm, &set_code(1, vec![auth]), &mut pool).unwrap();
        assert!(!result.failed());
        let state = evm.state_mut();
        assert_eq!(state.nonce(authority.address()), 1);
        assert_eq!(state.code(authority.address()), delegation_code(CODE_TARGET));
        assert_eq!(state.nonce(SENDER), 2);
    }

    #[test]
    fn test_wildcard_chain_id_is_accepted() {
        let mut evm = evm(SpecId::PHAETHON);
        let mut pool = GasPool::new(30_000_000);
        let authority = TestSigner::from_seed(4);
        let msg = set_code(0, vec![authority.sign_authorization(0, CODE_TARGET, 0)]);
        apply_message(&mut evm, &msg, &mut pool).unwrap();
        assert_eq!(evm.state_mut().code(authority.address()), delegation_code(CODE_TARGET));
    }
}
