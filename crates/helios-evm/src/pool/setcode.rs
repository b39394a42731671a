use std::collections::HashMap;

use alloy_primitives::Address;
use parking_lot::RwLock;
use tracing::trace;

use crate::{
    constants::MAX_AUTHORIZATION_LIST_SIZE, AuthorizationError, EvmState, InvalidTransaction,
    PoolHead, Signer, Transaction, TxEnvelope, TxType, TxTypeSet,
};

/// Pool-side gate for EIP-7702 SetCode transactions.
///
/// Besides validation it keeps the delegations derived from admitted transactions, so that
/// other pool components can look up which code an authority is about to run.
#[derive(Debug)]
pub struct SetCodeValidator {
    chain_id: u64,
    accept: TxTypeSet,
    min_tip: u128,
    delegations: RwLock<HashMap<Address, Address>>,
}

impl SetCodeValidator {
    /// Creates a validator for `chain_id`.
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            accept: TxTypeSet::default(),
            min_tip: 0,
            delegations: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the accepted types.
    pub fn with_accept(mut self, accept: TxTypeSet) -> Self {
        self.accept = accept;
        self
    }

    /// Sets the minimum priority fee.
    pub fn with_min_tip(mut self, min_tip: u128) -> Self {
        self.min_tip = min_tip;
        self
    }

    /// Checks the parts of `tx` that need only the chain head.
    pub fn validate_stateless(
        &self,
        tx: &TxEnvelope,
        head: &PoolHead,
    ) -> Result<(), InvalidTransaction> {
        if !self.accept.accepts(TxType::SetCode) {
            return Err(InvalidTransaction::TxTypeNotSupported(TxType::SetCode.into()));
        }
        let Some(inner) = tx.as_set_code() else {
            return Err(InvalidTransaction::TxTypeNotSupported(tx.tx_type().into()));
        };
        if head.gas_limit < inner.gas {
            return Err(InvalidTransaction::GasLimit { have: head.gas_limit, want: inner.gas });
        }
        if inner.to.is_create() {
            return Err(InvalidTransaction::SetCodeTxCreate);
        }
        if inner.authorization_list.is_empty() {
            return Err(InvalidTransaction::EmptyAuthList);
        }
        for auth in &inner.authorization_list {
            auth.validate_stateless(self.chain_id)?;
        }
        if inner.max_fee_per_gas < head.base_fee {
            return Err(InvalidTransaction::FeeCapTooLow {
                fee_cap: inner.max_fee_per_gas,
                base_fee: head.base_fee,
            });
        }
        if inner.max_priority_fee_per_gas < self.min_tip {
            return Err(InvalidTransaction::Underpriced(format!(
                "tip {} below minimum {}",
                inner.max_priority_fee_per_gas, self.min_tip
            )));
        }
        if inner.authorization_list.len() > MAX_AUTHORIZATION_LIST_SIZE {
            return Err(InvalidTransaction::AuthorizationListTooLarge(
                inner.authorization_list.len(),
            ));
        }
        Ok(())
    }

    /// Runs the stateless checks, then checks `tx` against `state`, returning its sender.
    ///
    /// On success the delegations of the transaction are cached.
    pub fn validate_with_state<S: EvmState + ?Sized>(
        &self,
        tx: &TxEnvelope,
        head: &PoolHead,
        signer: &Signer,
        state: &mut S,
    ) -> Result<Address, InvalidTransaction> {
        self.validate_stateless(tx, head)?;
        let Some(inner) = tx.as_set_code() else {
            return Err(InvalidTransaction::TxTypeNotSupported(tx.tx_type().into()));
        };

        let from = signer.sender(tx)?;
        let nonce = state.nonce(from);
        if nonce > inner.nonce {
            return Err(InvalidTransaction::NonceTooLow { address: from, tx: inner.nonce, state: nonce });
        }
        if nonce < inner.nonce {
            return Err(InvalidTransaction::NonceTooHigh { address: from, tx: inner.nonce, state: nonce });
        }
        let balance = state.balance(from);
        if balance < tx.cost() {
            return Err(InvalidTransaction::InsufficientFunds {
                address: from,
                have: balance,
                want: tx.cost(),
            });
        }

        let mut derived = Vec::with_capacity(inner.authorization_list.len());
        for auth in &inner.authorization_list {
            let authority = auth.recover_authority()?;
            if !auth.address.is_zero() && state.code(auth.address).is_empty() {
                return Err(AuthorizationError::EmptyDelegationTarget(auth.address).into());
            }
            derived.push((authority, auth.address));
        }

        let mut cache = self.delegations.write();
        for (authority, code_address) in derived {
            if code_address.is_zero() {
                cache.remove(&authority);
            } else {
                cache.insert(authority, code_address);
            }
        }
        trace!(target: "pool::setcode", %from, cached = cache.len(), "admitted set code transaction");
        Ok(from)
    }

    /// Code address `authority` delegates to, according to admitted transactions.
    pub fn delegation(&self, authority: &Address) -> Option<Address> {
        self.delegations.read().get(authority).copied()
    }

    /// Forgets the cached delegation of `authority`.
    pub fn remove_delegation(&self, authority: &Address) -> Option<Address> {
        self.delegations.write().remove(authority)
    }

    /// Number of cached delegations.
    pub fn cached_delegations(&self) -> usize {
        self.delegations.read().len()
    }
}
