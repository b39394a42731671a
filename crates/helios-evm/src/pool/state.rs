use alloy_primitives::{Address, U256};
use auto_impl::auto_impl;

use crate::{EvmState, InvalidTransaction, Signer, Transaction, TxEnvelope};

/// Per-sender bookkeeping a pool exposes to stateful validation.
#[auto_impl(&, Box, Arc)]
pub trait PoolAccounting {
    /// Total cost of the sender's transactions already in the pool.
    fn existing_expenditure(&self, from: Address) -> U256;

    /// Cost of the pooled transaction that `nonce` would replace.
    fn existing_cost(&self, from: Address, nonce: u64) -> Option<U256>;

    /// Slots used by the sender and slots left before its limit.
    fn used_and_left_slots(&self, from: Address) -> (usize, isize);

    /// First nonce missing from the sender's pooled sequence, if the pool enforces gapless
    /// admission.
    fn first_nonce_gap(&self, _from: Address) -> Option<u64> {
        None
    }
}

/// Accounting of an empty pool without slot limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPoolAccounting;

impl PoolAccounting for NoPoolAccounting {
    fn existing_expenditure(&self, _from: Address) -> U256 {
        U256::ZERO
    }

    fn existing_cost(&self, _from: Address, _nonce: u64) -> Option<U256> {
        None
    }

    fn used_and_left_slots(&self, _from: Address) -> (usize, isize) {
        (0, isize::MAX)
    }
}

/// Checks `tx` against the head state and the pool, returning its sender.
///
/// The sender must afford the transaction on top of everything it already has pooled. A
/// transaction replacing a pooled one is credited the cost of the replaced transaction; one
/// that takes a new slot needs a slot left.
pub fn validate_with_state<S, P>(
    tx: &TxEnvelope,
    signer: &Signer,
    state: &mut S,
    pool: &P,
) -> Result<Address, InvalidTransaction>
where
    S: EvmState + ?Sized,
    P: PoolAccounting + ?Sized,
{
    let from = signer.sender(tx)?;

    let next = state.nonce(from);
    if next > tx.nonce() {
        return Err(InvalidTransaction::NonceTooLow { address: from, tx: tx.nonce(), state: next });
    }
    if let Some(gap) = pool.first_nonce_gap(from) {
        if gap < tx.nonce() {
            return Err(InvalidTransaction::NonceTooHigh {
                address: from,
                tx: tx.nonce(),
                state: gap,
            });
        }
    }

    let balance = state.balance(from);
    let cost = tx.cost();
    if balance < cost {
        return Err(InvalidTransaction::InsufficientFunds { address: from, have: balance, want: cost });
    }

    let spent = pool.existing_expenditure(from);
    let replaced = pool.existing_cost(from, tx.nonce());
    let need = match replaced {
        Some(prev) => spent.saturating_add(cost).saturating_sub(prev),
        None => spent.saturating_add(cost),
    };
    if balance < need {
        return Err(InvalidTransaction::InsufficientFunds { address: from, have: balance, want: need });
    }

    if replaced.is_none() && pool.used_and_left_slots(from).1 <= 0 {
        return Err(InvalidTransaction::AccountLimitExceeded(from));
    }
    Ok(from)
}
