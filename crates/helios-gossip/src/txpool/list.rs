use std::collections::BTreeMap;

use alloy_primitives::U256;
use helios_evm::{Transaction, TxEnvelope};

/// Pooled transactions of one sender, by nonce.
///
/// Transactions from the account's state nonce up to the first gap are pending; the rest are
/// queued until the gap closes.
#[derive(Debug, Clone, Default)]
pub(super) struct SenderTxs {
    state_nonce: u64,
    txs: BTreeMap<u64, TxEnvelope>,
}

impl SenderTxs {
    pub(super) fn new(state_nonce: u64) -> Self {
        Self { state_nonce, txs: BTreeMap::new() }
    }

    pub(super) fn len(&self) -> usize {
        self.txs.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub(super) fn get(&self, nonce: u64) -> Option<&TxEnvelope> {
        self.txs.get(&nonce)
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = &TxEnvelope> {
        self.txs.values()
    }

    /// Inserts `tx`, returning the transaction it replaces.
    pub(super) fn insert(&mut self, tx: TxEnvelope) -> Option<TxEnvelope> {
        self.txs.insert(tx.nonce(), tx)
    }

    /// Sum of the worst-case costs of all pooled transactions.
    pub(super) fn expenditure(&self) -> U256 {
        self.txs.values().fold(U256::ZERO, |acc, tx| acc.saturating_add(tx.cost()))
    }

    /// First nonce at or after the state nonce that no pooled transaction takes.
    pub(super) fn first_gap(&self) -> u64 {
        let mut next = self.state_nonce;
        while self.txs.contains_key(&next) {
            next += 1;
        }
        next
    }

    /// Executable transactions in nonce order.
    pub(super) fn pending(&self) -> impl Iterator<Item = &TxEnvelope> {
        let gap = self.first_gap();
        self.txs.range(self.state_nonce..gap).map(|(_, tx)| tx)
    }

    /// Transactions waiting behind a gap, in nonce order.
    pub(super) fn queued(&self) -> impl Iterator<Item = &TxEnvelope> {
        let gap = self.first_gap();
        self.txs.range(gap..).map(|(_, tx)| tx)
    }

    /// Moves the state nonce to `nonce` and drops the transactions it makes stale.
    pub(super) fn forward(&mut self, nonce: u64) -> Vec<TxEnvelope> {
        self.state_nonce = nonce;
        let keep = self.txs.split_off(&nonce);
        std::mem::replace(&mut self.txs, keep).into_values().collect()
    }
}
