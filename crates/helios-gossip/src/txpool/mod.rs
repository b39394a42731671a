//! Transaction pool.
//!
//! Transactions are admitted against the current head: the stateless checks need only the
//! rules of the epoch, the stateful checks open the state of the last finalized block and
//! account for everything the sender already has pooled. Per sender, transactions from the
//! state nonce up to the first gap are pending; the rest wait in the queue.

mod list;
use list::SenderTxs;

mod nonce_lock;
pub use nonce_lock::*;

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use alloy_primitives::{Address, B256, U256};
use crossbeam_channel::Receiver;
use helios_evm::{
    validate_transaction, validate_with_state, DualState, EvmState, PoolAccounting, PoolHead,
    SetCodeValidator, Signer, Transaction, TxEnvelope, TxType, ValidationOptions,
};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::{Feed, PoolConfig, PoolError, Store, StoreError};

/// Pending and queued transactions, by sender and nonce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolContent {
    /// Executable transactions.
    pub pending: BTreeMap<Address, Vec<TxEnvelope>>,
    /// Transactions waiting behind a nonce gap.
    pub queued: BTreeMap<Address, Vec<TxEnvelope>>,
}

#[derive(Debug, Default)]
struct PoolInner {
    senders: HashMap<Address, SenderTxs>,
    by_hash: HashMap<B256, Address>,
}

impl PoolInner {
    /// Moves `sender` to `state_nonce`, dropping its stale transactions.
    fn forward(&mut self, sender: Address, state_nonce: u64) -> usize {
        let Some(list) = self.senders.get_mut(&sender) else {
            return 0;
        };
        let stale = list.forward(state_nonce);
        for tx in &stale {
            self.by_hash.remove(&tx.hash());
        }
        if list.is_empty() {
            self.senders.remove(&sender);
        }
        stale.len()
    }
}

/// View of the pool handed to stateful validation of one sender's transaction.
struct Accounting<'a> {
    inner: &'a PoolInner,
    state_nonce: u64,
    account_slots: usize,
    reject_nonce_gaps: bool,
}

impl PoolAccounting for Accounting<'_> {
    fn existing_expenditure(&self, from: Address) -> U256 {
        self.inner.senders.get(&from).map_or(U256::ZERO, SenderTxs::expenditure)
    }

    fn existing_cost(&self, from: Address, nonce: u64) -> Option<U256> {
        self.inner.senders.get(&from).and_then(|list| list.get(nonce)).map(Transaction::cost)
    }

    fn used_and_left_slots(&self, from: Address) -> (usize, isize) {
        let used = self.inner.senders.get(&from).map_or(0, SenderTxs::len);
        (used, self.account_slots as isize - used as isize)
    }

    fn first_nonce_gap(&self, from: Address) -> Option<u64> {
        self.reject_nonce_gaps.then(|| {
            self.inner.senders.get(&from).map_or(self.state_nonce, SenderTxs::first_gap)
        })
    }
}

/// Pool of transactions waiting to be included by an event.
#[derive(Debug)]
pub struct TxPool {
    store: Arc<Store>,
    cfg: PoolConfig,
    chain_id: u64,
    signer: Arc<Signer>,
    setcode: SetCodeValidator,
    inner: RwLock<PoolInner>,
    new_txs: Feed<Arc<Vec<TxEnvelope>>>,
}

impl TxPool {
    /// Creates an empty pool validating against the head of `store`.
    pub fn new(store: Arc<Store>, cfg: PoolConfig, chain_id: u64) -> Self {
        let setcode =
            SetCodeValidator::new(chain_id).with_accept(cfg.accept).with_min_tip(cfg.min_tip);
        Self {
            store,
            cfg,
            chain_id,
            signer: Arc::new(Signer::new(chain_id)),
            setcode,
            inner: RwLock::default(),
            new_txs: Feed::new("new_txs"),
        }
    }

    /// Shares the sender cache with `signer`.
    pub fn with_signer(mut self, signer: Arc<Signer>) -> Self {
        self.signer = signer;
        self
    }

    /// Pool configuration.
    pub const fn config(&self) -> &PoolConfig {
        &self.cfg
    }

    /// Chain head transactions are validated against.
    pub fn head(&self) -> Result<PoolHead, PoolError> {
        let state = self.store.get_block_epoch_state().ok_or(StoreError::MissingBlockEpochState)?;
        let rules = &state.epoch_state.rules;
        let number = state.block_state.last_block.idx;
        Ok(PoolHead {
            number,
            gas_limit: rules.blocks.max_block_gas,
            base_fee: rules.economy.min_gas_price,
            spec: self.store.evm_chain_config(rules).spec_at(number + 1),
        })
    }

    fn options(&self) -> Result<ValidationOptions, PoolError> {
        let rules = self.store.get_rules().ok_or(StoreError::MissingBlockEpochState)?;
        let mut opts = ValidationOptions::default()
            .with_chain_id(self.chain_id)
            .with_accept(self.cfg.accept)
            .with_network_minimums(rules.economy.min_gas_tip, rules.economy.min_gas_price)
            .with_pool_min_tip(self.cfg.min_tip);
        opts.max_size = self.cfg.max_size;
        Ok(opts)
    }

    fn head_state(&self) -> Result<DualState, PoolError> {
        let bs = self.store.get_block_state().ok_or(StoreError::MissingBlockEpochState)?;
        Ok(self.store.evm().open(bs.finalized_state_root, bs.sfc_state_root)?)
    }

    /// Admits a transaction submitted through this node's API.
    pub fn add_local(&self, tx: TxEnvelope) -> Result<B256, PoolError> {
        self.add(tx, true)
    }

    /// Admits a transaction received from a peer.
    pub fn add_remote(&self, tx: TxEnvelope) -> Result<B256, PoolError> {
        self.add(tx, false)
    }

    /// Validates and admits `tx`, replacing a pooled transaction with the same nonce when it
    /// pays enough more.
    pub fn add(&self, tx: TxEnvelope, local: bool) -> Result<B256, PoolError> {
        let hash = tx.hash();
        if self.inner.read().by_hash.contains_key(&hash) {
            return Err(PoolError::AlreadyKnown(hash));
        }

        let head = self.head()?;
        let sender = self.signer.sender(&tx)?;
        let local = local || self.cfg.locals.contains(&sender);
        validate_transaction(&tx, &head, &self.signer, &self.options()?, local)?;

        let mut state = self.head_state()?;
        let state_nonce = state.nonce(sender);

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if inner.by_hash.contains_key(&hash) {
            return Err(PoolError::AlreadyKnown(hash));
        }
        inner.forward(sender, state_nonce);
        let accounting = Accounting {
            inner: &*inner,
            state_nonce,
            account_slots: self.cfg.account_slots,
            reject_nonce_gaps: self.cfg.reject_nonce_gaps,
        };
        validate_with_state(&tx, &self.signer, &mut state, &accounting)?;
        if tx.tx_type() == TxType::SetCode {
            self.setcode.validate_with_state(&tx, &head, &self.signer, &mut state)?;
        }

        match inner.senders.get(&sender).and_then(|list| list.get(tx.nonce())) {
            Some(old) if !self.outbids(&tx, old) => return Err(PoolError::ReplacementUnderpriced),
            Some(_) => {}
            None if inner.by_hash.len() >= self.cfg.global_slots => return Err(PoolError::PoolFull),
            None => {}
        }

        let list = inner.senders.entry(sender).or_insert_with(|| SenderTxs::new(state_nonce));
        if let Some(old) = list.insert(tx.clone()) {
            inner.by_hash.remove(&old.hash());
            debug!(target: "gossip::txpool", %sender, nonce = tx.nonce(), old = %old.hash(), new = %hash, "replaced transaction");
        }
        inner.by_hash.insert(hash, sender);
        drop(guard);

        trace!(target: "gossip::txpool", %hash, %sender, nonce = tx.nonce(), local, "admitted transaction");
        self.new_txs.send(Arc::new(vec![tx]));
        Ok(hash)
    }

    /// Returns `true` if `new` raises both fee caps of `old` by the price bump.
    fn outbids(&self, new: &TxEnvelope, old: &TxEnvelope) -> bool {
        let bump = |fee: u128| fee.saturating_mul(100 + self.cfg.price_bump as u128) / 100;
        new.max_fee_per_gas() >= bump(old.max_fee_per_gas()) &&
            new.max_priority_fee_per_gas() >= bump(old.max_priority_fee_per_gas())
    }

    /// Pooled transaction `hash`.
    pub fn get(&self, hash: &B256) -> Option<TxEnvelope> {
        let inner = self.inner.read();
        let sender = inner.by_hash.get(hash)?;
        let tx = inner.senders.get(sender)?.iter().find(|tx| tx.hash() == *hash).cloned();
        tx
    }

    /// Returns `true` if `hash` is pooled.
    pub fn contains(&self, hash: &B256) -> bool {
        self.inner.read().by_hash.contains_key(hash)
    }

    /// Number of pending and queued transactions.
    pub fn stats(&self) -> (usize, usize) {
        let inner = self.inner.read();
        inner.senders.values().fold((0, 0), |(pending, queued), list| {
            (pending + list.pending().count(), queued + list.queued().count())
        })
    }

    /// Every pooled transaction, split into pending and queued.
    pub fn content(&self) -> PoolContent {
        let inner = self.inner.read();
        let mut content = PoolContent::default();
        for (sender, list) in &inner.senders {
            let pending: Vec<_> = list.pending().cloned().collect();
            let queued: Vec<_> = list.queued().cloned().collect();
            if !pending.is_empty() {
                content.pending.insert(*sender, pending);
            }
            if !queued.is_empty() {
                content.queued.insert(*sender, queued);
            }
        }
        content
    }

    /// Pending transactions of every sender, each sender's in nonce order.
    pub fn pending(&self) -> Vec<TxEnvelope> {
        let inner = self.inner.read();
        inner.senders.values().flat_map(|list| list.pending().cloned()).collect()
    }

    /// Next nonce of `sender` counting its pending transactions.
    pub fn pool_nonce(&self, sender: Address) -> Result<u64, PoolError> {
        if let Some(list) = self.inner.read().senders.get(&sender) {
            return Ok(list.first_gap());
        }
        Ok(self.head_state()?.nonce(sender))
    }

    /// Code address `authority` delegates to according to pooled SetCode transactions.
    pub fn delegation(&self, authority: &Address) -> Option<Address> {
        self.setcode.delegation(authority)
    }

    /// Drops the transactions made stale by the new head.
    pub fn reset(&self) -> Result<usize, PoolError> {
        let mut state = self.head_state()?;
        let mut inner = self.inner.write();
        let senders: Vec<_> = inner.senders.keys().copied().collect();
        let mut dropped = 0;
        for sender in senders {
            dropped += inner.forward(sender, state.nonce(sender));
        }
        if dropped > 0 {
            debug!(target: "gossip::txpool", dropped, pooled = inner.by_hash.len(), "reset to new head");
        }
        Ok(dropped)
    }

    /// Subscribes to admitted transactions.
    pub fn subscribe_new_txs(&self, capacity: usize) -> Receiver<Arc<Vec<TxEnvelope>>> {
        self.new_txs.subscribe(capacity)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::TxKind;
    use helios_evm::{test_utils::TestSigner, GenesisAccount, InvalidTransaction, LegacyTx, StoreConfig};

    use super::*;
    use crate::{Genesis, GossipConfig, Rules};

    const CHAIN_ID: u64 = 4003;

    fn pool(key: &TestSigner, balance: u64, cfg: PoolConfig) -> TxPool {
        let store = Store::in_memory(GossipConfig::default(), StoreConfig::default()).unwrap();
        let genesis = Genesis::new(Rules::dev_net(CHAIN_ID), 0)
            .with_account(key.address(), GenesisAccount { balance: U256::from(balance), nonce: 2, ..Default::default() })
            .with_validator(1, U256::from(1));
        store.apply_genesis(&genesis).unwrap();
        TxPool::new(Arc::new(store), cfg, CHAIN_ID)
    }

    fn transfer(key: &TestSigner, nonce: u64, gas_price: u128) -> TxEnvelope {
        key.sign_tx(
            CHAIN_ID,
            LegacyTx {
                nonce,
                gas_price,
                gas: 21_000,
                to: TxKind::Call(Address::with_last_byte(0xbb)),
                value: U256::from(1),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_pending_and_queued() {
        let key = TestSigner::from_seed(1);
        let pool = pool(&key, 10u64.pow(18), PoolConfig::default());
        let rx = pool.subscribe_new_txs(8);

        let first = pool.add_remote(transfer(&key, 2, 1)).unwrap();
        pool.add_remote(transfer(&key, 3, 1)).unwrap();
        pool.add_remote(transfer(&key, 5, 1)).unwrap();

        assert_eq!(pool.stats(), (2, 1));
        assert_eq!(pool.pool_nonce(key.address()).unwrap(), 4);
        let content = pool.content();
        assert_eq!(content.pending[&key.address()].len(), 2);
        assert_eq!(content.queued[&key.address()][0].nonce(), 5);
        assert!(pool.contains(&first));
        assert_eq!(pool.get(&first), Some(transfer(&key, 2, 1)));
        assert_eq!(rx.try_iter().count(), 3);

        assert_eq!(pool.add_remote(transfer(&key, 2, 1)), Err(PoolError::AlreadyKnown(first)));
        assert!(matches!(
            pool.add_remote(transfer(&key, 1, 1)),
            Err(PoolError::Invalid(InvalidTransaction::NonceTooLow { .. }))
        ));
    }

    #[test]
    fn test_replacement_needs_price_bump() {
        let key = TestSigner::from_seed(2);
        let pool = pool(&key, 10u64.pow(18), PoolConfig::default());
        pool.add_remote(transfer(&key, 2, 100)).unwrap();

        assert_eq!(pool.add_remote(transfer(&key, 2, 105)), Err(PoolError::ReplacementUnderpriced));
        let replacement = pool.add_remote(transfer(&key, 2, 110)).unwrap();
        assert_eq!(pool.stats(), (1, 0));
        assert!(pool.contains(&replacement));
        assert!(!pool.contains(&transfer(&key, 2, 100).hash()));
    }

    #[test]
    fn test_slot_and_balance_limits() {
        let key = TestSigner::from_seed(3);
        let pool = pool(&key, 10u64.pow(18), PoolConfig::default().with_account_slots(2));
        pool.add_remote(transfer(&key, 2, 1)).unwrap();
        pool.add_remote(transfer(&key, 3, 1)).unwrap();
        assert_eq!(
            pool.add_remote(transfer(&key, 4, 1)),
            Err(PoolError::Invalid(InvalidTransaction::AccountLimitExceeded(key.address())))
        );

        // two transfers fit, the third exceeds the balance
        let poor = TestSigner::from_seed(4);
        let pool = pool_with_balance(&poor, 2 * 21_001 + 10);
        pool.add_remote(transfer(&poor, 2, 1)).unwrap();
        pool.add_remote(transfer(&poor, 3, 1)).unwrap();
        assert!(matches!(
            pool.add_remote(transfer(&poor, 4, 1)),
            Err(PoolError::Invalid(InvalidTransaction::InsufficientFunds { .. }))
        ));
    }

    fn pool_with_balance(key: &TestSigner, balance: u64) -> TxPool {
        pool(key, balance, PoolConfig::default())
    }

    #[test]
    fn test_gapless_admission() {
        let key = TestSigner::from_seed(5);
        let pool = pool(&key, 10u64.pow(18), PoolConfig::default().with_reject_nonce_gaps(true));
        assert!(matches!(
            pool.add_remote(transfer(&key, 3, 1)),
            Err(PoolError::Invalid(InvalidTransaction::NonceTooHigh { .. }))
        ));
        pool.add_remote(transfer(&key, 2, 1)).unwrap();
        pool.add_remote(transfer(&key, 3, 1)).unwrap();
    }

    #[test]
    fn test_remote_tip_floor_spares_locals() {
        let key = TestSigner::from_seed(6);
        let pool = pool(&key, 10u64.pow(18), PoolConfig::default().with_min_tip(5));
        assert!(matches!(
            pool.add_remote(transfer(&key, 2, 1)),
            Err(PoolError::Invalid(InvalidTransaction::Underpriced(_)))
        ));
        pool.add_local(transfer(&key, 2, 1)).unwrap();
    }
}
