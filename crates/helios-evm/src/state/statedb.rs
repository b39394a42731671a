//! Journaled state overlay.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    mem,
    sync::Arc,
};

use alloy_primitives::{keccak256, Address, Bytes, Log, B256, U256};
use alloy_trie::{EMPTY_ROOT_HASH, KECCAK_EMPTY};
use tracing::trace;

use super::{
    database::account_storage_ref,
    journal::{Journal, JournalEntry},
};
use crate::{
    AccessList, AccountDiff, AccountRecord, EvmState, IndexedLog, MerkleTrie, StateDatabase,
    StateError,
};

/// Applies slot writes to a storage trie. Zero values are absent from the trie.
fn write_slots<'a>(
    trie: &mut MerkleTrie<'_>,
    writes: impl IntoIterator<Item = (&'a B256, &'a U256)>,
) -> Result<(), StateError> {
    for (slot, value) in writes {
        let key = keccak256(slot);
        if value.is_zero() {
            trie.remove(key)?;
        } else {
            trie.insert(key, alloy_rlp::encode(value))?;
        }
    }
    Ok(())
}

/// Cached account with its uncommitted changes.
#[derive(Debug, Clone)]
pub(crate) struct StateObject {
    account: AccountRecord,
    code: Option<Bytes>,
    /// Committed slot values read so far.
    origin: HashMap<B256, U256>,
    /// Writes of finalised transactions not yet committed.
    pending: HashMap<B256, U256>,
    /// Writes of the current transaction.
    dirty: HashMap<B256, U256>,
    dirty_code: bool,
    self_destructed: bool,
    deleted: bool,
}

impl StateObject {
    fn new(account: AccountRecord) -> Self {
        Self {
            account,
            code: None,
            origin: HashMap::new(),
            pending: HashMap::new(),
            dirty: HashMap::new(),
            dirty_code: false,
            self_destructed: false,
            deleted: false,
        }
    }
}

/// The mutable state of one trie domain on top of a committed root.
///
/// Every change is journaled so it can be reverted to a revision taken with
/// [`EvmState::snapshot`]. [`StateDb::finalise`] closes a transaction, [`StateDb::commit`]
/// turns all finalised changes into trie nodes and returns the new root.
///
/// Database failures do not surface on reads. The first one is kept and returned by
/// [`StateDb::error`] and [`StateDb::commit`].
#[derive(Debug, Clone)]
pub struct StateDb {
    db: Arc<StateDatabase>,
    root: B256,
    objects: HashMap<Address, StateObject>,
    /// Accounts finalised since the last commit.
    pending: BTreeSet<Address>,
    journal: Journal,
    refund: u64,
    access_list: HashMap<Address, HashSet<B256>>,
    tx_hash: B256,
    tx_index: u32,
    logs: HashMap<B256, Vec<IndexedLog>>,
    log_size: u32,
    db_err: Option<StateError>,
}

impl StateDb {
    /// Opens the state of `root`. Accounts and slots are read from the trie on first access.
    pub fn new(root: B256, db: Arc<StateDatabase>) -> Result<Self, StateError> {
        if !db.has_state(&root) {
            return Err(StateError::MissingTrieNode(root));
        }
        Ok(Self {
            db,
            root,
            objects: HashMap::new(),
            pending: BTreeSet::new(),
            journal: Journal::default(),
            refund: 0,
            access_list: HashMap::new(),
            tx_hash: B256::ZERO,
            tx_index: 0,
            logs: HashMap::new(),
            log_size: 0,
            db_err: None,
        })
    }

    /// Root the state was opened at, or the root of the last commit.
    pub const fn root(&self) -> B256 {
        self.root
    }

    /// Database of the domain.
    pub const fn database(&self) -> &Arc<StateDatabase> {
        &self.db
    }

    /// First database error hit since the state was opened.
    pub const fn error(&self) -> Option<&StateError> {
        self.db_err.as_ref()
    }

    /// Sets the transaction the following logs belong to.
    pub fn prepare(&mut self, tx_hash: B256, tx_index: u32) {
        self.tx_hash = tx_hash;
        self.tx_index = tx_index;
        self.access_list.clear();
    }

    /// Hash of the current transaction.
    pub const fn tx_hash(&self) -> B256 {
        self.tx_hash
    }

    /// Position of the current transaction.
    pub const fn tx_index(&self) -> u32 {
        self.tx_index
    }

    /// Logs of `tx_hash`, stamped with the block they were included in.
    pub fn logs(&self, tx_hash: &B256, block_number: u64, block_hash: B256) -> Vec<IndexedLog> {
        self.logs
            .get(tx_hash)
            .map(|logs| {
                logs.iter()
                    .cloned()
                    .map(|mut log| {
                        log.block_number = block_number;
                        log.block_hash = block_hash;
                        log
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of logs recorded since the state was opened.
    pub const fn log_size(&self) -> u32 {
        self.log_size
    }

    fn load(&mut self, address: Address) -> bool {
        if let Some(obj) = self.objects.get(&address) {
            return !obj.deleted;
        }
        match self.db.account(self.root, address) {
            Ok(Some(record)) => {
                self.objects.insert(address, StateObject::new(record));
                true
            }
            Ok(None) => false,
            Err(err) => {
                self.db_err.get_or_insert(err);
                false
            }
        }
    }

    fn record(&mut self, address: Address) -> Option<AccountRecord> {
        if !self.load(address) {
            return None;
        }
        self.objects.get(&address).map(|obj| obj.account)
    }

    /// Makes sure a live object exists at `address`, creating an empty one if needed.
    fn ensure(&mut self, address: Address) {
        if !self.load(address) {
            self.create_object(address);
        }
    }

    fn create_object(&mut self, address: Address) {
        let prev = self.objects.remove(&address);
        let balance =
            prev.as_ref().filter(|obj| !obj.deleted).map_or(U256::ZERO, |obj| obj.account.balance);
        self.objects.insert(address, StateObject::new(AccountRecord { balance, ..Default::default() }));
        self.journal.append(JournalEntry::CreateObject { address, prev: prev.map(Box::new) });
    }

    fn origin(&mut self, address: Address, slot: B256) -> U256 {
        let Some(obj) = self.objects.get_mut(&address) else { return U256::ZERO };
        if let Some(value) = obj.origin.get(&slot) {
            return *value;
        }
        let value = match self.db.storage_slot(obj.account.storage_root, slot) {
            Ok(value) => value,
            Err(err) => {
                self.db_err.get_or_insert(err);
                return U256::ZERO;
            }
        };
        obj.origin.insert(slot, value);
        value
    }

    /// Closes the current transaction.
    ///
    /// Storage writes become pending and, with `delete_empty`, EIP-161 empty accounts touched by
    /// the transaction are removed. The journal and the refund counter are reset.
    pub fn finalise(&mut self, delete_empty: bool) {
        for address in self.journal.reset() {
            let Some(obj) = self.objects.get_mut(&address) else { continue };
            if obj.deleted {
                continue;
            }
            if obj.self_destructed || (delete_empty && obj.account.is_empty()) {
                obj.deleted = true;
                obj.dirty.clear();
                obj.pending.clear();
            } else {
                let dirty = mem::take(&mut obj.dirty);
                obj.pending.extend(dirty);
            }
            self.pending.insert(address);
        }
        self.refund = 0;
    }

    /// Writes the pending changes into the account trie. With `persist`, storage and account
    /// nodes go to the node database and the pending set is flushed into the objects.
    fn update_tries(&mut self, persist: bool) -> Result<(B256, AccountDiff), StateError> {
        let db = self.db.clone();
        let mut accounts = db.open_trie(self.root);
        let mut diff = AccountDiff::new();
        for address in &self.pending {
            let key = keccak256(address);
            let Some(obj) = self.objects.get_mut(address) else { continue };
            if obj.deleted {
                accounts.remove(key)?;
                diff.insert(key, None);
                continue;
            }
            let mut record = obj.account;
            if !obj.pending.is_empty() {
                let mut storage = db.open_trie(record.storage_root);
                write_slots(&mut storage, &obj.pending)?;
                if persist {
                    record.storage_root = storage.commit(&|_| None);
                    obj.account.storage_root = record.storage_root;
                    obj.origin.extend(obj.pending.drain());
                } else {
                    record.storage_root = storage.hash();
                }
            }
            if persist && obj.dirty_code {
                if let Some(code) = &obj.code {
                    db.insert_code(code)?;
                }
                obj.dirty_code = false;
            }
            accounts.insert(key, alloy_rlp::encode(record))?;
            diff.insert(key, Some(record));
        }
        let root = if persist { accounts.commit(&account_storage_ref) } else { accounts.hash() };
        Ok((root, diff))
    }

    /// Finalises and returns the state root without writing trie nodes.
    pub fn intermediate_root(&mut self, delete_empty: bool) -> B256 {
        self.finalise(delete_empty);
        match self.update_tries(false) {
            Ok((root, _)) => root,
            Err(err) => {
                self.db_err.get_or_insert(err);
                self.root
            }
        }
    }

    /// Finalises, inserts the nodes of every changed storage and account path and returns the
    /// new root.
    ///
    /// The state continues on top of the new root.
    pub fn commit(&mut self, delete_empty: bool) -> Result<B256, StateError> {
        self.finalise(delete_empty);
        if let Some(err) = &self.db_err {
            return Err(err.clone());
        }
        let (root, diff) = self.update_tries(true)?;
        trace!(target: "state", %root, accounts = diff.len(), "committed state");
        self.db.snapshots().update(root, self.root, diff);
        self.pending.clear();
        self.objects.retain(|_, obj| !obj.deleted);
        self.root = root;
        Ok(root)
    }

    fn revert(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::CreateObject { address, prev } => match prev {
                Some(prev) => {
                    self.objects.insert(address, *prev);
                }
                None => {
                    self.objects.remove(&address);
                }
            },
            JournalEntry::Balance { address, prev } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    obj.account.balance = prev;
                }
            }
            JournalEntry::Nonce { address, prev } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    obj.account.nonce = prev;
                }
            }
            JournalEntry::Code { address, prev_code, prev_hash, prev_dirty } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    obj.code = prev_code;
                    obj.account.code_hash = prev_hash;
                    obj.dirty_code = prev_dirty;
                }
            }
            JournalEntry::Storage { address, slot, prev } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    match prev {
                        Some(value) => obj.dirty.insert(slot, value),
                        None => obj.dirty.remove(&slot),
                    };
                }
            }
            JournalEntry::SelfDestruct { address, prev, prev_balance } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    obj.self_destructed = prev;
                    obj.account.balance = prev_balance;
                }
            }
            JournalEntry::Refund { prev } => self.refund = prev,
            JournalEntry::AddLog { tx_hash } => {
                if let Some(logs) = self.logs.get_mut(&tx_hash) {
                    logs.pop();
                }
                self.log_size -= 1;
            }
            JournalEntry::AccessListAccount { address } => {
                self.access_list.remove(&address);
            }
            JournalEntry::AccessListSlot { address, slot } => {
                if let Some(slots) = self.access_list.get_mut(&address) {
                    slots.remove(&slot);
                }
            }
            JournalEntry::Touch { .. } => {}
        }
    }
}

impl EvmState for StateDb {
    fn exist(&mut self, address: Address) -> bool {
        self.load(address)
    }

    fn is_empty(&mut self, address: Address) -> bool {
        self.record(address).is_none_or(|record| record.is_empty())
    }

    fn balance(&mut self, address: Address) -> U256 {
        self.record(address).map(|record| record.balance).unwrap_or_default()
    }

    fn nonce(&mut self, address: Address) -> u64 {
        self.record(address).map(|record| record.nonce).unwrap_or_default()
    }

    fn code(&mut self, address: Address) -> Bytes {
        if !self.load(address) {
            return Bytes::new();
        }
        let Some(obj) = self.objects.get_mut(&address) else { return Bytes::new() };
        if let Some(code) = &obj.code {
            return code.clone();
        }
        match self.db.code(obj.account.code_hash) {
            Ok(code) => {
                obj.code = Some(code.clone());
                code
            }
            Err(err) => {
                self.db_err.get_or_insert(err);
                Bytes::new()
            }
        }
    }

    fn code_hash(&mut self, address: Address) -> B256 {
        self.record(address).map(|record| record.code_hash).unwrap_or_default()
    }

    fn storage(&mut self, address: Address, slot: B256) -> U256 {
        if !self.load(address) {
            return U256::ZERO;
        }
        if let Some(value) = self.objects.get(&address).and_then(|obj| obj.dirty.get(&slot)) {
            return *value;
        }
        self.committed_storage(address, slot)
    }

    fn committed_storage(&mut self, address: Address, slot: B256) -> U256 {
        if !self.load(address) {
            return U256::ZERO;
        }
        if let Some(value) = self.objects.get(&address).and_then(|obj| obj.pending.get(&slot)) {
            return *value;
        }
        self.origin(address, slot)
    }

    fn storage_root(&mut self, address: Address) -> B256 {
        let Some(record) = self.record(address) else { return EMPTY_ROOT_HASH };
        let Some(obj) = self.objects.get(&address) else { return EMPTY_ROOT_HASH };
        if obj.pending.is_empty() && obj.dirty.is_empty() {
            return record.storage_root;
        }
        let mut storage = self.db.open_trie(record.storage_root);
        let written = write_slots(&mut storage, obj.pending.iter().chain(obj.dirty.iter()));
        match written {
            Ok(()) => storage.hash(),
            Err(err) => {
                self.db_err.get_or_insert(err);
                record.storage_root
            }
        }
    }

    fn create_account(&mut self, address: Address) {
        self.load(address);
        self.create_object(address);
    }

    fn set_balance(&mut self, address: Address, balance: U256) {
        self.ensure(address);
        if let Some(obj) = self.objects.get_mut(&address) {
            self.journal.append(JournalEntry::Balance { address, prev: obj.account.balance });
            obj.account.balance = balance;
        }
    }

    fn add_balance(&mut self, address: Address, amount: U256) {
        if amount.is_zero() {
            self.ensure(address);
            self.journal.append(JournalEntry::Touch { address });
            return;
        }
        let balance = self.balance(address);
        self.set_balance(address, balance.saturating_add(amount));
    }

    fn sub_balance(&mut self, address: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        let balance = self.balance(address);
        self.set_balance(address, balance.saturating_sub(amount));
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.ensure(address);
        if let Some(obj) = self.objects.get_mut(&address) {
            self.journal.append(JournalEntry::Nonce { address, prev: obj.account.nonce });
            obj.account.nonce = nonce;
        }
    }

    fn set_code(&mut self, address: Address, code: Bytes) {
        self.ensure(address);
        if let Some(obj) = self.objects.get_mut(&address) {
            self.journal.append(JournalEntry::Code {
                address,
                prev_code: obj.code.take(),
                prev_hash: obj.account.code_hash,
                prev_dirty: obj.dirty_code,
            });
            obj.account.code_hash = if code.is_empty() { KECCAK_EMPTY } else { keccak256(&code) };
            obj.code = Some(code);
            obj.dirty_code = true;
        }
    }

    fn set_storage(&mut self, address: Address, slot: B256, value: U256) {
        self.ensure(address);
        if let Some(obj) = self.objects.get_mut(&address) {
            let prev = obj.dirty.insert(slot, value);
            self.journal.append(JournalEntry::Storage { address, slot, prev });
        }
    }

    fn self_destruct(&mut self, address: Address) {
        if !self.load(address) {
            return;
        }
        if let Some(obj) = self.objects.get_mut(&address) {
            self.journal.append(JournalEntry::SelfDestruct {
                address,
                prev: obj.self_destructed,
                prev_balance: obj.account.balance,
            });
            obj.self_destructed = true;
            obj.account.balance = U256::ZERO;
        }
    }

    fn has_self_destructed(&mut self, address: Address) -> bool {
        self.load(address) && self.objects.get(&address).is_some_and(|obj| obj.self_destructed)
    }

    fn add_refund(&mut self, gas: u64) {
        self.journal.append(JournalEntry::Refund { prev: self.refund });
        self.refund = self.refund.saturating_add(gas);
    }

    fn sub_refund(&mut self, gas: u64) {
        self.journal.append(JournalEntry::Refund { prev: self.refund });
        self.refund = self.refund.saturating_sub(gas);
    }

    fn refund(&mut self) -> u64 {
        self.refund
    }

    fn add_log(&mut self, log: Log) {
        let indexed = IndexedLog {
            log,
            block_number: 0,
            block_hash: B256::ZERO,
            tx_hash: self.tx_hash,
            tx_index: self.tx_index,
            log_index: self.log_size,
        };
        self.logs.entry(self.tx_hash).or_default().push(indexed);
        self.log_size += 1;
        self.journal.append(JournalEntry::AddLog { tx_hash: self.tx_hash });
    }

    fn prepare_access_list(
        &mut self,
        sender: Address,
        dst: Option<Address>,
        precompiles: &[Address],
        list: &AccessList,
    ) {
        self.access_list.clear();
        self.add_address_to_access_list(sender);
        if let Some(dst) = dst {
            self.add_address_to_access_list(dst);
        }
        for address in precompiles {
            self.add_address_to_access_list(*address);
        }
        for item in &list.0 {
            self.add_address_to_access_list(item.address);
            for slot in &item.storage_keys {
                self.add_slot_to_access_list(item.address, *slot);
            }
        }
    }

    fn add_address_to_access_list(&mut self, address: Address) {
        if !self.access_list.contains_key(&address) {
            self.access_list.insert(address, HashSet::new());
            self.journal.append(JournalEntry::AccessListAccount { address });
        }
    }

    fn add_slot_to_access_list(&mut self, address: Address, slot: B256) {
        self.add_address_to_access_list(address);
        if self.access_list.entry(address).or_default().insert(slot) {
            self.journal.append(JournalEntry::AccessListSlot { address, slot });
        }
    }

    fn address_in_access_list(&mut self, address: Address) -> bool {
        self.access_list.contains_key(&address)
    }

    fn slot_in_access_list(&mut self, address: Address, slot: B256) -> bool {
        self.access_list.get(&address).is_some_and(|slots| slots.contains(&slot))
    }

    fn snapshot(&mut self) -> usize {
        self.journal.len()
    }

    fn revert_to_snapshot(&mut self, revision: usize) {
        for entry in self.journal.unwind(revision) {
            self.revert(entry);
        }
    }
}
