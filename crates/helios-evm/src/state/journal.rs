use std::collections::HashMap;

use alloy_primitives::{Address, Bytes, B256, U256};

use super::statedb::StateObject;

/// A reversible state change.
#[derive(Debug, Clone)]
pub(crate) enum JournalEntry {
    CreateObject { address: Address, prev: Option<Box<StateObject>> },
    Balance { address: Address, prev: U256 },
    Nonce { address: Address, prev: u64 },
    Code { address: Address, prev_code: Option<Bytes>, prev_hash: B256, prev_dirty: bool },
    Storage { address: Address, slot: B256, prev: Option<U256> },
    SelfDestruct { address: Address, prev: bool, prev_balance: U256 },
    Refund { prev: u64 },
    AddLog { tx_hash: B256 },
    AccessListAccount { address: Address },
    AccessListSlot { address: Address, slot: B256 },
    Touch { address: Address },
}

impl JournalEntry {
    const fn address(&self) -> Option<Address> {
        match self {
            Self::CreateObject { address, .. } |
            Self::Balance { address, .. } |
            Self::Nonce { address, .. } |
            Self::Code { address, .. } |
            Self::Storage { address, .. } |
            Self::SelfDestruct { address, .. } |
            Self::Touch { address } => Some(*address),
            Self::Refund { .. } |
            Self::AddLog { .. } |
            Self::AccessListAccount { .. } |
            Self::AccessListSlot { .. } => None,
        }
    }
}

/// Ordered list of changes of the current transaction, with the number of changes per account.
#[derive(Debug, Clone, Default)]
pub(crate) struct Journal {
    entries: Vec<JournalEntry>,
    dirties: HashMap<Address, usize>,
}

impl Journal {
    pub(crate) fn append(&mut self, entry: JournalEntry) {
        if let Some(address) = entry.address() {
            *self.dirties.entry(address).or_default() += 1;
        }
        self.entries.push(entry);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes the entries recorded at or after `revision`, newest first.
    pub(crate) fn unwind(&mut self, revision: usize) -> Vec<JournalEntry> {
        if revision >= self.entries.len() {
            return Vec::new();
        }
        let mut tail = self.entries.split_off(revision);
        for entry in &tail {
            let Some(address) = entry.address() else { continue };
            if let Some(count) = self.dirties.get_mut(&address) {
                *count -= 1;
                if *count == 0 {
                    self.dirties.remove(&address);
                }
            }
        }
        tail.reverse();
        tail
    }

    /// Clears the journal and returns the accounts it touched.
    pub(crate) fn reset(&mut self) -> Vec<Address> {
        self.entries.clear();
        self.dirties.drain().map(|(address, _)| address).collect()
    }
}
