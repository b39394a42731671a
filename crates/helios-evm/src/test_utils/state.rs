use std::{collections::BTreeMap, sync::Arc};

use alloy_primitives::{Address, Bytes, B256, U256};

use crate::{GenesisAccount, StateStore, StoreConfig};

/// Builder of a state store seeded with accounts.
#[derive(Debug, Default, Clone)]
pub struct StateBuilder {
    alloc: BTreeMap<Address, GenesisAccount>,
    config: StoreConfig,
}

impl StateBuilder {
    /// An empty builder over the default store configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the store configuration.
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the balance of `address`.
    pub fn account_balance(mut self, address: Address, balance: U256) -> Self {
        self.alloc.entry(address).or_default().balance = balance;
        self
    }

    /// Sets the nonce of `address`.
    pub fn account_nonce(mut self, address: Address, nonce: u64) -> Self {
        self.alloc.entry(address).or_default().nonce = nonce;
        self
    }

    /// Sets the code of `address`.
    pub fn account_code(mut self, address: Address, code: Bytes) -> Self {
        self.alloc.entry(address).or_default().code = code;
        self
    }

    /// Sets a storage slot of `address`.
    pub fn account_storage(mut self, address: Address, slot: B256, value: U256) -> Self {
        self.alloc.entry(address).or_default().storage.insert(slot, value);
        self
    }

    /// The accounts seeded so far.
    pub const fn alloc(&self) -> &BTreeMap<Address, GenesisAccount> {
        &self.alloc
    }

    /// Builds an in-memory store and returns it with the world and SFC roots.
    pub fn build(self) -> (Arc<StateStore>, B256, B256) {
        let store = StateStore::in_memory(self.config);
        let (root, sfc_root) = store.apply_alloc(&self.alloc).expect("seeding in-memory state");
        (Arc::new(store), root, sfc_root)
    }
}
