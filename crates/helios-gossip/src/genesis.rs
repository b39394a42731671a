//! In-memory genesis: the allocation, the first validator set and the rules the chain starts
//! with.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, U256};
use alloy_trie::EMPTY_ROOT_HASH;
use helios_evm::GenesisAccount;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    Block, BlockCtx, BlockState, EpochState, GenesisError, Rules, Store, UpgradeHeight,
    ValidatorBlockState, ValidatorEpochState, ValidatorId, ValidatorProfile, Validators,
};

/// First epoch of every chain.
pub const FIRST_EPOCH: u32 = 1;

/// A validator of the first epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisValidator {
    /// Validator id, never zero.
    pub id: ValidatorId,
    /// Self-stake determining the validator's weight.
    pub stake: U256,
    /// Public key.
    #[serde(default)]
    pub pubkey: Bytes,
}

/// Everything the chain starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genesis {
    /// Rules of the first epoch.
    pub rules: Rules,
    /// Time of block zero, in nanoseconds.
    pub time: u64,
    /// Initial accounts.
    #[serde(default)]
    pub alloc: BTreeMap<Address, GenesisAccount>,
    /// Validators of the first epoch.
    pub validators: Vec<GenesisValidator>,
}

impl Genesis {
    /// An empty genesis under `rules` starting at `time`.
    pub const fn new(rules: Rules, time: u64) -> Self {
        Self { rules, time, alloc: BTreeMap::new(), validators: Vec::new() }
    }

    /// Adds an account.
    pub fn with_account(mut self, address: Address, account: GenesisAccount) -> Self {
        self.alloc.insert(address, account);
        self
    }

    /// Adds a validator.
    pub fn with_validator(mut self, id: ValidatorId, stake: U256) -> Self {
        self.validators.push(GenesisValidator { id, stake, pubkey: Bytes::new() });
        self
    }

    fn profiles(&self) -> BTreeMap<ValidatorId, ValidatorProfile> {
        self.validators
            .iter()
            .filter(|v| v.id != 0 && !v.stake.is_zero())
            .map(|v| (v.id, ValidatorProfile { weight: v.stake, pubkey: v.pubkey.clone() }))
            .collect()
    }
}

impl Store {
    /// Writes `genesis` into an empty store: the allocated state, block zero and the states
    /// of the first epoch.
    pub fn apply_genesis(&self, genesis: &Genesis) -> Result<Block, GenesisError> {
        if self.is_initialized() {
            return Err(GenesisError::AlreadyInitialized);
        }
        genesis.rules.validate()?;
        let profiles = genesis.profiles();
        if profiles.is_empty() {
            return Err(GenesisError::NoValidators);
        }
        let validators =
            Validators::from_stakes(profiles.iter().map(|(id, profile)| (*id, profile.weight)));

        let (root, sfc_root) = self.evm().apply_alloc(&genesis.alloc)?;
        self.add_upgrade_height(UpgradeHeight { upgrades: genesis.rules.upgrades, height: 0 })?;

        let block = Block {
            time: genesis.time,
            root,
            sfc_root,
            tx_hash: EMPTY_ROOT_HASH,
            base_fee: genesis.rules.economy.min_gas_price,
            ..Default::default()
        };
        self.set_block(0, &block)?;
        self.set_block_index(block.hash(), 0)?;

        let last_block = BlockCtx { idx: 0, time: genesis.time, atropos: block.atropos };
        let bs = BlockState {
            last_block,
            finalized_state_root: root,
            sfc_state_root: sfc_root,
            validator_states: vec![
                ValidatorBlockState { last_online_time: genesis.time, ..Default::default() };
                validators.len()
            ],
            next_validator_profiles: profiles.clone(),
            ..Default::default()
        };
        let es = EpochState {
            epoch: FIRST_EPOCH,
            epoch_start: genesis.time,
            prev_epoch_start: genesis.time,
            epoch_state_root: Default::default(),
            validator_states: vec![ValidatorEpochState::default(); validators.len()],
            validators,
            validator_profiles: profiles,
            rules: genesis.rules.clone(),
        };
        self.set_block_epoch_state(bs, es)?;
        self.evm().commit_block(0, root, sfc_root)?;

        info!(
            target: "gossip::genesis",
            network = %genesis.rules.name,
            accounts = genesis.alloc.len(),
            validators = genesis.validators.len(),
            %root,
            %sfc_root,
            "applied genesis"
        );
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use helios_evm::{EvmState, StoreConfig};

    use super::*;
    use crate::GossipConfig;

    fn genesis() -> Genesis {
        Genesis::new(Rules::dev_net(4003), 1_000)
            .with_account(Address::with_last_byte(1), GenesisAccount::with_balance(U256::from(7)))
            .with_validator(1, U256::from(100))
            .with_validator(2, U256::from(300))
    }

    #[test]
    fn test_genesis_writes_block_zero_and_first_epoch() {
        let store = Store::in_memory(GossipConfig::default(), StoreConfig::default()).unwrap();
        let block = store.apply_genesis(&genesis()).unwrap();

        assert_eq!(store.get_latest_block_index(), 0);
        assert_eq!(store.get_block(0).unwrap().as_deref(), Some(&block));
        let es = store.get_epoch_state().unwrap();
        assert_eq!(es.epoch, FIRST_EPOCH);
        assert_eq!(es.validators.sorted_ids(), vec![1, 2]);
        assert_eq!(es.validators.weight(2), 300);
        let bs = store.get_block_state().unwrap();
        assert_eq!(bs.validator_states.len(), 2);
        assert_eq!(bs.last_block.time, 1_000);

        let mut state = store.evm().open(bs.finalized_state_root, bs.sfc_state_root).unwrap();
        assert_eq!(state.balance(Address::with_last_byte(1)), U256::from(7));
        assert_eq!(store.get_upgrade_heights().len(), 1);
    }

    #[test]
    fn test_genesis_rejects_bad_input() {
        let store = Store::in_memory(GossipConfig::default(), StoreConfig::default()).unwrap();
        let empty = Genesis::new(Rules::dev_net(4003), 0).with_validator(0, U256::from(1));
        assert_eq!(store.apply_genesis(&empty), Err(GenesisError::NoValidators));

        store.apply_genesis(&genesis()).unwrap();
        assert_eq!(store.apply_genesis(&genesis()), Err(GenesisError::AlreadyInitialized));
    }
}
