use std::collections::BTreeMap;

use alloy_primitives::{Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::{BlockCtx, Epoch, EventId, Rules, ValidatorId, Validators};

/// The latest event of a validator, as far as validator bookkeeping is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    /// Event id.
    pub id: EventId,
    /// Gas power left after the event.
    pub gas_power_left: u64,
    /// Median time of the event, in nanoseconds.
    pub time: u64,
}

/// Stake and consensus key of a validator, as announced by the node driver.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorProfile {
    /// Stake-derived weight.
    pub weight: U256,
    /// Consensus public key.
    pub pubkey: Bytes,
}

/// Per-validator state updated with every block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorBlockState {
    /// Highest confirmed event.
    pub last_event: EventInfo,
    /// Time online during the current epoch, in nanoseconds.
    pub uptime: u64,
    /// Median time of the last confirmed event.
    pub last_online_time: u64,
    /// Gas power left after the last confirmed event.
    pub last_gas_power_left: u64,
    /// Block that last confirmed an event of the validator.
    pub last_block: u64,
    /// Unused gas of originated transactions, refunded at the next epoch.
    pub dirty_gas_refund: u64,
    /// Fees of the transactions the validator originated during the epoch.
    pub originated: U256,
}

/// Per-validator state fixed for an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorEpochState {
    /// Gas power refunded during the epoch.
    pub gas_refund: u64,
    /// Last event of the validator in the previous epoch.
    pub prev_epoch_event: EventInfo,
}

/// State advanced by every block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockState {
    /// Last emitted block.
    pub last_block: BlockCtx,
    /// World-state root after the last block.
    pub finalized_state_root: B256,
    /// SFC-state root after the last block.
    pub sfc_state_root: B256,
    /// Gas power used by confirmed events during the epoch.
    pub epoch_gas: u64,
    /// Validators proven to misbehave during the epoch, in discovery order.
    pub epoch_cheaters: Vec<ValidatorId>,
    /// Number of `epoch_cheaters` already deactivated through internal transactions.
    pub cheaters_written: u32,
    /// Per-validator states, by index in the epoch's validator set.
    pub validator_states: Vec<ValidatorBlockState>,
    /// Validator profiles of the next epoch.
    pub next_validator_profiles: BTreeMap<ValidatorId, ValidatorProfile>,
    /// Rules of the next epoch, when changed during this one.
    pub dirty_rules: Option<Rules>,
    /// Epoch seals still forced by the node driver.
    pub advance_epochs: u32,
}

impl BlockState {
    /// State of `index`, if the index is valid.
    pub fn validator_state(&self, index: usize) -> Option<&ValidatorBlockState> {
        self.validator_states.get(index)
    }

    /// Appends the cheaters not yet known, keeping discovery order.
    pub fn merge_cheaters(&mut self, cheaters: &[ValidatorId]) {
        for cheater in cheaters {
            if !self.epoch_cheaters.contains(cheater) {
                self.epoch_cheaters.push(*cheater);
            }
        }
    }

    /// Cheaters not yet deactivated.
    pub fn unwritten_cheaters(&self) -> &[ValidatorId] {
        let written = (self.cheaters_written as usize).min(self.epoch_cheaters.len());
        &self.epoch_cheaters[written..]
    }
}

/// State fixed for an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochState {
    /// Epoch number.
    pub epoch: Epoch,
    /// Time of the first block of the epoch.
    pub epoch_start: u64,
    /// Time of the first block of the previous epoch.
    pub prev_epoch_start: u64,
    /// World-state root the epoch started from.
    pub epoch_state_root: B256,
    /// Validator set.
    pub validators: Validators,
    /// Per-validator states, by index in `validators`.
    pub validator_states: Vec<ValidatorEpochState>,
    /// Profiles of `validators`.
    pub validator_profiles: BTreeMap<ValidatorId, ValidatorProfile>,
    /// Active rules.
    pub rules: Rules,
}

/// Block state and epoch state, persisted together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEpochState {
    /// Block state.
    pub block_state: BlockState,
    /// Epoch state.
    pub epoch_state: EpochState,
}
