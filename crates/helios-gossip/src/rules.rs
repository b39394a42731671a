//! Network rules and their run-time updates.
//!
//! Rules are agreed on by the network: they change only through `UpdateNetworkRules` events
//! of the node driver, which carry a JSON diff merged into the current rules. The merged rules
//! become active at the next epoch.

use helios_evm::{ChainConfig, SpecId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BlockIdx, RulesError};

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Network rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rules {
    /// Network name.
    pub name: String,
    /// Network id, also the EIP-155 chain id.
    #[serde(rename = "NetworkID")]
    pub network_id: u64,
    /// DAG limits.
    pub dag: DagRules,
    /// Economy parameters.
    pub economy: EconomyRules,
    /// Block limits.
    pub blocks: BlocksRules,
    /// Epoch limits.
    pub epochs: EpochsRules,
    /// Enabled protocol upgrades.
    pub upgrades: Upgrades,
}

/// DAG limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DagRules {
    /// Maximum number of parents of an event.
    pub max_parents: u32,
    /// Maximum number of parents not charged for.
    pub max_free_parents: u32,
    /// Maximum size of an event's extra data.
    pub max_extra_data: u32,
}

/// Economy parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EconomyRules {
    /// Blocks a validator may miss before it counts as offline.
    pub block_missed_slack: u64,
    /// Minimum gas price, also the base fee of every block.
    pub min_gas_price: u128,
    /// Minimum priority fee.
    pub min_gas_tip: u128,
    /// Gas power charges of events.
    pub gas: GasRules,
}

/// Gas power charges of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GasRules {
    /// Maximum gas power of one event.
    pub max_event_gas: u64,
    /// Base charge of an event.
    pub event_gas: u64,
    /// Charge per parent.
    pub parent_gas: u64,
    /// Charge per byte of extra data.
    pub extra_data_gas: u64,
}

/// Block limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlocksRules {
    /// Maximum total gas power of the events of a block.
    pub max_block_gas: u64,
    /// Empty blocks closer than this to the previous block are skipped, in nanoseconds.
    pub max_empty_block_skip_period: u64,
}

/// Epoch limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EpochsRules {
    /// Gas after which the epoch is sealed.
    pub max_epoch_gas: u64,
    /// Duration after which the epoch is sealed, in nanoseconds.
    pub max_epoch_duration: u64,
}

/// Protocol upgrade flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Upgrades {
    /// Berlin rules.
    pub berlin: bool,
    /// London rules.
    pub london: bool,
    /// Light-client records.
    pub llr: bool,
    /// Phaethon rules: Shanghai plus EIP-7702.
    pub phaethon: bool,
}

impl Upgrades {
    /// Every upgrade enabled.
    pub const fn all() -> Self {
        Self { berlin: true, london: true, llr: true, phaethon: true }
    }

    /// Protocol version enabled by these flags.
    pub const fn spec(&self) -> SpecId {
        if self.phaethon {
            SpecId::PHAETHON
        } else if self.london {
            SpecId::LONDON
        } else if self.berlin {
            SpecId::BERLIN
        } else {
            SpecId::ISTANBUL
        }
    }
}

/// Upgrades in force from a block on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeHeight {
    /// Enabled upgrades.
    pub upgrades: Upgrades,
    /// First block executed with them.
    pub height: BlockIdx,
}

impl Rules {
    /// Rules of the main network.
    pub fn main_net() -> Self {
        Self {
            name: "main".to_string(),
            network_id: 0xfa,
            dag: DagRules { max_parents: 10, max_free_parents: 3, max_extra_data: 128 },
            economy: EconomyRules {
                block_missed_slack: 50,
                min_gas_price: 1_000_000_000,
                min_gas_tip: 0,
                gas: GasRules {
                    max_event_gas: 10_000_000 + 28_000,
                    event_gas: 28_000,
                    parent_gas: 2_400,
                    extra_data_gas: 25,
                },
            },
            blocks: BlocksRules {
                max_block_gas: 20_500_000,
                max_empty_block_skip_period: 60 * NANOS_PER_SECOND,
            },
            epochs: EpochsRules {
                max_epoch_gas: 1_500_000_000,
                max_epoch_duration: 4 * 60 * 60 * NANOS_PER_SECOND,
            },
            upgrades: Upgrades::all(),
        }
    }

    /// Rules of a local development network with short epochs.
    pub fn dev_net(network_id: u64) -> Self {
        let mut rules = Self::main_net();
        rules.name = "dev".to_string();
        rules.network_id = network_id;
        rules.economy.min_gas_price = 1;
        rules.blocks.max_empty_block_skip_period = 0;
        rules.epochs.max_epoch_duration = 10 * 60 * NANOS_PER_SECOND;
        rules
    }

    /// Sets the upgrades.
    pub const fn with_upgrades(mut self, upgrades: Upgrades) -> Self {
        self.upgrades = upgrades;
        self
    }

    /// Sets the block limits.
    pub const fn with_blocks(mut self, blocks: BlocksRules) -> Self {
        self.blocks = blocks;
        self
    }

    /// Sets the epoch limits.
    pub const fn with_epochs(mut self, epochs: EpochsRules) -> Self {
        self.epochs = epochs;
        self
    }

    /// Merges the JSON `diff` into a copy of the rules.
    ///
    /// Objects merge recursively; any other value replaces the current one. The name and the
    /// network id never change.
    pub fn update(&self, diff: &[u8]) -> Result<Self, RulesError> {
        let diff: Value = serde_json::from_slice(diff).map_err(|e| RulesError::Json(e.to_string()))?;
        let mut merged = serde_json::to_value(self).map_err(|e| RulesError::Json(e.to_string()))?;
        merge_json(&mut merged, diff);
        let mut updated: Self =
            serde_json::from_value(merged).map_err(|e| RulesError::Json(e.to_string()))?;
        updated.name.clone_from(&self.name);
        updated.network_id = self.network_id;
        updated.validate()?;
        Ok(updated)
    }

    /// Checks the bounds every rule set must respect.
    pub fn validate(&self) -> Result<(), RulesError> {
        if self.blocks.max_block_gas == 0 {
            return Err(RulesError::Invalid("max block gas is zero"));
        }
        if self.epochs.max_epoch_gas == 0 {
            return Err(RulesError::Invalid("max epoch gas is zero"));
        }
        if self.epochs.max_epoch_duration == 0 {
            return Err(RulesError::Invalid("max epoch duration is zero"));
        }
        if self.economy.gas.max_event_gas > self.blocks.max_block_gas {
            return Err(RulesError::Invalid("max event gas exceeds max block gas"));
        }
        Ok(())
    }

    /// EVM chain configuration with the fork schedule implied by `heights`.
    ///
    /// Every height raising the protocol version schedules that version at the height.
    pub fn evm_chain_config(&self, heights: &[UpgradeHeight]) -> ChainConfig {
        let mut config = ChainConfig::new(self.network_id, SpecId::ISTANBUL);
        let mut active = SpecId::ISTANBUL;
        for height in heights {
            let spec = height.upgrades.spec();
            if spec > active {
                config = config.with_fork(spec, height.height);
                active = spec;
            }
        }
        config
    }
}

/// Recursively merges `diff` into `base`.
pub fn merge_json(base: &mut Value, diff: Value) {
    match (base, diff) {
        (Value::Object(base), Value::Object(diff)) => {
            for (key, value) in diff {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, diff) => *base = diff,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_merge_is_recursive() {
        let mut base = json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        merge_json(&mut base, json!({"a": {"c": 3}, "d": [5], "e": true}));
        assert_eq!(base, json!({"a": {"b": 1, "c": 3}, "d": [5], "e": true}));
    }

    #[test]
    fn test_update_changes_only_the_diff() {
        let rules = Rules::main_net();
        let updated = rules
            .update(br#"{"Blocks": {"MaxBlockGas": 30000000}, "Name": "other", "NetworkID": 1}"#)
            .unwrap();
        assert_eq!(updated.blocks.max_block_gas, 30_000_000);
        assert_eq!(updated.blocks.max_empty_block_skip_period, rules.blocks.max_empty_block_skip_period);
        assert_eq!(updated.name, rules.name);
        assert_eq!(updated.network_id, rules.network_id);
        assert_eq!(updated.economy, rules.economy);
    }

    #[test]
    fn test_update_rejects_invalid_rules() {
        let rules = Rules::main_net();
        assert!(matches!(rules.update(b"not json"), Err(RulesError::Json(_))));
        assert!(matches!(rules.update(br#"{"Blocks": {"MaxBlockGas": "x"}}"#), Err(RulesError::Json(_))));
        assert!(matches!(
            rules.update(br#"{"Blocks": {"MaxBlockGas": 0}}"#),
            Err(RulesError::Invalid(_))
        ));
    }

    #[test]
    fn test_chain_config_follows_upgrade_heights() {
        let rules = Rules::main_net();
        let none = Upgrades::default();
        let london = Upgrades { berlin: true, london: true, ..Default::default() };
        let heights = [
            UpgradeHeight { upgrades: none, height: 0 },
            UpgradeHeight { upgrades: london, height: 100 },
            UpgradeHeight { upgrades: Upgrades::all(), height: 200 },
        ];
        let config = rules.evm_chain_config(&heights);
        assert_eq!(config.chain_id, 0xfa);
        assert_eq!(config.spec_at(99), SpecId::ISTANBUL);
        assert_eq!(config.spec_at(100), SpecId::LONDON);
        assert_eq!(config.spec_at(250), SpecId::PHAETHON);
    }
}
