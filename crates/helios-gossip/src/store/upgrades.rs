use std::sync::Arc;

use helios_evm::ChainConfig;
use helios_kvdb::{KeyValueReader, KeyValueWriter, Table};
use parking_lot::RwLock;
use tracing::info;

use super::{decode_u64, get_json, put_json, Store};
use crate::{Rules, StoreError, UpgradeHeight};

const HEIGHTS_KEY: &[u8] = b"h";
const VERSION_KEY: &[u8] = b"v";
const MISSED_VERSION_KEY: &[u8] = b"m";

/// Append-only ledger of upgrade heights.
///
/// Readers hold on to the slice they got; appending publishes a new slice.
#[derive(Debug)]
pub struct UpgradeHeights {
    table: Table,
    heights: RwLock<Arc<Vec<UpgradeHeight>>>,
}

impl UpgradeHeights {
    pub(super) fn load(table: &Table) -> Result<Self, StoreError> {
        let heights: Vec<UpgradeHeight> = get_json(table, "U", HEIGHTS_KEY)?.unwrap_or_default();
        Ok(Self { table: table.clone(), heights: RwLock::new(Arc::new(heights)) })
    }

    /// Recorded heights, oldest first.
    pub fn get(&self) -> Arc<Vec<UpgradeHeight>> {
        self.heights.read().clone()
    }

    /// Appends `height` and persists the ledger.
    pub fn add(&self, height: UpgradeHeight) -> Result<(), StoreError> {
        let mut guard = self.heights.write();
        let mut heights = Vec::with_capacity(guard.len() + 1);
        heights.extend_from_slice(&guard);
        heights.push(height);
        put_json(&self.table, HEIGHTS_KEY, &heights)?;
        *guard = Arc::new(heights);
        Ok(())
    }
}

impl Store {
    /// Records that `height.upgrades` apply from block `height.height` on.
    pub fn add_upgrade_height(&self, height: UpgradeHeight) -> Result<(), StoreError> {
        self.upgrades.add(height)?;
        info!(target: "gossip::store", height = height.height, upgrades = ?height.upgrades, "recorded upgrade height");
        Ok(())
    }

    /// Recorded upgrade heights, oldest first.
    pub fn get_upgrade_heights(&self) -> Arc<Vec<UpgradeHeight>> {
        self.upgrades.get()
    }

    /// EVM chain configuration of `rules` with the recorded fork schedule.
    pub fn evm_chain_config(&self, rules: &Rules) -> ChainConfig {
        rules.evm_chain_config(&self.upgrades.get())
    }

    /// Records the network version announced by the node driver.
    pub fn set_network_version(&self, version: u64) -> Result<(), StoreError> {
        Ok(self.table.network_version.put(VERSION_KEY, &version.to_be_bytes())?)
    }

    /// Network version announced by the node driver, zero if none.
    pub fn get_network_version(&self) -> Result<u64, StoreError> {
        self.table.network_version.get(VERSION_KEY)?.map_or(Ok(0), |blob| decode_u64("V", &blob))
    }

    /// Records a network version this node does not support.
    pub fn set_missed_version(&self, version: u64) -> Result<(), StoreError> {
        Ok(self.table.network_version.put(MISSED_VERSION_KEY, &version.to_be_bytes())?)
    }

    /// Unsupported network version, zero if none.
    pub fn get_missed_version(&self) -> Result<u64, StoreError> {
        self.table
            .network_version
            .get(MISSED_VERSION_KEY)?
            .map_or(Ok(0), |blob| decode_u64("V", &blob))
    }
}

#[cfg(test)]
mod tests {
    use helios_evm::{SpecId, StoreConfig};

    use super::*;
    use crate::{GossipConfig, Upgrades};

    #[test]
    fn test_readers_keep_their_slice() {
        let store = Store::in_memory(GossipConfig::default(), StoreConfig::default()).unwrap();
        store
            .add_upgrade_height(UpgradeHeight { upgrades: Upgrades::default(), height: 0 })
            .unwrap();
        let before = store.get_upgrade_heights();

        let london = Upgrades { berlin: true, london: true, ..Default::default() };
        store.add_upgrade_height(UpgradeHeight { upgrades: london, height: 10 }).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(store.get_upgrade_heights().len(), 2);

        let config = store.evm_chain_config(&Rules::main_net());
        assert_eq!(config.spec_at(9), SpecId::ISTANBUL);
        assert_eq!(config.spec_at(10), SpecId::LONDON);
    }

    #[test]
    fn test_ledger_survives_reopen() {
        let producer = std::sync::Arc::new(helios_kvdb::MemoryDbProducer::new());
        let store = Store::new(producer.clone(), GossipConfig::default(), StoreConfig::default()).unwrap();
        store
            .add_upgrade_height(UpgradeHeight { upgrades: Upgrades::all(), height: 4 })
            .unwrap();
        store.set_network_version(2).unwrap();
        drop(store);

        let store = Store::new(producer, GossipConfig::default(), StoreConfig::default()).unwrap();
        assert_eq!(store.get_upgrade_heights()[0].height, 4);
        assert_eq!(store.get_network_version().unwrap(), 2);
        assert_eq!(store.get_missed_version().unwrap(), 0);
    }
}
