use std::collections::BTreeSet;

use alloy_primitives::{Address, B256};
use helios_evm::IndexedLog;
use helios_kvdb::{Iteratee, KeyValueWriter};
use serde::{Deserialize, Serialize};

use super::{get_json, put_json, Store};
use crate::{BlockIdx, StoreError};

/// Maximum number of indexed topic positions.
pub const MAX_TOPICS: usize = 4;

/// Log query over a block range.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    /// First block, inclusive.
    pub from_block: BlockIdx,
    /// Last block, inclusive.
    pub to_block: BlockIdx,
    /// Emitting contracts. Empty matches any.
    pub addresses: Vec<Address>,
    /// Accepted topics per position. An empty position matches any topic.
    pub topics: Vec<Vec<B256>>,
}

impl LogFilter {
    /// Filter over blocks `from_block..=to_block`.
    pub fn new(from_block: BlockIdx, to_block: BlockIdx) -> Self {
        Self { from_block, to_block, ..Default::default() }
    }

    /// Restricts the emitting contracts.
    pub fn with_address(mut self, address: Address) -> Self {
        self.addresses.push(address);
        self
    }

    /// Restricts topic `position` to `topics`.
    pub fn with_topics(mut self, position: usize, topics: Vec<B256>) -> Self {
        if self.topics.len() <= position {
            self.topics.resize(position + 1, Vec::new());
        }
        self.topics[position] = topics;
        self
    }

    /// Returns `true` if `log` satisfies the filter.
    pub fn matches(&self, log: &IndexedLog) -> bool {
        if log.block_number < self.from_block || log.block_number > self.to_block {
            return false;
        }
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }
        self.topics.iter().enumerate().all(|(position, accepted)| {
            accepted.is_empty() || log.topics().get(position).is_some_and(|t| accepted.contains(t))
        })
    }
}

fn location(block: BlockIdx, log_index: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&block.to_be_bytes());
    key[8..].copy_from_slice(&log_index.to_be_bytes());
    key
}

fn parse_location(suffix: &[u8]) -> Option<(BlockIdx, u32)> {
    let block = u64::from_be_bytes(suffix.get(..8)?.try_into().ok()?);
    let index = u32::from_be_bytes(suffix.get(8..12)?.try_into().ok()?);
    Some((block, index))
}

impl Store {
    /// Indexes `logs` by emitting contract and by topic.
    pub fn index_logs(&self, logs: &[IndexedLog]) -> Result<(), StoreError> {
        let records = self.table.logs.sub_table("r");
        let by_address = self.table.logs.sub_table("a");
        let by_topic = self.table.logs.sub_table("t");
        for log in logs {
            let location = location(log.block_number, log.log_index);
            put_json(&records, &location, log)?;

            let mut key = log.address.to_vec();
            key.extend_from_slice(&location);
            by_address.put(&key, &[])?;

            for (position, topic) in log.topics().iter().take(MAX_TOPICS).enumerate() {
                let mut key = vec![position as u8];
                key.extend_from_slice(topic.as_slice());
                key.extend_from_slice(&location);
                by_topic.put(&key, &[])?;
            }
        }
        Ok(())
    }

    /// Indexed logs matching `filter`, in chain order.
    pub fn find_logs(&self, filter: &LogFilter) -> Result<Vec<IndexedLog>, StoreError> {
        if filter.from_block > filter.to_block {
            return Ok(Vec::new());
        }
        let records = self.table.logs.sub_table("r");
        let start = filter.from_block.to_be_bytes();

        // candidate locations from the most selective index available
        let prefixes: Vec<(Vec<u8>, &str)> = if !filter.addresses.is_empty() {
            filter.addresses.iter().map(|a| (a.to_vec(), "a")).collect()
        } else if let Some((position, accepted)) =
            filter.topics.iter().enumerate().find(|(_, accepted)| !accepted.is_empty())
        {
            accepted
                .iter()
                .map(|topic| {
                    let mut prefix = vec![position as u8];
                    prefix.extend_from_slice(topic.as_slice());
                    (prefix, "t")
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut locations = BTreeSet::new();
        if prefixes.is_empty() {
            for (key, _) in records.new_iterator(&[], &start)? {
                match parse_location(&key) {
                    Some((block, index)) if block <= filter.to_block => {
                        locations.insert((block, index));
                    }
                    _ => break,
                }
            }
        } else {
            for (prefix, kind) in prefixes {
                let table = self.table.logs.sub_table(kind);
                for (key, _) in table.new_iterator(&prefix, &start)? {
                    match parse_location(&key[prefix.len()..]) {
                        Some((block, index)) if block <= filter.to_block => {
                            locations.insert((block, index));
                        }
                        _ => break,
                    }
                }
            }
        }

        let mut logs = Vec::with_capacity(locations.len());
        for (block, index) in locations {
            let log: Option<IndexedLog> = get_json(&records, "L", &location(block, index))?;
            if let Some(log) = log.filter(|log| filter.matches(log)) {
                logs.push(log);
            }
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Bytes, Log, LogData};
    use helios_evm::StoreConfig;

    use super::*;
    use crate::GossipConfig;

    fn log(block: u64, index: u32, address: u8, topics: &[u8]) -> IndexedLog {
        IndexedLog {
            log: Log {
                address: Address::with_last_byte(address),
                data: LogData::new_unchecked(
                    topics.iter().map(|t| B256::with_last_byte(*t)).collect(),
                    Bytes::new(),
                ),
            },
            block_number: block,
            block_hash: B256::with_last_byte(block as u8),
            tx_hash: B256::ZERO,
            tx_index: 0,
            log_index: index,
        }
    }

    #[test]
    fn test_find_logs_by_address_and_topic() {
        let store = Store::in_memory(GossipConfig::default(), StoreConfig::default()).unwrap();
        store.index_logs(&[log(1, 0, 0xa, &[1, 2]), log(1, 1, 0xb, &[1])]).unwrap();
        store.index_logs(&[log(2, 0, 0xa, &[3]), log(300, 0, 0xa, &[1])]).unwrap();

        let all = store.find_logs(&LogFilter::new(0, 1_000)).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].block_number, 300);

        let by_address =
            store.find_logs(&LogFilter::new(1, 2).with_address(Address::with_last_byte(0xa))).unwrap();
        assert_eq!(by_address.iter().map(|l| l.block_number).collect::<Vec<_>>(), vec![1, 2]);

        let by_topic =
            store.find_logs(&LogFilter::new(0, 1_000).with_topics(0, vec![B256::with_last_byte(1)])).unwrap();
        assert_eq!(by_topic.len(), 3);

        let second_topic = store
            .find_logs(
                &LogFilter::new(0, 1_000)
                    .with_address(Address::with_last_byte(0xa))
                    .with_topics(1, vec![B256::with_last_byte(2)]),
            )
            .unwrap();
        assert_eq!(second_topic, vec![log(1, 0, 0xa, &[1, 2])]);

        assert!(store.find_logs(&LogFilter::new(5, 4)).unwrap().is_empty());
    }
}
