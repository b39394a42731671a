use alloy_primitives::B256;
use hashlink::LruCache;
use helios_kvdb::{KeyValueReader, KeyValueWriter, Table};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{get_json, put_json, Store};
use crate::{BlockIdx, Epoch, LlrVote, StoreError, Validators};

const STATE_KEY: &[u8] = b"s";

/// Progress of light-client record collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlrState {
    /// Lowest block whose record is still collected from votes.
    pub lowest_block_to_fill: BlockIdx,
    /// Lowest epoch whose record is still collected from votes.
    pub lowest_epoch_to_fill: Epoch,
}

/// Accumulated votes for one record hash.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VoteWeight {
    /// Total weight of the voters.
    pub weight: u64,
    /// Voters, one bit per validator index.
    pub bitmap: Vec<u8>,
}

impl VoteWeight {
    fn decode(blob: &[u8]) -> Result<Self, StoreError> {
        let (weight, bitmap) = blob
            .split_first_chunk::<8>()
            .ok_or_else(|| StoreError::decode("S", "vote entry shorter than 8 bytes"))?;
        Ok(Self { weight: u64::from_be_bytes(*weight), bitmap: bitmap.to_vec() })
    }

    fn encode(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(8 + self.bitmap.len());
        blob.extend_from_slice(&self.weight.to_be_bytes());
        blob.extend_from_slice(&self.bitmap);
        blob
    }

    /// Returns `true` if validator `index` has voted.
    pub fn has(&self, index: usize) -> bool {
        self.bitmap.get(index / 8).is_some_and(|byte| byte & (1 << (index % 8)) != 0)
    }

    fn set(&mut self, index: usize) {
        if self.bitmap.len() <= index / 8 {
            self.bitmap.resize(index / 8 + 1, 0);
        }
        self.bitmap[index / 8] |= 1 << (index % 8);
    }

    fn cost(&self) -> usize {
        1 + self.bitmap.len()
    }
}

#[derive(Debug)]
struct CachedVote {
    vote: VoteWeight,
    mutated: bool,
}

/// Vote entries of one kind, buffered in a weight-bounded LRU over their table.
///
/// Entries modified since they were loaded are written back when evicted or flushed.
#[derive(Debug)]
pub struct VoteIndex {
    table: Table,
    cache: Mutex<(LruCache<Vec<u8>, CachedVote>, usize)>,
    max_weight: usize,
}

impl VoteIndex {
    /// Index over `table` buffering up to `max_weight` of entries.
    pub fn new(table: Table, max_weight: usize) -> Self {
        Self { table, cache: Mutex::new((LruCache::new_unbounded(), 0)), max_weight: max_weight.max(1) }
    }

    /// Adds the vote of validator `index` with `weight` to entry `key`.
    ///
    /// A validator already counted is ignored. Returns the total weight of the entry.
    pub fn add(&self, key: &[u8], index: usize, weight: u64) -> Result<u64, StoreError> {
        let mut guard = self.cache.lock();
        let (cache, total) = &mut *guard;
        let mut entry = match cache.remove(key) {
            Some(entry) => {
                *total -= entry.vote.cost();
                entry
            }
            None => {
                let vote = self.table.get(key)?.map(|blob| VoteWeight::decode(&blob)).transpose()?;
                CachedVote { vote: vote.unwrap_or_default(), mutated: false }
            }
        };
        if !entry.vote.has(index) {
            entry.vote.set(index);
            entry.vote.weight = entry.vote.weight.saturating_add(weight);
            entry.mutated = true;
        }
        let result = entry.vote.weight;
        *total += entry.vote.cost();
        cache.insert(key.to_vec(), entry);

        while *total > self.max_weight && cache.len() > 1 {
            // the entry leaves the cache only once its write succeeded
            let Some((key, oldest)) = cache.iter().next() else {
                break;
            };
            if oldest.mutated {
                self.table.put(key, &oldest.vote.encode())?;
                trace!(target: "gossip::llr", "flushed evicted vote entry");
            }
            if let Some((_, evicted)) = cache.remove_lru() {
                *total -= evicted.vote.cost();
            }
        }
        Ok(result)
    }

    /// Accumulated votes of entry `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<VoteWeight>, StoreError> {
        if let Some(entry) = self.cache.lock().0.peek(key) {
            return Ok(Some(entry.vote.clone()));
        }
        self.table.get(key)?.map(|blob| VoteWeight::decode(&blob)).transpose()
    }

    /// Writes every mutated entry to the table.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut guard = self.cache.lock();
        for (key, entry) in guard.0.iter_mut() {
            if entry.mutated {
                self.table.put(key, &entry.vote.encode())?;
                entry.mutated = false;
            }
        }
        Ok(())
    }
}

/// Light-client vote aggregation: block votes, epoch votes and collection watermarks.
#[derive(Debug)]
pub struct LlrIndex {
    state_table: Table,
    state: Mutex<LlrState>,
    block_votes: VoteIndex,
    epoch_votes: VoteIndex,
}

impl LlrIndex {
    pub(super) fn load(
        state_table: Table,
        block_votes: Table,
        epoch_votes: Table,
        max_weight: usize,
    ) -> Result<Self, StoreError> {
        let state = get_json(&state_table, "Q", STATE_KEY)?.unwrap_or_default();
        Ok(Self {
            state_table,
            state: Mutex::new(state),
            block_votes: VoteIndex::new(block_votes, max_weight),
            epoch_votes: VoteIndex::new(epoch_votes, max_weight),
        })
    }

    pub(super) fn flush(&self) -> Result<(), StoreError> {
        self.block_votes.flush()?;
        self.epoch_votes.flush()
    }
}

fn block_vote_key(block: BlockIdx, epoch: Epoch, hash: &B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(44);
    key.extend_from_slice(&block.to_be_bytes());
    key.extend_from_slice(&epoch.to_be_bytes());
    key.extend_from_slice(hash.as_slice());
    key
}

fn epoch_vote_key(epoch: Epoch, hash: &B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(&epoch.to_be_bytes());
    key.extend_from_slice(hash.as_slice());
    key
}

fn read_hash(table: &Table, key: &[u8]) -> Result<Option<B256>, StoreError> {
    match table.get(key)? {
        Some(blob) if blob.len() == 32 => Ok(Some(B256::from_slice(&blob))),
        Some(_) => Err(StoreError::decode("T", "expected 32 bytes")),
        None => Ok(None),
    }
}

impl Store {
    /// Current collection watermarks.
    pub fn get_llr_state(&self) -> LlrState {
        *self.llr.state.lock()
    }

    /// Raises the watermarks past `block` and, when given, past the sealed `epoch`.
    pub fn advance_llr_watermarks(
        &self,
        block: BlockIdx,
        sealed_epoch: Option<Epoch>,
    ) -> Result<(), StoreError> {
        let mut state = self.llr.state.lock();
        state.lowest_block_to_fill = state.lowest_block_to_fill.max(block + 1);
        if let Some(epoch) = sealed_epoch {
            state.lowest_epoch_to_fill = state.lowest_epoch_to_fill.max(epoch + 1);
        }
        put_json(&self.llr.state_table, STATE_KEY, &*state)
    }

    /// Counts the vote of `vote.validator` for the record of `block`.
    ///
    /// Votes of validators outside `validators` are ignored. Once the votes for a hash reach
    /// the quorum, that hash becomes the block's record. Returns the accumulated weight.
    pub fn add_llr_block_vote(
        &self,
        block: BlockIdx,
        vote: &LlrVote,
        validators: &Validators,
    ) -> Result<u64, StoreError> {
        let Some(index) = validators.index_of(vote.validator) else {
            return Ok(0);
        };
        let key = block_vote_key(block, vote.epoch, &vote.hash);
        let weight = self.llr.block_votes.add(&key, index, validators.weight(vote.validator))?;
        if weight >= validators.quorum() && self.get_llr_block_result(block)?.is_none() {
            self.table.llr_block_results.put(&block.to_be_bytes(), vote.hash.as_slice())?;
            debug!(target: "gossip::llr", block, hash = %vote.hash, "block record decided");
        }
        Ok(weight)
    }

    /// Counts the vote of `vote.validator` for the record of epoch `vote.epoch`.
    pub fn add_llr_epoch_vote(&self, vote: &LlrVote, validators: &Validators) -> Result<u64, StoreError> {
        let Some(index) = validators.index_of(vote.validator) else {
            return Ok(0);
        };
        let key = epoch_vote_key(vote.epoch, &vote.hash);
        let weight = self.llr.epoch_votes.add(&key, index, validators.weight(vote.validator))?;
        if weight >= validators.quorum() && self.get_llr_epoch_result(vote.epoch)?.is_none() {
            self.table.llr_epoch_results.put(&vote.epoch.to_be_bytes(), vote.hash.as_slice())?;
            debug!(target: "gossip::llr", epoch = vote.epoch, hash = %vote.hash, "epoch record decided");
        }
        Ok(weight)
    }

    /// Votes accumulated for `hash` as the record of `block` in `epoch`.
    pub fn get_llr_block_votes(
        &self,
        block: BlockIdx,
        epoch: Epoch,
        hash: &B256,
    ) -> Result<Option<VoteWeight>, StoreError> {
        self.llr.block_votes.get(&block_vote_key(block, epoch, hash))
    }

    /// Votes accumulated for `hash` as the record of `epoch`.
    pub fn get_llr_epoch_votes(&self, epoch: Epoch, hash: &B256) -> Result<Option<VoteWeight>, StoreError> {
        self.llr.epoch_votes.get(&epoch_vote_key(epoch, hash))
    }

    /// Decided record of `block`.
    pub fn get_llr_block_result(&self, block: BlockIdx) -> Result<Option<B256>, StoreError> {
        read_hash(&self.table.llr_block_results, &block.to_be_bytes())
    }

    /// Decided record of `epoch`.
    pub fn get_llr_epoch_result(&self, epoch: Epoch) -> Result<Option<B256>, StoreError> {
        read_hash(&self.table.llr_epoch_results, &epoch.to_be_bytes())
    }

    /// Writes buffered vote entries.
    pub fn flush_llr(&self) -> Result<(), StoreError> {
        self.llr.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use helios_evm::StoreConfig;
    use helios_kvdb::{KeyValueStore, MemoryDb};

    use super::*;
    use crate::GossipConfig;

    #[test]
    fn test_vote_is_idempotent_and_flushed_on_eviction() {
        let table = Table::new(Arc::new(MemoryDb::new()), "S");
        let index = VoteIndex::new(table.clone(), 4);
        assert_eq!(index.add(b"a", 0, 10).unwrap(), 10);
        assert_eq!(index.add(b"a", 0, 10).unwrap(), 10);
        assert_eq!(index.add(b"a", 9, 5).unwrap(), 15);
        assert!(table.get(b"a").unwrap().is_none());

        // entry "a" costs 3, "b" pushes the total over 4 and evicts it
        index.add(b"b", 1, 1).unwrap();
        let stored = VoteWeight::decode(&table.get(b"a").unwrap().unwrap()).unwrap();
        assert_eq!(stored.weight, 15);
        assert!(stored.has(0) && stored.has(9) && !stored.has(1));

        // reloaded from the table, the bitmap still deduplicates
        assert_eq!(index.add(b"a", 9, 5).unwrap(), 15);
        index.flush().unwrap();
        assert!(table.get(b"b").unwrap().is_some());
    }

    #[test]
    fn test_failed_eviction_write_keeps_entry() {
        let db = Arc::new(MemoryDb::new());
        let table = Table::new(db.clone(), "S");
        let index = VoteIndex::new(table, 5);
        assert_eq!(index.add(b"a", 0, 10).unwrap(), 10);
        assert_eq!(index.add(b"a", 9, 5).unwrap(), 15);
        assert_eq!(index.add(b"b", 1, 1).unwrap(), 1);

        // growing "b" evicts "a", whose write fails
        db.close().unwrap();
        assert!(index.add(b"b", 9, 1).is_err());

        let kept = index.get(b"a").unwrap().unwrap();
        assert_eq!(kept.weight, 15);
        assert!(kept.has(0) && kept.has(9));
    }

    #[test]
    fn test_quorum_decides_record() {
        let store = Store::in_memory(GossipConfig::default(), StoreConfig::default()).unwrap();
        let validators = Validators::from_weights([(1, 40), (2, 30), (3, 30)]);
        let hash = B256::with_last_byte(7);
        let vote = |validator| LlrVote { validator, epoch: 2, hash };

        assert_eq!(store.add_llr_block_vote(5, &vote(1), &validators).unwrap(), 40);
        assert_eq!(store.get_llr_block_result(5).unwrap(), None);
        assert_eq!(store.add_llr_block_vote(5, &vote(9), &validators).unwrap(), 0);
        assert_eq!(store.add_llr_block_vote(5, &vote(2), &validators).unwrap(), 70);
        assert_eq!(store.get_llr_block_result(5).unwrap(), Some(hash));

        store.add_llr_epoch_vote(&vote(1), &validators).unwrap();
        store.add_llr_epoch_vote(&vote(3), &validators).unwrap();
        assert_eq!(store.get_llr_epoch_result(2).unwrap(), Some(hash));
        assert_eq!(store.get_llr_epoch_votes(2, &hash).unwrap().unwrap().weight, 70);
    }

    #[test]
    fn test_watermarks_only_rise() {
        let store = Store::in_memory(GossipConfig::default(), StoreConfig::default()).unwrap();
        store.advance_llr_watermarks(10, None).unwrap();
        store.advance_llr_watermarks(4, Some(3)).unwrap();
        assert_eq!(store.get_llr_state(), LlrState { lowest_block_to_fill: 11, lowest_epoch_to_fill: 4 });
    }
}
