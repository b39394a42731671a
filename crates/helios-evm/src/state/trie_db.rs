//! Reference-counted trie node database.
//!
//! Freshly committed nodes live in memory as *dirty* nodes. A dirty node counts its parents: the
//! dirty nodes pointing at it plus any external reference taken with
//! [`TrieDatabase::reference`]. Dereferencing a node whose count drops to zero deletes it and
//! recursively dereferences its children, which is how the garbage collector discards state
//! roots that fell out of the in-memory window.
//!
//! Dirty nodes reach disk in two ways: [`TrieDatabase::cap`] flushes the oldest nodes until the
//! dirty set fits in a size budget, and [`TrieDatabase::commit`] flushes one root with all of
//! its descendants.

use std::collections::{BTreeMap, HashMap, HashSet};

use alloy_primitives::{Bytes, B256};
use alloy_trie::EMPTY_ROOT_HASH;
use helios_kvdb::{Batch, Batcher, KeyValueReader, Table};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::StateError;

#[derive(Debug)]
struct CachedNode {
    blob: Bytes,
    children: Vec<B256>,
    parents: u32,
    flush_seq: u64,
}

impl CachedNode {
    fn size(&self) -> usize {
        self.blob.len() + 32
    }
}

#[derive(Debug, Default)]
struct Dirties {
    nodes: HashMap<B256, CachedNode>,
    flush_list: BTreeMap<u64, B256>,
    next_seq: u64,
    size: usize,
}

impl Dirties {
    fn remove(&mut self, hash: &B256) -> Option<CachedNode> {
        let node = self.nodes.remove(hash)?;
        self.flush_list.remove(&node.flush_seq);
        self.size -= node.size();
        Some(node)
    }
}

/// Statistics of the dirty node set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrieDbStats {
    /// Number of dirty nodes.
    pub nodes: usize,
    /// Size of the dirty nodes in bytes.
    pub size: usize,
}

/// Node database shared by every state opened on one trie domain.
#[derive(Debug)]
pub struct TrieDatabase {
    disk: Table,
    dirties: RwLock<Dirties>,
}

impl TrieDatabase {
    /// Creates a node database persisting into `disk`.
    pub fn new(disk: Table) -> Self {
        Self { disk, dirties: RwLock::new(Dirties::default()) }
    }

    /// Inserts a node. Inserting a known dirty node is a no-op.
    pub fn insert(&self, hash: B256, blob: Bytes, children: Vec<B256>) {
        let mut dirties = self.dirties.write();
        if dirties.nodes.contains_key(&hash) {
            return;
        }
        for child in &children {
            if let Some(node) = dirties.nodes.get_mut(child) {
                node.parents += 1;
            }
        }
        let flush_seq = dirties.next_seq;
        dirties.next_seq += 1;
        let node = CachedNode { blob, children, parents: 0, flush_seq };
        dirties.size += node.size();
        dirties.flush_list.insert(flush_seq, hash);
        dirties.nodes.insert(hash, node);
    }

    /// Returns the node blob, looking at dirty nodes first.
    pub fn node(&self, hash: &B256) -> Result<Option<Bytes>, StateError> {
        if let Some(node) = self.dirties.read().nodes.get(hash) {
            return Ok(Some(node.blob.clone()));
        }
        Ok(self.disk.get(hash.as_slice())?.map(Bytes::from))
    }

    /// Returns `true` if the node is available in memory or on disk.
    pub fn contains(&self, hash: &B256) -> bool {
        if *hash == EMPTY_ROOT_HASH || self.dirties.read().nodes.contains_key(hash) {
            return true;
        }
        self.disk.has(hash.as_slice()).unwrap_or(false)
    }

    /// Takes an external reference on a dirty node.
    pub fn reference(&self, hash: &B256) {
        if let Some(node) = self.dirties.write().nodes.get_mut(hash) {
            node.parents += 1;
        }
    }

    /// Drops an external reference, deleting the node and its unreferenced descendants once
    /// nothing points at it.
    pub fn dereference(&self, root: &B256) {
        let mut dirties = self.dirties.write();
        let before = (dirties.nodes.len(), dirties.size);
        let mut pending = vec![*root];
        while let Some(hash) = pending.pop() {
            let Some(node) = dirties.nodes.get_mut(&hash) else { continue };
            node.parents = node.parents.saturating_sub(1);
            if node.parents > 0 {
                continue;
            }
            if let Some(node) = dirties.remove(&hash) {
                pending.extend(node.children);
            }
        }
        trace!(
            target: "state::trie",
            %root,
            nodes = before.0 - dirties.nodes.len(),
            size = before.1 - dirties.size,
            "dereferenced state root"
        );
    }

    /// Flushes the oldest dirty nodes to disk until the dirty size is at most `limit`.
    pub fn cap(&self, limit: usize) -> Result<(), StateError> {
        let mut dirties = self.dirties.write();
        if dirties.size <= limit {
            return Ok(());
        }
        let mut batch = self.disk.new_batch();
        let mut flushed = Vec::new();
        let mut size = dirties.size;
        for hash in dirties.flush_list.values() {
            if size <= limit {
                break;
            }
            let node = &dirties.nodes[hash];
            batch.put(hash.as_slice(), &node.blob)?;
            size -= node.size();
            flushed.push(*hash);
        }
        batch.write()?;
        for hash in &flushed {
            dirties.remove(hash);
        }
        debug!(target: "state::trie", flushed = flushed.len(), size = dirties.size, "capped dirty trie nodes");
        Ok(())
    }

    /// Writes `root` and every dirty descendant to disk.
    pub fn commit(&self, root: &B256) -> Result<(), StateError> {
        let mut dirties = self.dirties.write();
        let mut batch = self.disk.new_batch();
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![*root];
        while let Some(hash) = stack.pop() {
            let Some(node) = dirties.nodes.get(&hash) else { continue };
            if !seen.insert(hash) {
                continue;
            }
            order.push(hash);
            stack.extend(node.children.iter().copied());
        }
        // children first, so an interrupted flush never leaves a dangling parent
        for hash in order.iter().rev() {
            batch.put(hash.as_slice(), &dirties.nodes[hash].blob)?;
        }
        batch.write()?;
        for hash in &order {
            dirties.remove(hash);
        }
        debug!(target: "state::trie", %root, nodes = order.len(), "committed state root");
        Ok(())
    }

    /// Current dirty-set statistics.
    pub fn stats(&self) -> TrieDbStats {
        let dirties = self.dirties.read();
        TrieDbStats { nodes: dirties.nodes.len(), size: dirties.size }
    }

    /// Reference count of a dirty node, `None` if the node is not dirty.
    pub fn parents(&self, hash: &B256) -> Option<u32> {
        self.dirties.read().nodes.get(hash).map(|node| node.parents)
    }
}
