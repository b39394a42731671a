//! Flat account snapshots.
//!
//! A snapshot layer maps the hashed address of every account a commit changed to its new
//! record, and points at the layer of the parent root. Reading an account of a recent root walks
//! the layers down to the first one that knows the account, so it does not touch the node
//! database. A generated base layer holds every account of its root and ends the walk.
//!
//! A walk that reaches an evicted parent gives up, and the caller reads the trie instead.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use alloy_primitives::B256;
use hashlink::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::AccountRecord;

/// Accounts keyed by the hash of their address. `None` marks a deleted account.
pub type AccountDiff = HashMap<B256, Option<AccountRecord>>;

#[derive(Debug)]
struct Layer {
    /// `None` for a base layer, which holds every account of its root.
    parent: Option<B256>,
    accounts: Arc<AccountDiff>,
}

/// Bounded set of flat account layers keyed by state root.
#[derive(Debug)]
pub struct Snapshots {
    layers: Mutex<LruCache<B256, Layer>>,
    capacity: usize,
    paused: AtomicBool,
}

impl Snapshots {
    /// Creates a layer set keeping at most `capacity` roots. A zero capacity disables the set.
    pub fn new(capacity: usize) -> Self {
        Self {
            layers: Mutex::new(LruCache::new(capacity.max(1))),
            capacity: capacity.max(1),
            paused: AtomicBool::new(capacity == 0),
        }
    }

    /// Looks up the account of hashed address `key` in the state of `root`.
    ///
    /// Returns `None` when the layers cannot answer: snapshots are paused, `root` has no layer
    /// or the walk reached an evicted parent.
    pub fn account(&self, root: &B256, key: &B256) -> Option<Option<AccountRecord>> {
        if self.is_paused() {
            return None;
        }
        let mut layers = self.layers.lock();
        let mut root = *root;
        // a root can reappear after its parent was evicted, so the walk is bounded
        for _ in 0..self.capacity {
            let layer = layers.get(&root)?;
            if let Some(account) = layer.accounts.get(key) {
                return Some(*account);
            }
            root = match layer.parent {
                Some(parent) => parent,
                None => return Some(None),
            };
        }
        None
    }

    /// Records the accounts a commit changed on top of `parent`. Ignored while paused, and for a
    /// root that already has a layer.
    pub fn update(&self, root: B256, parent: B256, accounts: AccountDiff) {
        if self.is_paused() || root == parent {
            return;
        }
        let mut layers = self.layers.lock();
        if layers.contains_key(&root) {
            return;
        }
        layers.insert(root, Layer { parent: Some(parent), accounts: Arc::new(accounts) });
    }

    /// Drops every layer and installs `accounts` as the base layer of `root`, then resumes
    /// updates.
    pub fn rebuild(&self, root: B256, accounts: AccountDiff) {
        let mut layers = self.layers.lock();
        layers.clear();
        let count = accounts.len();
        layers.insert(root, Layer { parent: None, accounts: Arc::new(accounts) });
        self.paused.store(false, Ordering::Release);
        debug!(target: "state::snapshot", %root, accounts = count, "rebuilt snapshot");
    }

    /// Stops serving and recording layers.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resumes serving and recording layers.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Returns `true` while paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Number of cached layers.
    pub fn len(&self) -> usize {
        self.layers.lock().len()
    }

    /// Returns `true` if no layer is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
