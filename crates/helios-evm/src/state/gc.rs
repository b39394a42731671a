use std::{cmp::Reverse, collections::BinaryHeap};

use alloy_primitives::B256;

/// Queue of committed roots ordered by block, lowest first.
#[derive(Debug, Default)]
pub struct TrieGc {
    queue: BinaryHeap<(Reverse<u64>, B256)>,
}

impl TrieGc {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `root` was referenced for `block`.
    pub fn push(&mut self, block: u64, root: B256) {
        self.queue.push((Reverse(block), root));
    }

    /// Pops every root of a block at most `current - keep` and hands it to `dereference`.
    ///
    /// Nothing is collected while `current <= keep`.
    pub fn collect(&mut self, current: u64, keep: u64, mut dereference: impl FnMut(B256)) -> usize {
        let Some(limit) = current.checked_sub(keep).filter(|limit| *limit > 0) else { return 0 };
        let mut collected = 0;
        while let Some((Reverse(block), root)) = self.queue.peek().copied() {
            if block > limit {
                break;
            }
            self.queue.pop();
            dereference(root);
            collected += 1;
        }
        collected
    }

    /// Number of queued roots.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
