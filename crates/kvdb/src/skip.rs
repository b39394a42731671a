use crate::{KvIterator, KvPair};

/// Iterator adapter hiding every entry whose key begins with a skip prefix.
///
/// Used to walk a root database without descending into tables nested under it.
pub struct SkipPrefixIterator {
    inner: KvIterator,
    skip: Vec<u8>,
}

impl std::fmt::Debug for SkipPrefixIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipPrefixIterator").field("skip", &self.skip).finish_non_exhaustive()
    }
}

impl SkipPrefixIterator {
    /// Wraps `inner`, filtering keys that start with `skip`.
    pub fn new(inner: KvIterator, skip: impl Into<Vec<u8>>) -> Self {
        Self { inner, skip: skip.into() }
    }
}

impl Iterator for SkipPrefixIterator {
    type Item = KvPair;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.by_ref().find(|(key, _)| !key.starts_with(&self.skip))
    }
}
