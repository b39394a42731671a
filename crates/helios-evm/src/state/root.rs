//! Merkle-Patricia roots over ordered item lists.

use alloy_primitives::B256;
use alloy_trie::{HashBuilder, Nibbles, EMPTY_ROOT_HASH};

fn trie_root(mut leaves: Vec<(Nibbles, Vec<u8>)>) -> B256 {
    if leaves.is_empty() {
        return EMPTY_ROOT_HASH;
    }
    leaves.sort_by(|a, b| a.0.cmp(&b.0));
    let mut builder = HashBuilder::default();
    for (key, value) in leaves {
        builder.add_leaf(key, &value);
    }
    builder.root()
}

/// Root of a trie keyed by the RLP encoding of each item's index, as used for the
/// transaction root of a block.
pub fn ordered_trie_root<T: AsRef<[u8]>>(items: &[T]) -> B256 {
    trie_root(
        items
            .iter()
            .enumerate()
            .map(|(i, item)| (Nibbles::unpack(alloy_rlp::encode(i)), item.as_ref().to_vec()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_root() {
        assert_eq!(ordered_trie_root::<Vec<u8>>(&[]), EMPTY_ROOT_HASH);
    }

    #[test]
    fn test_root_depends_on_order() {
        let forward = ordered_trie_root(&[b"first".to_vec(), b"second".to_vec()]);
        let backward = ordered_trie_root(&[b"second".to_vec(), b"first".to_vec()]);
        assert_ne!(forward, backward);
        assert_ne!(forward, EMPTY_ROOT_HASH);
    }
}
