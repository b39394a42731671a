//! Hexary Merkle-Patricia trie over the node database.
//!
//! A [`MerkleTrie`] starts from a committed root and loads nodes from the [`TrieDatabase`] only
//! along the paths it reads or modifies. Subtrees that were never touched stay as hash
//! references, so [`MerkleTrie::commit`] re-encodes and inserts exactly the nodes on changed
//! paths. Every inserted node lists the hashed nodes it points at, which is what the reference
//! counting of the node database walks when a root is collected.

use std::mem;

use alloy_primitives::{keccak256, Bytes, B256};
use alloy_rlp::{Decodable, EMPTY_STRING_CODE};
use alloy_trie::{
    nodes::{BranchNode, ExtensionNode, LeafNode, RlpNode, TrieNode},
    Nibbles, TrieMask, EMPTY_ROOT_HASH,
};

use crate::{StateError, TrieDatabase};

/// Extra node referenced by a leaf value, such as the storage root of an account.
pub type LeafRef<'a> = &'a dyn Fn(&[u8]) -> Option<B256>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Empty,
    /// A stored node that has not been loaded.
    Hash(B256),
    Leaf { key: Nibbles, value: Vec<u8> },
    Extension { key: Nibbles, child: Box<Node> },
    Branch { children: Box<[Node; 16]> },
}

fn empty_children() -> Box<[Node; 16]> {
    Box::new(std::array::from_fn(|_| Node::Empty))
}

fn corrupted(hash: B256, reason: impl ToString) -> StateError {
    StateError::CorruptedNode { hash, reason: reason.to_string() }
}

/// Decodes a node blob. `hash` names the stored node the blob belongs to.
fn decode(hash: B256, blob: &[u8]) -> Result<Node, StateError> {
    let node = TrieNode::decode(&mut &blob[..]).map_err(|err| corrupted(hash, err))?;
    Ok(match node {
        TrieNode::EmptyRoot => Node::Empty,
        TrieNode::Leaf(leaf) => Node::Leaf { key: leaf.key, value: leaf.value },
        TrieNode::Extension(ext) => {
            Node::Extension { key: ext.key, child: Box::new(child_node(hash, &ext.child)?) }
        }
        TrieNode::Branch(branch) => {
            let mut children = empty_children();
            let mut stack = branch.stack.iter();
            for nibble in 0..16u8 {
                if !branch.state_mask.is_bit_set(nibble) {
                    continue;
                }
                let child = stack.next().ok_or_else(|| corrupted(hash, "short branch stack"))?;
                children[nibble as usize] = child_node(hash, child)?;
            }
            Node::Branch { children }
        }
    })
}

/// A child reference is either the hash of a stored node or a node embedded in its parent.
fn child_node(parent: B256, child: &RlpNode) -> Result<Node, StateError> {
    match child.as_hash() {
        Some(hash) => Ok(Node::Hash(hash)),
        None => decode(parent, child.as_slice()),
    }
}

/// Places `node` below `prefix`, or returns it as is for an empty prefix.
fn extend(prefix: Nibbles, node: Node) -> Node {
    if prefix.is_empty() {
        node
    } else {
        Node::Extension { key: prefix, child: Box::new(node) }
    }
}

/// Encodes nodes bottom-up, collecting the hashed ones for insertion.
struct Hasher<'a> {
    writes: Option<Vec<(B256, Bytes, Vec<B256>)>>,
    leaf_ref: LeafRef<'a>,
    buf: Vec<u8>,
}

impl<'a> Hasher<'a> {
    fn new(persist: bool, leaf_ref: LeafRef<'a>) -> Self {
        Self { writes: persist.then(Vec::new), leaf_ref, buf: Vec::new() }
    }

    /// Encodes `node` into `buf` and returns its reference with the hashed nodes it points at.
    fn encode(&mut self, node: &Node) -> (RlpNode, Vec<B256>) {
        let (node, children) = match node {
            Node::Empty => return (RlpNode::from_rlp(&[EMPTY_STRING_CODE]), Vec::new()),
            Node::Hash(hash) => return (RlpNode::word_rlp(hash), Vec::new()),
            Node::Leaf { key, value } => {
                let children = (self.leaf_ref)(value).into_iter().collect();
                (TrieNode::Leaf(LeafNode::new(*key, value.clone())), children)
            }
            Node::Extension { key, child } => {
                let (child, children) = self.child_ref(child);
                (TrieNode::Extension(ExtensionNode::new(*key, child)), children)
            }
            Node::Branch { children: slots } => {
                let mut stack = Vec::new();
                let mut mask = TrieMask::default();
                let mut children = Vec::new();
                for (nibble, slot) in slots.iter().enumerate() {
                    if matches!(slot, Node::Empty) {
                        continue;
                    }
                    let (child, refs) = self.child_ref(slot);
                    children.extend(refs);
                    stack.push(child);
                    mask.set_bit(nibble as u8);
                }
                (TrieNode::Branch(BranchNode::new(stack, mask)), children)
            }
        };
        self.buf.clear();
        (node.rlp(&mut self.buf), children)
    }

    /// Reference of a child in its parent, with the hashed nodes the parent then points at. An
    /// embedded child hands its own references up to the parent.
    fn child_ref(&mut self, node: &Node) -> (RlpNode, Vec<B256>) {
        let (rlp, children) = self.encode(node);
        match rlp.as_hash() {
            Some(hash) => {
                if !matches!(node, Node::Hash(_)) {
                    self.write(hash, children);
                }
                (rlp, vec![hash])
            }
            None => (rlp, children),
        }
    }

    fn write(&mut self, hash: B256, children: Vec<B256>) {
        if let Some(writes) = &mut self.writes {
            writes.push((hash, Bytes::copy_from_slice(&self.buf), children));
        }
    }

    /// The root is stored under its hash even when its encoding is shorter than a hash.
    fn root(&mut self, node: &Node) -> B256 {
        match node {
            Node::Empty => EMPTY_ROOT_HASH,
            Node::Hash(hash) => *hash,
            node => {
                let (_, children) = self.encode(node);
                let hash = keccak256(&self.buf);
                self.write(hash, children);
                hash
            }
        }
    }
}

/// A Merkle-Patricia trie with 32-byte keys, opened on a committed root.
#[derive(Debug)]
pub struct MerkleTrie<'a> {
    db: &'a TrieDatabase,
    root: Node,
}

impl<'a> MerkleTrie<'a> {
    /// Opens the trie of `root`. Nodes are loaded on first access.
    pub fn new(db: &'a TrieDatabase, root: B256) -> Self {
        let root = if root == EMPTY_ROOT_HASH { Node::Empty } else { Node::Hash(root) };
        Self { db, root }
    }

    fn resolve(&self, hash: B256) -> Result<Node, StateError> {
        let blob = self.db.node(&hash)?.ok_or(StateError::MissingTrieNode(hash))?;
        decode(hash, &blob)
    }

    /// Value stored under `key`.
    pub fn get(&self, key: B256) -> Result<Option<Vec<u8>>, StateError> {
        self.lookup(&self.root, Nibbles::unpack(key))
    }

    fn lookup(&self, node: &Node, path: Nibbles) -> Result<Option<Vec<u8>>, StateError> {
        match node {
            Node::Empty => Ok(None),
            Node::Hash(hash) => self.lookup(&self.resolve(*hash)?, path),
            Node::Leaf { key, value } => Ok((*key == path).then(|| value.clone())),
            Node::Extension { key, child } => {
                if !path.starts_with(key) {
                    return Ok(None);
                }
                self.lookup(child, path.slice(key.len()..))
            }
            Node::Branch { children } => match path.first() {
                Some(nibble) => self.lookup(&children[nibble as usize], path.slice(1..)),
                None => Ok(None),
            },
        }
    }

    /// Stores `value` under `key`. An empty value removes the key.
    pub fn insert(&mut self, key: B256, value: Vec<u8>) -> Result<(), StateError> {
        if value.is_empty() {
            return self.remove(key);
        }
        let root = mem::replace(&mut self.root, Node::Empty);
        self.root = self.insert_at(root, Nibbles::unpack(key), value)?.0;
        Ok(())
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: B256) -> Result<(), StateError> {
        let root = mem::replace(&mut self.root, Node::Empty);
        self.root = self.remove_at(root, Nibbles::unpack(key))?.0;
        Ok(())
    }

    /// Returns the new node and whether anything changed below it. Unchanged stored nodes are
    /// handed back as hash references.
    fn insert_at(
        &self,
        node: Node,
        path: Nibbles,
        value: Vec<u8>,
    ) -> Result<(Node, bool), StateError> {
        match node {
            Node::Empty => Ok((Node::Leaf { key: path, value }, true)),
            Node::Hash(hash) => {
                let (node, changed) = self.insert_at(self.resolve(hash)?, path, value)?;
                Ok(if changed { (node, true) } else { (Node::Hash(hash), false) })
            }
            Node::Leaf { key, value: old } => {
                if key == path {
                    let changed = old != value;
                    return Ok((Node::Leaf { key, value }, changed));
                }
                let shared = key.common_prefix_length(&path);
                let mut children = empty_children();
                children[key.get_unchecked(shared) as usize] =
                    Node::Leaf { key: key.slice(shared + 1..), value: old };
                children[path.get_unchecked(shared) as usize] =
                    Node::Leaf { key: path.slice(shared + 1..), value };
                Ok((extend(path.slice(..shared), Node::Branch { children }), true))
            }
            Node::Extension { key, child } => {
                let shared = key.common_prefix_length(&path);
                if shared == key.len() {
                    let (child, changed) = self.insert_at(*child, path.slice(shared..), value)?;
                    return Ok((Node::Extension { key, child: Box::new(child) }, changed));
                }
                let mut children = empty_children();
                children[key.get_unchecked(shared) as usize] =
                    extend(key.slice(shared + 1..), *child);
                children[path.get_unchecked(shared) as usize] =
                    Node::Leaf { key: path.slice(shared + 1..), value };
                Ok((extend(key.slice(..shared), Node::Branch { children }), true))
            }
            Node::Branch { mut children } => {
                let nibble = path.get_unchecked(0) as usize;
                let child = mem::replace(&mut children[nibble], Node::Empty);
                let (child, changed) = self.insert_at(child, path.slice(1..), value)?;
                children[nibble] = child;
                Ok((Node::Branch { children }, changed))
            }
        }
    }

    fn remove_at(&self, node: Node, path: Nibbles) -> Result<(Node, bool), StateError> {
        match node {
            Node::Empty => Ok((Node::Empty, false)),
            Node::Hash(hash) => {
                let (node, changed) = self.remove_at(self.resolve(hash)?, path)?;
                Ok(if changed { (node, true) } else { (Node::Hash(hash), false) })
            }
            Node::Leaf { key, value } => {
                if key == path {
                    Ok((Node::Empty, true))
                } else {
                    Ok((Node::Leaf { key, value }, false))
                }
            }
            Node::Extension { key, child } => {
                if !path.starts_with(&key) {
                    return Ok((Node::Extension { key, child }, false));
                }
                let (child, changed) = self.remove_at(*child, path.slice(key.len()..))?;
                if !changed {
                    return Ok((Node::Extension { key, child: Box::new(child) }, false));
                }
                Ok((self.prefixed(key, child)?, true))
            }
            Node::Branch { mut children } => {
                let nibble = path.get_unchecked(0) as usize;
                let child = mem::replace(&mut children[nibble], Node::Empty);
                let (child, changed) = self.remove_at(child, path.slice(1..))?;
                children[nibble] = child;
                if !changed {
                    return Ok((Node::Branch { children }, false));
                }
                let live: Vec<usize> = (0..16).filter(|i| children[*i] != Node::Empty).collect();
                match live.as_slice() {
                    [] => Ok((Node::Empty, true)),
                    [only] => {
                        let child = mem::replace(&mut children[*only], Node::Empty);
                        let prefix = Nibbles::from_nibbles([*only as u8]);
                        Ok((self.prefixed(prefix, child)?, true))
                    }
                    _ => Ok((Node::Branch { children }, true)),
                }
            }
        }
    }

    /// Puts `prefix` in front of `node`, merging it into a leaf or extension key. A stored
    /// branch stays a hash reference.
    fn prefixed(&self, prefix: Nibbles, node: Node) -> Result<Node, StateError> {
        let (node, stored) = match node {
            Node::Hash(hash) => (self.resolve(hash)?, Some(hash)),
            node => (node, None),
        };
        Ok(match node {
            Node::Empty => Node::Empty,
            Node::Leaf { key, value } => Node::Leaf { key: prefix.join(&key), value },
            Node::Extension { key, child } => Node::Extension { key: prefix.join(&key), child },
            branch => extend(prefix, stored.map_or(branch, Node::Hash)),
        })
    }

    /// Root hash of the current content. Nothing is written.
    pub fn hash(&self) -> B256 {
        Hasher::new(false, &|_| None).root(&self.root)
    }

    /// Inserts the nodes of every changed path into the node database and returns the root.
    ///
    /// `leaf_ref` names an extra node a leaf value points at, which the leaf then keeps
    /// referenced. The trie continues on top of the new root.
    pub fn commit(&mut self, leaf_ref: LeafRef<'_>) -> B256 {
        let mut hasher = Hasher::new(true, leaf_ref);
        let root = hasher.root(&self.root);
        // children come before their parents, so each insert sees its dirty children
        for (hash, blob, children) in hasher.writes.unwrap_or_default() {
            self.db.insert(hash, blob, children);
        }
        self.root = if root == EMPTY_ROOT_HASH { Node::Empty } else { Node::Hash(root) };
        root
    }

    /// Every key with its value, in key order.
    pub fn entries(&self) -> Result<Vec<(B256, Vec<u8>)>, StateError> {
        let mut entries = Vec::new();
        self.walk(&self.root, Nibbles::new(), &mut entries)?;
        Ok(entries)
    }

    fn walk(
        &self,
        node: &Node,
        prefix: Nibbles,
        entries: &mut Vec<(B256, Vec<u8>)>,
    ) -> Result<(), StateError> {
        match node {
            Node::Empty => {}
            Node::Hash(hash) => self.walk(&self.resolve(*hash)?, prefix, entries)?,
            Node::Leaf { key, value } => {
                let path = prefix.join(key).pack();
                let key = B256::try_from(&path[..])
                    .map_err(|_| corrupted(B256::ZERO, "leaf path is not 32 bytes"))?;
                entries.push((key, value.clone()));
            }
            Node::Extension { key, child } => self.walk(child, prefix.join(key), entries)?,
            Node::Branch { children } => {
                for (nibble, child) in children.iter().enumerate() {
                    let mut path = prefix;
                    path.push(nibble as u8);
                    self.walk(child, path, entries)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use alloy_primitives::U256;
    use helios_kvdb::{MemoryDb, Table};
    use proptest::prelude::*;

    use super::*;

    fn expected_root(storage: &BTreeMap<B256, U256>) -> B256 {
        let mut leaves: Vec<_> = storage
            .iter()
            .filter(|(_, value)| !value.is_zero())
            .map(|(slot, value)| (Nibbles::unpack(keccak256(slot)), alloy_rlp::encode(value)))
            .collect();
        leaves.sort_by(|a, b| a.0.cmp(&b.0));
        let mut builder = alloy_trie::HashBuilder::default();
        for (key, value) in leaves {
            builder.add_leaf(key, &value);
        }
        builder.root()
    }

    fn db() -> TrieDatabase {
        TrieDatabase::new(Table::new(Arc::new(MemoryDb::new()), "n"))
    }

    fn slot(n: u64) -> B256 {
        B256::from(U256::from(n))
    }

    fn set(trie: &mut MerkleTrie<'_>, slot: B256, value: U256) {
        if value.is_zero() {
            trie.remove(keccak256(slot)).unwrap();
        } else {
            trie.insert(keccak256(slot), alloy_rlp::encode(value)).unwrap();
        }
    }

    #[test]
    fn test_get_after_commit_and_reopen() {
        let db = db();
        let mut trie = MerkleTrie::new(&db, EMPTY_ROOT_HASH);
        for n in 0..50 {
            set(&mut trie, slot(n), U256::from(n + 1));
        }
        let root = trie.commit(&|_| None);

        let reopened = MerkleTrie::new(&db, root);
        assert_eq!(
            reopened.get(keccak256(slot(7))).unwrap(),
            Some(alloy_rlp::encode(U256::from(8)))
        );
        assert_eq!(reopened.get(keccak256(slot(99))).unwrap(), None);
        assert_eq!(reopened.entries().unwrap().len(), 50);
    }

    #[test]
    fn test_update_inserts_only_the_changed_path() {
        let db = db();
        let mut trie = MerkleTrie::new(&db, EMPTY_ROOT_HASH);
        for n in 0..200 {
            set(&mut trie, slot(n), U256::from(n + 1));
        }
        let first = trie.commit(&|_| None);
        db.reference(&first);
        let before = db.stats().nodes;

        let mut trie = MerkleTrie::new(&db, first);
        set(&mut trie, slot(3), U256::from(1_000));
        let second = trie.commit(&|_| None);
        db.reference(&second);
        let added = db.stats().nodes - before;
        assert!((1..=5).contains(&added), "added {added} nodes");

        db.dereference(&first);
        assert_eq!(db.stats().nodes, before);
        assert!(!db.contains(&first));
        assert_eq!(MerkleTrie::new(&db, second).entries().unwrap().len(), 200);
    }

    #[test]
    fn test_unchanged_write_keeps_root() {
        let db = db();
        let mut trie = MerkleTrie::new(&db, EMPTY_ROOT_HASH);
        set(&mut trie, slot(1), U256::from(1));
        set(&mut trie, slot(2), U256::from(2));
        let root = trie.commit(&|_| None);
        let nodes = db.stats().nodes;

        let mut trie = MerkleTrie::new(&db, root);
        set(&mut trie, slot(1), U256::from(1));
        trie.remove(keccak256(slot(9))).unwrap();
        assert_eq!(trie.commit(&|_| None), root);
        assert_eq!(db.stats().nodes, nodes);
    }

    #[test]
    fn test_leaf_refs_keep_children_alive() {
        let db = db();
        db.insert(B256::with_last_byte(0xaa), Bytes::from_static(b"child"), Vec::new());
        let mut trie = MerkleTrie::new(&db, EMPTY_ROOT_HASH);
        trie.insert(B256::with_last_byte(1), vec![0x11; 40]).unwrap();
        let root = trie.commit(&|_| Some(B256::with_last_byte(0xaa)));
        assert_eq!(db.parents(&B256::with_last_byte(0xaa)), Some(1));

        db.reference(&root);
        db.dereference(&root);
        assert!(!db.contains(&B256::with_last_byte(0xaa)));
    }

    #[test]
    fn test_embedded_leaves_pass_refs_to_parent() {
        let db = db();
        let child = B256::with_last_byte(0xaa);
        db.insert(child, Bytes::from_static(b"child"), Vec::new());
        let mut trie = MerkleTrie::new(&db, EMPTY_ROOT_HASH);
        // keys differing in the last nibble end in leaves small enough to embed
        trie.insert(B256::with_last_byte(1), vec![1]).unwrap();
        trie.insert(B256::with_last_byte(2), vec![2]).unwrap();
        let root = trie.commit(&|_| Some(child));
        assert_eq!(db.stats().nodes, 2);
        assert_eq!(db.parents(&child), Some(2));

        db.reference(&root);
        db.dereference(&root);
        assert!(!db.contains(&child));
    }

    #[test]
    fn test_missing_node() {
        let db = db();
        let root = B256::with_last_byte(5);
        let trie = MerkleTrie::new(&db, root);
        assert_eq!(trie.get(B256::ZERO).unwrap_err(), StateError::MissingTrieNode(root));
    }

    proptest! {
        #[test]
        fn proptest_root_matches_hash_builder(
            writes in proptest::collection::vec((0u64..64, 0u64..4), 1..64),
        ) {
            let db = db();
            let mut trie = MerkleTrie::new(&db, EMPTY_ROOT_HASH);
            let mut expected = BTreeMap::new();
            for (i, (key, value)) in writes.iter().enumerate() {
                set(&mut trie, slot(*key), U256::from(*value));
                expected.insert(slot(*key), U256::from(*value));
                // commit midway so later writes run against stored nodes
                if i == writes.len() / 2 {
                    trie.commit(&|_| None);
                }
            }
            prop_assert_eq!(trie.hash(), expected_root(&expected));
            prop_assert_eq!(trie.commit(&|_| None), expected_root(&expected));
        }
    }
}
