//! Incremental Merkle Patricia updates over persisted nodes
//!
//! Nodes are content-addressed. A node whose RLP is 32 bytes or longer is
//! stored under its keccak hash; shorter nodes are embedded in their parent.
//! An update starts from a stored root, rewrites only the paths of the
//! changed keys and collects the new nodes for the caller to persist.

use super::account_leaf;
use crate::{error::StoreError, persistence::ChainStore, types::AccountRecord};
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_rlp::Decodable;
use alloy_trie::{
    nodes::{BranchNode, ExtensionNode, LeafNode, RlpNode, TrieNode},
    Nibbles, TrieMask, EMPTY_ROOT_HASH,
};
use std::collections::BTreeMap;

type Children = [Option<RlpNode>; 16];

/// Applies key changes to tries whose nodes live in a [`ChainStore`]
pub struct TrieUpdater<'a> {
    store: &'a ChainStore,
    nodes: BTreeMap<B256, Vec<u8>>,
}

impl<'a> TrieUpdater<'a> {
    pub fn new(store: &'a ChainStore) -> Self {
        Self {
            store,
            nodes: BTreeMap::new(),
        }
    }

    /// Storage root after writing `slots`; zero values delete the slot
    pub fn update_storage<'s>(
        &mut self,
        root: B256,
        slots: impl IntoIterator<Item = (&'s B256, &'s U256)>,
    ) -> Result<B256, StoreError> {
        let changes = slots.into_iter().map(|(slot, value)| {
            let leaf = (!value.is_zero()).then(|| alloy_rlp::encode(*value));
            (keccak256(slot), leaf)
        });
        self.update(root, changes)
    }

    /// State root after writing `accounts`; `None` deletes the account
    pub fn update_accounts<'s>(
        &mut self,
        root: B256,
        accounts: impl IntoIterator<Item = (&'s Address, Option<&'s AccountRecord>)>,
    ) -> Result<B256, StoreError> {
        let changes = accounts
            .into_iter()
            .map(|(address, account)| (keccak256(address), account.map(account_leaf)));
        self.update(root, changes)
    }

    /// Apply `(hashed key, leaf value)` changes to the trie at `root`
    pub fn update(
        &mut self,
        root: B256,
        changes: impl IntoIterator<Item = (B256, Option<Vec<u8>>)>,
    ) -> Result<B256, StoreError> {
        let mut ptr = root_pointer(root);
        for (key, value) in changes {
            let path = Nibbles::unpack(key);
            ptr = self.update_at(ptr.as_ref(), &path, 0, value.as_deref())?;
        }

        let root = root_of_pointer(ptr.as_ref());
        // A short root is embedded nowhere, so it is kept under its hash too
        if let Some(inline) = ptr.filter(|ptr| ptr.as_hash().is_none()) {
            self.nodes.entry(root).or_insert_with(|| inline.to_vec());
        }
        Ok(root)
    }

    /// Number of nodes created so far
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes created by the updates, keyed by hash
    pub fn into_nodes(self) -> BTreeMap<B256, Vec<u8>> {
        self.nodes
    }

    fn resolve(&self, ptr: &RlpNode) -> Result<TrieNode, StoreError> {
        let Some(hash) = ptr.as_hash() else {
            return decode_node(ptr);
        };
        if let Some(raw) = self.nodes.get(&hash) {
            return decode_node(raw);
        }
        match self.store.trie_node(&hash)? {
            Some(raw) => decode_node(&raw),
            None => Err(StoreError::MissingTrieNode(hash)),
        }
    }

    fn emit(&mut self, node: TrieNode) -> RlpNode {
        let mut raw = Vec::with_capacity(96);
        let ptr = node.rlp(&mut raw);
        if let Some(hash) = ptr.as_hash() {
            self.nodes.entry(hash).or_insert(raw);
        }
        ptr
    }

    fn leaf(&mut self, key: Nibbles, value: &[u8]) -> RlpNode {
        self.emit(TrieNode::Leaf(LeafNode::new(key, value.to_vec())))
    }

    fn update_at(
        &mut self,
        ptr: Option<&RlpNode>,
        key: &Nibbles,
        depth: usize,
        value: Option<&[u8]>,
    ) -> Result<Option<RlpNode>, StoreError> {
        let rest = key.slice(depth..);
        let Some(ptr) = ptr else {
            return Ok(value.map(|v| self.leaf(rest, v)));
        };

        match self.resolve(ptr)? {
            TrieNode::EmptyRoot => Ok(value.map(|v| self.leaf(rest, v))),
            TrieNode::Leaf(leaf) => self.update_leaf(ptr, leaf, &rest, value),
            TrieNode::Extension(ext) => self.update_extension(ptr, ext, key, depth, value),
            TrieNode::Branch(branch) => self.update_branch(ptr, branch, key, depth, value),
        }
    }

    fn update_leaf(
        &mut self,
        ptr: &RlpNode,
        leaf: LeafNode,
        rest: &Nibbles,
        value: Option<&[u8]>,
    ) -> Result<Option<RlpNode>, StoreError> {
        let common = leaf.key.common_prefix_length(rest);
        if common == leaf.key.len() && common == rest.len() {
            return Ok(match value {
                None => None,
                Some(v) if leaf.value.as_slice() == v => Some(ptr.clone()),
                Some(v) => Some(self.leaf(leaf.key, v)),
            });
        }
        // Deleting a key that is not there
        let Some(value) = value else {
            return Ok(Some(ptr.clone()));
        };

        let old_suffix = leaf.key.slice(common..);
        let new_suffix = rest.slice(common..);
        let mut children = Children::default();
        children[first_nibble(&old_suffix)?] = Some(self.leaf(old_suffix.slice(1..), &leaf.value));
        children[first_nibble(&new_suffix)?] = Some(self.leaf(new_suffix.slice(1..), value));

        let branch = self.branch(children);
        self.with_prefix(rest.slice(..common), branch).map(Some)
    }

    fn update_extension(
        &mut self,
        ptr: &RlpNode,
        ext: ExtensionNode,
        key: &Nibbles,
        depth: usize,
        value: Option<&[u8]>,
    ) -> Result<Option<RlpNode>, StoreError> {
        let rest = key.slice(depth..);
        let common = ext.key.common_prefix_length(&rest);

        if common == ext.key.len() {
            let child = self.update_at(Some(&ext.child), key, depth + common, value)?;
            return match child {
                None => Ok(None),
                Some(child) if child == ext.child => Ok(Some(ptr.clone())),
                Some(child) => self.with_prefix(ext.key, child).map(Some),
            };
        }
        let Some(value) = value else {
            return Ok(Some(ptr.clone()));
        };

        let old_suffix = ext.key.slice(common..);
        let old_index = first_nibble(&old_suffix)?;
        let old_tail = old_suffix.slice(1..);
        let new_suffix = rest.slice(common..);
        let new_index = first_nibble(&new_suffix)?;

        let mut children = Children::default();
        children[old_index] = Some(if old_tail.is_empty() {
            ext.child
        } else {
            self.emit(TrieNode::Extension(ExtensionNode::new(old_tail, ext.child)))
        });
        children[new_index] = Some(self.leaf(new_suffix.slice(1..), value));

        let branch = self.branch(children);
        self.with_prefix(rest.slice(..common), branch).map(Some)
    }

    fn update_branch(
        &mut self,
        ptr: &RlpNode,
        branch: BranchNode,
        key: &Nibbles,
        depth: usize,
        value: Option<&[u8]>,
    ) -> Result<Option<RlpNode>, StoreError> {
        let Some(&nibble) = key.get(depth) else {
            return Err(StoreError::InvalidTrieNode(format!("branch below full key at depth {}", depth)));
        };
        let index = nibble as usize;

        let mut children = branch_children(&branch);
        let child = self.update_at(children[index].as_ref(), key, depth + 1, value)?;
        if child == children[index] {
            return Ok(Some(ptr.clone()));
        }
        children[index] = child;
        self.collapse(children)
    }

    fn branch(&mut self, children: Children) -> RlpNode {
        let mut mask = TrieMask::default();
        let mut stack = Vec::new();
        for (index, child) in children.into_iter().enumerate() {
            if let Some(child) = child {
                mask.set_bit(index as u8);
                stack.push(child);
            }
        }
        self.emit(TrieNode::Branch(BranchNode::new(stack, mask)))
    }

    /// Rebuild a branch after one child changed; fewer than two children
    /// fold into the remaining child
    fn collapse(&mut self, mut children: Children) -> Result<Option<RlpNode>, StoreError> {
        let present: Vec<usize> = (0..16).filter(|&index| children[index].is_some()).collect();
        match present.as_slice() {
            [] => Ok(None),
            &[only] => match children[only].take() {
                Some(child) => {
                    let prefix = Nibbles::from_nibbles_unchecked([only as u8]);
                    self.with_prefix(prefix, child).map(Some)
                }
                None => Ok(None),
            },
            _ => Ok(Some(self.branch(children))),
        }
    }

    /// `child` reached through `prefix`; leaves and extensions absorb it
    fn with_prefix(&mut self, prefix: Nibbles, child: RlpNode) -> Result<RlpNode, StoreError> {
        if prefix.is_empty() {
            return Ok(child);
        }
        let node = match self.resolve(&child)? {
            TrieNode::Leaf(leaf) => TrieNode::Leaf(LeafNode::new(prefix.join(&leaf.key), leaf.value)),
            TrieNode::Extension(ext) => {
                TrieNode::Extension(ExtensionNode::new(prefix.join(&ext.key), ext.child))
            }
            _ => TrieNode::Extension(ExtensionNode::new(prefix, child)),
        };
        Ok(self.emit(node))
    }
}

fn decode_node(raw: &[u8]) -> Result<TrieNode, StoreError> {
    let mut buf = raw;
    TrieNode::decode(&mut buf).map_err(|e| StoreError::InvalidTrieNode(e.to_string()))
}

fn first_nibble(path: &Nibbles) -> Result<usize, StoreError> {
    path.first()
        .map(|nibble| nibble as usize)
        .ok_or_else(|| StoreError::InvalidTrieNode("keys of unequal length".into()))
}

fn branch_children(branch: &BranchNode) -> Children {
    let mut children = Children::default();
    let mut stack = branch.stack.iter();
    for index in 0..16u8 {
        if branch.state_mask.is_bit_set(index) {
            children[index as usize] = stack.next().cloned();
        }
    }
    children
}

fn root_pointer(root: B256) -> Option<RlpNode> {
    (root != EMPTY_ROOT_HASH).then(|| RlpNode::word_rlp(&root))
}

fn root_of_pointer(ptr: Option<&RlpNode>) -> B256 {
    match ptr {
        Some(ptr) => ptr.as_hash().unwrap_or_else(|| keccak256(ptr)),
        None => EMPTY_ROOT_HASH,
    }
}
