//! Arena-backed 256-ary trie with cached vector commitments.
//!
//! Keys are 32-byte hashes, consumed one byte per level. A key lives in a
//! leaf node placed at the shallowest depth where its prefix is unique, so
//! the trie stays shallow even though keys are 32 levels deep in principle.
//!
//! Every node owns a commitment:
//! - internal node: commitment to the 256 slots, where slot `b` holds
//!   `group_to_field(child commitment)` for the child under byte `b` and 0
//!   for empty slots
//! - leaf node: commitment to `[1, key_lo, key_hi, value_lo, value_hi]`
//!   where `_lo`/`_hi` are the 16-byte halves of the key and value
//!
//! Commitments are cached and only the nodes touched since the last
//! [Trie::commit] get recomputed.

use curve25519_dalek_ng::{ristretto::RistrettoPoint, scalar::Scalar, traits::Identity};
use primitive_types::H256;

use std::collections::BTreeMap;

use crate::ipa::{group_to_field, Crs, LagrangeBasis, DOMAIN_SIZE};

/// Number of values a leaf node commits to.
pub const LEAF_WIDTH: usize = 5;

pub const KEY_BYTES: usize = 32;

/// Position of a node in the arena.
pub type NodeIndex = usize;

const ROOT_INDEX: NodeIndex = 0;

// -------------------------------------------------------------------------------------------------
// Nodes.

#[derive(Debug, Clone)]
pub enum TrieNode {
    Internal {
        depth: usize,
        children: BTreeMap<u8, NodeIndex>,
        commitment: RistrettoPoint,
        dirty: bool,
    },
    Leaf {
        key: H256,
        value: H256,
        commitment: RistrettoPoint,
        dirty: bool,
    },
}

impl TrieNode {
    fn new_internal(depth: usize) -> Self {
        TrieNode::Internal {
            depth,
            children: BTreeMap::new(),
            commitment: RistrettoPoint::identity(),
            dirty: true,
        }
    }

    fn new_leaf(key: H256, value: H256) -> Self {
        TrieNode::Leaf {
            key,
            value,
            commitment: RistrettoPoint::identity(),
            dirty: true,
        }
    }

    pub fn commitment(&self) -> &RistrettoPoint {
        match self {
            TrieNode::Internal { commitment, .. } => commitment,
            TrieNode::Leaf { commitment, .. } => commitment,
        }
    }

    fn mark_dirty(&mut self) {
        match self {
            TrieNode::Internal { dirty, .. } => *dirty = true,
            TrieNode::Leaf { dirty, .. } => *dirty = true,
        }
    }
}

/// The values a leaf commits to.
pub fn leaf_values(key: &H256, value: &H256) -> [Scalar; LEAF_WIDTH] {
    let (key_lo, key_hi) = split_halves(key);
    let (value_lo, value_hi) = split_halves(value);
    [Scalar::one(), key_lo, key_hi, value_lo, value_hi]
}

fn split_halves(bytes: &H256) -> (Scalar, Scalar) {
    let mut lo = [0u8; 16];
    let mut hi = [0u8; 16];
    lo.copy_from_slice(&bytes.as_bytes()[..16]);
    hi.copy_from_slice(&bytes.as_bytes()[16..]);
    (
        Scalar::from(u128::from_le_bytes(lo)),
        Scalar::from(u128::from_le_bytes(hi)),
    )
}

// -------------------------------------------------------------------------------------------------
// Trie.

#[derive(Debug, Clone)]
pub struct Trie {
    nodes: Vec<TrieNode>,
    len: usize,
}

impl Default for Trie {
    fn default() -> Self {
        Trie {
            nodes: vec![TrieNode::new_internal(0)],
            len: 0,
        }
    }
}

impl Trie {
    pub fn new() -> Self {
        Trie::default()
    }

    /// Number of keys stored.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn node(&self, index: NodeIndex) -> &TrieNode {
        &self.nodes[index]
    }

    pub fn root_commitment(&self) -> &RistrettoPoint {
        self.nodes[ROOT_INDEX].commitment()
    }

    /// Insert or overwrite `key`, returning the previous value if there was
    /// one.
    pub fn insert(&mut self, key: H256, value: H256) -> Option<H256> {
        let mut current = ROOT_INDEX;

        loop {
            self.nodes[current].mark_dirty();

            let (depth, slot, existing_child) = match &self.nodes[current] {
                TrieNode::Internal {
                    depth, children, ..
                } => {
                    let slot = key[*depth];
                    (*depth, slot, children.get(&slot).copied())
                }
                TrieNode::Leaf { .. } => unreachable!("descent only visits internal nodes"),
            };

            let child = match existing_child {
                Some(child) => child,
                None => {
                    let leaf = self.push(TrieNode::new_leaf(key, value));
                    self.set_child(current, slot, leaf);
                    self.len += 1;
                    return None;
                }
            };

            match &mut self.nodes[child] {
                TrieNode::Internal { .. } => current = child,
                TrieNode::Leaf {
                    key: existing_key,
                    value: existing_value,
                    dirty,
                    ..
                } if *existing_key == key => {
                    let previous = *existing_value;
                    *existing_value = value;
                    *dirty = true;
                    return Some(previous);
                }
                TrieNode::Leaf {
                    key: existing_key, ..
                } => {
                    // Two keys share the prefix up to `depth`: push the
                    // existing leaf one level down and keep descending.
                    let existing_slot = existing_key[depth + 1];
                    let mut split = TrieNode::new_internal(depth + 1);
                    if let TrieNode::Internal { children, .. } = &mut split {
                        children.insert(existing_slot, child);
                    }
                    let split = self.push(split);
                    self.set_child(current, slot, split);
                    current = split;
                }
            }
        }
    }

    pub fn get(&self, key: &H256) -> Option<&H256> {
        let path = self.path_to(key)?;
        match path.last().map(|index| &self.nodes[*index]) {
            Some(TrieNode::Leaf { value, .. }) => Some(value),
            _ => None,
        }
    }

    /// Arena indices from the root down to the leaf holding `key`, or `None`
    /// if the key is absent.
    pub fn path_to(&self, key: &H256) -> Option<Vec<NodeIndex>> {
        let mut path = vec![ROOT_INDEX];
        let mut current = ROOT_INDEX;

        loop {
            match &self.nodes[current] {
                TrieNode::Internal {
                    depth, children, ..
                } => {
                    current = *children.get(&key[*depth])?;
                    path.push(current);
                }
                TrieNode::Leaf { key: leaf_key, .. } => {
                    return (leaf_key == key).then_some(path);
                }
            }
        }
    }

    /// The values committed to by the node, as a polynomial over the full
    /// domain.
    pub fn polynomial(&self, index: NodeIndex) -> LagrangeBasis {
        let mut values = vec![Scalar::zero(); DOMAIN_SIZE];

        match &self.nodes[index] {
            TrieNode::Internal { children, .. } => {
                for (slot, child) in children {
                    values[*slot as usize] = group_to_field(self.nodes[*child].commitment());
                }
            }
            TrieNode::Leaf { key, value, .. } => {
                values[..LEAF_WIDTH].copy_from_slice(&leaf_values(key, value));
            }
        }

        LagrangeBasis::new(values)
    }

    /// Recompute every commitment touched since the last call and return
    /// the root commitment.
    pub fn commit(&mut self, crs: &Crs) -> RistrettoPoint {
        self.commit_node(crs, ROOT_INDEX)
    }

    fn commit_node(&mut self, crs: &Crs, index: NodeIndex) -> RistrettoPoint {
        let entries: Vec<(usize, Scalar)> = match &self.nodes[index] {
            TrieNode::Internal {
                dirty: false,
                commitment,
                ..
            }
            | TrieNode::Leaf {
                dirty: false,
                commitment,
                ..
            } => return *commitment,
            TrieNode::Internal { children, .. } => {
                let children: Vec<(u8, NodeIndex)> =
                    children.iter().map(|(slot, child)| (*slot, *child)).collect();
                children
                    .into_iter()
                    .map(|(slot, child)| {
                        let child_commitment = self.commit_node(crs, child);
                        (slot as usize, group_to_field(&child_commitment))
                    })
                    .collect()
            }
            TrieNode::Leaf { key, value, .. } => {
                leaf_values(key, value).into_iter().enumerate().collect()
            }
        };

        let new_commitment = crs.commit_sparse(&entries);

        match &mut self.nodes[index] {
            TrieNode::Internal {
                commitment, dirty, ..
            }
            | TrieNode::Leaf {
                commitment, dirty, ..
            } => {
                *commitment = new_commitment;
                *dirty = false;
            }
        }

        new_commitment
    }

    fn push(&mut self, node: TrieNode) -> NodeIndex {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn set_child(&mut self, parent: NodeIndex, slot: u8, child: NodeIndex) {
        if let TrieNode::Internal { children, .. } = &mut self.nodes[parent] {
            children.insert(slot, child);
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Unit tests.
