//! Binary Merkle tree over 32-byte leaf hashes.
//!
//! The tree is built bottom-up by hashing adjacent pairs. If a layer has an
//! odd number of nodes then the last node is promoted to the next layer
//! unchanged; it is never paired with a copy of itself, which would let two
//! different leaf sequences share a root.
//!
//! All the layers are kept after construction so that
//! [PathSiblings] can be read straight out of the store without any
//! rebuilding.

use primitive_types::H256;
use sha2::{Digest, Sha256};

mod path_siblings;
pub use path_siblings::{PathSibling, PathSiblings, PathSiblingsError, Side};

/// The content of a tree node must implement this trait to allow 2 sibling
/// nodes to be combined to make a new parent node.
pub trait Mergeable {
    fn merge(left_sibling: &Self, right_sibling: &Self) -> Self;
}

impl Mergeable for H256 {
    /// `SHA256(left || right)`.
    fn merge(left_sibling: &Self, right_sibling: &Self) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(left_sibling.as_bytes());
        hasher.update(right_sibling.as_bytes());
        H256(hasher.finalize().into())
    }
}

// -------------------------------------------------------------------------------------------------
// Main struct.

/// Fully stored binary Merkle tree.
///
/// `layers[0]` holds the leaves and the last layer holds only the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    layers: Vec<Vec<H256>>,
}

impl MerkleTree {
    /// Build the tree from the given leaves, in the given order.
    ///
    /// An error is returned if `leaves` is empty.
    pub fn build(leaves: Vec<H256>) -> Result<Self, TreeBuildError> {
        if leaves.is_empty() {
            return Err(TreeBuildError::NoLeaves);
        }

        let mut layers = vec![leaves];

        while layers.last().map_or(false, |layer| layer.len() > 1) {
            let current = &layers[layers.len() - 1];
            let parents = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => H256::merge(left, right),
                    [promoted] => *promoted,
                    _ => unreachable!("chunks(2) yields 1 or 2 items"),
                })
                .collect::<Vec<H256>>();
            layers.push(parents);
        }

        Ok(MerkleTree { layers })
    }

    pub fn root(&self) -> &H256 {
        // The constructor guarantees at least one non-empty layer.
        &self.layers[self.layers.len() - 1][0]
    }

    /// Number of layers above the leaves.
    pub fn height(&self) -> usize {
        self.layers.len() - 1
    }

    pub fn leaf_count(&self) -> usize {
        self.layers[0].len()
    }

    pub fn leaf(&self, index: usize) -> Option<&H256> {
        self.layers[0].get(index)
    }

    /// Sibling nodes for the path from the leaf at `index` to the root.
    ///
    /// Layers where the path node was promoted contribute no sibling.
    pub fn path_siblings(&self, index: usize) -> Option<PathSiblings> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.height());
        let mut current = index;

        for layer in &self.layers[..self.height()] {
            let sibling_index = current ^ 1;
            if let Some(hash) = layer.get(sibling_index) {
                let side = if sibling_index < current {
                    Side::Left
                } else {
                    Side::Right
                };
                siblings.push(PathSibling { hash: *hash, side });
            }
            current /= 2;
        }

        Some(PathSiblings(siblings))
    }
}

// -------------------------------------------------------------------------------------------------
// Errors.

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeBuildError {
    #[error("A tree needs at least 1 leaf")]
    NoLeaves,
}

// -------------------------------------------------------------------------------------------------
// Unit tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::assert_err;

    fn leaves(n: u8) -> Vec<H256> {
        (0..n).map(|i| H256::repeat_byte(i + 1)).collect()
    }

    #[test]
    fn empty_input_fails() {
        assert_err!(MerkleTree::build(vec![]), Err(TreeBuildError::NoLeaves));
    }

    #[test]
    fn single_leaf_is_root() {
        let tree = MerkleTree::build(leaves(1)).unwrap();
        assert_eq!(tree.root(), &H256::repeat_byte(1));
        assert_eq!(tree.height(), 0);
        assert!(tree.path_siblings(0).unwrap().is_empty());
    }

    #[test]
    fn odd_node_is_promoted_not_duplicated() {
        let l = leaves(3);
        let tree = MerkleTree::build(l.clone()).unwrap();

        let left = H256::merge(&l[0], &l[1]);
        let expected = H256::merge(&left, &l[2]);
        assert_eq!(tree.root(), &expected);

        let duplicated = H256::merge(&left, &H256::merge(&l[2], &l[2]));
        assert_ne!(tree.root(), &duplicated);
    }

    #[test]
    fn promoted_leaf_has_short_path() {
        let tree = MerkleTree::build(leaves(5)).unwrap();
        assert_eq!(tree.height(), 3);
        // Leaf 4 is promoted twice before meeting the rest of the tree.
        assert_eq!(tree.path_siblings(4).unwrap().len(), 1);
        assert_eq!(tree.path_siblings(0).unwrap().len(), 3);
    }

    #[test]
    fn every_path_reconstructs_root() {
        for n in 1..=17u8 {
            let tree = MerkleTree::build(leaves(n)).unwrap();
            for i in 0..n as usize {
                let siblings = tree.path_siblings(i).unwrap();
                assert!(siblings.verify(tree.leaf(i).unwrap(), tree.root()));
            }
        }
    }

    #[test]
    fn out_of_range_index_gives_none() {
        let tree = MerkleTree::build(leaves(4)).unwrap();
        assert!(tree.path_siblings(4).is_none());
    }
}
