//! Sibling nodes to the ones in a tree path.
//!
//! A path in a binary tree goes from a leaf node to the root node. For each
//! node (starting from the leaf node) one follows the path by moving to the
//! parent node; since the root node has no parent this is the end of the path.
//!
//! [PathSiblings] contains all the nodes that are siblings to the ones in a
//! path, each tagged with the side it sits on. This is enough to reconstruct
//! the path, and therefore the root, from the leaf alone without knowing
//! anything else about the tree.

use primitive_types::H256;
use serde::{Deserialize, Serialize};

use std::fmt;

use super::Mergeable;

// -------------------------------------------------------------------------------------------------
// Main structs.

/// Which side of the path node the sibling is on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Side {
    Left,
    Right,
}

/// A sibling hash together with its orientation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSibling {
    pub hash: H256,
    pub side: Side,
}

/// Contains all the information for a path in a [super::MerkleTree].
///
/// The siblings are ordered from bottom layer (first) to root node (last, not
/// included). Layers where the path node was promoted have no sibling and so
/// no entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSiblings(pub Vec<PathSibling>);

impl PathSiblings {
    /// Number of sibling nodes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathSibling> {
        self.0.iter()
    }

    /// Reconstruct each node in the path, from bottom layer to the root,
    /// using the given leaf and sibling nodes.
    ///
    /// This function does exactly the same as [PathSiblings::construct_path]
    /// but does not store the intermediate nodes, only the final node.
    pub fn construct_root_node(&self, leaf: &H256) -> H256 {
        self.0
            .iter()
            .fold(*leaf, |node, sibling| merge_with_sibling(&node, sibling))
    }

    /// Return a vector containing only the nodes in the tree path.
    ///
    /// The order of the returned path nodes is bottom first (leaf) and top
    /// last (root).
    pub fn construct_path(&self, leaf: H256) -> Vec<H256> {
        // +1 because the leaf is included in the returned vector
        let mut nodes = Vec::with_capacity(self.len() + 1);
        nodes.push(leaf);

        for sibling in &self.0 {
            let parent = merge_with_sibling(&nodes[nodes.len() - 1], sibling);
            nodes.push(parent);
        }

        nodes
    }

    /// Check that `leaf` together with the siblings produces `root`.
    ///
    /// Returns false on mismatch.
    pub fn verify(&self, leaf: &H256, root: &H256) -> bool {
        self.construct_root_node(leaf) == *root
    }

    /// Like [PathSiblings::verify] but gives an error on mismatch.
    pub fn check(&self, leaf: &H256, root: &H256) -> Result<(), PathSiblingsError> {
        let constructed = self.construct_root_node(leaf);
        if constructed == *root {
            Ok(())
        } else {
            Err(PathSiblingsError::RootMismatch {
                constructed,
                expected: *root,
            })
        }
    }
}

fn merge_with_sibling(node: &H256, sibling: &PathSibling) -> H256 {
    match sibling.side {
        Side::Left => H256::merge(&sibling.hash, node),
        Side::Right => H256::merge(node, &sibling.hash),
    }
}

impl fmt::Display for PathSiblings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for sibling in &self.0 {
            let side = match sibling.side {
                Side::Left => 'L',
                Side::Right => 'R',
            };
            writeln!(f, "{} {:x}", side, sibling.hash)?;
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
// Errors.

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PathSiblingsError {
    #[error("Path constructs root {constructed:?} but {expected:?} was expected")]
    RootMismatch { constructed: H256, expected: H256 },
}

// -------------------------------------------------------------------------------------------------
// Unit tests.
