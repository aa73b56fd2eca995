//! Binary Merkle tree over session chain fingerprints
//!
//! Provides [`SessionMerkleTree`], built level by level with the
//! `rs_merkle` SHA-256 node hasher. An odd node count at any level is
//! completed by duplicating the last node, so every leaf has a full-length
//! [`InclusionPath`] that can be checked without the tree.

use crate::hash::ContentHash;
use rs_merkle::algorithms::Sha256 as Sha256Algorithm;
use rs_merkle::Hasher;
use serde::{Deserialize, Serialize};

/// Hash two sibling nodes into their parent
#[inline]
#[must_use]
pub fn parent_of(left: &ContentHash, right: &ContentHash) -> ContentHash {
    ContentHash::new(Sha256Algorithm::concat_and_hash(
        left.as_bytes(),
        Some(right.as_bytes()),
    ))
}

/// Merkle tree retaining every level (leaves first, root last)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMerkleTree {
    levels: Vec<Vec<ContentHash>>,
}

impl SessionMerkleTree {
    /// Build from leaf hashes
    ///
    /// # Performance
    /// O(n) where n = number of leaves
    #[must_use]
    pub fn from_leaves(leaves: &[ContentHash]) -> Self {
        if leaves.is_empty() {
            return Self { levels: Vec::new() };
        }

        let mut levels = vec![leaves.to_vec()];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<ContentHash> = current
                .chunks(2)
                .map(|pair| parent_of(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            levels.push(next);
        }
        Self { levels }
    }

    /// Root hash of the tree
    ///
    /// Returns zero hash for empty tree.
    #[inline]
    #[must_use]
    pub fn root(&self) -> ContentHash {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_default()
    }

    /// Leaf hashes in insertion order
    #[inline]
    #[must_use]
    pub fn leaves(&self) -> &[ContentHash] {
        self.levels.first().map_or(&[], Vec::as_slice)
    }

    /// Number of leaves
    #[inline]
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    /// Check if tree is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Inclusion path for the leaf at `index`, or `None` if out of range
    #[must_use]
    pub fn path(&self, index: usize) -> Option<InclusionPath> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut steps = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let step = if position % 2 == 0 {
                let sibling = level.get(position + 1).unwrap_or(&level[position]);
                PathStep {
                    sibling: *sibling,
                    side: Side::Right,
                }
            } else {
                PathStep {
                    sibling: level[position - 1],
                    side: Side::Left,
                }
            };
            steps.push(step);
            position /= 2;
        }

        Some(InclusionPath {
            leaf_index: index,
            steps,
        })
    }

    /// Inclusion paths for every leaf, in leaf order
    #[must_use]
    pub fn paths(&self) -> Vec<InclusionPath> {
        (0..self.leaf_count()).filter_map(|i| self.path(i)).collect()
    }
}

/// Which side of the running hash a sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One level of an inclusion path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub sibling: ContentHash,
    pub side: Side,
}

/// Proof that a leaf is included under a Merkle root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionPath {
    pub leaf_index: usize,
    pub steps: Vec<PathStep>,
}

impl InclusionPath {
    /// Fold the path starting from `leaf`
    #[must_use]
    pub fn compute_root(&self, leaf: ContentHash) -> ContentHash {
        self.steps.iter().fold(leaf, |acc, step| match step.side {
            Side::Left => parent_of(&step.sibling, &acc),
            Side::Right => parent_of(&acc, &step.sibling),
        })
    }

    /// Verify this path against an expected root
    #[inline]
    #[must_use]
    pub fn verify(&self, leaf: ContentHash, root: ContentHash) -> bool {
        self.compute_root(leaf) == root
    }
}
