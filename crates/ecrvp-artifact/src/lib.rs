//! ECR-VP Artifact Primitives
//!
//! Fingerprinting and proof building blocks shared by every other crate.
//!
//! # Core Concepts
//!
//! - [`ContentHash`]: 32-byte SHA-256 fingerprint
//! - [`FingerprintBuilder`]: unambiguous multi-field fingerprints
//! - [`SessionMerkleTree`]: binary Merkle tree over chain fingerprints
//! - [`InclusionPath`]: per-leaf proof that a fingerprint is under a root
//! - [`PassportId`], [`SessionId`], [`RunId`]: typed identifiers
//!
//! # Example
//!
//! ```rust
//! use ecrvp_artifact::{ContentHash, SessionMerkleTree};
//!
//! let leaves = vec![ContentHash::compute(b"a"), ContentHash::compute(b"b")];
//! let tree = SessionMerkleTree::from_leaves(&leaves);
//! let path = tree.path(1).unwrap();
//! assert!(path.verify(leaves[1], tree.root()));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
mod hash;
mod ids;

/// Merkle tree support
pub mod merkle;

// Re-exports
pub use hash::{ContentHash, FingerprintBuilder, HashError};
pub use ids::{IdError, PassportId, RunId, SessionId};
pub use merkle::{InclusionPath, PathStep, SessionMerkleTree, Side};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn chained_fingerprints_feed_merkle_root() {
        let mut prev = ContentHash::default();
        let mut leaves = Vec::new();
        for payload in ["first", "second", "third"] {
            let chain = FingerprintBuilder::new("chain")
                .hash(&ContentHash::compute(payload.as_bytes()))
                .hash(&prev)
                .finish();
            leaves.push(chain);
            prev = chain;
        }

        let tree = SessionMerkleTree::from_leaves(&leaves);
        assert_eq!(tree.leaf_count(), 3);
        for (i, leaf) in leaves.iter().enumerate() {
            assert!(tree.path(i).unwrap().verify(*leaf, tree.root()));
        }
    }

    #[test]
    fn ids_render_and_parse() {
        let run = RunId::new();
        let parsed: RunId = run.to_string().parse().unwrap();
        assert_eq!(run, parsed);
    }
}
