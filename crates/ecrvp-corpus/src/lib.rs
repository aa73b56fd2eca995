//! ECR-VP Corpus Sealing
//!
//! Freezes an ordered document set into an immutable, fingerprinted
//! [`Passport`] and derives the exact segment sequence every interpreter
//! receives.
//!
//! # Example
//!
//! ```rust
//! use ecrvp_corpus::{seal, ArchitecturalStatus, CorpusEntry, PassportMetadata};
//!
//! let metadata = PassportMetadata::new("review", ArchitecturalStatus::Open, "v1");
//! let corpus = seal(
//!     metadata,
//!     CorpusEntry::in_order(vec![("A.md", b"alpha".to_vec()), ("B.pdf", b"beta".to_vec())]),
//! )
//! .unwrap();
//! assert_eq!(corpus.passport().files().len(), 2);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod passport;
mod render;
mod sealer;
mod segment;
mod vault;

pub use error::CorpusError;
pub use passport::{ArchitecturalStatus, CorpusFile, Passport, PassportMetadata};
pub use render::passport_to_text;
pub use sealer::{seal, verify_integrity, CorpusEntry, Divergence, IntegrityCheck, SealedCorpus};
pub use segment::{mime_for, CorpusManifest, FileSegment, SegmentDescriptor, SegmentPlan};
pub use vault::CorpusVault;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
