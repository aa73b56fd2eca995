//! Deterministic corpus segmentation
//!
//! A [`SegmentPlan`] is computed once per session and shared by every
//! channel. Boundaries depend only on the sealed bytes and the session-wide
//! segment bound, never on which provider receives them.

use crate::error::CorpusError;
use crate::passport::Passport;
use crate::sealer::SealedCorpus;
use ecrvp_artifact::{ContentHash, HashError, PassportId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Manifest entry for one transmitted segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub index: usize,
    pub filename: String,
    pub canonical_order: u32,
    /// 1-based part number within the file
    pub part: usize,
    pub parts: usize,
    pub byte_start: u64,
    pub byte_end: u64,
    pub sha256: ContentHash,
}

/// Exact file list and segment order transmitted to every run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusManifest {
    pub passport_id: PassportId,
    pub passport_fingerprint: ContentHash,
    pub segment_bound: usize,
    pub segments: Vec<SegmentDescriptor>,
}

impl CorpusManifest {
    /// Fingerprint of the manifest's canonical JSON
    ///
    /// # Errors
    /// Propagates serialization failure
    pub fn fingerprint(&self) -> Result<ContentHash, HashError> {
        ContentHash::compute_serializable(self)
    }

    /// Distinct files in transmission order
    #[must_use]
    pub fn file_order(&self) -> Vec<(&str, u32)> {
        let mut order: Vec<(&str, u32)> = Vec::new();
        for seg in &self.segments {
            if order.last().map(|(_, o)| *o) != Some(seg.canonical_order) {
                order.push((seg.filename.as_str(), seg.canonical_order));
            }
        }
        order
    }

    /// Whether the manifest transmits exactly the passport's files, in order,
    /// each covered contiguously from its first byte to its last
    #[must_use]
    pub fn matches_passport(&self, passport: &Passport) -> bool {
        if self.passport_id != passport.id()
            || self.passport_fingerprint != passport.fingerprint()
        {
            return false;
        }

        let mut segments = self.segments.iter().peekable();
        for file in passport.files() {
            let mut cursor = 0u64;
            let mut saw_part = false;
            while let Some(seg) = segments.next_if(|s| s.canonical_order == file.canonical_order) {
                if seg.filename != file.filename || seg.byte_start != cursor {
                    return false;
                }
                cursor = seg.byte_end;
                saw_part = true;
            }
            if !saw_part || cursor != file.size_bytes {
                return false;
            }
        }
        segments.next().is_none()
    }
}

/// One ordered slice of the corpus, ready for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSegment {
    pub descriptor: SegmentDescriptor,
    pub mime_type: &'static str,
    pub content: Arc<[u8]>,
}

impl FileSegment {
    /// Content as text, if it is valid UTF-8
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// Segments plus the manifest describing them
#[derive(Debug, Clone)]
pub struct SegmentPlan {
    manifest: CorpusManifest,
    segments: Vec<FileSegment>,
}

impl SegmentPlan {
    /// Split the sealed corpus into segments no larger than `segment_bound`
    /// bytes. Each file starts a new segment; UTF-8 files are only split on
    /// character boundaries.
    ///
    /// # Errors
    /// `Validation` if the bound is zero
    pub fn build(corpus: &SealedCorpus, segment_bound: usize) -> Result<Self, CorpusError> {
        if segment_bound == 0 {
            return Err(CorpusError::validation("segment bound must be positive"));
        }

        let mut segments = Vec::new();
        for (file, bytes) in corpus.iter() {
            let ranges = split_ranges(bytes, segment_bound);
            let parts = ranges.len();
            for (i, (start, end)) in ranges.into_iter().enumerate() {
                let slice = &bytes[start..end];
                segments.push(FileSegment {
                    descriptor: SegmentDescriptor {
                        index: segments.len(),
                        filename: file.filename.clone(),
                        canonical_order: file.canonical_order,
                        part: i + 1,
                        parts,
                        byte_start: start as u64,
                        byte_end: end as u64,
                        sha256: ContentHash::compute(slice),
                    },
                    mime_type: mime_for(&file.filename),
                    content: Arc::from(slice),
                });
            }
        }

        let passport = corpus.passport();
        let manifest = CorpusManifest {
            passport_id: passport.id(),
            passport_fingerprint: passport.fingerprint(),
            segment_bound,
            segments: segments.iter().map(|s| s.descriptor.clone()).collect(),
        };
        Ok(Self { manifest, segments })
    }

    #[inline]
    #[must_use]
    pub fn manifest(&self) -> &CorpusManifest {
        &self.manifest
    }

    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[FileSegment] {
        &self.segments
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Byte ranges of at most `bound` bytes; an empty file yields one empty range
fn split_ranges(bytes: &[u8], bound: usize) -> Vec<(usize, usize)> {
    if bytes.is_empty() {
        return vec![(0, 0)];
    }
    let text = std::str::from_utf8(bytes).ok();

    let mut ranges = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let mut end = (start + bound).min(bytes.len());
        if let Some(text) = text {
            while end > start && !text.is_char_boundary(end) {
                end -= 1;
            }
            if end == start {
                // bound smaller than one character: take the whole character
                end = start + 1;
                while !text.is_char_boundary(end) {
                    end += 1;
                }
            }
        }
        ranges.push((start, end));
        start = end;
    }
    ranges
}

/// MIME type from the file extension
#[must_use]
pub fn mime_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("md") => "text/markdown",
        Some("txt") => "text/plain",
        Some("py") => "text/x-python",
        Some("rs") => "text/x-rust",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("html") => "text/html",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{seal, ArchitecturalStatus, CorpusEntry, PassportMetadata};
    use pretty_assertions::assert_eq;

    fn corpus(files: Vec<(&str, Vec<u8>)>) -> SealedCorpus {
        seal(
            PassportMetadata::new("p", ArchitecturalStatus::Open, "v1"),
            CorpusEntry::in_order(files),
        )
        .unwrap()
    }

    #[test]
    fn one_segment_per_small_file() {
        let c = corpus(vec![("A.md", b"alpha".to_vec()), ("B.pdf", b"beta".to_vec())]);
        let plan = SegmentPlan::build(&c, 1024).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.manifest().file_order(), vec![("A.md", 0), ("B.pdf", 1)]);
        assert!(plan.manifest().matches_passport(c.passport()));
        assert_eq!(plan.segments()[1].mime_type, "application/pdf");
    }

    #[test]
    fn large_file_split_into_ordered_parts() {
        let c = corpus(vec![("big.txt", vec![b'x'; 10]), ("s.md", b"s".to_vec())]);
        let plan = SegmentPlan::build(&c, 4).unwrap();
        let parts: Vec<_> = plan
            .manifest()
            .segments
            .iter()
            .map(|s| (s.filename.as_str(), s.part, s.parts, s.byte_start, s.byte_end))
            .collect();
        assert_eq!(
            parts,
            vec![
                ("big.txt", 1, 3, 0, 4),
                ("big.txt", 2, 3, 4, 8),
                ("big.txt", 3, 3, 8, 10),
                ("s.md", 1, 1, 0, 1),
            ]
        );
        assert!(plan.manifest().matches_passport(c.passport()));
    }

    #[test]
    fn utf8_split_respects_char_boundaries() {
        let c = corpus(vec![("u.md", "ééé".as_bytes().to_vec())]);
        let plan = SegmentPlan::build(&c, 3).unwrap();
        for seg in plan.segments() {
            assert!(seg.as_text().is_some());
        }
        assert!(plan.manifest().matches_passport(c.passport()));
    }

    #[test]
    fn same_corpus_same_manifest() {
        let c = corpus(vec![("A.md", b"alpha".to_vec())]);
        let a = SegmentPlan::build(&c, 2).unwrap();
        let b = SegmentPlan::build(&c, 2).unwrap();
        assert_eq!(
            a.manifest().fingerprint().unwrap(),
            b.manifest().fingerprint().unwrap()
        );
    }

    #[test]
    fn reordered_manifest_does_not_match() {
        let c = corpus(vec![("A.md", b"a".to_vec()), ("B.md", b"b".to_vec())]);
        let plan = SegmentPlan::build(&c, 16).unwrap();
        let mut manifest = plan.manifest().clone();
        manifest.segments.swap(0, 1);
        assert!(!manifest.matches_passport(c.passport()));
    }

    #[test]
    fn zero_bound_rejected() {
        let c = corpus(vec![("A.md", b"a".to_vec())]);
        assert!(SegmentPlan::build(&c, 0).is_err());
    }

    #[test]
    fn empty_file_keeps_a_segment() {
        let c = corpus(vec![("empty.md", Vec::new())]);
        let plan = SegmentPlan::build(&c, 8).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.manifest().matches_passport(c.passport()));
    }
}
