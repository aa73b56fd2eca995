//! Human-readable passport block
//!
//! This text is the first message every interpreter receives, so it must be
//! a pure function of the passport.

use crate::passport::Passport;
use std::fmt::Write as _;

/// Render the passport as the opening transmission of a run
#[must_use]
pub fn passport_to_text(passport: &Passport) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "=== CORPUS PASSPORT ===");
    let _ = writeln!(out, "Passport ID: {}", passport.id());
    let _ = writeln!(out, "Created: {}", passport.created_at().to_rfc3339());
    let _ = writeln!(out, "Purpose: {}", passport.purpose());
    let _ = writeln!(out, "Architectural Status: {}", passport.architectural_status());
    let _ = writeln!(out, "Canon Version: {}", passport.canon_version());
    if !passport.constraints().is_empty() {
        let _ = writeln!(out, "Constraints: {}", passport.constraints().join("; "));
    }
    let _ = writeln!(out, "Passport Fingerprint: {}", passport.fingerprint());
    let _ = writeln!(out);
    let _ = writeln!(out, "Corpus Files ({} total):", passport.files().len());
    for file in passport.files() {
        let _ = writeln!(
            out,
            "  [{:03}] {} ({} bytes, SHA-256: {}...)",
            file.canonical_order,
            file.filename,
            file.size_bytes,
            file.sha256.short()
        );
    }
    out.push_str("=== END CORPUS PASSPORT ===");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{seal, ArchitecturalStatus, CorpusEntry, PassportMetadata};

    #[test]
    fn lists_files_in_canonical_order() {
        let corpus = seal(
            PassportMetadata::new("p", ArchitecturalStatus::Open, "v1").with_constraint("c1"),
            CorpusEntry::in_order(vec![("A.md", b"a".to_vec()), ("B.pdf", b"bb".to_vec())]),
        )
        .unwrap();
        let text = passport_to_text(corpus.passport());

        let a = text.find("[000] A.md (1 bytes").unwrap();
        let b = text.find("[001] B.pdf (2 bytes").unwrap();
        assert!(a < b);
        assert!(text.contains("Constraints: c1"));
        assert!(text.ends_with("=== END CORPUS PASSPORT ==="));
    }

    #[test]
    fn rendering_is_stable() {
        let corpus = seal(
            PassportMetadata::new("p", ArchitecturalStatus::Closed, "v1"),
            CorpusEntry::in_order(vec![("A.md", b"a".to_vec())]),
        )
        .unwrap();
        assert_eq!(passport_to_text(corpus.passport()), passport_to_text(corpus.passport()));
    }
}
