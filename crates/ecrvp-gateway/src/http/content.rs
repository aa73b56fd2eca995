//! Segment rendering shared by the chat adapters

use crate::channel::Turn;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ecrvp_corpus::FileSegment;

/// Assistant turn inserted between consecutive user turns
pub(crate) const ACKNOWLEDGEMENT: &str = "Acknowledged. Awaiting next corpus segment.";

/// How a segment is presented to a provider
pub(crate) enum SegmentBody<'a> {
    /// UTF-8 text wrapped in file fences
    Text(String),
    /// Native attachment (mime type, base64 data)
    Attachment { mime_type: &'a str, data: String },
}

fn label(segment: &FileSegment) -> String {
    let d = &segment.descriptor;
    if d.parts > 1 {
        format!("{} (part {}/{})", d.filename, d.part, d.parts)
    } else {
        d.filename.clone()
    }
}

/// `--- File: name ---` fenced text, or a placeholder for binary content
pub(crate) fn fenced(segment: &FileSegment) -> String {
    let name = label(segment);
    match segment.as_text() {
        Some(text) => format!("--- File: {name} ---\n{text}\n--- End: {name} ---"),
        None => format!(
            "[Binary file: {name}, {} bytes, not representable as text]",
            segment.content.len()
        ),
    }
}

pub(crate) fn base64(segment: &FileSegment) -> String {
    STANDARD.encode(&segment.content)
}

/// Choose the presentation for a provider's declared capabilities
pub(crate) fn render<'a>(
    segment: &'a FileSegment,
    native_files: bool,
    native_mime: impl Fn(&str) -> bool,
) -> SegmentBody<'a> {
    if native_files && native_mime(segment.mime_type) {
        SegmentBody::Attachment {
            mime_type: segment.mime_type,
            data: base64(segment),
        }
    } else {
        SegmentBody::Text(fenced(segment))
    }
}

/// Pair each turn with whether an acknowledgement follows it
pub(crate) fn with_acknowledgements(turns: &[Turn]) -> impl Iterator<Item = (&Turn, bool)> {
    let last = turns.len().saturating_sub(1);
    turns.iter().enumerate().map(move |(i, t)| (t, i < last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecrvp_corpus::{seal, ArchitecturalStatus, CorpusEntry, PassportMetadata, SegmentPlan};

    fn segments(files: Vec<(&str, Vec<u8>)>, bound: usize) -> Vec<FileSegment> {
        let corpus = seal(
            PassportMetadata::new("p", ArchitecturalStatus::Open, "v1"),
            CorpusEntry::in_order(files),
        )
        .unwrap();
        SegmentPlan::build(&corpus, bound).unwrap().segments().to_vec()
    }

    #[test]
    fn text_segment_is_fenced() {
        let segs = segments(vec![("A.md", b"# alpha".to_vec())], 1024);
        assert_eq!(fenced(&segs[0]), "--- File: A.md ---\n# alpha\n--- End: A.md ---");
    }

    #[test]
    fn split_segment_carries_part_label() {
        let segs = segments(vec![("A.md", b"abcdef".to_vec())], 4);
        assert!(fenced(&segs[1]).starts_with("--- File: A.md (part 2/2) ---"));
    }

    #[test]
    fn binary_segment_gets_placeholder() {
        let segs = segments(vec![("B.pdf", vec![0xff, 0xfe, 0x00])], 1024);
        assert!(fenced(&segs[0]).starts_with("[Binary file: B.pdf, 3 bytes"));
    }

    #[test]
    fn native_pdf_becomes_attachment() {
        let segs = segments(vec![("B.pdf", b"%PDF".to_vec())], 1024);
        match render(&segs[0], true, |m| m == "application/pdf") {
            SegmentBody::Attachment { mime_type, data } => {
                assert_eq!(mime_type, "application/pdf");
                assert_eq!(data, "JVBERg==");
            }
            SegmentBody::Text(_) => panic!("expected attachment"),
        }
        assert!(matches!(
            render(&segs[0], false, |_| true),
            SegmentBody::Text(_)
        ));
    }
}
