//! Structural scan of captured text for expected section markers
//!
//! Display only: the scan reads a copy of the text and never changes what
//! is stored. Missing and out-of-order markers are reported as found.

use crate::types::SessionType;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

const STRICT_VERIFIER_MARKERS: &[&str] = &[
    "Rc Mode",
    "Ri Mode",
    "Declarative Epistemic Typology",
    "Ra Mode",
    "Failure Mode",
    "Novelty and Positioning",
    "Verdict",
    "Project Maturity Summary",
];

const POSITION_AGGREGATOR_MARKERS: &[&str] = &[
    "Consensus Zone",
    "Divergence Zone",
    "Unique Observations",
    "Structural Compliance",
    "Blind Spots",
    "Confidence Distribution",
];

/// Expected markers for a session type, in prescribed order
#[must_use]
pub fn markers_for(session_type: SessionType) -> &'static [&'static str] {
    match session_type {
        SessionType::StrictVerifier => STRICT_VERIFIER_MARKERS,
        SessionType::PositionAggregator => POSITION_AGGREGATOR_MARKERS,
        SessionType::Formalization => &[],
    }
}

/// One expected marker and where it was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerHit {
    pub marker: String,
    pub found: bool,
    /// Byte offset of the heading line
    pub position: Option<usize>,
}

/// Result of scanning one text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeReport {
    /// Every expected marker, in prescribed order
    pub markers: Vec<MarkerHit>,
    pub missing: Vec<String>,
    /// Found markers that appear before a marker prescribed earlier
    pub out_of_order: Vec<String>,
    pub in_order: bool,
}

/// Compiled marker set
#[derive(Debug, Clone)]
pub struct ModeDetector {
    patterns: Vec<(String, Regex)>,
}

fn heading_pattern(marker: &str) -> String {
    let words: Vec<String> = marker
        .split_whitespace()
        .map(|w| {
            if w.eq_ignore_ascii_case("and") {
                "(?:and|&)".to_string()
            } else {
                regex::escape(w)
            }
        })
        .collect();
    // markdown heading or bold, optional numbering, optional trailing "Mode"
    format!(
        r"^[ \t]*(?:#{{1,6}}[ \t]*|\*\*[ \t]*)(?:\d+[.)][ \t]*)?{}(?:[ \t]+mode)?\b",
        words.join(r"\s+")
    )
}

impl ModeDetector {
    /// Detector for an explicit marker list
    ///
    /// # Errors
    /// Propagates pattern compilation failure
    pub fn new(markers: &[&str]) -> Result<Self, regex::Error> {
        let patterns = markers
            .iter()
            .map(|m| {
                RegexBuilder::new(&heading_pattern(m))
                    .case_insensitive(true)
                    .multi_line(true)
                    .build()
                    .map(|re| ((*m).to_string(), re))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    /// Detector for the markers of a session type
    ///
    /// # Errors
    /// Propagates pattern compilation failure
    pub fn for_session(session_type: SessionType) -> Result<Self, regex::Error> {
        Self::new(markers_for(session_type))
    }

    #[must_use]
    pub fn detect(&self, text: &str) -> ModeReport {
        let markers: Vec<MarkerHit> = self
            .patterns
            .iter()
            .map(|(marker, re)| {
                let position = re.find(text).map(|m| m.start());
                MarkerHit {
                    marker: marker.clone(),
                    found: position.is_some(),
                    position,
                }
            })
            .collect();

        let missing = markers
            .iter()
            .filter(|h| !h.found)
            .map(|h| h.marker.clone())
            .collect();

        let mut out_of_order = Vec::new();
        let mut furthest: Option<usize> = None;
        for hit in &markers {
            let Some(pos) = hit.position else { continue };
            match furthest {
                Some(f) if pos < f => out_of_order.push(hit.marker.clone()),
                _ => furthest = Some(pos),
            }
        }

        ModeReport {
            in_order: out_of_order.is_empty(),
            markers,
            missing,
            out_of_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strict() -> ModeDetector {
        ModeDetector::for_session(SessionType::StrictVerifier).unwrap()
    }

    #[test]
    fn finds_markdown_and_bold_headings() {
        let text = "## Rc Mode\nclass\n\n**Ri Mode:** invariants\n### 3. declarative epistemic typology\n";
        let report = strict().detect(text);
        assert!(report.markers[0].found);
        assert_eq!(report.markers[0].position, Some(0));
        assert!(report.markers[1].found);
        assert!(report.markers[2].found);
        assert!(report.in_order);
        assert_eq!(report.missing.len(), 5);
    }

    #[test]
    fn verdict_accepts_optional_mode_suffix() {
        let report = strict().detect("# Verdict Mode\nshort\n");
        let verdict = report.markers.iter().find(|h| h.marker == "Verdict").unwrap();
        assert!(verdict.found);
    }

    #[test]
    fn inline_mentions_are_not_headings() {
        let report = strict().detect("As noted in Rc Mode above, nothing else.");
        assert!(!report.markers[0].found);
    }

    #[test]
    fn ampersand_matches_and() {
        let report = strict().detect("## Novelty & Positioning\n");
        assert!(report.markers[5].found);
    }

    #[test]
    fn out_of_order_is_reported_not_corrected() {
        let text = "## Ri Mode\n...\n## Rc Mode\n...";
        let report = strict().detect(text);
        assert!(!report.in_order);
        assert_eq!(report.out_of_order, vec!["Ri Mode".to_string()]);
        // positions are reported as found
        assert!(report.markers[0].position > report.markers[1].position);
    }

    #[test]
    fn formalization_has_no_markers() {
        let detector = ModeDetector::for_session(SessionType::Formalization).unwrap();
        let report = detector.detect("# anything");
        assert!(report.markers.is_empty());
        assert!(report.in_order);
    }
}
