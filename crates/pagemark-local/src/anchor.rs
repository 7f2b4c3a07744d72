//! Locate match text in a live document and wrap every occurrence in a marker.
//!
//! Two phases per match: collect candidate spans over the current text leaves, then wrap
//! them in reverse document order. Wrapping splits a leaf and leaves the prefix in the
//! original node, so offsets of earlier candidates in the same leaf stay valid.

use pagemark_core::{ElementSpec, HostDocument, Match, MatchKind};
use serde::Serialize;
use std::ops::Range;
use tracing::{debug, warn};

/// Matches shorter than this (in chars) are never anchored.
pub const MIN_MATCH_CHARS: usize = 2;

/// Class shared by every marker element.
pub const MARK_CLASS: &str = "pagemark-mark";

pub const MARK_TAG: &str = "mark";

/// Marker element for one match kind: `<mark class="pagemark-mark pagemark-{kind}" data-type="{kind}">`.
pub fn marker_spec(kind: MatchKind) -> ElementSpec {
    ElementSpec::new(MARK_TAG)
        .class(MARK_CLASS)
        .class(format!("pagemark-{kind}"))
        .attr("data-type", kind.as_str())
}

/// Kind recorded on a marker element; unknown or missing values read as sentence.
pub fn marker_kind<D: HostDocument>(doc: &D, marker: D::Node) -> MatchKind {
    doc.attr(marker, "data-type")
        .map(MatchKind::from_loose)
        .unwrap_or(MatchKind::Sentence)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnchorReport {
    /// Matches with at least one wrapped occurrence.
    pub found: usize,
    /// Marker elements created.
    pub markers: usize,
    /// Matches too short to anchor.
    pub skipped: usize,
    /// Occurrences whose wrap was rejected by the document.
    pub failed_wraps: usize,
}

/// Byte ranges of every non-overlapping occurrence of `needle` in `haystack`.
///
/// Exact matches win; only when there are none does a case-insensitive scan run.
pub fn find_occurrences(haystack: &str, needle: &str) -> Vec<Range<usize>> {
    if needle.is_empty() {
        return Vec::new();
    }
    let exact: Vec<Range<usize>> = haystack
        .match_indices(needle)
        .map(|(i, m)| i..i + m.len())
        .collect();
    if !exact.is_empty() {
        return exact;
    }
    find_caseless(haystack, needle)
}

fn find_caseless(haystack: &str, needle: &str) -> Vec<Range<usize>> {
    let hay: Vec<(usize, char)> = haystack.char_indices().collect();
    let pat: Vec<char> = needle.chars().collect();
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + pat.len() <= hay.len() {
        let hit = pat
            .iter()
            .zip(&hay[i..])
            .all(|(p, (_, h))| p.to_lowercase().eq(h.to_lowercase()));
        if hit {
            let start = hay[i].0;
            let end = hay
                .get(i + pat.len())
                .map(|(b, _)| *b)
                .unwrap_or(haystack.len());
            out.push(start..end);
            i += pat.len();
        } else {
            i += 1;
        }
    }
    out
}

/// Wrap every occurrence of every match under `root`.
pub fn anchor_matches<'m, D, I>(doc: &mut D, root: D::Node, matches: I) -> AnchorReport
where
    D: HostDocument,
    I: IntoIterator<Item = &'m Match>,
{
    let mut report = AnchorReport::default();
    for m in matches {
        if m.text.chars().count() < MIN_MATCH_CHARS {
            debug!(text = %m.text, "match too short to anchor");
            report.skipped += 1;
            continue;
        }

        let mut candidates = Vec::new();
        for leaf in doc.text_leaves(root) {
            if let Some(text) = doc.text(leaf) {
                for range in find_occurrences(text, &m.text) {
                    candidates.push((leaf, range));
                }
            }
        }

        let spec = marker_spec(m.kind);
        let mut wrapped = 0usize;
        for (leaf, range) in candidates.into_iter().rev() {
            match doc.wrap_text_range(leaf, range, &spec) {
                Ok(_) => wrapped += 1,
                Err(e) => {
                    warn!(text = %m.text, error = %e, "could not wrap occurrence");
                    report.failed_wraps += 1;
                }
            }
        }

        debug!(text = %m.text, kind = %m.kind, occurrences = wrapped, "anchored");
        if wrapped > 0 {
            report.found += 1;
            report.markers += wrapped;
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Dom;

    fn marked(doc: &Dom) -> Vec<(String, MatchKind)> {
        doc.elements_with_class(doc.body(), MARK_CLASS)
            .into_iter()
            .map(|n| (doc.text_content(n), marker_kind(doc, n)))
            .collect()
    }

    #[test]
    fn every_occurrence_is_wrapped() {
        let mut doc = Dom::parse("<p>The cat sat. The cat ran.</p>");
        let body = doc.body();
        let report = anchor_matches(
            &mut doc,
            body,
            &[Match::new("cat", MatchKind::Word)],
        );
        assert_eq!(report.found, 1);
        assert_eq!(report.markers, 2);
        assert_eq!(
            marked(&doc),
            vec![
                ("cat".to_string(), MatchKind::Word),
                ("cat".to_string(), MatchKind::Word)
            ]
        );
        assert_eq!(doc.inner_text(doc.body()), "The cat sat. The cat ran.");
        let p = doc.find_first(doc.body(), "p").unwrap();
        assert_eq!(
            doc.outer_html(p).unwrap(),
            "<p>The <mark class=\"pagemark-mark pagemark-word\" data-type=\"word\">cat</mark> sat. \
             The <mark class=\"pagemark-mark pagemark-word\" data-type=\"word\">cat</mark> ran.</p>"
        );
    }

    #[test]
    fn falls_back_to_case_insensitive_and_keeps_page_casing() {
        let mut doc = Dom::parse("<h2>ÉCOLE Normale</h2><p>nothing</p>");
        let body = doc.body();
        let report = anchor_matches(
            &mut doc,
            body,
            &[Match::new("école normale", MatchKind::Sentence)],
        );
        assert_eq!(report.found, 1);
        assert_eq!(
            marked(&doc),
            vec![("ÉCOLE Normale".to_string(), MatchKind::Sentence)]
        );
    }

    #[test]
    fn exact_hits_suppress_caseless_ones_in_the_same_leaf() {
        assert_eq!(find_occurrences("Cat cat CAT", "cat"), vec![4..7]);
        assert_eq!(find_occurrences("Cat CAT", "cat"), vec![0..3, 4..7]);
        assert_eq!(find_occurrences("aaaa", "aa"), vec![0..2, 2..4]);
        assert!(find_occurrences("abc", "").is_empty());
    }

    #[test]
    fn short_and_missing_matches_are_not_found() {
        let mut doc = Dom::parse("<p>a b c</p>");
        let body = doc.body();
        let report = anchor_matches(
            &mut doc,
            body,
            &[
                Match::new("a", MatchKind::Word),
                Match::new("zebra", MatchKind::Word),
            ],
        );
        assert_eq!(
            report,
            AnchorReport {
                found: 0,
                markers: 0,
                skipped: 1,
                failed_wraps: 0
            }
        );
        assert!(marked(&doc).is_empty());
    }

    #[test]
    fn unrendered_text_is_never_wrapped() {
        let mut doc =
            Dom::parse("<p>price list</p><script>const price = 1;</script><textarea>price</textarea>");
        let body = doc.body();
        let report = anchor_matches(
            &mut doc,
            body,
            &[Match::new("price", MatchKind::Word)],
        );
        assert_eq!(report.markers, 1);
    }

    #[test]
    fn matches_spanning_leaves_and_later_matches_inside_marks() {
        let mut doc = Dom::parse("<p>big <b>red</b> dog, big red dog</p>");
        let body = doc.body();
        let report = anchor_matches(
            &mut doc,
            body,
            &[
                Match::new("big red dog", MatchKind::Sentence),
                Match::new("red", MatchKind::Word),
            ],
        );
        // The split occurrence is missed; "red" is still found inside the first mark and in <b>.
        assert_eq!(report.found, 2);
        assert_eq!(report.markers, 3);
        assert_eq!(doc.inner_text(doc.body()), "big red dog, big red dog");
    }
}
