//! Oracle response parsing and cross-chunk merging.

use pagemark_core::{Error, Match, MatchKind, Result, Usage, UsageTotals};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// One entry of an oracle response, before normalization.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawMatch {
    Bare(String),
    Shaped {
        text: String,
        #[serde(rename = "type", default)]
        kind: Option<String>,
    },
}

impl RawMatch {
    fn normalize(self) -> Option<Match> {
        let (text, kind) = match self {
            RawMatch::Bare(text) => (text, MatchKind::Sentence),
            RawMatch::Shaped { text, kind } => {
                let kind = kind
                    .as_deref()
                    .map(MatchKind::from_loose)
                    .unwrap_or(MatchKind::Sentence);
                (text, kind)
            }
        };
        if text.trim().is_empty() {
            return None;
        }
        Some(Match::new(text, kind))
    }
}

#[derive(Debug, Deserialize)]
struct OracleResponse {
    #[serde(default)]
    matches: Option<Vec<serde_json::Value>>,
    /// Older prompt revisions answered with `items`.
    #[serde(default)]
    items: Option<Vec<serde_json::Value>>,
}

/// Remove a surrounding markdown code fence (```` ``` ```` or ```` ```json ````), if any.
pub fn strip_code_fence(content: &str) -> &str {
    let s = content.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = match rest.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
        _ => rest,
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse the content of one oracle reply into normalized matches.
///
/// Entries that are neither strings nor `{text, type}` objects are skipped.
pub fn parse_matches(content: &str) -> Result<Vec<Match>> {
    let body = strip_code_fence(content);
    let parsed: OracleResponse =
        serde_json::from_str(body).map_err(|e| Error::Parse(format!("oracle response: {e}")))?;
    let raw = parsed
        .matches
        .or(parsed.items)
        .ok_or_else(|| Error::Parse("oracle response has no matches array".to_string()))?;

    let mut out = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_value::<RawMatch>(value) {
            Ok(m) => out.extend(m.normalize()),
            Err(e) => debug!(error = %e, "skipping malformed match entry"),
        }
    }
    Ok(out)
}

/// Findings of one successfully processed chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkFindings {
    pub matches: Vec<Match>,
    pub usage: Usage,
}

/// Matches deduplicated by [`Match::key`], first occurrence wins, insertion order kept.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    items: Vec<Match>,
    keys: HashSet<String>,
}

impl MatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless an entry with the same key exists. Returns whether it was inserted.
    pub fn insert(&mut self, m: Match) -> bool {
        let key = m.key();
        if key.is_empty() || !self.keys.insert(key) {
            return false;
        }
        self.items.push(m);
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Match> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Match] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Match> {
        self.items
    }

    pub fn count(&self, kind: MatchKind) -> usize {
        self.items.iter().filter(|m| m.kind == kind).count()
    }

    /// Per-kind counts, omitting kinds with no entries.
    pub fn counts(&self) -> BTreeMap<MatchKind, usize> {
        let mut out = BTreeMap::new();
        for m in &self.items {
            *out.entry(m.kind).or_insert(0) += 1;
        }
        out
    }
}

impl FromIterator<Match> for MatchSet {
    fn from_iter<T: IntoIterator<Item = Match>>(iter: T) -> Self {
        let mut set = MatchSet::new();
        for m in iter {
            set.insert(m);
        }
        set
    }
}

impl<'a> IntoIterator for &'a MatchSet {
    type Item = &'a Match;
    type IntoIter = std::slice::Iter<'a, Match>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Merged outcome of a batch.
#[derive(Debug, Default)]
pub struct Aggregate {
    pub matches: MatchSet,
    pub usage: UsageTotals,
    /// Per-chunk failures, in chunk order.
    pub failures: Vec<(usize, Error)>,
}

impl Aggregate {
    pub fn chunks_failed(&self) -> usize {
        self.failures.len()
    }
}

/// Merge per-chunk results (in chunk order) into one deduplicated set plus usage totals.
pub fn aggregate(results: Vec<Result<ChunkFindings>>) -> Aggregate {
    let mut out = Aggregate::default();
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(findings) => {
                out.usage.add(&findings.usage);
                let before = out.matches.len();
                let seen = findings.matches.len();
                for m in findings.matches {
                    out.matches.insert(m);
                }
                debug!(
                    chunk = index,
                    matches = seen,
                    new = out.matches.len() - before,
                    "merged chunk"
                );
            }
            Err(e) => {
                warn!(chunk = index, error = %e, "chunk failed");
                out.failures.push((index, e));
            }
        }
    }
    out
}
