use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod document;

pub use document::{ElementSpec, HostDocument};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("document error: {0}")]
    Document(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Granularity of a relevant span, as judged by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Word,
    Sentence,
    Content,
}

impl MatchKind {
    pub const ALL: [MatchKind; 3] = [MatchKind::Word, MatchKind::Sentence, MatchKind::Content];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Word => "word",
            MatchKind::Sentence => "sentence",
            MatchKind::Content => "content",
        }
    }

    /// Lenient parse used at the oracle boundary: anything unrecognized is a sentence.
    pub fn from_loose(s: &str) -> Self {
        s.parse().unwrap_or(MatchKind::Sentence)
    }

    /// Short label used on overlay filter controls (`W:3`).
    pub fn short_label(&self) -> &'static str {
        match self {
            MatchKind::Word => "W",
            MatchKind::Sentence => "S",
            MatchKind::Content => "C",
        }
    }

    /// Human noun for status lines ("3 words", "1 block").
    pub fn noun(&self, count: usize) -> String {
        let base = match self {
            MatchKind::Word => "word",
            MatchKind::Sentence => "sentence",
            MatchKind::Content => "block",
        };
        if count == 1 {
            format!("{count} {base}")
        } else {
            format!("{count} {base}s")
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "word" => Ok(MatchKind::Word),
            "sentence" => Ok(MatchKind::Sentence),
            "content" => Ok(MatchKind::Content),
            other => Err(Error::Parse(format!("unknown match type: {other}"))),
        }
    }
}

/// A verbatim span the oracle judged relevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MatchKind,
}

impl Match {
    pub fn new(text: impl Into<String>, kind: MatchKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    /// Deduplication key: trimmed, lowercased text.
    pub fn key(&self) -> String {
        self.text.trim().to_lowercase()
    }
}

/// Overlay filter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    #[default]
    All,
    Word,
    Sentence,
    Content,
}

impl Filter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Filter::All => "all",
            Filter::Word => "word",
            Filter::Sentence => "sentence",
            Filter::Content => "content",
        }
    }

    pub fn admits(&self, kind: MatchKind) -> bool {
        match self {
            Filter::All => true,
            Filter::Word => kind == MatchKind::Word,
            Filter::Sentence => kind == MatchKind::Sentence,
            Filter::Content => kind == MatchKind::Content,
        }
    }
}

impl From<MatchKind> for Filter {
    fn from(kind: MatchKind) -> Self {
        match kind {
            MatchKind::Word => Filter::Word,
            MatchKind::Sentence => Filter::Sentence,
            MatchKind::Content => Filter::Content,
        }
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Filter::All),
            other => other.parse::<MatchKind>().map(Filter::from),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage (and optional priced cost) of one oracle invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// `None` when no pricing is known for the active model.
    pub cost: Option<f64>,
}

/// Usage summed over every successful chunk of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

impl UsageTotals {
    pub fn add(&mut self, usage: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(usage.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(usage.output_tokens);
        self.cost += usage.cost.unwrap_or(0.0);
    }
}

/// Per-million-token prices for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_mtok: Option<f64>,
    pub output_per_mtok: Option<f64>,
}

impl Pricing {
    /// Monetary estimate; `None` if either price is missing or zero.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> Option<f64> {
        let input = self.input_per_mtok.filter(|p| *p > 0.0)?;
        let output = self.output_per_mtok.filter(|p| *p > 0.0)?;
        Some(
            (input_tokens as f64 / 1_000_000.0) * input
                + (output_tokens as f64 / 1_000_000.0) * output,
        )
    }
}

pub trait PricingLookup: Send + Sync {
    fn pricing(&self, provider: &str, model: &str) -> Option<Pricing>;
}

/// Pricing source that never knows a price.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPricing;

impl PricingLookup for NoPricing {
    fn pricing(&self, _provider: &str, _model: &str) -> Option<Pricing> {
        None
    }
}

/// Raw reply of one oracle call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The relevance-judging language model, reduced to one capability.
///
/// Failures should carry the provider's message (and HTTP status when there is one):
/// retry classification only looks at the rendered error text.
#[async_trait::async_trait]
pub trait RelevanceOracle: Send + Sync {
    fn provider(&self) -> &'static str;
    fn model(&self) -> &str;
    async fn complete(&self, system: &str, user: &str) -> Result<OracleReply>;
}

/// Receives human-readable progress strings.
pub trait StatusSink: Send + Sync {
    fn status(&self, message: &str);
}

impl<F> StatusSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn status(&self, message: &str) {
        self(message)
    }
}

/// Render a cost the way status lines show it.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.0001 {
        format!("${cost:.2e}")
    } else if cost < 0.01 {
        format!("${cost:.4}")
    } else {
        format!("${cost:.3}")
    }
}
