//! Local implementations for `pagemark`: an in-memory HTML document, the HTTP-backed
//! relevance oracles, the chunk/query/merge/anchor pipeline that ties them together, and
//! selector-plan extraction.

pub mod aggregate;
pub mod anchor;
pub mod anthropic;
pub mod catalog;
pub mod dispatch;
pub mod dom;
pub mod extract;
pub mod fetch;
pub mod gemini;
pub mod openai;
pub mod overlay;
pub mod provider;
pub mod retry;
pub mod segment;
pub mod session;

pub use anchor::{anchor_matches, AnchorReport};
pub use catalog::{load_catalog, CatalogCache, ModelCatalog};
pub use dom::Dom;
pub use extract::ExtractPlan;
pub use overlay::{clear, Direction, Overlay};
pub use provider::{build_oracle, Provider};
pub use retry::RetryPolicy;
pub use segment::{chunk_text, Chunk, ChunkConfig};
pub use session::{ExtractOutcome, FindConfig, FindOutcome, HighlightOutcome, Session};

/// Read an env var, treating blank values as unset.
pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
