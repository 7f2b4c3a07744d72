//! One highlight run: chunk, query, merge, anchor, attach the bar. Extraction runs share
//! the same oracle, retry policy and pricing.

use crate::aggregate::{aggregate, parse_matches, ChunkFindings, MatchSet};
use crate::anchor::{anchor_matches, AnchorReport};
use crate::dispatch::{run_all, MAX_CONCURRENT_CHUNKS};
use crate::dom::Dom;
use crate::extract::{
    apply_plan, parse_plan, summarize_extract, truncate_chars, user_prompt, ExtractPlan,
    EXTRACT_HTML_CHARS, EXTRACT_PROMPT,
};
use crate::overlay::{self, Overlay};
use crate::retry::RetryPolicy;
use crate::segment::{chunk_text, Chunk, ChunkConfig};
use pagemark_core::{
    format_cost, Error, HostDocument, MatchKind, OracleReply, PricingLookup, RelevanceOracle,
    Result, StatusSink, Usage, UsageTotals,
};
use std::sync::Arc;
use tracing::{debug, info};

pub const MAX_ITEMS_PER_CHUNK: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindConfig {
    pub chunk: ChunkConfig,
    pub retry: RetryPolicy,
    pub concurrency: usize,
    pub max_items_per_chunk: usize,
}

impl Default for FindConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            retry: RetryPolicy::default(),
            concurrency: MAX_CONCURRENT_CHUNKS,
            max_items_per_chunk: MAX_ITEMS_PER_CHUNK,
        }
    }
}

/// Instructions sent with every chunk.
pub fn system_prompt(query: &str, max_items: usize) -> String {
    format!(
        r#"You analyze text to find content relevant to a user's interest. User is interested in: "{query}".

Your task: Find text segments that match their interest. Return EXACT text from the provided content.

Return JSON with "matches" array. Each match has:
- "text": the exact verbatim text from the page (must exist exactly as written)
- "type": one of "word" (single term/phrase), "sentence" (complete sentence), or "content" (multi-sentence block)

Guidelines:
- For specific terms/names/numbers: use "word" type
- For standalone facts/statements: use "sentence" type
- For explanations/descriptions spanning multiple sentences: use "content" type
- Only include genuinely relevant matches
- Max {max_items} items per response
- Text must be EXACT - copy verbatim from the content

Example response:
{{"matches": [
  {{"text": "$299", "type": "word"}},
  {{"text": "The product ships within 3-5 business days.", "type": "sentence"}},
  {{"text": "Our premium plan includes unlimited storage, priority support, and advanced analytics. Perfect for growing teams.", "type": "content"}}
]}}"#
    )
}

/// Status line for a finished run.
pub fn summarize(matches: &MatchSet, cost: f64) -> String {
    let cost_suffix = if cost > 0.0 {
        format!(" ({})", format_cost(cost))
    } else {
        String::new()
    };
    let parts: Vec<String> = MatchKind::ALL
        .iter()
        .map(|k| (k, matches.count(*k)))
        .filter(|(_, n)| *n > 0)
        .map(|(k, n)| k.noun(n))
        .collect();
    if parts.is_empty() {
        format!("Nothing relevant found{cost_suffix}")
    } else {
        format!("Found {}{cost_suffix}", parts.join(", "))
    }
}

#[derive(Debug)]
pub struct FindOutcome {
    pub matches: MatchSet,
    pub usage: UsageTotals,
    pub chunks: usize,
    /// Chunk index and error of each failed chunk.
    pub failures: Vec<(usize, Error)>,
}

#[derive(Debug)]
pub struct ExtractOutcome {
    pub plan: ExtractPlan,
    pub data: serde_json::Value,
    pub usage: Usage,
    /// True when the page markup was cut to fit the prompt.
    pub truncated: bool,
    pub summary: String,
}

pub struct HighlightOutcome<D: HostDocument> {
    pub find: FindOutcome,
    pub anchor: AnchorReport,
    pub overlay: Option<Overlay<D>>,
    pub summary: String,
}

/// Query plus the collaborators a run needs.
pub struct Session {
    query: String,
    oracle: Arc<dyn RelevanceOracle>,
    pricing: Arc<dyn PricingLookup>,
    config: FindConfig,
}

impl Session {
    pub fn new(
        query: &str,
        oracle: Arc<dyn RelevanceOracle>,
        pricing: Arc<dyn PricingLookup>,
        config: FindConfig,
    ) -> Result<Self> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query is empty".to_string()));
        }
        Ok(Self {
            query: query.to_string(),
            oracle,
            pricing,
            config,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn config(&self) -> &FindConfig {
        &self.config
    }

    async fn process_chunk(&self, system: &str, chunk: &Chunk) -> Result<ChunkFindings> {
        let reply = self
            .config
            .retry
            .run(|| self.oracle.complete(system, &chunk.text))
            .await?;
        let matches = parse_matches(&reply.content)?;
        debug!(chunk = chunk.index, matches = matches.len(), "chunk analyzed");
        Ok(ChunkFindings {
            matches,
            usage: self.usage_of(&reply),
        })
    }

    fn usage_of(&self, reply: &OracleReply) -> Usage {
        let cost = self
            .pricing
            .pricing(self.oracle.provider(), self.oracle.model())
            .and_then(|p| p.cost(reply.input_tokens, reply.output_tokens));
        Usage {
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            cost,
        }
    }

    /// Ask the oracle about every chunk of `text` and merge the answers.
    ///
    /// Fails only when every chunk failed, with the first chunk's error.
    pub async fn find_matches(&self, text: &str, status: &dyn StatusSink) -> Result<FindOutcome> {
        status.status("Analyzing page...");
        let chunks = chunk_text(text, self.config.chunk);
        info!(
            chunks = chunks.len(),
            concurrency = self.config.concurrency,
            provider = self.oracle.provider(),
            model = self.oracle.model(),
            "analyzing page"
        );

        let system = system_prompt(&self.query, self.config.max_items_per_chunk);
        let results = run_all(
            &chunks,
            self.config.concurrency,
            |chunk, _| self.process_chunk(&system, chunk),
            |done, total| status.status(&format!("Analyzing chunks {done}/{total}...")),
        )
        .await;

        let mut agg = aggregate(results);
        if !chunks.is_empty() && agg.failures.len() == chunks.len() {
            let (_, first) = agg.failures.swap_remove(0);
            return Err(first);
        }
        info!(
            matches = agg.matches.len(),
            failed = agg.failures.len(),
            input_tokens = agg.usage.input_tokens,
            output_tokens = agg.usage.output_tokens,
            "page analyzed"
        );
        Ok(FindOutcome {
            matches: agg.matches,
            usage: agg.usage,
            chunks: chunks.len(),
            failures: agg.failures,
        })
    }

    /// Full run against a live document: previous marks are cleared, new ones placed and
    /// the bar attached. The summary (or `Error: ...`) is also sent to `status`.
    pub async fn highlight<D: HostDocument>(
        &self,
        doc: &mut D,
        status: &dyn StatusSink,
    ) -> Result<HighlightOutcome<D>> {
        overlay::clear(doc)?;
        let text = doc.inner_text(doc.body());
        let find = match self.find_matches(&text, status).await {
            Ok(f) => f,
            Err(e) => {
                status.status(&format!("Error: {e}"));
                return Err(e);
            }
        };

        let summary = summarize(&find.matches, find.usage.cost);
        if find.matches.is_empty() {
            status.status(&summary);
            return Ok(HighlightOutcome {
                find,
                anchor: AnchorReport::default(),
                overlay: None,
                summary,
            });
        }

        let body = doc.body();
        let anchor = anchor_matches(doc, body, &find.matches);
        info!(
            found = anchor.found,
            total = find.matches.len(),
            markers = anchor.markers,
            "anchored matches"
        );
        let overlay = Overlay::inject(doc)?;
        status.status(&summary);
        Ok(HighlightOutcome {
            find,
            anchor,
            overlay,
            summary,
        })
    }
}

impl Session {
    async fn run_extract(&self, page: &Dom, status: &dyn StatusSink) -> Result<ExtractOutcome> {
        let markup = page.inner_html(page.body())?;
        let excerpt = truncate_chars(&markup, EXTRACT_HTML_CHARS);
        let truncated = excerpt.len() < markup.len();
        status.status("Asking AI for an extraction plan...");
        let user = user_prompt(&self.query, excerpt);
        let reply = self
            .config
            .retry
            .run(|| self.oracle.complete(EXTRACT_PROMPT, &user))
            .await?;
        let usage = self.usage_of(&reply);
        let plan = parse_plan(&reply.content)?;
        debug!(fields = plan.fields.len(), records = ?plan.records, "extraction plan");

        status.status("Running extraction...");
        let data = apply_plan(page.document(), &plan)?;
        let summary = summarize_extract(&data, usage.cost.unwrap_or(0.0));
        info!(
            truncated,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "extraction finished"
        );
        Ok(ExtractOutcome {
            plan,
            data,
            usage,
            truncated,
            summary,
        })
    }

    /// Ask the oracle for a selector plan over the page's leading markup and evaluate it.
    ///
    /// The summary (or `Error: ...`) is also sent to `status`.
    pub async fn extract(&self, page: &Dom, status: &dyn StatusSink) -> Result<ExtractOutcome> {
        match self.run_extract(page, status).await {
            Ok(out) => {
                status.status(&out.summary);
                Ok(out)
            }
            Err(e) => {
                status.status(&format!("Error: {e}"));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagemark_core::{NoPricing, Pricing};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type Script = Box<dyn Fn(&str, usize) -> Result<String> + Send + Sync>;

    /// Oracle answering from a closure of (chunk text, call number).
    struct ScriptedOracle {
        script: Script,
        calls: AtomicUsize,
    }

    impl ScriptedOracle {
        fn new(f: impl Fn(&str, usize) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                script: Box::new(f),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl RelevanceOracle for ScriptedOracle {
        fn provider(&self) -> &'static str {
            "openai"
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, system: &str, user: &str) -> Result<OracleReply> {
            assert!(system.contains("User is interested in"));
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let content = (self.script)(user, n)?;
            Ok(OracleReply {
                content,
                input_tokens: 1000,
                output_tokens: 100,
            })
        }
    }

    struct FixedPricing;

    impl PricingLookup for FixedPricing {
        fn pricing(&self, provider: &str, model: &str) -> Option<Pricing> {
            (provider == "openai" && model == "scripted").then_some(Pricing {
                input_per_mtok: Some(1.0),
                output_per_mtok: Some(10.0),
            })
        }
    }

    fn small_chunks() -> FindConfig {
        FindConfig {
            chunk: ChunkConfig {
                size: 30,
                overlap: 5,
            },
            retry: RetryPolicy::new(3, Duration::from_millis(10)),
            ..FindConfig::default()
        }
    }

    fn statuses() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |m: &str| seen.lock().unwrap().push(m.to_string())
        };
        (seen, sink)
    }

    #[test]
    fn prompt_embeds_query_and_item_cap() {
        let p = system_prompt("pricing", 15);
        assert!(p.contains("User is interested in: \"pricing\""));
        assert!(p.contains("Max 15 items per response"));
        assert!(p.contains(r#"{"matches": ["#));
    }

    #[test]
    fn summaries_list_nonzero_kinds_and_cost() {
        let set: MatchSet = [
            pagemark_core::Match::new("a b", MatchKind::Word),
            pagemark_core::Match::new("c d", MatchKind::Word),
            pagemark_core::Match::new("e f.", MatchKind::Sentence),
        ]
        .into_iter()
        .collect();
        assert_eq!(summarize(&set, 0.0), "Found 2 words, 1 sentence");
        assert_eq!(summarize(&set, 0.5), "Found 2 words, 1 sentence ($0.500)");
        assert_eq!(summarize(&MatchSet::new(), 0.002), "Nothing relevant found ($0.0020)");
    }

    #[test]
    fn empty_query_is_rejected() {
        let oracle = ScriptedOracle::new(|_, _| Ok(String::new()));
        let r = Session::new("  ", oracle, Arc::new(NoPricing), FindConfig::default());
        assert!(matches!(r, Err(Error::InvalidInput(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failures_still_produce_matches() {
        let oracle = ScriptedOracle::new(|chunk, _| {
            if chunk.contains("beta") {
                Err(Error::Llm("HTTP 400 Bad Request".to_string()))
            } else {
                Ok(r#"{"matches":[{"text":"alpha","type":"word"},"Alpha"]}"#.to_string())
            }
        });
        let session =
            Session::new("greek", oracle.clone(), Arc::new(FixedPricing), small_chunks()).unwrap();
        let (seen, sink) = statuses();
        let text = "alpha alpha alpha alpha\n\nbeta beta beta beta beta\n\nalpha again here";
        let out = session.find_matches(text, &sink).await.unwrap();

        assert_eq!(out.chunks, 3);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].0, 1);
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches.as_slice()[0].kind, MatchKind::Word);
        // Fatal error: one call per chunk.
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
        assert_eq!(out.usage.input_tokens, 2000);
        // 2 chunks x (1000 in @ $1 + 100 out @ $10 per Mtok).
        assert!((out.usage.cost - 0.004).abs() < 1e-12);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], "Analyzing page...");
        assert_eq!(seen.last().unwrap(), "Analyzing chunks 3/3...");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let oracle = ScriptedOracle::new(|_, n| {
            if n < 2 {
                Err(Error::Llm("HTTP 503 Service Unavailable".to_string()))
            } else {
                Ok(r#"{"matches":["the answer"]}"#.to_string())
            }
        });
        let session =
            Session::new("q", oracle.clone(), Arc::new(NoPricing), small_chunks()).unwrap();
        let out = session.find_matches("the answer", &|_: &str| {}).await.unwrap();
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.usage.cost, 0.0);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn all_chunks_failing_surfaces_the_first_error() {
        let oracle = ScriptedOracle::new(|chunk, _| {
            Err(Error::Llm(format!("invalid x-api-key for {}", &chunk[..4])))
        });
        let session = Session::new("q", oracle, Arc::new(NoPricing), small_chunks()).unwrap();
        let e = session
            .find_matches(
                "aaaa one two three four five\n\nbbbb six seven eight nine",
                &|_: &str| {},
            )
            .await
            .unwrap_err();
        assert!(e.to_string().contains("aaaa"), "{e}");
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_replies_count_as_failures() {
        let oracle = ScriptedOracle::new(|_, _| Ok("I could not find anything.".to_string()));
        let session = Session::new("q", oracle, Arc::new(NoPricing), small_chunks()).unwrap();
        let e = session.find_matches("text", &|_: &str| {}).await.unwrap_err();
        assert!(matches!(e, Error::Parse(_)));
    }

    #[tokio::test]
    async fn highlight_marks_page_and_attaches_bar() {
        let oracle = ScriptedOracle::new(|_, _| {
            Ok("```json\n{\"matches\":[{\"text\":\"cat\",\"type\":\"word\"},{\"text\":\"zebra\",\"type\":\"word\"}]}\n```".to_string())
        });
        let session =
            Session::new("animals", oracle, Arc::new(FixedPricing), FindConfig::default()).unwrap();
        let mut doc = Dom::parse("<p>The cat sat. The cat ran.</p>");
        let before = doc.inner_text(doc.body());
        let (seen, sink) = statuses();

        let out = session.highlight(&mut doc, &sink).await.unwrap();
        assert_eq!(out.anchor.found, 1);
        assert_eq!(out.anchor.markers, 2);
        assert_eq!(out.summary, "Found 2 words ($0.0020)");
        assert_eq!(seen.lock().unwrap().last().unwrap(), &out.summary);
        let overlay = out.overlay.unwrap();
        assert_eq!(overlay.counter_text(&doc), "1 of 2");

        overlay.close(&mut doc).unwrap();
        assert_eq!(doc.inner_text(doc.body()), before);
    }

    #[tokio::test]
    async fn highlight_with_nothing_found_leaves_page_alone() {
        let oracle = ScriptedOracle::new(|_, _| Ok(r#"{"matches":[]}"#.to_string()));
        let session =
            Session::new("q", oracle, Arc::new(NoPricing), FindConfig::default()).unwrap();
        let mut doc = Dom::parse("<p>plain</p>");
        let html = doc.to_html().unwrap();
        let out = session.highlight(&mut doc, &|_: &str| {}).await.unwrap();
        assert_eq!(out.summary, "Nothing relevant found");
        assert!(out.overlay.is_none());
        assert_eq!(doc.to_html().unwrap(), html);
    }

    #[tokio::test]
    async fn highlight_reports_errors_to_the_sink() {
        let oracle = ScriptedOracle::new(|_, _| Err(Error::Llm("HTTP 401 Unauthorized".to_string())));
        let session =
            Session::new("q", oracle, Arc::new(NoPricing), FindConfig::default()).unwrap();
        let mut doc = Dom::parse("<p>plain</p>");
        let (seen, sink) = statuses();
        assert!(session.highlight(&mut doc, &sink).await.is_err());
        assert!(seen.lock().unwrap().last().unwrap().starts_with("Error: "));
    }

    /// Oracle that answers every call with one fixed plan and records the user prompt.
    struct PlanOracle {
        reply: String,
        calls: AtomicUsize,
        last_user: Mutex<String>,
    }

    impl PlanOracle {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                last_user: Mutex::new(String::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl RelevanceOracle for PlanOracle {
        fn provider(&self) -> &'static str {
            "openai"
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, system: &str, user: &str) -> Result<OracleReply> {
            assert_eq!(system, EXTRACT_PROMPT);
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_user.lock().unwrap() = user.to_string();
            Ok(OracleReply {
                content: self.reply.clone(),
                input_tokens: 1000,
                output_tokens: 100,
            })
        }
    }

    #[tokio::test]
    async fn extract_plans_over_page_markup_and_evaluates_the_plan() {
        let oracle = PlanOracle::new(r#"{"records": "li", "fields": [{"name": "name"}]}"#);
        let session = Session::new(
            "fruit names",
            oracle.clone(),
            Arc::new(FixedPricing),
            FindConfig::default(),
        )
        .unwrap();
        let page = Dom::parse("<ul><li>Apple</li><li>Pear</li></ul>");
        let (seen, sink) = statuses();
        let out = session.extract(&page, &sink).await.unwrap();

        assert_eq!(
            out.data,
            serde_json::json!([{"name": "Apple"}, {"name": "Pear"}])
        );
        assert!(!out.truncated);
        assert_eq!(out.usage.input_tokens, 1000);
        assert_eq!(out.summary, "Extracted 2 records ($0.0020)");
        let user = oracle.last_user.lock().unwrap().clone();
        assert!(user.starts_with("Extract: \"fruit names\""), "{user}");
        assert!(user.ends_with("<ul><li>Apple</li><li>Pear</li></ul>"), "{user}");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.first().map(String::as_str), Some("Asking AI for an extraction plan..."));
        assert_eq!(seen.last(), Some(&out.summary));
    }

    #[tokio::test]
    async fn extract_cuts_long_markup_and_does_not_retry_bad_plans() {
        let page = Dom::parse(&format!("<p>{}</p>", "a".repeat(40_000)));

        let oracle = PlanOracle::new(r#"{"fields": [{"name": "paras", "selector": "p"}]}"#);
        let session =
            Session::new("paragraphs", oracle.clone(), Arc::new(NoPricing), small_chunks()).unwrap();
        let out = session.extract(&page, &|_: &str| {}).await.unwrap();
        assert!(out.truncated);
        assert_eq!(out.summary, "Extracted 1 value");
        assert!(oracle.last_user.lock().unwrap().chars().count() < EXTRACT_HTML_CHARS + 100);

        let oracle = PlanOracle::new("const links = document.querySelectorAll('a');");
        let session =
            Session::new("links", oracle.clone(), Arc::new(NoPricing), small_chunks()).unwrap();
        let (seen, sink) = statuses();
        let err = session.extract(&page, &sink).await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)), "{err}");
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
        assert!(seen.lock().unwrap().last().unwrap().starts_with("Error: "));
    }
}
