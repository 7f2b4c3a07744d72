use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pagemark_core::{ElementSpec, HostDocument, MatchKind, NoPricing, PricingLookup};
use pagemark_local::aggregate::{parse_matches, MatchSet};
use pagemark_local::catalog::{CatalogSource, CATALOG_TTL, CATALOG_URL};
use pagemark_local::dispatch::MAX_CONCURRENT_CHUNKS;
use pagemark_local::fetch::{fetch_page, http_client, DEFAULT_MAX_BYTES};
use pagemark_local::overlay::STYLESHEET;
use pagemark_local::retry::{INITIAL_RETRY_DELAY_MS, MAX_RETRIES};
use pagemark_local::segment::{CHUNK_OVERLAP, CHUNK_SIZE};
use pagemark_local::session::MAX_ITEMS_PER_CHUNK;
use pagemark_local::{
    anchor_matches, build_oracle, chunk_text, load_catalog, CatalogCache, ChunkConfig, Dom,
    FindConfig, Overlay, Provider, RetryPolicy, Session,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod interactive;

#[derive(Parser, Debug)]
#[command(name = "pagemark")]
#[command(about = "Find, highlight and extract the parts of a page that match a query", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask a language model which parts of a page match a query, then mark them.
    Find(FindCmd),
    /// Ask a language model for a CSS selector plan and extract structured data with it.
    Extract(ExtractCmd),
    /// Split page text into the chunks a find run would send (offline).
    Chunk(ChunkCmd),
    /// Mark a JSON list of matches into a page and attach the navigation bar (offline).
    Mark(MarkCmd),
    /// Remove every marker and navigation bar from a page.
    Clear(ClearCmd),
    /// List catalog models with pricing.
    Models(ModelsCmd),
    /// Diagnose configuration (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct PageArgs {
    /// Local HTML file. Without --file or --url the page is read from stdin.
    #[arg(long, conflicts_with = "url")]
    file: Option<PathBuf>,
    /// http(s) URL to fetch.
    #[arg(long)]
    url: Option<String>,
    /// Byte cap for --url fetches.
    #[arg(long, default_value_t = DEFAULT_MAX_BYTES)]
    max_bytes: u64,
}

#[derive(clap::Args, Debug)]
struct CatalogArgs {
    /// Model catalog location (JSON).
    #[arg(long, env = "PAGEMARK_CATALOG_URL", default_value = CATALOG_URL)]
    catalog_url: String,
    /// Cache directory (default: the platform cache dir + `/pagemark`).
    #[arg(long, env = "PAGEMARK_CACHE_DIR")]
    cache_dir: Option<PathBuf>,
}

impl CatalogArgs {
    fn cache_root(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }
}

#[derive(clap::Args, Debug)]
struct OracleArgs {
    /// LLM provider. Allowed: openai, anthropic, google
    #[arg(long, env = "PAGEMARK_PROVIDER", default_value = "anthropic")]
    provider: String,
    /// Model id (default: the catalog's pick for the provider).
    #[arg(long, env = "PAGEMARK_MODEL")]
    model: Option<String>,
    /// Retries per request on transient provider errors.
    #[arg(long, default_value_t = MAX_RETRIES)]
    max_retries: u32,
    /// First retry delay (doubles on each retry).
    #[arg(long, default_value_t = INITIAL_RETRY_DELAY_MS)]
    retry_delay_ms: u64,
    /// Skip the model catalog (no pricing; built-in default models).
    #[arg(long)]
    no_catalog: bool,
    #[command(flatten)]
    catalog: CatalogArgs,
}

impl OracleArgs {
    fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }
}

#[derive(clap::Args, Debug)]
struct FindCmd {
    /// What the reader is interested in.
    query: String,
    #[command(flatten)]
    page: PageArgs,
    #[command(flatten)]
    oracle: OracleArgs,
    /// Chunks analyzed at once.
    #[arg(long, env = "PAGEMARK_CONCURRENCY", default_value_t = MAX_CONCURRENT_CHUNKS)]
    concurrency: usize,
    /// Max chars per chunk.
    #[arg(long, default_value_t = CHUNK_SIZE)]
    chunk_size: usize,
    /// Chars shared by consecutive windows of an oversized paragraph.
    #[arg(long, default_value_t = CHUNK_OVERLAP)]
    chunk_overlap: usize,
    /// Write the highlighted HTML here.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Browse the markers from stdin (`next`, `prev`, `filter <kind>`, `close`, `quit`).
    #[arg(long)]
    interactive: bool,
    /// Don't print progress lines to stderr.
    #[arg(long)]
    quiet: bool,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct ExtractCmd {
    /// What to pull out of the page, e.g. "product names and prices".
    query: String,
    #[command(flatten)]
    page: PageArgs,
    #[command(flatten)]
    oracle: OracleArgs,
    /// Write the extracted JSON here.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Don't print progress lines to stderr.
    #[arg(long)]
    quiet: bool,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct ChunkCmd {
    #[command(flatten)]
    page: PageArgs,
    /// Treat the input as plain text instead of HTML.
    #[arg(long)]
    plain: bool,
    #[arg(long, default_value_t = CHUNK_SIZE)]
    chunk_size: usize,
    #[arg(long, default_value_t = CHUNK_OVERLAP)]
    chunk_overlap: usize,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct MarkCmd {
    #[command(flatten)]
    page: PageArgs,
    /// Matches to place: `{"matches": [...]}` or a bare array of strings / `{text, type}` objects.
    #[arg(long)]
    matches: PathBuf,
    /// Write the marked HTML here.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct ClearCmd {
    #[command(flatten)]
    page: PageArgs,
    /// Write the cleaned HTML here.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct ModelsCmd {
    #[command(flatten)]
    catalog: CatalogArgs,
    /// Only list this provider's models.
    #[arg(long)]
    provider: Option<String>,
    /// Ignore the on-disk cache.
    #[arg(long)]
    no_cache: bool,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

const STYLE_CLASS: &str = "pagemark-style";

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pagemark")
}

fn is_text(output: &str) -> bool {
    output.eq_ignore_ascii_case("text")
}

/// Load `KEY=VALUE` lines from `PAGEMARK_ENV_FILE` without overriding the process env.
fn load_env_file() {
    let Ok(p) = std::env::var("PAGEMARK_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim();
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
        }
    }
}

fn init_logging() {
    let spec = ["PAGEMARK_LOG", "RUST_LOG"]
        .iter()
        .find_map(|k| std::env::var(k).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| "warn".to_string());
    let filter = EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

struct PageSource {
    html: String,
    origin: String,
}

async fn read_page(args: &PageArgs) -> Result<PageSource> {
    if let Some(url) = &args.url {
        let client = http_client()?;
        let page = fetch_page(&client, url, args.max_bytes).await?;
        if page.truncated {
            warn!(url = %page.final_url, max_bytes = args.max_bytes, "page truncated");
        }
        return Ok(PageSource {
            html: page.text_lossy(),
            origin: page.final_url,
        });
    }
    if let Some(path) = &args.file {
        let html = std::fs::read_to_string(path)
            .with_context(|| format!("read page {}", path.display()))?;
        return Ok(PageSource {
            html,
            origin: path.display().to_string(),
        });
    }
    let mut html = String::new();
    std::io::stdin()
        .read_to_string(&mut html)
        .context("read page from stdin")?;
    Ok(PageSource {
        html,
        origin: "-".to_string(),
    })
}

fn write_output(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

/// Put the marker/bar styles in `<head>` once.
fn install_stylesheet(dom: &mut Dom) -> Result<()> {
    let host = dom.head().unwrap_or_else(|| dom.body());
    if !dom.elements_with_class(host, STYLE_CLASS).is_empty() {
        return Ok(());
    }
    let style = dom.create_element(&ElementSpec::new("style").class(STYLE_CLASS));
    dom.set_text_content(style, STYLESHEET)?;
    dom.append_child(host, style)?;
    Ok(())
}

fn remove_stylesheet(dom: &mut Dom) {
    for node in dom.elements_with_class(dom.root(), STYLE_CLASS) {
        dom.remove(node);
    }
}

fn counts_json(matches: &MatchSet) -> serde_json::Value {
    let mut m = serde_json::Map::new();
    for kind in MatchKind::ALL {
        m.insert(kind.as_str().to_string(), matches.count(kind).into());
    }
    serde_json::Value::Object(m)
}

/// Finish a page-producing command: write `--out`, or carry the HTML in the report.
fn emit_page(
    dom: &Dom,
    out: Option<&Path>,
    output: &str,
    mut payload: serde_json::Value,
    text_lines: Vec<String>,
) -> Result<()> {
    let html = dom.to_html()?;
    if let Some(path) = out {
        write_output(path, &html)?;
        payload["out"] = serde_json::Value::String(path.display().to_string());
    } else {
        payload["out"] = serde_json::Value::Null;
    }
    if is_text(output) {
        if out.is_some() {
            for line in text_lines {
                println!("{line}");
            }
        } else {
            print!("{html}");
        }
    } else {
        if out.is_none() {
            payload["html"] = serde_json::Value::String(html);
        }
        println!("{payload}");
    }
    Ok(())
}

struct ModelChoice {
    pricing: Arc<dyn PricingLookup>,
    model: String,
    source: Option<CatalogSource>,
}

async fn choose_model(
    client: &reqwest::Client,
    provider: Provider,
    args: &OracleArgs,
) -> ModelChoice {
    let fallback = || {
        args.model
            .clone()
            .unwrap_or_else(|| provider.fallback_model().to_string())
    };
    if args.no_catalog {
        return ModelChoice {
            pricing: Arc::new(NoPricing),
            model: fallback(),
            source: None,
        };
    }
    let cache = CatalogCache::new(args.catalog.cache_root());
    match load_catalog(client, &args.catalog.catalog_url, Some(&cache), CATALOG_TTL).await {
        Ok(loaded) => {
            let model = args
                .model
                .clone()
                .unwrap_or_else(|| loaded.catalog.resolve_model(provider));
            ModelChoice {
                pricing: Arc::new(loaded.catalog),
                model,
                source: Some(loaded.source),
            }
        }
        Err(e) => {
            warn!(error = %e, "model catalog unavailable, costs will not be priced");
            ModelChoice {
                pricing: Arc::new(NoPricing),
                model: fallback(),
                source: None,
            }
        }
    }
}

fn status_printer(quiet: bool) -> impl Fn(&str) + Send + Sync {
    move |m: &str| {
        if !quiet {
            eprintln!("{m}");
        }
    }
}

async fn run_find(args: FindCmd) -> Result<()> {
    let provider: Provider = args.oracle.provider.parse()?;
    if args.interactive && args.page.file.is_none() && args.page.url.is_none() {
        anyhow::bail!("--interactive reads commands from stdin; pass the page with --file or --url");
    }
    let client = http_client()?;
    let choice = choose_model(&client, provider, &args.oracle).await;
    let oracle = build_oracle(client, provider, choice.model.clone())?;

    let config = FindConfig {
        chunk: ChunkConfig {
            size: args.chunk_size,
            overlap: args.chunk_overlap,
        },
        retry: args.oracle.retry(),
        concurrency: args.concurrency,
        max_items_per_chunk: MAX_ITEMS_PER_CHUNK,
    };
    let session = Session::new(&args.query, oracle, choice.pricing, config)?;

    let page = read_page(&args.page).await?;
    let mut dom = Dom::parse(&page.html);
    let status = status_printer(args.quiet);
    let outcome = session.highlight(&mut dom, &status).await?;

    let mut overlay = outcome.overlay;
    if overlay.is_some() {
        install_stylesheet(&mut dom)?;
    }
    if args.interactive {
        if let Some(ov) = overlay.take() {
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            overlay = interactive::run(&mut dom, ov, stdin.lock(), &mut stdout)?;
            if overlay.is_none() {
                remove_stylesheet(&mut dom);
            }
        }
    }

    let find = &outcome.find;
    let failures: Vec<serde_json::Value> = find
        .failures
        .iter()
        .map(|(i, e)| serde_json::json!({"chunk": i, "error": e.to_string()}))
        .collect();
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "find",
        "ok": true,
        "query": session.query(),
        "source": page.origin,
        "provider": provider.as_str(),
        "model": choice.model,
        "catalog": choice.source,
        "summary": outcome.summary,
        "counts": counts_json(&find.matches),
        "found": outcome.anchor.found,
        "anchor": outcome.anchor,
        "matches": find.matches.as_slice(),
        "usage": find.usage,
        "chunks": find.chunks,
        "chunks_failed": find.failures.len(),
        "failures": failures,
        "counter": overlay.as_ref().map(|o| o.counter_text(&dom)),
    });

    let mut lines = vec![outcome.summary.clone()];
    for m in find.matches.iter() {
        lines.push(format!("- [{}] {}", m.kind, m.text));
    }
    if !find.failures.is_empty() {
        lines.push(format!(
            "{} of {} chunks failed",
            find.failures.len(),
            find.chunks
        ));
    }
    emit_page(&dom, args.out.as_deref(), &args.output, payload, lines)
}

async fn run_extract(args: ExtractCmd) -> Result<()> {
    let provider: Provider = args.oracle.provider.parse()?;
    let client = http_client()?;
    let choice = choose_model(&client, provider, &args.oracle).await;
    let oracle = build_oracle(client, provider, choice.model.clone())?;
    let config = FindConfig {
        retry: args.oracle.retry(),
        ..FindConfig::default()
    };
    let session = Session::new(&args.query, oracle, choice.pricing, config)?;

    let page = read_page(&args.page).await?;
    let dom = Dom::parse(&page.html);
    let status = status_printer(args.quiet);
    let outcome = session.extract(&dom, &status).await?;

    let pretty = serde_json::to_string_pretty(&outcome.data)?;
    if let Some(path) = &args.out {
        write_output(path, &pretty)?;
    }
    if is_text(&args.output) {
        if args.out.is_some() {
            println!("{}", outcome.summary);
        } else {
            println!("{pretty}");
        }
        return Ok(());
    }
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "extract",
        "ok": true,
        "query": session.query(),
        "source": page.origin,
        "provider": provider.as_str(),
        "model": choice.model,
        "catalog": choice.source,
        "summary": outcome.summary,
        "plan": outcome.plan,
        "truncated": outcome.truncated,
        "usage": outcome.usage,
        "out": args.out.as_ref().map(|p| p.display().to_string()),
        "data": outcome.data,
    });
    println!("{payload}");
    Ok(())
}

async fn run_chunk(args: ChunkCmd) -> Result<()> {
    let page = read_page(&args.page).await?;
    let text = if args.plain {
        page.html
    } else {
        let dom = Dom::parse(&page.html);
        dom.inner_text(dom.body())
    };
    let chunks = chunk_text(
        &text,
        ChunkConfig {
            size: args.chunk_size,
            overlap: args.chunk_overlap,
        },
    );
    if is_text(&args.output) {
        for c in &chunks {
            println!("--- chunk {} ({} chars)", c.index, c.text.chars().count());
            println!("{}", c.text);
        }
        return Ok(());
    }
    let items: Vec<serde_json::Value> = chunks
        .iter()
        .map(|c| {
            serde_json::json!({
                "index": c.index,
                "chars": c.text.chars().count(),
                "text": c.text,
            })
        })
        .collect();
    let v = serde_json::json!({
        "schema_version": 1,
        "kind": "chunk",
        "ok": true,
        "source": page.origin,
        "chars": text.chars().count(),
        "count": chunks.len(),
        "chunks": items,
    });
    println!("{v}");
    Ok(())
}

fn read_matches(path: &Path) -> Result<MatchSet> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read matches {}", path.display()))?;
    let trimmed = raw.trim();
    let wrapped;
    let content = if trimmed.starts_with('[') {
        wrapped = format!("{{\"matches\": {trimmed}}}");
        wrapped.as_str()
    } else {
        trimmed
    };
    Ok(parse_matches(content)?.into_iter().collect())
}

async fn run_mark(args: MarkCmd) -> Result<()> {
    let matches = read_matches(&args.matches)?;
    let page = read_page(&args.page).await?;
    let mut dom = Dom::parse(&page.html);
    pagemark_local::clear(&mut dom)?;
    let body = dom.body();
    let report = anchor_matches(&mut dom, body, matches.iter());
    let overlay = Overlay::inject(&mut dom)?;
    if overlay.is_some() {
        install_stylesheet(&mut dom)?;
    }

    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "mark",
        "ok": true,
        "source": page.origin,
        "matches": matches.len(),
        "counts": counts_json(&matches),
        "anchor": report,
        "counter": overlay.as_ref().map(|o| o.counter_text(&dom)),
        "filters": overlay.as_ref().map(|o| o.filters()),
    });
    let lines = vec![format!(
        "marked {} of {} matches ({} markers)",
        report.found,
        matches.len(),
        report.markers
    )];
    emit_page(&dom, args.out.as_deref(), &args.output, payload, lines)
}

async fn run_clear(args: ClearCmd) -> Result<()> {
    let page = read_page(&args.page).await?;
    let mut dom = Dom::parse(&page.html);
    let removed = pagemark_local::clear(&mut dom)?;
    remove_stylesheet(&mut dom);
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "clear",
        "ok": true,
        "source": page.origin,
        "removed": removed,
    });
    let lines = vec![format!("removed {removed} markers")];
    emit_page(&dom, args.out.as_deref(), &args.output, payload, lines)
}

async fn run_models(args: ModelsCmd) -> Result<()> {
    let filter = args
        .provider
        .as_deref()
        .map(str::parse::<Provider>)
        .transpose()?;
    let client = http_client()?;
    let cache = (!args.no_cache).then(|| CatalogCache::new(args.catalog.cache_root()));
    let loaded = load_catalog(&client, &args.catalog.catalog_url, cache.as_ref(), CATALOG_TTL).await?;
    let catalog = &loaded.catalog;

    let models: Vec<serde_json::Value> = catalog
        .models
        .iter()
        .filter(|m| filter.map_or(true, |p| m.provider == p.as_str()))
        .map(|m| {
            serde_json::json!({
                "provider": m.provider,
                "model": m.model,
                "input_price_per_mtok": m.input_price_per_mtok,
                "output_price_per_mtok": m.output_price_per_mtok,
                "context_window": m.context_window,
                "category": catalog.category(&m.provider, &m.model),
            })
        })
        .collect();
    let mut defaults = serde_json::Map::new();
    for p in Provider::ALL {
        if filter.map_or(true, |f| f == p) {
            defaults.insert(p.as_str().to_string(), catalog.resolve_model(p).into());
        }
    }

    if is_text(&args.output) {
        for m in &models {
            let price = |v: &serde_json::Value| {
                v.as_f64()
                    .map(|p| format!("${p}"))
                    .unwrap_or_else(|| "?".to_string())
            };
            let category = m["category"]
                .as_str()
                .map(|c| format!(" [{c}]"))
                .unwrap_or_default();
            println!(
                "{}/{}  in {}/Mtok  out {}/Mtok{}",
                m["provider"].as_str().unwrap_or("?"),
                m["model"].as_str().unwrap_or("?"),
                price(&m["input_price_per_mtok"]),
                price(&m["output_price_per_mtok"]),
                category,
            );
        }
        return Ok(());
    }
    let v = serde_json::json!({
        "schema_version": 1,
        "kind": "models",
        "ok": true,
        "url": args.catalog.catalog_url,
        "source": loaded.source,
        "models": models,
        "defaults": defaults,
        "recommended_highlight": catalog.recommended_highlight(),
    });
    println!("{v}");
    Ok(())
}

fn run_doctor(args: DoctorCmd) -> Result<()> {
    fn has_env(k: &str) -> bool {
        std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
    }

    let t0 = std::time::Instant::now();
    let cache_dir = std::env::var("PAGEMARK_CACHE_DIR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_cache_dir);

    let cache_ok = (|| -> Result<()> {
        std::fs::create_dir_all(&cache_dir)?;
        let scratch = cache_dir.join(format!(
            "pagemark-doctor-{}.scratch",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis()
        ));
        std::fs::write(&scratch, b"ok")?;
        let _ = std::fs::remove_file(&scratch);
        Ok(())
    })()
    .is_ok();

    let mut keys = serde_json::Map::new();
    let mut endpoints = serde_json::Map::new();
    for p in Provider::ALL {
        keys.insert(p.as_str().to_string(), p.api_key_from_env().is_some().into());
        endpoints.insert(p.as_str().to_string(), has_env(p.base_url_var()).into());
    }
    let provider = std::env::var("PAGEMARK_PROVIDER")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "anthropic".to_string());
    let provider_ok = provider.parse::<Provider>().is_ok();
    let provider_keyed = provider
        .parse::<Provider>()
        .ok()
        .is_some_and(|p| p.api_key_from_env().is_some());

    let checks = vec![
        serde_json::json!({
            "name": "cache_dir_writable",
            "ok": cache_ok,
            "message": if cache_ok { "cache dir is writable" } else { "cache dir is not writable" },
            "hint": if cache_ok { "" } else { "Set PAGEMARK_CACHE_DIR to a writable directory." },
        }),
        serde_json::json!({
            "name": "provider_configured",
            "ok": provider_ok && provider_keyed,
            "message": if !provider_ok {
                "unknown provider"
            } else if provider_keyed {
                "provider API key is set"
            } else {
                "provider API key is missing"
            },
            "hint": if provider_ok && provider_keyed {
                ""
            } else {
                "Set PAGEMARK_PROVIDER to openai, anthropic or google and export its API key."
            },
        }),
    ];
    let ok = checks.iter().all(|c| c["ok"].as_bool().unwrap_or(false));
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": ok,
        "name": "pagemark",
        "version": env!("CARGO_PKG_VERSION"),
        "platform": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
        "elapsed_ms": t0.elapsed().as_millis(),
        "configured": {
            "provider": provider,
            "api_keys": keys,
            "base_url_overrides": endpoints,
            "model": has_env("PAGEMARK_MODEL"),
            "catalog_url": has_env("PAGEMARK_CATALOG_URL"),
            "env_file": has_env("PAGEMARK_ENV_FILE"),
            "cache_dir": cache_dir.to_string_lossy().to_string(),
        },
        "checks": checks,
    });

    if is_text(&args.output) {
        println!("pagemark {} (ok={})", env!("CARGO_PKG_VERSION"), ok);
        println!(
            "cache_dir: {}",
            payload["configured"]["cache_dir"].as_str().unwrap_or("")
        );
        let key = |name: &str| {
            payload["configured"]["api_keys"][name]
                .as_bool()
                .unwrap_or(false)
        };
        println!(
            "api keys: openai={} anthropic={} google={}",
            key("openai"),
            key("anthropic"),
            key("google")
        );
        println!("checks:");
        if let Some(arr) = payload["checks"].as_array() {
            for c in arr {
                let name = c["name"].as_str().unwrap_or("?");
                let ok = c["ok"].as_bool().unwrap_or(false);
                println!("- {}: {}", name, if ok { "ok" } else { "fail" });
            }
        }
    } else {
        println!("{payload}");
    }
    Ok(())
}

fn run_version(args: VersionCmd) {
    let v = serde_json::json!({
        "schema_version": 1,
        "kind": "version",
        "ok": true,
        "name": "pagemark",
        "version": env!("CARGO_PKG_VERSION"),
    });
    if is_text(&args.output) {
        println!("pagemark {}", env!("CARGO_PKG_VERSION"));
    } else {
        println!("{v}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Find(args) => run_find(args).await?,
        Commands::Extract(args) => run_extract(args).await?,
        Commands::Chunk(args) => run_chunk(args).await?,
        Commands::Mark(args) => run_mark(args).await?,
        Commands::Clear(args) => run_clear(args).await?,
        Commands::Models(args) => run_models(args).await?,
        Commands::Doctor(args) => run_doctor(args)?,
        Commands::Version(args) => run_version(args),
    }
    Ok(())
}
