//! Published model catalog: prices, context windows and per-provider recommendations.
//!
//! The catalog is cached on disk with a TTL; when a refresh fails, an expired copy is
//! still preferred over no catalog at all.

use crate::fetch::read_capped;
use crate::provider::Provider;
use pagemark_core::{Error, Pricing, PricingLookup, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const CATALOG_URL: &str =
    "https://raw.githubusercontent.com/adi-family/database/main/app/adi-highlighter/v1.json";
pub const CATALOG_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_CATALOG_BYTES: u64 = 4_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub input_price_per_mtok: Option<f64>,
    #[serde(default)]
    pub output_price_per_mtok: Option<f64>,
    #[serde(default)]
    pub context_window: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ModelInfo {
    pub fn pricing(&self) -> Pricing {
        Pricing {
            input_per_mtok: self.input_price_per_mtok,
            output_per_mtok: self.output_price_per_mtok,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCatalog {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
    #[serde(default)]
    pub recommended_smartest: Vec<ModelRef>,
    #[serde(default)]
    pub recommended_balanced: Vec<ModelRef>,
    #[serde(default)]
    pub recommended_cheapest: Vec<ModelRef>,
    /// Mode name (`highlight`, ...) to ranked recommendations.
    #[serde(default)]
    pub recommended_model: BTreeMap<String, Vec<ModelRef>>,
}

fn pick<'a>(list: &'a [ModelRef], provider: &str) -> Option<&'a str> {
    list.iter()
        .find(|r| r.provider == provider)
        .map(|r| r.model.as_str())
}

impl ModelCatalog {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Parse(format!("model catalog: {e}")))
    }

    pub fn models_for<'a>(&'a self, provider: &str) -> impl Iterator<Item = &'a ModelInfo> + 'a {
        let provider = provider.to_string();
        self.models.iter().filter(move |m| m.provider == provider)
    }

    pub fn find(&self, provider: &str, model: &str) -> Option<&ModelInfo> {
        self.models
            .iter()
            .find(|m| m.provider == provider && m.model == model)
    }

    /// Recommendation bucket a model belongs to, if any.
    pub fn category(&self, provider: &str, model: &str) -> Option<&'static str> {
        [
            ("smartest", &self.recommended_smartest),
            ("balanced", &self.recommended_balanced),
            ("cheapest", &self.recommended_cheapest),
        ]
        .into_iter()
        .find(|(_, list)| pick(list, provider) == Some(model))
        .map(|(name, _)| name)
    }

    /// Balanced, then smartest, then cheapest, then the first listed model.
    pub fn default_model(&self, provider: &str) -> Option<&str> {
        pick(&self.recommended_balanced, provider)
            .or_else(|| pick(&self.recommended_smartest, provider))
            .or_else(|| pick(&self.recommended_cheapest, provider))
            .or_else(|| self.models_for(provider).next().map(|m| m.model.as_str()))
    }

    /// First highlight recommendation whose model is actually listed.
    pub fn recommended_highlight(&self) -> Option<&ModelRef> {
        self.recommended_model
            .get("highlight")?
            .first()
            .filter(|r| self.find(&r.provider, &r.model).is_some())
    }

    /// Model to use for `provider`: the catalog default, else the built-in fallback.
    pub fn resolve_model(&self, provider: Provider) -> String {
        self.default_model(provider.as_str())
            .unwrap_or(provider.fallback_model())
            .to_string()
    }
}

impl PricingLookup for ModelCatalog {
    fn pricing(&self, provider: &str, model: &str) -> Option<Pricing> {
        self.find(provider, model).map(ModelInfo::pricing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSource {
    Cache,
    Network,
    StaleCache,
}

#[derive(Debug, Clone)]
pub struct LoadedCatalog {
    pub catalog: ModelCatalog,
    pub source: CatalogSource,
}

/// On-disk copy of fetched catalogs, keyed by URL.
#[derive(Debug, Clone)]
pub struct CatalogCache {
    root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CachedCatalog {
    pub bytes: Vec<u8>,
    pub fetched_at_epoch_s: u64,
}

impl CachedCatalog {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        now_epoch_s().saturating_sub(self.fetched_at_epoch_s) <= ttl.as_secs()
    }
}

fn now_epoch_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

impl CatalogCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn key(url: &str) -> String {
        let mut h = Sha256::new();
        h.update(b"catalog:");
        h.update(url.as_bytes());
        hex::encode(h.finalize())
    }

    fn paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let dir = self.root.join(&key[0..2]).join(&key[2..4]);
        let meta = dir.join(format!("{key}.json"));
        let body = dir.join(format!("{key}.bin"));
        (meta, body)
    }

    /// Cached copy regardless of age; callers decide on freshness.
    pub fn get(&self, url: &str) -> Result<Option<CachedCatalog>> {
        let (meta_p, body_p) = self.paths(&Self::key(url));
        if !meta_p.exists() || !body_p.exists() {
            return Ok(None);
        }
        let meta: serde_json::Value = serde_json::from_slice(
            &fs::read(&meta_p).map_err(|e| Error::Cache(e.to_string()))?,
        )
        .map_err(|e| Error::Cache(e.to_string()))?;
        let fetched_at_epoch_s = meta
            .get("fetched_at_epoch_s")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let bytes = fs::read(&body_p).map_err(|e| Error::Cache(e.to_string()))?;
        Ok(Some(CachedCatalog {
            bytes,
            fetched_at_epoch_s,
        }))
    }

    pub fn put(&self, url: &str, bytes: &[u8]) -> Result<()> {
        let (meta_p, body_p) = self.paths(&Self::key(url));
        if let Some(parent) = meta_p.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Cache(e.to_string()))?;
        }
        let meta = serde_json::json!({
            "schema_version": 1,
            "fetched_at_epoch_s": now_epoch_s(),
            "url": url,
        });
        fs::write(&body_p, bytes).map_err(|e| Error::Cache(e.to_string()))?;
        fs::write(
            &meta_p,
            serde_json::to_vec(&meta).map_err(|e| Error::Cache(e.to_string()))?,
        )
        .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }
}

async fn fetch_catalog_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let resp = client
        .get(url)
        .timeout(Duration::from_secs(20))
        .send()
        .await
        .map_err(|e| Error::Fetch(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Fetch(format!("model catalog HTTP {status}")));
    }
    let (bytes, truncated) = read_capped(resp, MAX_CATALOG_BYTES).await?;
    if truncated {
        return Err(Error::Fetch("model catalog exceeds size cap".to_string()));
    }
    Ok(bytes)
}

/// Load the catalog: fresh cache, else network (refreshing the cache), else stale cache.
pub async fn load_catalog(
    client: &reqwest::Client,
    url: &str,
    cache: Option<&CatalogCache>,
    ttl: Duration,
) -> Result<LoadedCatalog> {
    let cached = match cache.cloned() {
        Some(c) => {
            let url2 = url.to_string();
            tokio::task::spawn_blocking(move || c.get(&url2))
                .await
                .map_err(|e| Error::Cache(format!("cache get join failed: {e}")))?
                .unwrap_or_else(|e| {
                    warn!(error = %e, "ignoring unreadable catalog cache");
                    None
                })
        }
        None => None,
    };

    if let Some(hit) = cached.as_ref().filter(|c| c.is_fresh(ttl)) {
        match ModelCatalog::from_slice(&hit.bytes) {
            Ok(catalog) => {
                debug!(url, "model catalog from cache");
                return Ok(LoadedCatalog {
                    catalog,
                    source: CatalogSource::Cache,
                });
            }
            Err(e) => warn!(error = %e, "cached catalog is corrupt, refetching"),
        }
    }

    let network = match fetch_catalog_bytes(client, url).await {
        Ok(bytes) => ModelCatalog::from_slice(&bytes).map(|c| (c, bytes)),
        Err(e) => Err(e),
    };
    match network {
        Ok((catalog, bytes)) => {
            if let Some(c) = cache.cloned() {
                let url2 = url.to_string();
                let put = tokio::task::spawn_blocking(move || c.put(&url2, &bytes))
                    .await
                    .map_err(|e| Error::Cache(format!("cache put join failed: {e}")))?;
                if let Err(e) = put {
                    warn!(error = %e, "could not write catalog cache");
                }
            }
            Ok(LoadedCatalog {
                catalog,
                source: CatalogSource::Network,
            })
        }
        Err(e) => {
            let stale = cached.and_then(|c| ModelCatalog::from_slice(&c.bytes).ok());
            match stale {
                Some(catalog) => {
                    warn!(error = %e, "catalog refresh failed, using stale copy");
                    Ok(LoadedCatalog {
                        catalog,
                        source: CatalogSource::StaleCache,
                    })
                }
                None => Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::test_support::serve;
    use axum::{http::StatusCode, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SAMPLE: &str = r#"{
      "providers": [{"id": "openai"}],
      "models": [
        {"provider": "openai", "model": "gpt-a", "inputPricePerMtok": 0.15, "outputPricePerMtok": 0.6, "contextWindow": 128000, "tags": ["fast"]},
        {"provider": "openai", "model": "gpt-b", "inputPricePerMtok": 2.5, "outputPricePerMtok": 10},
        {"provider": "anthropic", "model": "claude-x", "inputPricePerMtok": 3, "outputPricePerMtok": 15},
        {"provider": "google", "model": "gem-free", "inputPricePerMtok": 0, "outputPricePerMtok": 0}
      ],
      "recommendedSmartest": [{"provider": "openai", "model": "gpt-b"}],
      "recommendedCheapest": [{"provider": "openai", "model": "gpt-a"}],
      "recommendedBalanced": [],
      "recommendedModel": {"highlight": [{"provider": "anthropic", "model": "claude-x"}]}
    }"#;

    fn sample() -> ModelCatalog {
        ModelCatalog::from_slice(SAMPLE.as_bytes()).unwrap()
    }

    #[test]
    fn default_model_prefers_balanced_then_smartest_then_cheapest_then_first() {
        let c = sample();
        assert_eq!(c.default_model("openai"), Some("gpt-b"));
        assert_eq!(c.default_model("anthropic"), Some("claude-x"));
        assert_eq!(c.default_model("mistral"), None);
        assert_eq!(c.resolve_model(Provider::Google), "gem-free");
        assert_eq!(
            ModelCatalog::default().resolve_model(Provider::OpenAi),
            Provider::OpenAi.fallback_model()
        );
        assert_eq!(c.category("openai", "gpt-a"), Some("cheapest"));
        assert_eq!(c.category("anthropic", "claude-x"), None);
        assert_eq!(
            c.recommended_highlight(),
            Some(&ModelRef {
                provider: "anthropic".to_string(),
                model: "claude-x".to_string()
            })
        );
    }

    #[test]
    fn picks_borrow_the_catalog_not_the_provider_name() {
        let c = sample();
        let (picked, listed) = {
            let name = String::from("google");
            let listed: Vec<&str> = c.models_for(&name).map(|m| m.model.as_str()).collect();
            (c.default_model(&name), listed)
        };
        assert_eq!(picked, Some("gem-free"));
        assert_eq!(listed, ["gem-free"]);
        assert_eq!(c.models_for("openai").count(), 2);
    }

    #[test]
    fn pricing_lookup_and_free_models() {
        let c = sample();
        let p = c.pricing("anthropic", "claude-x").unwrap();
        let cost = p.cost(1_000_000, 1_000_000).unwrap();
        assert!((cost - 18.0).abs() < 1e-9);
        assert!(c.pricing("google", "gem-free").unwrap().cost(10, 10).is_none());
        assert!(c.pricing("openai", "nope").is_none());
        assert_eq!(c.find("openai", "gpt-a").unwrap().context_window, Some(128_000));
    }

    #[tokio::test]
    async fn caches_then_serves_stale_copy_when_network_fails() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let app = Router::new()
            .route(
                "/v1.json",
                get(move || {
                    let hits = hits2.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        SAMPLE
                    }
                }),
            )
            .route("/down.json", get(|| async { StatusCode::BAD_GATEWAY }));
        let addr = serve(app).await;
        let client = reqwest::Client::new();
        let tmp = tempfile::tempdir().unwrap();
        let cache = CatalogCache::new(tmp.path().to_path_buf());

        let url = format!("http://{addr}/v1.json");
        let first = load_catalog(&client, &url, Some(&cache), CATALOG_TTL).await.unwrap();
        assert_eq!(first.source, CatalogSource::Network);
        let second = load_catalog(&client, &url, Some(&cache), CATALOG_TTL).await.unwrap();
        assert_eq!(second.source, CatalogSource::Cache);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Plant an expired entry for an unreachable URL.
        let down = format!("http://{addr}/down.json");
        cache.put(&down, SAMPLE.as_bytes()).unwrap();
        let (meta_p, _) = cache.paths(&CatalogCache::key(&down));
        std::fs::write(&meta_p, br#"{"schema_version":1,"fetched_at_epoch_s":0}"#).unwrap();
        let stale = load_catalog(&client, &down, Some(&cache), CATALOG_TTL).await.unwrap();
        assert_eq!(stale.source, CatalogSource::StaleCache);
        assert_eq!(stale.catalog.models.len(), 4);

        let e = load_catalog(&client, &down, None, CATALOG_TTL).await.unwrap_err();
        assert!(e.to_string().contains("502"), "{e}");
    }
}
