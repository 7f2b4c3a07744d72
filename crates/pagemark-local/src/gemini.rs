use crate::provider::{
    decode_error, status_error, transport_error, ApiError, Provider, LLM_TIMEOUT,
};
use pagemark_core::{Error, OracleReply, RelevanceOracle, Result};
use serde::{Deserialize, Serialize};

const LABEL: &str = "gemini generateContent";

/// Gemini has no separate system slot on `v1`; the system prompt is prepended to the chunk.
#[derive(Debug, Clone)]
pub struct GeminiOracle {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiOracle {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn from_env(client: reqwest::Client, model: String) -> Result<Self> {
        let p = Provider::Google;
        Ok(Self::new(
            client,
            p.base_url_from_env(),
            p.require_api_key()?,
            model,
        ))
    }

    fn endpoint(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&format!(
            "{}/v1/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        ))
        .map_err(|e| Error::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl RelevanceOracle for GeminiOracle {
    fn provider(&self) -> &'static str {
        Provider::Google.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<OracleReply> {
        let text = format!("{system}\n\n{user}");
        let req = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: &text }],
            }],
        };

        let resp = self
            .client
            .post(self.endpoint()?)
            .timeout(LLM_TIMEOUT)
            .json(&req)
            .send()
            .await
            .map_err(|e| transport_error(LABEL, e))?;
        if !resp.status().is_success() {
            return Err(status_error(LABEL, resp).await);
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| decode_error(LABEL, e))?;
        if let Some(e) = parsed.error {
            return Err(Error::Llm(format!("{LABEL}: {}", e.message)));
        }
        let content = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| Error::Llm(format!("{LABEL} returned no candidates")))?;
        let usage = parsed.usage_metadata.unwrap_or_default();
        Ok(OracleReply {
            content,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        })
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}
