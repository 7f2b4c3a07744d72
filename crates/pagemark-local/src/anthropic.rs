use crate::provider::{
    decode_error, status_error, transport_error, ApiError, Provider, LLM_TIMEOUT,
};
use pagemark_core::{Error, OracleReply, RelevanceOracle, Result};
use serde::{Deserialize, Serialize};

const LABEL: &str = "anthropic messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicOracle {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicOracle {
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
        let p = Provider::Anthropic;
        Ok(Self::new(
            client,
            p.base_url_from_env(),
            p.require_api_key()?,
            model,
        ))
    }
}

#[async_trait::async_trait]
impl RelevanceOracle for AnthropicOracle {
    fn provider(&self) -> &'static str {
        Provider::Anthropic.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<OracleReply> {
        let req = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![UserMessage {
                role: "user",
                content: user,
            }],
        };

        let resp = self
            .client
            .post(format!(
                "{}/v1/messages",
                self.base_url.trim_end_matches('/')
            ))
            .timeout(LLM_TIMEOUT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&req)
            .send()
            .await
            .map_err(|e| transport_error(LABEL, e))?;
        if !resp.status().is_success() {
            return Err(status_error(LABEL, resp).await);
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| decode_error(LABEL, e))?;
        if let Some(e) = parsed.error {
            return Err(Error::Llm(format!("{LABEL}: {}", e.message)));
        }
        let content = parsed
            .content
            .into_iter()
            .find_map(|b| b.text)
            .ok_or_else(|| Error::Llm(format!("{LABEL} returned no text block")))?;
        let usage = parsed.usage.unwrap_or_default();
        Ok(OracleReply {
            content,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<UserMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
