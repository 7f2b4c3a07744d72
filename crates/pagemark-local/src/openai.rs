use crate::provider::{
    decode_error, status_error, transport_error, ApiError, Provider, LLM_TIMEOUT,
};
use pagemark_core::{Error, OracleReply, RelevanceOracle, Result};
use serde::{Deserialize, Serialize};

const LABEL: &str = "openai chat.completions";

#[derive(Debug, Clone)]
pub struct OpenAiOracle {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiOracle {
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
        let p = Provider::OpenAi;
        Ok(Self::new(
            client,
            p.base_url_from_env(),
            p.require_api_key()?,
            model,
        ))
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait::async_trait]
impl RelevanceOracle for OpenAiOracle {
    fn provider(&self) -> &'static str {
        Provider::OpenAi.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<OracleReply> {
        let req = ChatCompletionsRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };

        let resp = self
            .client
            .post(self.endpoint())
            .timeout(LLM_TIMEOUT)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| transport_error(LABEL, e))?;
        if !resp.status().is_success() {
            return Err(status_error(LABEL, resp).await);
        }

        let parsed: ChatCompletionsResponse = resp
            .json()
            .await
            .map_err(|e| decode_error(LABEL, e))?;
        if let Some(e) = parsed.error {
            return Err(Error::Llm(format!("{LABEL}: {}", e.message)));
        }
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Llm(format!("{LABEL} returned no choices")))?;
        let usage = parsed.usage.unwrap_or_default();
        Ok(OracleReply {
            content,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
