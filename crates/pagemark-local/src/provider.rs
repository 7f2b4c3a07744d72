use crate::{anthropic::AnthropicOracle, env, gemini::GeminiOracle, openai::OpenAiOracle};
use pagemark_core::{Error, RelevanceOracle, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Per-request ceiling for one oracle call.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Anthropic, Provider::Google];

    /// Name used by the model catalog and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
        }
    }

    /// Env vars holding the API key, in lookup order.
    pub fn key_vars(&self) -> &'static [&'static str] {
        match self {
            Provider::OpenAi => &["PAGEMARK_OPENAI_API_KEY", "OPENAI_API_KEY"],
            Provider::Anthropic => &["PAGEMARK_ANTHROPIC_API_KEY", "ANTHROPIC_API_KEY"],
            Provider::Google => &["PAGEMARK_GEMINI_API_KEY", "GEMINI_API_KEY"],
        }
    }

    pub fn base_url_var(&self) -> &'static str {
        match self {
            Provider::OpenAi => "PAGEMARK_OPENAI_BASE_URL",
            Provider::Anthropic => "PAGEMARK_ANTHROPIC_BASE_URL",
            Provider::Google => "PAGEMARK_GEMINI_BASE_URL",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com",
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::Google => "https://generativelanguage.googleapis.com",
        }
    }

    /// Used when no catalog is available.
    pub fn fallback_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Anthropic => "claude-sonnet-4-5-20250929",
            Provider::Google => "gemini-2.0-flash",
        }
    }

    pub fn api_key_from_env(&self) -> Option<String> {
        self.key_vars().iter().find_map(|k| env(k))
    }

    pub fn base_url_from_env(&self) -> String {
        env(self.base_url_var()).unwrap_or_else(|| self.default_base_url().to_string())
    }

    pub(crate) fn require_api_key(&self) -> Result<String> {
        self.api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(format!(
                "missing {} API key (set {})",
                self.as_str(),
                self.key_vars().join(" or ")
            ))
        })
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "google" | "gemini" => Ok(Provider::Google),
            other => Err(Error::NotSupported(format!("unknown provider: {other}"))),
        }
    }
}

/// Build the oracle for `provider`, reading its key and endpoint from the environment.
pub fn build_oracle(
    client: reqwest::Client,
    provider: Provider,
    model: String,
) -> Result<Arc<dyn RelevanceOracle>> {
    Ok(match provider {
        Provider::OpenAi => Arc::new(OpenAiOracle::from_env(client, model)?),
        Provider::Anthropic => Arc::new(AnthropicOracle::from_env(client, model)?),
        Provider::Google => Arc::new(GeminiOracle::from_env(client, model)?),
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    pub(crate) message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiError>,
}

/// Map a transport failure, keeping the word "timeout" visible to retry classification.
///
/// The request URL is dropped: it can carry a key, and port or path digits would otherwise
/// read as status codes.
pub(crate) fn transport_error(label: &str, e: reqwest::Error) -> Error {
    let e = e.without_url();
    if e.is_timeout() {
        Error::Llm(format!("{label} timeout: {e}"))
    } else {
        Error::Llm(format!("{label} request failed: {e}"))
    }
}

/// Map a body that could not be decoded.
pub(crate) fn decode_error(label: &str, e: reqwest::Error) -> Error {
    Error::Llm(format!("{label} bad response: {}", e.without_url()))
}

/// Build the error for a non-success response, including the provider's own message.
pub(crate) async fn status_error(label: &str, resp: reqwest::Response) -> Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorEnvelope>(&body)
        .ok()
        .and_then(|e| e.error)
        .map(|e| e.message)
        .filter(|m| !m.trim().is_empty());
    match detail {
        Some(m) => Error::Llm(format!("{label} HTTP {status}: {m}")),
        None => Error::Llm(format!("{label} HTTP {status}")),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::is_retryable;
    use axum::{http::StatusCode, routing::get, Router};

    #[test]
    fn parses_provider_names() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("gemini".parse::<Provider>().unwrap(), Provider::Google);
        assert_eq!("google".parse::<Provider>().unwrap(), Provider::Google);
        let err = "mistral".parse::<Provider>().unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
        assert!(!is_retryable(&err.to_string()));
    }

    #[tokio::test]
    async fn status_error_carries_status_and_provider_message() {
        let app = Router::new()
            .route(
                "/limited",
                get(|| async {
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        r#"{"error":{"message":"Rate limit reached"}}"#,
                    )
                }),
            )
            .route(
                "/plain",
                get(|| async { (StatusCode::UNAUTHORIZED, "nope") }),
            );
        let addr = test_support::serve(app).await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("http://{addr}/limited"))
            .send()
            .await
            .unwrap();
        let e = status_error("openai chat.completions", resp).await.to_string();
        assert!(e.contains("HTTP 429"), "{e}");
        assert!(e.contains("Rate limit reached"), "{e}");
        assert!(is_retryable(&e));

        let resp = client
            .get(format!("http://{addr}/plain"))
            .send()
            .await
            .unwrap();
        let e = status_error("anthropic messages", resp).await.to_string();
        assert!(e.ends_with("HTTP 401 Unauthorized"), "{e}");
        assert!(!is_retryable(&e));
    }

    #[tokio::test]
    async fn transport_errors_are_classified_without_the_url() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let oracle = OpenAiOracle::new(
            reqwest::Client::new(),
            format!("http://{addr}/v5003"),
            "k",
            "m",
        );
        let e = oracle.complete("s", "u").await.unwrap_err().to_string();
        assert!(e.contains("request failed"), "{e}");
        assert!(!e.contains("5003"), "{e}");
        assert!(!is_retryable(&e), "{e}");
    }
}
