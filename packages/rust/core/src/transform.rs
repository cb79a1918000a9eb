//! Automated AI transform over an OpenAI-compatible chat-completions API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

use autoformatter_shared::{AppConfig, AutoFormatterError, Result, validate_api_key};

/// Introduces the document text in the user message.
pub const USER_PREAMBLE: &str = "The original document content follows. Process it as instructed:";

/// User-Agent string for transform requests.
const USER_AGENT: &str = concat!("AutoFormatter/", env!("CARGO_PKG_VERSION"));

/// A pluggable text transform: system instructions + content in, one text blob out.
#[async_trait]
pub trait TextTransform: Send + Sync {
    async fn transform(&self, system_prompt: &str, text: &str) -> Result<String>;
}

/// `<base>/chat/completions` when the base already ends in `/v1`,
/// `<base>/v1/chat/completions` otherwise.
pub fn chat_completions_url(base: &str) -> Result<Url> {
    let base = base.trim().trim_end_matches('/');
    let url = if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    };
    Url::parse(&url).map_err(|e| AutoFormatterError::config(format!("invalid AI base URL '{base}': {e}")))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Non-streaming chat-completions client.
#[derive(Debug, Clone)]
pub struct ChatCompletionsTransform {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f32,
}

impl ChatCompletionsTransform {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AutoFormatterError::Transform(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: chat_completions_url(base_url)?,
            api_key: api_key.into(),
            model: model.into(),
            temperature,
        })
    }

    /// Build from `[ai]`, reading the key from its environment variable.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let ai = &config.ai;
        let api_key = validate_api_key(config)?;
        let base_url = ai.resolved_base_url().ok_or_else(|| {
            AutoFormatterError::config(format!("no base URL configured for AI provider '{}'", ai.provider))
        })?;
        let model = ai.resolved_model().ok_or_else(|| {
            AutoFormatterError::config(format!("no model configured for AI provider '{}'", ai.provider))
        })?;

        Self::new(
            &base_url,
            api_key,
            model,
            ai.temperature,
            Duration::from_secs(ai.timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TextTransform for ChatCompletionsTransform {
    #[instrument(skip_all, fields(model = %self.model, chars = text.chars().count()))]
    async fn transform(&self, system_prompt: &str, text: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("{USER_PREAMBLE}\n\n{text}"),
                },
            ],
            temperature: self.temperature,
            stream: false,
        };

        debug!(endpoint = %self.endpoint, "sending transform request");
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AutoFormatterError::Transform(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AutoFormatterError::Transform(format!(
                "HTTP {}: {}",
                status.as_u16(),
                detail.trim()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AutoFormatterError::Transform(format!("malformed response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AutoFormatterError::Transform("response has no message content".into()))?;

        info!(chars = content.chars().count(), "transform complete");
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> ChatCompletionsTransform {
        ChatCompletionsTransform::new(base, "sk-test", "test-model", 0.05, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn url_building() {
        assert_eq!(
            chat_completions_url("https://api.deepseek.com/v1").unwrap().as_str(),
            "https://api.deepseek.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("https://relay.example.com/").unwrap().as_str(),
            "https://relay.example.com/v1/chat/completions"
        );
        assert!(chat_completions_url("not a url").is_err());
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "stream": false,
                "messages": [{"role": "system", "content": "SYSTEM"}, {"role": "user"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "===FILE: body.md===\n# Intro"}}]
            })))
            .mount(&server)
            .await;

        let reply = client(&server.uri()).transform("SYSTEM", "raw text").await.unwrap();
        assert_eq!(reply, "===FILE: body.md===\n# Intro");
    }

    #[tokio::test]
    async fn http_error_carries_status_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = client(&server.uri()).transform("S", "t").await.unwrap_err();
        assert!(matches!(err, AutoFormatterError::Transform(_)));
        assert!(err.to_string().contains("HTTP 401: invalid api key"));
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = client(&server.uri()).transform("S", "t").await.unwrap_err();
        assert!(err.to_string().contains("no message content"));
    }

    #[test]
    fn from_config_requires_api_key() {
        let mut config = AppConfig::default();
        config.ai.api_key_env = "AF_TEST_TRANSFORM_MISSING_KEY_98765".into();
        let err = ChatCompletionsTransform::from_config(&config).unwrap_err();
        assert!(matches!(err, AutoFormatterError::Config { .. }));
    }
}
