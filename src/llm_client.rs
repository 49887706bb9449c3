use crate::backtest_api_client::truncate_for_log;
use crate::error::ChatError;
use async_trait::async_trait;
use log::warn;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::json;
use std::fmt;

const MAX_ERROR_BODY_CHARS: usize = 1024;

/// Access key for the language model. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// `None` for a missing or blank key.
    pub fn new<S: AsRef<str>>(api_key: S) -> Option<Self> {
        let api_key = api_key.as_ref().trim();
        if api_key.is_empty() {
            None
        } else {
            Some(Self {
                api_key: api_key.to_string(),
            })
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// One completion per call; the reply is returned verbatim.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, credentials: &Credentials, prompt: &Prompt) -> Result<String, ChatError>;
}

/// Client for any endpoint that speaks the OpenAI chat-completions protocol.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(http: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.trim().to_string(),
        }
    }

    fn headers(credentials: &Credentials) -> Result<HeaderMap, ChatError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.api_key()))
            .map_err(|_| {
                ChatError::Transport("API key contains invalid header characters".to_string())
            })?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn complete(&self, credentials: &Credentials, prompt: &Prompt) -> Result<String, ChatError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
        });

        let response = self
            .http
            .post(&url)
            .headers(Self::headers(credentials)?)
            .json(&body)
            .send()
            .await
            .map_err(|err| ChatError::Transport(format!("failed to reach {}: {}", url, err)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(
                "Language model request failed: status={} url={} model={} body={}",
                status,
                url,
                self.model,
                truncate_for_log(&text, MAX_ERROR_BODY_CHARS)
            );
            return Err(ChatError::Transport(format!("model endpoint returned {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|err| ChatError::Transport(format!("failed to read completion: {}", err)))?;
        let completion: CompletionResponse = serde_json::from_str(&body).map_err(|err| {
            warn!(
                "Language model returned an undecodable completion: {} body={}",
                err,
                truncate_for_log(&body, MAX_ERROR_BODY_CHARS)
            );
            ChatError::Parse(format!("malformed completion payload: {}", err))
        })?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatError::Parse("completion contained no message content".to_string()))
    }
}
