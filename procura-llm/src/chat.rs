//! OpenAI-compatible chat completion client used as the extraction capability.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use procura_core::{ExtractionCapability, Message, ProcuraError};

use crate::http::{http_client, non_empty_secret, parse_endpoint, redacted, with_auth, DEFAULT_TIMEOUT};

#[derive(Serialize, Debug, Clone)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize, Debug, Clone)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug, Clone)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug, Clone)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize, Debug, Clone)]
struct ErrorDetail {
    message: String,
}

#[derive(Clone)]
pub struct ChatCompletionClient {
    http: Client,
    endpoint: Url,
    model: String,
    api_key: Option<SecretString>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl fmt::Debug for ChatCompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .field("api_key", &redacted(self.api_key.as_ref()))
            .finish()
    }
}

impl ChatCompletionClient {
    pub fn builder(base_url: impl Into<String>) -> ChatCompletionClientBuilder {
        ChatCompletionClientBuilder {
            base_url: base_url.into(),
            model: None,
            api_key: None,
            temperature: Some(0.1),
            max_tokens: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Clone)]
pub struct ChatCompletionClientBuilder {
    base_url: String,
    model: Option<String>,
    api_key: Option<SecretString>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl fmt::Debug for ChatCompletionClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionClientBuilder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redacted(self.api_key.as_ref()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ChatCompletionClientBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = non_empty_secret(api_key);
        self
    }

    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ChatCompletionClient, ProcuraError> {
        let base = parse_endpoint(&self.base_url)?;
        let model = self
            .model
            .filter(|model| !model.trim().is_empty())
            .ok_or_else(|| ProcuraError::InvalidConfig("chat model is required".into()))?;

        let mut base = base;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("chat/completions")
            .map_err(|err| ProcuraError::InvalidConfig(err.to_string()))?;

        if endpoint.scheme() == "https" && self.api_key.is_none() {
            tracing::warn!(endpoint = %endpoint, "https chat endpoint configured without an api key");
        }

        Ok(ChatCompletionClient {
            http: http_client(self.timeout)?,
            endpoint,
            model,
            api_key: self.api_key,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: self.timeout,
        })
    }
}

#[async_trait::async_trait]
impl ExtractionCapability for ChatCompletionClient {
    async fn invoke(&self, prompt: &str) -> Result<String, ProcuraError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![Message::user(prompt)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let response = with_auth(self.http.post(self.endpoint.clone()), self.api_key.as_ref())
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ProcuraError::Timeout(self.timeout)
                } else {
                    ProcuraError::LlmProvider(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorBody>(&body)
                .map(|parsed| parsed.error.message)
                .unwrap_or(body);
            return Err(ProcuraError::LlmProvider(format!("{status}: {detail}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| ProcuraError::LlmProvider(err.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProcuraError::ParseFailed {
                output: String::new(),
                reason: "completion had no content".into(),
            })
    }
}
