use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use procura_core::{AnalyticsQueryCapability, AnalyticsResponse, Message, ProcuraError};

use crate::http::{http_client, non_empty_secret, parse_endpoint, redacted, with_auth};

#[derive(Deserialize)]
#[serde(untagged)]
enum AnalyticsBody {
    Messages { messages: Vec<Message> },
    Content { content: String },
}

/// Posts `{"messages": [{"role": "user", "content": query}]}` to an analytics
/// endpoint and reads back its message list.
#[derive(Clone)]
pub struct HttpAnalyticsQuery {
    http: Client,
    endpoint: Url,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl fmt::Debug for HttpAnalyticsQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAnalyticsQuery")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &redacted(self.api_key.as_ref()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpAnalyticsQuery {
    pub fn builder(endpoint: impl Into<String>) -> HttpAnalyticsQueryBuilder {
        HttpAnalyticsQueryBuilder {
            endpoint: endpoint.into(),
            api_key: None,
            timeout: Duration::from_secs(300),
        }
    }
}

#[async_trait::async_trait]
impl AnalyticsQueryCapability for HttpAnalyticsQuery {
    async fn invoke(&self, query: &str) -> Result<AnalyticsResponse, ProcuraError> {
        let response = with_auth(self.http.post(self.endpoint.clone()), self.api_key.as_ref())
            .json(&json!({ "messages": [Message::user(query)] }))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ProcuraError::Timeout(self.timeout)
                } else {
                    ProcuraError::AnalyticsFailed(err.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            return Err(ProcuraError::Timeout(self.timeout));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcuraError::AnalyticsFailed(format!("{status}: {body}")));
        }

        let body: AnalyticsBody = response
            .json()
            .await
            .map_err(|err| ProcuraError::AnalyticsFailed(err.to_string()))?;
        Ok(match body {
            AnalyticsBody::Messages { messages } => AnalyticsResponse { messages },
            AnalyticsBody::Content { content } => AnalyticsResponse::from_answer(content),
        })
    }
}

#[derive(Clone)]
pub struct HttpAnalyticsQueryBuilder {
    endpoint: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl fmt::Debug for HttpAnalyticsQueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAnalyticsQueryBuilder")
            .field("endpoint", &self.endpoint)
            .field("api_key", &redacted(self.api_key.as_ref()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpAnalyticsQueryBuilder {
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = non_empty_secret(api_key);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpAnalyticsQuery, ProcuraError> {
        Ok(HttpAnalyticsQuery {
            http: http_client(self.timeout)?,
            endpoint: parse_endpoint(&self.endpoint)?,
            api_key: self.api_key,
            timeout: self.timeout,
        })
    }
}
