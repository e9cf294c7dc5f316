use std::fmt;
use std::time::Duration;

use reqwest::Client;
use secrecy::SecretString;
use serde_json::{Map, Value};
use url::Url;

use procura_core::{HierarchyLevel, HierarchyLookupCapability, ProcuraError};

use crate::http::{http_client, non_empty_secret, parse_endpoint, redacted, with_auth};

/// Calls a hierarchy lookup function over HTTP.
///
/// The function receives `{"<parameter>": "<entity>"}` and answers
/// `{"value": "<level>"}` (or a bare JSON string). Any failure degrades to
/// [`HierarchyLevel::NotIdentified`].
#[derive(Clone)]
pub struct HttpHierarchyLookup {
    http: Client,
    endpoint: Url,
    parameter: String,
    api_key: Option<SecretString>,
}

impl fmt::Debug for HttpHierarchyLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpHierarchyLookup")
            .field("endpoint", &self.endpoint.as_str())
            .field("parameter", &self.parameter)
            .field("api_key", &redacted(self.api_key.as_ref()))
            .finish()
    }
}

impl HttpHierarchyLookup {
    pub fn builder(endpoint: impl Into<String>) -> HttpHierarchyLookupBuilder {
        HttpHierarchyLookupBuilder {
            endpoint: endpoint.into(),
            parameter: None,
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    async fn fetch(&self, entity_name: &str) -> Result<String, ProcuraError> {
        let lookup_failed = |reason: String| ProcuraError::LookupFailed {
            entity: entity_name.to_string(),
            reason,
        };

        let mut payload = Map::new();
        payload.insert(self.parameter.clone(), Value::String(entity_name.to_string()));

        let body: Value = with_auth(self.http.post(self.endpoint.clone()), self.api_key.as_ref())
            .json(&payload)
            .send()
            .await
            .map_err(|err| lookup_failed(err.to_string()))?
            .error_for_status()
            .map_err(|err| lookup_failed(err.to_string()))?
            .json()
            .await
            .map_err(|err| lookup_failed(err.to_string()))?;

        match body {
            Value::String(level) => Ok(level),
            Value::Object(ref map) => map
                .get("value")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| lookup_failed(format!("response has no 'value': {body}"))),
            other => Err(lookup_failed(format!("unexpected response: {other}"))),
        }
    }
}

#[async_trait::async_trait]
impl HierarchyLookupCapability for HttpHierarchyLookup {
    async fn lookup(&self, entity_name: &str) -> HierarchyLevel {
        match self.fetch(entity_name).await {
            Ok(raw) => {
                tracing::debug!(entity = entity_name, level = raw.as_str(), "hierarchy lookup");
                HierarchyLevel::from_raw(&raw)
            }
            Err(error) => {
                tracing::error!(error = %error, "hierarchy lookup failed");
                HierarchyLevel::NotIdentified
            }
        }
    }
}

#[derive(Clone)]
pub struct HttpHierarchyLookupBuilder {
    endpoint: String,
    parameter: Option<String>,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl fmt::Debug for HttpHierarchyLookupBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpHierarchyLookupBuilder")
            .field("endpoint", &self.endpoint)
            .field("parameter", &self.parameter)
            .field("api_key", &redacted(self.api_key.as_ref()))
            .finish()
    }
}

impl HttpHierarchyLookupBuilder {
    /// Name of the argument the lookup function expects, e.g. `material_name`.
    pub fn parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = non_empty_secret(api_key);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpHierarchyLookup, ProcuraError> {
        let endpoint = parse_endpoint(&self.endpoint)?;
        let parameter = self
            .parameter
            .filter(|parameter| !parameter.trim().is_empty())
            .ok_or_else(|| ProcuraError::InvalidConfig("lookup parameter name is required".into()))?;
        Ok(HttpHierarchyLookup {
            http: http_client(self.timeout)?,
            endpoint,
            parameter,
            api_key: self.api_key,
        })
    }
}
