use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use procura_core::ProcuraError;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) fn parse_endpoint(raw: &str) -> Result<Url, ProcuraError> {
    if raw.trim().is_empty() {
        return Err(ProcuraError::InvalidConfig("endpoint url is empty".into()));
    }
    Url::parse(raw.trim())
        .map_err(|err| ProcuraError::InvalidConfig(format!("invalid endpoint url '{raw}': {err}")))
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, ProcuraError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| ProcuraError::InvalidConfig(err.to_string()))
}

pub(crate) fn with_auth(request: RequestBuilder, api_key: Option<&SecretString>) -> RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key.expose_secret()),
        None => request,
    }
}

pub(crate) fn non_empty_secret(value: impl Into<String>) -> Option<SecretString> {
    let value = value.into();
    if value.trim().is_empty() {
        None
    } else {
        Some(SecretString::new(value))
    }
}

pub(crate) fn redacted(secret: Option<&SecretString>) -> &'static str {
    if secret.is_some() {
        "<redacted>"
    } else {
        "<none>"
    }
}
