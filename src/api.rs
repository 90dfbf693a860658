use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use sha1::{Digest, Sha1};

use crate::config::{NetworkConfig, ResolutionConfig, ServerConfig};
use crate::models::{DeviceStatus, ServerStatus, Sgv, Treatment, latest_device_status};
use crate::profile::ProfileDefinitionSet;
use crate::raw::RawProfileDefinition;

/// Mongo style query parameters, e.g. `("count", "10")` or
/// `("find[dateString][$gte]", "2017-03-07T01:10:26.000Z")`.
pub type QueryParams<'a> = &'a [(&'a str, &'a str)];

/// How requests authenticate against the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    AccessToken(String),
    /// Plain secret, or one already in `token=...` form.
    ApiSecret(String),
}

impl Auth {
    /// Prefers the access token when both are configured.
    pub fn from_config(server: &ServerConfig) -> Self {
        match (&server.access_token, &server.api_secret) {
            (Some(token), _) => Auth::AccessToken(token.clone()),
            (None, Some(secret)) => Auth::ApiSecret(secret.clone()),
            (None, None) => Auth::None,
        }
    }

    /// Value for the `api-secret` header.
    pub fn header_value(&self) -> Option<String> {
        match self {
            Auth::None => None,
            Auth::AccessToken(token) => Some(format!("token={token}")),
            Auth::ApiSecret(secret) if secret.starts_with("token=") => Some(secret.clone()),
            Auth::ApiSecret(secret) => Some(hex::encode(Sha1::digest(secret.as_bytes()))),
        }
    }
}

/// API client for a Nightscout server.
#[derive(Clone, Debug)]
pub struct NightscoutClient {
    client: reqwest::Client,
    server_url: String,
}

impl NightscoutClient {
    /// Create a new API client with configurable timeouts.
    pub fn new(server_url: &str, auth: &Auth, network_config: &NetworkConfig) -> Result<Self> {
        let server_url = server_url.trim_end_matches('/').to_string();
        Url::parse(&server_url).with_context(|| format!("Invalid server URL '{server_url}'"))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(secret) = auth.header_value() {
            let value = HeaderValue::from_str(&secret).context("Invalid api-secret header")?;
            headers.insert(HeaderName::from_static("api-secret"), value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(network_config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(network_config.connect_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, server_url })
    }

    pub fn from_config(server: &ServerConfig, network_config: &NetworkConfig) -> Result<Self> {
        Self::new(&server.url, &Auth::from_config(server), network_config)
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, params: QueryParams<'_>) -> Result<T> {
        let mut url = Url::parse(&format!("{}{}", self.server_url, path))
            .with_context(|| format!("Failed to build URL for {path}"))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }

        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {path}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("API returned error status: {}", status);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {path}"))
    }

    /// Fetch sensor glucose values, newest first.
    pub async fn fetch_sgvs(&self, params: QueryParams<'_>) -> Result<Vec<Sgv>> {
        self.get_json("/api/v1/entries/sgv.json", params).await
    }

    pub async fn fetch_server_status(&self) -> Result<ServerStatus> {
        self.get_json("/api/v1/status.json", &[]).await
    }

    pub async fn fetch_treatments(&self, params: QueryParams<'_>) -> Result<Vec<Treatment>> {
        self.get_json("/api/v1/treatments.json", params).await
    }

    /// Fetch the profile history and build it into a queryable set.
    pub async fn fetch_profiles(
        &self,
        params: QueryParams<'_>,
        resolution: &ResolutionConfig,
    ) -> Result<ProfileDefinitionSet> {
        let records: Vec<RawProfileDefinition> =
            self.get_json("/api/v1/profile.json", params).await?;
        tracing::debug!("Fetched {} profile definition(s)", records.len());
        ProfileDefinitionSet::from_records(&records, resolution)
            .context("Failed to build profile definitions")
    }

    pub async fn fetch_device_status(&self, params: QueryParams<'_>) -> Result<Vec<DeviceStatus>> {
        self.get_json("/api/v1/devicestatus.json", params).await
    }

    /// Newest status for each reporting device.
    pub async fn fetch_latest_device_status(
        &self,
        params: QueryParams<'_>,
    ) -> Result<HashMap<String, DeviceStatus>> {
        let statuses = self.fetch_device_status(params).await?;
        Ok(latest_device_status(statuses))
    }
}
