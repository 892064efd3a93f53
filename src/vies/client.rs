//! VIES REST client
//!
//! One shared connection-reusing HTTP client; each [`LookupClient::lookup`]
//! call issues exactly one GET.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use url::Url;

use super::config::ViesClientConfig;
use crate::lookup::{LookupClient, LookupFailure, LookupPayload};

pub struct ViesClient {
    client: Client,
    base_url: Url,
    config: ViesClientConfig,
}

impl ViesClient {
    pub fn new() -> Result<Self> {
        Self::with_config(ViesClientConfig::default())
    }

    pub fn with_config(config: ViesClientConfig) -> Result<Self> {
        let base_url = config.parsed_base_url()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn config(&self) -> &ViesClientConfig {
        &self.config
    }

    /// `{base}/ms/{jurisdiction}/vat/{identifier}` with each segment escaped.
    pub fn endpoint(&self, jurisdiction: &str, identifier: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["ms", jurisdiction, "vat", identifier]);
        }
        url
    }
}

#[async_trait]
impl LookupClient for ViesClient {
    fn source_id(&self) -> &'static str {
        "vies"
    }

    async fn lookup(
        &self,
        jurisdiction: &str,
        identifier: &str,
    ) -> Result<LookupPayload, LookupFailure> {
        let url = self.endpoint(jurisdiction, identifier);
        tracing::debug!(%url, "VIES request");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| LookupFailure::Transport(e.to_string()))?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), jurisdiction, identifier, "VIES response");

        if !status.is_success() {
            return Err(self.config.status_policy.classify(status.as_u16()));
        }

        let text = response
            .text()
            .await
            .map_err(|e| LookupFailure::Transport(e.to_string()))?;

        serde_json::from_str::<LookupPayload>(&text).map_err(|e| {
            LookupFailure::Malformed(format!(
                "{}. First 200 chars: {}",
                e,
                text.chars().take(200).collect::<String>()
            ))
        })
    }
}
