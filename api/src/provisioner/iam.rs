//! IAM REST client for service account key creation.
//!
//! Authenticates with a static bearer token when one is configured, otherwise
//! with a token from the compute metadata server of the host it runs on.

use super::{CredentialProvisioner, KeyRequest, ProvisionedKey};
use crate::config::IamConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

/// IAM client. Holds only immutable configuration, so one instance is shared
/// by all requests.
pub struct IamProvisioner {
    client: Client,
    api_url: String,
    metadata_url: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorResponse {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    message: String,
    status: Option<String>,
}

/// Prefer the structured error message Google APIs return; fall back to the raw body.
fn describe_error_body(body: &str) -> String {
    match serde_json::from_str::<GoogleErrorResponse>(body) {
        Ok(resp) => match resp.error.status {
            Some(status) => format!("{} ({})", resp.error.message, status),
            None => resp.error.message,
        },
        Err(_) => body.to_string(),
    }
}

impl IamProvisioner {
    pub fn new(config: &IamConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .with_context(|| format!("Invalid IAM API URL: {}", config.api_url))?;
        if config.access_token.is_none() {
            Url::parse(&config.metadata_url)
                .with_context(|| format!("Invalid metadata server URL: {}", config.metadata_url))?;
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            metadata_url: config.metadata_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    /// `{api_url}/v1/{resource_path}/keys`
    pub fn keys_url(&self, resource_path: &str) -> String {
        format!("{}/v1/{}/keys", self.api_url, resource_path)
    }

    async fn access_token(&self) -> Result<String> {
        if let Some(token) = &self.access_token {
            return Ok(token.clone());
        }

        let url = format!("{}{}", self.metadata_url, METADATA_TOKEN_PATH);
        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("Failed to reach metadata server for access token")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read metadata server response")?;

        if !status.is_success() {
            bail!("Metadata server token error ({}): {}", status, body);
        }

        let token: MetadataToken =
            serde_json::from_str(&body).context("Failed to parse metadata server token")?;
        if let Some(token_type) = token.token_type.as_deref() {
            if !token_type.eq_ignore_ascii_case("bearer") {
                bail!("Unsupported token type from metadata server: {}", token_type);
            }
        }
        Ok(token.access_token)
    }
}

#[async_trait]
impl CredentialProvisioner for IamProvisioner {
    async fn create_key(
        &self,
        resource_path: &str,
        request: &KeyRequest,
    ) -> Result<ProvisionedKey> {
        let token = self.access_token().await?;
        let url = self.keys_url(resource_path);

        tracing::debug!(resource = %resource_path, "Requesting new service account key");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .context("Failed to send IAM key creation request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read IAM response")?;

        if !status.is_success() {
            bail!("IAM API error ({}): {}", status, describe_error_body(&body));
        }

        let key: ProvisionedKey =
            serde_json::from_str(&body).context("Failed to parse IAM key response")?;
        if key.private_key_data.as_deref().unwrap_or_default().is_empty() {
            bail!("IAM API returned key {} without private key data", key.name);
        }

        tracing::info!(key = %key.name, "Created service account key");
        Ok(key)
    }
}
