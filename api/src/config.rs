use anyhow::{Context, Result};
use std::env;

pub const ENV_PUBLIC_KEY: &str = "PUBLIC_KEY";
pub const ENV_SERVICE_ACCOUNT_EMAIL_TARGET: &str = "SERVICE_ACCOUNT_EMAIL_TARGET";

const DEFAULT_IAM_API_URL: &str = "https://iam.googleapis.com";
const DEFAULT_METADATA_SERVER_URL: &str = "http://metadata.google.internal";

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// Listener settings, read once at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .context("PORT must be a valid port number")?;
        Ok(Self { port })
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

/// Settings for the IAM client, read once at startup
#[derive(Debug, Clone)]
pub struct IamConfig {
    pub api_url: String,
    pub metadata_url: String,
    /// Static bearer token; when unset a token is requested from the metadata server
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl IamConfig {
    pub fn from_env() -> Result<Self> {
        let timeout_secs = env::var("IAM_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("IAM_TIMEOUT_SECS must be a whole number of seconds")?;

        Ok(Self {
            api_url: non_empty_var("IAM_API_URL")
                .unwrap_or_else(|| DEFAULT_IAM_API_URL.to_string()),
            metadata_url: non_empty_var("METADATA_SERVER_URL")
                .unwrap_or_else(|| DEFAULT_METADATA_SERVER_URL.to_string()),
            access_token: non_empty_var("GOOGLE_OAUTH_ACCESS_TOKEN"),
            timeout_secs,
        })
    }
}

/// Inputs of a single encryption request. Read from the environment on every
/// request; nothing is cached between requests.
#[derive(Debug, Clone, Default)]
pub struct RequestSettings {
    pub public_key: Option<String>,
    pub principal: Option<String>,
}

impl RequestSettings {
    pub fn from_env() -> Self {
        Self {
            public_key: non_empty_var(ENV_PUBLIC_KEY),
            principal: non_empty_var(ENV_SERVICE_ACCOUNT_EMAIL_TARGET),
        }
    }
}
