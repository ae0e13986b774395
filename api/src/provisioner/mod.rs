use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod iam;

pub use iam::IamProvisioner;

/// Key algorithm requested from the identity service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "KEY_ALG_RSA_1024")]
    KeyAlgRsa1024,
    #[default]
    #[serde(rename = "KEY_ALG_RSA_2048")]
    KeyAlgRsa2048,
}

/// Output format of the generated private key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrivateKeyType {
    #[serde(rename = "TYPE_PKCS12_FILE")]
    TypePkcs12File,
    #[default]
    #[serde(rename = "TYPE_GOOGLE_CREDENTIALS_FILE")]
    TypeGoogleCredentialsFile,
}

/// Body of a key creation request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest {
    pub key_algorithm: KeyAlgorithm,
    pub private_key_type: PrivateKeyType,
}

/// Key material returned by the identity service
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedKey {
    /// Resource name of the created key
    #[serde(default)]
    pub name: String,
    /// Base64url-encoded secret blob
    #[serde(default)]
    pub private_key_data: Option<String>,
}

/// Issues fresh credentials for a principal. Implemented by the IAM REST
/// client in production and by test doubles in tests.
#[async_trait]
pub trait CredentialProvisioner: Send + Sync {
    /// Create a new key for `resource_path`
    /// (`projects/{project}/serviceAccounts/{email}`).
    async fn create_key(&self, resource_path: &str, request: &KeyRequest)
        -> Result<ProvisionedKey>;
}
