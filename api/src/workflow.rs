use crate::config::{RequestSettings, ENV_PUBLIC_KEY, ENV_SERVICE_ACCOUNT_EMAIL_TARGET};
use crate::provisioner::{CredentialProvisioner, KeyRequest};
use base64::{
    alphabet,
    engine::{
        general_purpose::STANDARD as BASE64, DecodePaddingMode, GeneralPurpose,
        GeneralPurposeConfig,
    },
    Engine,
};
use keywrap_common::{encrypt, load_recipient, service_account_resource_path, KeywrapError};
use serde::{Deserialize, Serialize};

/// Base64url decoder that accepts key data with or without padding.
const BASE64_URL_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Body returned to the caller on success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptResponse {
    /// Standard base64 of the binary OpenPGP message
    pub encrypted_key: String,
}

impl EncryptResponse {
    pub fn to_json(&self) -> Result<String, KeywrapError> {
        serde_json::to_string(self).map_err(|e| KeywrapError::Encoding(e.to_string()))
    }
}

/// Create a fresh key for the configured service account and encrypt it for
/// the configured recipient.
///
/// The recipient key and principal are validated before the provisioner is
/// called, so configuration mistakes never mint a key.
pub async fn generate_and_encrypt(
    provisioner: &dyn CredentialProvisioner,
    settings: &RequestSettings,
) -> Result<EncryptResponse, KeywrapError> {
    let public_key = settings
        .public_key
        .as_deref()
        .ok_or_else(|| KeywrapError::Configuration(format!("{} is not set", ENV_PUBLIC_KEY)))?;
    let recipient = load_recipient(public_key)?;

    let principal = settings.principal.as_deref().ok_or_else(|| {
        KeywrapError::Configuration(format!(
            "{} is not set",
            ENV_SERVICE_ACCOUNT_EMAIL_TARGET
        ))
    })?;
    let resource_path = service_account_resource_path(principal)?;

    let key = provisioner
        .create_key(&resource_path, &KeyRequest::default())
        .await
        .map_err(|e| KeywrapError::Provisioning(format!("{:#}", e)))?;
    let encoded = key.private_key_data.ok_or_else(|| {
        KeywrapError::Provisioning(format!("key {} carries no private key data", key.name))
    })?;
    let credential = BASE64_URL_LENIENT
        .decode(encoded.trim())
        .map_err(|e| KeywrapError::Provisioning(format!("could not decode key data: {}", e)))?;

    let mut ciphertext = Vec::new();
    encrypt(&recipient, &credential, &mut ciphertext)?;

    tracing::info!(
        resource = %resource_path,
        recipient = %recipient.fingerprint(),
        "Issued encrypted service account key"
    );

    Ok(EncryptResponse {
        encrypted_key: BASE64.encode(&ciphertext),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::provisioner::{CredentialProvisioner, KeyRequest, ProvisionedKey};
    use anyhow::Result;
    use async_trait::async_trait;
    use openpgp::cert::CertBuilder;
    use openpgp::serialize::SerializeInto;
    use openpgp::Cert;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use sequoia_openpgp as openpgp;

    /// Provisioner double that returns a fixed key blob, or an error when `blob` is `None`.
    pub struct StaticProvisioner {
        blob: Option<String>,
        calls: AtomicUsize,
        last_resource: Mutex<Option<String>>,
    }

    impl StaticProvisioner {
        pub fn returning(blob: &str) -> Self {
            Self {
                blob: Some(blob.to_string()),
                calls: AtomicUsize::new(0),
                last_resource: Mutex::new(None),
            }
        }

        pub fn failing() -> Self {
            Self {
                blob: None,
                calls: AtomicUsize::new(0),
                last_resource: Mutex::new(None),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn last_resource(&self) -> Option<String> {
            self.last_resource.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CredentialProvisioner for StaticProvisioner {
        async fn create_key(
            &self,
            resource_path: &str,
            _request: &KeyRequest,
        ) -> Result<ProvisionedKey> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_resource.lock().unwrap() = Some(resource_path.to_string());
            match &self.blob {
                Some(blob) => Ok(ProvisionedKey {
                    name: format!("{}/keys/test", resource_path),
                    private_key_data: Some(blob.clone()),
                }),
                None => anyhow::bail!("IAM API error (403 Forbidden): permission denied"),
            }
        }
    }

    pub fn generate_cert() -> Cert {
        let (cert, _revocation) = CertBuilder::general_purpose(None, Some("ops@example.org"))
            .generate()
            .expect("key generation failed");
        cert
    }

    pub fn armored_public(cert: &Cert) -> String {
        String::from_utf8(cert.armored().to_vec().expect("armoring failed"))
            .expect("armor is ascii")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use keywrap_common::decrypt;

    const PRINCIPAL: &str = "svc@my-project.iam.gserviceaccount.com";

    fn settings(public_key: Option<String>, principal: Option<&str>) -> RequestSettings {
        RequestSettings {
            public_key,
            principal: principal.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_encrypts_provisioned_secret() {
        let cert = generate_cert();
        let provisioner = StaticProvisioner::returning("c2VjcmV0");

        let response = generate_and_encrypt(
            &provisioner,
            &settings(Some(armored_public(&cert)), Some(PRINCIPAL)),
        )
        .await
        .unwrap();

        let ciphertext = BASE64.decode(&response.encrypted_key).unwrap();
        assert_eq!(decrypt(&cert, &ciphertext).unwrap(), b"secret");
        assert_eq!(provisioner.calls(), 1);
        assert_eq!(
            provisioner.last_resource().as_deref(),
            Some("projects/my-project/serviceAccounts/svc@my-project.iam.gserviceaccount.com")
        );
    }

    #[tokio::test]
    async fn test_unpadded_key_data_is_accepted() {
        let cert = generate_cert();
        // "secret!" -> "c2VjcmV0IQ==" padded
        let provisioner = StaticProvisioner::returning("c2VjcmV0IQ");

        let response = generate_and_encrypt(
            &provisioner,
            &settings(Some(armored_public(&cert)), Some(PRINCIPAL)),
        )
        .await
        .unwrap();

        let ciphertext = BASE64.decode(&response.encrypted_key).unwrap();
        assert_eq!(decrypt(&cert, &ciphertext).unwrap(), b"secret!");
    }

    #[tokio::test]
    async fn test_missing_principal_fails_before_provisioning() {
        let cert = generate_cert();
        let provisioner = StaticProvisioner::returning("c2VjcmV0");

        let err = generate_and_encrypt(&provisioner, &settings(Some(armored_public(&cert)), None))
            .await
            .unwrap_err();

        assert!(matches!(err, KeywrapError::Configuration(_)), "{err:?}");
        assert!(err.to_string().contains(ENV_SERVICE_ACCOUNT_EMAIL_TARGET));
        assert_eq!(provisioner.calls(), 0);
    }

    #[tokio::test]
    async fn test_bad_public_key_fails_before_provisioning() {
        let provisioner = StaticProvisioner::returning("c2VjcmV0");

        let err = generate_and_encrypt(
            &provisioner,
            &settings(Some("not a key".to_string()), Some(PRINCIPAL)),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, KeywrapError::MalformedKey(_)), "{err:?}");
        assert_eq!(provisioner.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_public_key_is_configuration_error() {
        let provisioner = StaticProvisioner::returning("c2VjcmV0");

        let err = generate_and_encrypt(&provisioner, &settings(None, Some(PRINCIPAL)))
            .await
            .unwrap_err();

        assert!(matches!(err, KeywrapError::Configuration(_)), "{err:?}");
        assert_eq!(provisioner.calls(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_principal_fails_before_provisioning() {
        let cert = generate_cert();
        let provisioner = StaticProvisioner::returning("c2VjcmV0");

        let err = generate_and_encrypt(
            &provisioner,
            &settings(Some(armored_public(&cert)), Some("svc@a@b.example.com")),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, KeywrapError::UnparseableIdentifier(_)), "{err:?}");
        assert_eq!(provisioner.calls(), 0);
    }

    #[tokio::test]
    async fn test_provisioning_failure_is_terminal() {
        let cert = generate_cert();
        let provisioner = StaticProvisioner::failing();

        let err = generate_and_encrypt(
            &provisioner,
            &settings(Some(armored_public(&cert)), Some(PRINCIPAL)),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, KeywrapError::Provisioning(_)), "{err:?}");
        assert!(err.to_string().contains("permission denied"));
        assert_eq!(provisioner.calls(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_key_data_is_provisioning_error() {
        let cert = generate_cert();
        let provisioner = StaticProvisioner::returning("***not base64***");

        let err = generate_and_encrypt(
            &provisioner,
            &settings(Some(armored_public(&cert)), Some(PRINCIPAL)),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, KeywrapError::Provisioning(_)), "{err:?}");
        assert!(err.to_string().contains("could not decode key data"));
    }

    #[test]
    fn test_response_serializes_with_camel_case_field() {
        let response = EncryptResponse {
            encrypted_key: "AAEC".to_string(),
        };
        assert_eq!(response.to_json().unwrap(), r#"{"encryptedKey":"AAEC"}"#);
    }
}
