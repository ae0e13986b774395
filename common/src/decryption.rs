//! Recipient-side counterpart of [`crate::encryption`], for operators holding
//! the private key.

use crate::errors::KeywrapError;
use crate::key_loader::POLICY;
use sequoia_openpgp as openpgp;

use openpgp::crypto::{KeyPair, SessionKey};
use openpgp::packet::{PKESK, SKESK};
use openpgp::parse::stream::{
    DecryptionHelper, DecryptorBuilder, MessageStructure, VerificationHelper,
};
use openpgp::parse::Parse;
use openpgp::types::SymmetricAlgorithm;
use openpgp::{Cert, Fingerprint, KeyHandle};

struct SecretKeyHelper {
    keypairs: Vec<(Fingerprint, KeyPair)>,
}

impl SecretKeyHelper {
    fn new(secret: &Cert) -> Result<Self, KeywrapError> {
        let mut keypairs = Vec::new();
        for ka in secret
            .keys()
            .with_policy(POLICY, None)
            .supported()
            .unencrypted_secret()
            .for_transport_encryption()
        {
            let keypair = ka
                .key()
                .clone()
                .into_keypair()
                .map_err(|e| KeywrapError::Decryption(e.to_string()))?;
            keypairs.push((ka.key().fingerprint(), keypair));
        }

        if keypairs.is_empty() {
            return Err(KeywrapError::Decryption(format!(
                "certificate {} has no unencrypted transport-encryption secret key",
                secret.fingerprint().to_hex()
            )));
        }
        Ok(Self { keypairs })
    }
}

impl VerificationHelper for SecretKeyHelper {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(Vec::new())
    }

    fn check(&mut self, _structure: MessageStructure) -> openpgp::Result<()> {
        // Messages are never signed.
        Ok(())
    }
}

impl DecryptionHelper for SecretKeyHelper {
    fn decrypt<D>(
        &mut self,
        pkesks: &[PKESK],
        _skesks: &[SKESK],
        sym_algo: Option<SymmetricAlgorithm>,
        mut decrypt: D,
    ) -> openpgp::Result<Option<Fingerprint>>
    where
        D: FnMut(SymmetricAlgorithm, &SessionKey) -> bool,
    {
        for pkesk in pkesks {
            for (fingerprint, keypair) in self.keypairs.iter_mut() {
                let opened = pkesk
                    .decrypt(keypair, sym_algo)
                    .map(|(algo, session_key)| decrypt(algo, &session_key))
                    .unwrap_or(false);
                if opened {
                    return Ok(Some(fingerprint.clone()));
                }
            }
        }

        Err(openpgp::Error::MissingSessionKey(
            "no secret key matches any recipient of the message".to_string(),
        )
        .into())
    }
}

/// Parse an armored (or binary) transferable secret key.
pub fn load_secret_key(armored: &str) -> Result<Cert, KeywrapError> {
    let cert = Cert::from_bytes(armored.as_bytes())
        .map_err(|e| KeywrapError::Decryption(format!("unreadable secret key: {}", e)))?;
    if !cert.is_tsk() {
        return Err(KeywrapError::Decryption(
            "key block holds no secret key material".to_string(),
        ));
    }
    Ok(cert)
}

/// Decrypt a binary OpenPGP message produced by [`crate::encryption::encrypt`].
pub fn decrypt(secret: &Cert, ciphertext: &[u8]) -> Result<Vec<u8>, KeywrapError> {
    let helper = SecretKeyHelper::new(secret)?;
    let mut decryptor = DecryptorBuilder::from_bytes(ciphertext)
        .map_err(|e| KeywrapError::Decryption(e.to_string()))?
        .with_policy(POLICY, None, helper)
        .map_err(|e| KeywrapError::Decryption(e.to_string()))?;

    let mut plaintext = Vec::new();
    std::io::copy(&mut decryptor, &mut plaintext)
        .map_err(|e| KeywrapError::Decryption(e.to_string()))?;
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_loader::test_keys::{armored_public, generate};
    use openpgp::serialize::SerializeInto;

    #[test]
    fn test_load_secret_key_from_armored_tsk() {
        let cert = generate("alice@example.org");
        let armored = String::from_utf8(cert.as_tsk().armored().to_vec().unwrap()).unwrap();

        let loaded = load_secret_key(&armored).unwrap();
        assert_eq!(loaded.fingerprint(), cert.fingerprint());
        assert!(loaded.is_tsk());
    }

    #[test]
    fn test_public_key_is_not_a_secret_key() {
        let cert = generate("alice@example.org");
        let err = load_secret_key(&armored_public(&cert)).unwrap_err();
        assert!(matches!(err, KeywrapError::Decryption(_)), "{err:?}");
        assert!(err.to_string().contains("no secret key material"));
    }

    #[test]
    fn test_garbage_ciphertext_fails() {
        let cert = generate("alice@example.org");
        let err = decrypt(&cert, b"not an openpgp message").unwrap_err();
        assert!(matches!(err, KeywrapError::Decryption(_)), "{err:?}");
    }

    #[test]
    fn test_public_only_cert_cannot_decrypt() {
        let cert = generate("alice@example.org");
        let public = cert.clone().strip_secret_key_material();
        let err = decrypt(&public, b"irrelevant").unwrap_err();
        assert!(err.to_string().contains("no unencrypted"));
    }
}
