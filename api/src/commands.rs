use crate::config::{
    IamConfig, RequestSettings, ENV_PUBLIC_KEY, ENV_SERVICE_ACCOUNT_EMAIL_TARGET,
};
use crate::provisioner::IamProvisioner;
use crate::workflow::EncryptResponse;
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use keywrap_common::{decrypt, load_recipient, load_secret_key, service_account_resource_path};
use sequoia_openpgp::Cert;
use std::io::{Read, Write};
use std::path::Path;

/// Validate the configuration a request would use, without minting a key.
pub fn check_command() -> Result<()> {
    println!("keywrap check");
    println!("=============");
    println!();

    let iam = IamConfig::from_env()?;
    println!("IAM client:");
    println!("  API URL: {}", iam.api_url);
    match &iam.access_token {
        Some(_) => println!("  Auth: static access token"),
        None => println!("  Auth: metadata server ({})", iam.metadata_url),
    }
    println!("  Timeout: {}s", iam.timeout_secs);
    IamProvisioner::new(&iam)?;
    println!("  [ok] client configuration valid");
    println!();

    let settings = RequestSettings::from_env();
    let mut failures = 0;

    println!("Recipient key ({}):", ENV_PUBLIC_KEY);
    match settings.public_key.as_deref().map(load_recipient) {
        None => {
            println!("  [error] not set");
            failures += 1;
        }
        Some(Err(e)) => {
            println!("  [error] {}", e);
            failures += 1;
        }
        Some(Ok(recipient)) => {
            println!("  Fingerprint: {}", recipient.fingerprint());
            if let Some(uid) = recipient.primary_userid() {
                println!("  User ID: {}", uid);
            }
            if recipient.can_encrypt() {
                println!("  [ok] has a usable encryption subkey");
            } else {
                println!("  [error] no usable encryption subkey");
                failures += 1;
            }
        }
    }
    println!();

    println!("Principal ({}):", ENV_SERVICE_ACCOUNT_EMAIL_TARGET);
    match settings.principal.as_deref().map(service_account_resource_path) {
        None => {
            println!("  [error] not set");
            failures += 1;
        }
        Some(Err(e)) => {
            println!("  [error] {}", e);
            failures += 1;
        }
        Some(Ok(path)) => println!("  [ok] resource path: {}", path),
    }
    println!();

    if failures > 0 {
        bail!("{} configuration problem(s) found", failures);
    }
    println!("All checks passed.");
    Ok(())
}

/// Decrypt a response body (or bare base64 ciphertext) with an armored secret key
/// and write the credential to stdout.
pub fn decrypt_command(secret_key: &Path, input: Option<&Path>) -> Result<()> {
    let armored = std::fs::read_to_string(secret_key)
        .with_context(|| format!("Failed to read secret key from {}", secret_key.display()))?;
    let secret = load_secret_key(&armored)?;

    let raw = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input from {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read input from stdin")?;
            buf
        }
    };

    let plaintext = decrypt_input(&secret, &raw)?;
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&plaintext)
        .context("Failed to write decrypted credential")?;
    stdout.flush()?;
    Ok(())
}

fn decrypt_input(secret: &Cert, raw: &str) -> Result<Vec<u8>> {
    let ciphertext = extract_ciphertext(raw)?;
    Ok(decrypt(secret, &ciphertext)?)
}

/// Accepts either the server's JSON response or the bare standard base64 value.
pub fn extract_ciphertext(input: &str) -> Result<Vec<u8>> {
    let input = input.trim();
    if input.is_empty() {
        bail!("Input is empty");
    }
    let encoded = if input.starts_with('{') {
        serde_json::from_str::<EncryptResponse>(input)
            .context("Input looks like JSON but is not an encryptedKey response")?
            .encrypted_key
    } else {
        input.to_string()
    };
    BASE64
        .decode(encoded.trim())
        .context("Encrypted key is not valid base64")
}
