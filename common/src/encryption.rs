//! Encrypt a credential for exactly one OpenPGP recipient.
//!
//! The output is a binary OpenPGP message: one PKESK packet for the recipient's
//! transport-encryption subkey, followed by a SEIPD container (with MDC) that
//! holds a literal data packet marked as binary. Nothing is signed or
//! compressed. A fresh session key is generated per call, so encrypting the
//! same plaintext twice yields different bytes.

use crate::errors::KeywrapError;
use crate::key_loader::{RecipientKey, POLICY};
use sequoia_openpgp as openpgp;

use openpgp::serialize::stream::{Encryptor2, LiteralWriter, Message};
use openpgp::types::DataFormat;
use std::io::Write;

/// Seal `plaintext` into a complete OpenPGP message held in memory.
fn seal(recipient: &RecipientKey, plaintext: &[u8]) -> Result<Vec<u8>, KeywrapError> {
    let recipients: Vec<_> = recipient
        .cert()
        .keys()
        .with_policy(POLICY, None)
        .supported()
        .alive()
        .revoked(false)
        .for_transport_encryption()
        .collect();
    if recipients.is_empty() {
        return Err(KeywrapError::EncryptionSetup(format!(
            "certificate {} has no usable encryption subkey",
            recipient.fingerprint()
        )));
    }

    let mut ciphertext = Vec::new();
    {
        let message = Message::new(&mut ciphertext);
        let message = Encryptor2::for_recipients(message, recipients)
            .build()
            .map_err(|e| KeywrapError::EncryptionSetup(e.to_string()))?;
        let mut message = LiteralWriter::new(message)
            .format(DataFormat::Binary)
            .build()
            .map_err(|e| KeywrapError::EncryptionSetup(e.to_string()))?;

        message.write_all(plaintext)?;
        // Emits the MDC and closes every packet; without it the message is unreadable.
        message
            .finalize()
            .map_err(|e| KeywrapError::Write(e.to_string()))?;
    }
    Ok(ciphertext)
}

/// Encrypt `plaintext` for `recipient` and append the finished message to `sink`.
///
/// The sink only receives bytes once the whole message has been sealed, so a
/// failed call never leaves a partial message behind. A caller that sees a
/// `Write` error must discard whatever the sink holds and start again.
pub fn encrypt<W: Write>(
    recipient: &RecipientKey,
    plaintext: &[u8],
    sink: &mut W,
) -> Result<(), KeywrapError> {
    let ciphertext = seal(recipient, plaintext)?;
    sink.write_all(&ciphertext)?;
    sink.flush()?;

    tracing::debug!(
        recipient = %recipient.fingerprint(),
        plaintext_len = plaintext.len(),
        ciphertext_len = ciphertext.len(),
        "Encrypted payload"
    );
    Ok(())
}

pub fn encrypt_to_vec(
    recipient: &RecipientKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, KeywrapError> {
    let mut out = Vec::new();
    encrypt(recipient, plaintext, &mut out)?;
    Ok(out)
}
