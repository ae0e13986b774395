use crate::errors::KeywrapError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sequoia_openpgp as openpgp;

use openpgp::armor::{Kind, Reader, ReaderMode};
use openpgp::cert::CertParser;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::Cert;
use std::io::Read;

pub(crate) const POLICY: &StandardPolicy = &StandardPolicy::new();

const PUBLIC_KEY_HEADER: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";
const PUBLIC_KEY_FOOTER: &str = "-----END PGP PUBLIC KEY BLOCK-----";

/// A single recipient certificate parsed from an armored public key block.
#[derive(Debug, Clone)]
pub struct RecipientKey {
    cert: Cert,
}

impl RecipientKey {
    pub fn cert(&self) -> &Cert {
        &self.cert
    }

    /// Uppercase hex fingerprint of the primary key.
    pub fn fingerprint(&self) -> String {
        self.cert.fingerprint().to_hex()
    }

    pub fn primary_userid(&self) -> Option<String> {
        let valid = self.cert.with_policy(POLICY, None).ok()?;
        let userid = valid.primary_userid().ok()?;
        Some(String::from_utf8_lossy(userid.userid().value()).into_owned())
    }

    /// True when at least one alive, non-revoked subkey may be used for
    /// transport encryption under the standard policy.
    pub fn can_encrypt(&self) -> bool {
        self.cert
            .keys()
            .with_policy(POLICY, None)
            .supported()
            .alive()
            .revoked(false)
            .for_transport_encryption()
            .next()
            .is_some()
    }
}

const CRC24_INIT: u32 = 0x00B7_04CE;
const CRC24_POLY: u32 = 0x0186_4CFB;

fn crc24(data: &[u8]) -> u32 {
    let mut crc = CRC24_INIT;
    for &byte in data {
        crc ^= u32::from(byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}

/// The `=XXXX` checksum line right above the footer, if the block carries one.
fn armor_checksum(block: &str) -> Result<Option<u32>, KeywrapError> {
    let line = block
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != PUBLIC_KEY_FOOTER);
    let Some(encoded) = line.and_then(|line| line.strip_prefix('=')) else {
        return Ok(None);
    };
    let bytes = BASE64.decode(encoded).map_err(|e| {
        KeywrapError::MalformedKey(format!("unreadable armor checksum: {}", e))
    })?;
    match bytes.as_slice() {
        [a, b, c] => Ok(Some(u32::from_be_bytes([0, *a, *b, *c]))),
        _ => Err(KeywrapError::MalformedKey(
            "armor checksum must be 3 bytes".to_string(),
        )),
    }
}

fn take<'a>(body: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], KeywrapError> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= body.len())
        .ok_or_else(|| {
            KeywrapError::MalformedKey(
                "key data ends inside a packet (truncated key block?)".to_string(),
            )
        })?;
    let bytes = &body[*pos..end];
    *pos = end;
    Ok(bytes)
}

fn be_len(bytes: &[u8]) -> usize {
    bytes.iter().fold(0, |len, b| (len << 8) | usize::from(*b))
}

/// Walk the packet headers and check that every declared body length fits in
/// the decoded data. Bytes that are not a packet header are left for the packet
/// parser to reject.
fn check_packet_framing(body: &[u8]) -> Result<(), KeywrapError> {
    let mut pos = 0;
    while pos < body.len() {
        let ctb = take(body, &mut pos, 1)?[0];
        if ctb & 0x80 == 0 {
            return Ok(());
        }

        if ctb & 0x40 != 0 {
            // New format; partial lengths chain until a definite one.
            loop {
                let first = take(body, &mut pos, 1)?[0];
                let (len, partial) = match first {
                    0..=191 => (usize::from(first), false),
                    192..=223 => {
                        let second = take(body, &mut pos, 1)?[0];
                        (((usize::from(first) - 192) << 8) + usize::from(second) + 192, false)
                    }
                    255 => (be_len(take(body, &mut pos, 4)?), false),
                    _ => (1usize << (first & 0x1F), true),
                };
                take(body, &mut pos, len)?;
                if !partial {
                    break;
                }
            }
        } else {
            let len = match ctb & 0x03 {
                0 => be_len(take(body, &mut pos, 1)?),
                1 => be_len(take(body, &mut pos, 2)?),
                2 => be_len(take(body, &mut pos, 4)?),
                // Indeterminate length runs to the end of the data.
                _ => return Ok(()),
            };
            take(body, &mut pos, len)?;
        }
    }
    Ok(())
}

/// Strip the ASCII armor from a public key block and return the packet bytes.
///
/// The input must hold exactly one block. A checksum that disagrees with the
/// decoded data, or a packet that runs past the end of it, is reported as
/// malformed armor.
fn dearmor(armored: &str) -> Result<Vec<u8>, KeywrapError> {
    let header = armored.find(PUBLIC_KEY_HEADER).ok_or_else(|| {
        KeywrapError::MalformedKey("missing public key block header".to_string())
    })?;
    let footer_end = armored[header..]
        .find(PUBLIC_KEY_FOOTER)
        .map(|at| header + at + PUBLIC_KEY_FOOTER.len())
        .ok_or_else(|| {
            KeywrapError::MalformedKey(
                "missing public key block footer (truncated input?)".to_string(),
            )
        })?;
    if !armored[footer_end..].trim().is_empty() {
        return Err(KeywrapError::MalformedKey(
            "unexpected data after the public key block".to_string(),
        ));
    }
    let block = &armored[header..footer_end];

    let mut reader = Reader::from_reader(
        block.as_bytes(),
        ReaderMode::Tolerant(Some(Kind::PublicKey)),
    );
    let mut body = Vec::new();
    reader
        .read_to_end(&mut body)
        .map_err(|e| KeywrapError::MalformedKey(e.to_string()))?;

    if body.is_empty() {
        return Err(KeywrapError::MalformedKey(
            "armor contains no key data".to_string(),
        ));
    }

    if let Some(expected) = armor_checksum(block)? {
        let actual = crc24(&body);
        if actual != expected {
            return Err(KeywrapError::MalformedKey(format!(
                "armor checksum {:06X} does not match data {:06X} (truncated key block?)",
                expected, actual
            )));
        }
    }
    check_packet_framing(&body)?;

    Ok(body)
}

/// Parse an armored public key block holding exactly one certificate.
///
/// Encryption capability is not checked here; a certificate without a usable
/// encryption subkey fails later in [`crate::encryption::encrypt`].
pub fn load_recipient(armored: &str) -> Result<RecipientKey, KeywrapError> {
    let body = dearmor(armored)?;

    let parser =
        CertParser::from_bytes(&body).map_err(|e| KeywrapError::InvalidKey(e.to_string()))?;
    let mut certs = Vec::new();
    for cert in parser {
        certs.push(cert.map_err(|e| KeywrapError::InvalidKey(e.to_string()))?);
    }

    let cert = match certs.len() {
        0 => {
            return Err(KeywrapError::InvalidKey(
                "no certificate found in key block".to_string(),
            ))
        }
        1 => certs.remove(0),
        n => {
            return Err(KeywrapError::InvalidKey(format!(
                "expected exactly one certificate, found {}",
                n
            )))
        }
    };

    cert.with_policy(POLICY, None)
        .map_err(|e| KeywrapError::InvalidKey(format!("certificate rejected by policy: {}", e)))?;

    tracing::debug!(fingerprint = %cert.fingerprint(), "Loaded recipient certificate");
    Ok(RecipientKey { cert })
}
