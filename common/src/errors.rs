/// Failures of the key-wrapping workflow. Every variant is terminal for the
/// request it occurred in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeywrapError {
    MalformedKey(String),
    InvalidKey(String),
    UnparseableIdentifier(String),
    Provisioning(String),
    EncryptionSetup(String),
    Write(String),
    Encoding(String),
    Configuration(String),
    Decryption(String),
}

impl KeywrapError {
    /// Stable label for log fields and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            KeywrapError::MalformedKey(_) => "malformed_key",
            KeywrapError::InvalidKey(_) => "invalid_key",
            KeywrapError::UnparseableIdentifier(_) => "unparseable_identifier",
            KeywrapError::Provisioning(_) => "provisioning",
            KeywrapError::EncryptionSetup(_) => "encryption_setup",
            KeywrapError::Write(_) => "write",
            KeywrapError::Encoding(_) => "encoding",
            KeywrapError::Configuration(_) => "configuration",
            KeywrapError::Decryption(_) => "decryption",
        }
    }
}

impl From<std::io::Error> for KeywrapError {
    fn from(error: std::io::Error) -> Self {
        KeywrapError::Write(error.to_string())
    }
}

impl From<KeywrapError> for String {
    fn from(error: KeywrapError) -> Self {
        error.to_string()
    }
}

impl std::fmt::Display for KeywrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeywrapError::MalformedKey(err) => {
                write!(f, "Could not parse public key: malformed armor: {}", err)
            }
            KeywrapError::InvalidKey(err) => write!(f, "Could not parse public key: {}", err),
            KeywrapError::UnparseableIdentifier(err) => {
                write!(f, "Could not parse service account email: {}", err)
            }
            KeywrapError::Provisioning(err) => {
                write!(f, "Could not create service account key: {}", err)
            }
            KeywrapError::EncryptionSetup(err) => write!(f, "Could not set up encryption: {}", err),
            KeywrapError::Write(err) => write!(f, "Could not encrypt: {}", err),
            KeywrapError::Encoding(err) => write!(f, "Could not marshal response: {}", err),
            KeywrapError::Configuration(err) => write!(f, "Configuration error: {}", err),
            KeywrapError::Decryption(err) => write!(f, "Could not decrypt: {}", err),
        }
    }
}

impl std::error::Error for KeywrapError {}
