//! Core of the key-wrapping service: load a recipient's OpenPGP public key,
//! encrypt an opaque credential for that recipient only, and map service
//! account emails to IAM resource paths.
pub mod decryption;
pub mod encryption;
pub mod errors;
pub mod identifier;
pub mod key_loader;

pub use decryption::{decrypt, load_secret_key};
pub use encryption::{encrypt, encrypt_to_vec};
pub use errors::KeywrapError;
pub use identifier::{project_from_email, service_account_resource_path};
pub use key_loader::{load_recipient, RecipientKey};
