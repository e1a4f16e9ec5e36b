//! Symmetric key generation and whole-file encryption built on age.
//!
//! A key is either a native age X25519 identity (`AGE-SECRET-KEY-1...`, what
//! [`generate_key`] returns) or a user passphrase of at least 8 characters.
//! Both go through age's authenticated STREAM construction, so a wrong key or
//! a tampered file fails instead of yielding garbage.

use crate::backup::file_ext::FileExtProvider;
use crate::backup::file_transform::{read_through, with_appended_ext, with_stripped_ext, write_through};
use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::{Error, ErrorKind};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use age::secrecy::ExposeSecret;
use age::stream::{StreamReader, StreamWriter};
use derive_more::From;
use function_name::named;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use validator::ValidationError;

static AGE_SECRET_KEY_PREFIX: &str = "AGE-SECRET-KEY-";
static MIN_PASSPHRASE_LEN: usize = 8;

/// Encryption key as supplied by the caller
#[derive(Clone, From, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct EncryptionKey(RedactedString);

impl Debug for EncryptionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey({:?})", self.0)
    }
}

impl From<&str> for EncryptionKey {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for EncryptionKey {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl FileExtProvider for EncryptionKey {
    fn file_ext(&self) -> &'static str {
        "enc"
    }
}

enum AgeKey {
    X25519(age::x25519::Identity),
    Passphrase(RedactedString),
}

impl EncryptionKey {
    /// The raw key material, for showing a freshly generated key to its owner.
    pub fn expose(&self) -> &str {
        self.0.inner()
    }

    fn age_key(&self) -> Result<AgeKey> {
        let raw = self.0.inner().trim();
        if raw.starts_with(AGE_SECRET_KEY_PREFIX) {
            return raw
                .parse::<age::x25519::Identity>()
                .map(AgeKey::X25519)
                .map_err(|e| Error::invalid_argument(format!("malformed age identity: {e}")));
        }
        if raw.chars().count() < MIN_PASSPHRASE_LEN {
            return Err(Error::invalid_argument(format!(
                "passphrase must be at least {MIN_PASSPHRASE_LEN} characters"
            )));
        }
        Ok(AgeKey::Passphrase(self.0.clone()))
    }
}

impl AgeKey {
    fn build_encryptor<W: Write>(&self, writer: W) -> Result<StreamWriter<W>> {
        let encryptor = match self {
            AgeKey::X25519(identity) => {
                tracing::debug!("Initializing age encryption with X25519 recipient");
                let recipient = identity.to_public();
                age::Encryptor::with_recipients(std::iter::once(&recipient as &dyn age::Recipient))
                    .map_err(|e| Error::encryption(e.to_string()))?
            }
            AgeKey::Passphrase(passphrase) => {
                tracing::debug!("Initializing age encryption with passphrase");
                age::Encryptor::with_user_passphrase(passphrase.inner().as_str().into())
            }
        };
        Ok(encryptor.wrap_output(writer)?)
    }

    fn build_decryptor<R: Read>(&self, reader: R) -> Result<StreamReader<R>> {
        let decryptor = age::Decryptor::new(reader)
            .map_err(|e| Error::decryption(format!("not an age file: {e}")))?;
        let res = match self {
            AgeKey::X25519(identity) => {
                decryptor.decrypt(std::iter::once(identity as &dyn age::Identity))
            }
            AgeKey::Passphrase(passphrase) => {
                let identity = age::scrypt::Identity::new(passphrase.inner().as_str().into());
                decryptor.decrypt(std::iter::once(&identity as &dyn age::Identity))
            }
        };
        res.map_err(|e| Error::decryption(format!("wrong key or tampered ciphertext: {e}")))
    }
}

/// Produces a fresh random X25519 key.
pub fn generate_key() -> Result<EncryptionKey> {
    let identity = std::panic::catch_unwind(age::x25519::Identity::generate)
        .map_err(|_| Error::key_generation("system entropy source unavailable"))?;
    Ok(EncryptionKey::from(
        identity.to_string().expose_secret().to_string(),
    ))
}

/// Encrypts `path` into `<path>.enc` and deletes the plaintext.
#[named]
pub fn encrypt_file(path: &Path, key: &EncryptionKey) -> Result<PathBuf> {
    let age_key = key
        .age_key()
        .map_err(|e| Error::encryption(e.to_string()))?;
    if !path.is_file() {
        return Err(Error::encryption(format!("{:?} not found", path)));
    }

    let encrypted = with_appended_ext(path, key.file_ext());
    tracing::info!("Encrypting {:?} -> {:?}", path, encrypted);
    write_through(path, &encrypted, |w| age_key.build_encryptor(w))
        .map_err(|e| e.relabel(ErrorKind::Encryption))
        .add_fn_name(function_path!())?;

    std::fs::remove_file(path)
        .map_err(|e| Error::encryption(format!("cannot remove plaintext {:?}: {}", path, e)))?;
    Ok(encrypted)
}

/// Decrypts `<path>.enc` back to `<path>` and deletes the ciphertext.
///
/// On any failure the partial plaintext is removed and the ciphertext kept.
#[named]
pub fn decrypt_file(enc_path: &Path, key: &EncryptionKey) -> Result<PathBuf> {
    let age_key = key
        .age_key()
        .map_err(|e| Error::decryption(e.to_string()))?;
    if !enc_path.is_file() {
        return Err(Error::decryption(format!("{:?} not found", enc_path)));
    }
    let plain = with_stripped_ext(enc_path, key.file_ext()).ok_or_else(|| {
        Error::decryption(format!("{:?} does not end with .{}", enc_path, key.file_ext()))
    })?;

    read_through(enc_path, &plain, |r| age_key.build_decryptor(r))
        .map_err(|e| e.relabel(ErrorKind::Decryption))
        .add_fn_name(function_path!())?;

    std::fs::remove_file(enc_path)?;
    Ok(plain)
}

pub fn validate_encryption_key(key: &EncryptionKey) -> std::result::Result<(), ValidationError> {
    key.age_key().map(|_| ()).map_err(|e| {
        ValidationError::new("InvalidEncryptionKey").with_message(e.to_string().into())
    })
}
