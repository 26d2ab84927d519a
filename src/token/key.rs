//! Signing key derivation and validation.

use std::fmt;
use std::sync::{LazyLock, OnceLock};

use jsonwebtoken::{DecodingKey, EncodingKey};
use regex_lite::Regex;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};

/// Minimum secret size for HS256, 256 bits.
pub const MIN_SECRET_LENGTH: usize = 32;
const KEY_ID_LENGTH: usize = 8;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)demo|secret|test|changeme|change-me|example|password")
        .expect("placeholder pattern is valid")
});

/// HMAC key material ready to sign and verify.
pub struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    key_id: String,
}

impl SigningKey {
    pub fn encoding(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding(&self) -> &DecodingKey {
        &self.decoding
    }

    /// Public fingerprint of the key, set as `kid` header.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Derive the signing key from a configured secret.
///
/// Fails with [`AuthError::MissingSecret`] on an empty (or blank) secret and
/// with [`AuthError::WeakKey`] if it is shorter than 32 bytes. A secret that
/// looks like a placeholder is accepted but logged.
pub fn signing_key(secret: &str) -> Result<SigningKey> {
    if secret.trim().is_empty() {
        return Err(AuthError::MissingSecret);
    }

    let bytes = secret.as_bytes();
    if bytes.len() < MIN_SECRET_LENGTH {
        return Err(AuthError::WeakKey {
            length: bytes.len(),
            minimum: MIN_SECRET_LENGTH,
        });
    }

    if is_placeholder(secret) {
        tracing::warn!(
            "using a weak or default signing secret, use a strong randomly generated secret in production"
        );
    }

    let digest = Sha256::digest(bytes);

    Ok(SigningKey {
        encoding: EncodingKey::from_secret(bytes),
        decoding: DecodingKey::from_secret(bytes),
        key_id: hex::encode(&digest[..KEY_ID_LENGTH]),
    })
}

/// Whether a secret matches a known demo or placeholder pattern.
pub fn is_placeholder(secret: &str) -> bool {
    PLACEHOLDER.is_match(secret)
}

/// Hold the configured secret and hand out the key, derived on first use.
pub struct KeyManager {
    secret: Zeroizing<String>,
    key: OnceLock<SigningKey>,
}

impl KeyManager {
    /// Create a new [`KeyManager`]. The secret is not validated yet.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
            key: OnceLock::new(),
        }
    }

    /// Signing key, derived once and then kept for the process lifetime.
    ///
    /// A failed derivation is not cached: each call reports it again.
    pub fn key(&self) -> Result<&SigningKey> {
        if let Some(key) = self.key.get() {
            return Ok(key);
        }

        let key = signing_key(&self.secret)?;
        tracing::debug!(key_id = key.key_id(), "signing key derived");
        Ok(self.key.get_or_init(|| key))
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("derived", &self.key.get().is_some())
            .finish_non_exhaustive()
    }
}
