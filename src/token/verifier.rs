//! Check tokens presented by clients.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::claims::ClaimCodec;
use super::key::KeyManager;
use super::{ClaimSet, TokenType};
use crate::clock::Clock;
use crate::error::{AuthError, Result, Verdict};
use crate::revocation::RevocationStore;

/// Runs signature, window, type and revocation checks.
pub struct TokenVerifier {
    keys: Arc<KeyManager>,
    codec: ClaimCodec,
    revocations: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    /// Create a new [`TokenVerifier`].
    pub fn new(
        keys: Arc<KeyManager>,
        codec: ClaimCodec,
        revocations: Arc<dyn RevocationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            keys,
            codec,
            revocations,
            clock,
        }
    }

    /// Verify a token and return its claims.
    ///
    /// Checks, in order: structure and signature (cheapest way out for
    /// forged input), validity window, token type, revocation.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<ClaimSet> {
        self.run_checks(token, expected).inspect_err(|err| {
            err.log();
            metrics::counter!(
                "auth_token_rejections_total",
                "reason" => err.reason().as_str()
            )
            .increment(1);
        })
    }

    /// [`Self::verify`] narrowed to a [`Verdict`], never an error.
    pub fn check(&self, token: &str, expected: TokenType) -> Verdict {
        self.verify(token, expected).into()
    }

    /// Whether `token` is a currently valid access token for
    /// `expected_subject`. Every failure collapses to `false`.
    pub fn is_valid(&self, token: &str, expected_subject: &str) -> bool {
        match self.verify(token, TokenType::Access) {
            Ok(claims) if claims.subject == expected_subject => true,
            Ok(claims) => {
                let err = AuthError::SubjectMismatch;
                tracing::warn!(
                    subject = %claims.subject,
                    %expected_subject,
                    token_id = %claims.token_id,
                    security_event = true,
                    "{err}"
                );
                metrics::counter!(
                    "auth_token_rejections_total",
                    "reason" => err.reason().as_str()
                )
                .increment(1);
                false
            },
            Err(_) => false,
        }
    }

    /// Decode a token checking only its structure, signature, issuer and
    /// audience. Expired and revoked tokens decode fine.
    pub fn inspect(&self, token: &str) -> Result<ClaimSet> {
        let key = self.keys.key()?;
        self.codec.decode(token, key)
    }

    fn run_checks(&self, token: &str, expected: TokenType) -> Result<ClaimSet> {
        let key = self.keys.key()?;
        let claims = self.codec.decode(token, key).inspect_err(|_| {
            tracing::debug!(fingerprint = %fingerprint(token), "token failed to decode");
        })?;

        claims.check_window(self.clock.now())?;

        if claims.token_type != expected {
            return Err(AuthError::TokenTypeMismatch {
                expected,
                found: claims.token_type,
            });
        }

        if self.revocations.is_revoked(&claims.token_id) {
            return Err(AuthError::Revoked);
        }

        Ok(claims)
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

/// Short SHA-256 digest of a token, safe to log.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}
