//! Mint signed access and refresh tokens.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::claims::ClaimCodec;
use super::key::KeyManager;
use super::{ClaimSet, TokenType};
use crate::error::{AuthError, Result};

/// Default access token lifetime, 24 hours.
pub const ACCESS_EXPIRATION: Duration = Duration::from_secs(60 * 60 * 24);
/// Default refresh token lifetime, 7 days.
pub const REFRESH_EXPIRATION: Duration = Duration::from_secs(60 * 60 * 24 * 7);
/// Longest lifetime accepted for any token, 10 years.
pub const MAX_LIFETIME: Duration = Duration::from_secs(60 * 60 * 24 * 3650);

/// Token with the claims it was built from.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub claims: ClaimSet,
}

/// Produce tokens. Writes nothing anywhere.
#[derive(Debug)]
pub struct TokenIssuer {
    keys: Arc<KeyManager>,
    codec: ClaimCodec,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
}

impl TokenIssuer {
    /// Create a new [`TokenIssuer`].
    ///
    /// The refresh lifetime must be longer than the access lifetime, and
    /// neither may exceed [`MAX_LIFETIME`].
    pub fn new(
        keys: Arc<KeyManager>,
        codec: ClaimCodec,
        access_lifetime: Duration,
        refresh_lifetime: Duration,
    ) -> Result<Self> {
        if access_lifetime.is_zero()
            || refresh_lifetime <= access_lifetime
            || refresh_lifetime > MAX_LIFETIME
        {
            return Err(AuthError::InvalidLifetimes);
        }

        Ok(Self {
            keys,
            codec,
            access_lifetime,
            refresh_lifetime,
        })
    }

    pub fn access_lifetime(&self) -> Duration {
        self.access_lifetime
    }

    pub fn refresh_lifetime(&self) -> Duration {
        self.refresh_lifetime
    }

    /// Issue an access token embedding `authorities`.
    pub fn issue_access_token(
        &self,
        identity: &str,
        authorities: &[String],
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        self.issue(identity, authorities, TokenType::Access, now)
    }

    /// Issue a refresh token carrying only the subject.
    pub fn issue_refresh_token(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        self.issue(identity, &[], TokenType::Refresh, now)
    }

    fn issue(
        &self,
        identity: &str,
        authorities: &[String],
        token_type: TokenType,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        // Resolve the key first: a misconfigured secret produces no claims.
        let key = self.keys.key()?;
        let lifetime = match token_type {
            TokenType::Access => self.access_lifetime,
            TokenType::Refresh => self.refresh_lifetime,
        };

        let claims =
            self.codec
                .encode(identity, authorities, token_type, now, lifetime)?;
        let token = self.codec.sign(&claims, key)?;

        tracing::debug!(
            subject = %claims.subject,
            token_id = %claims.token_id,
            %token_type,
            authorities = ?claims.authorities,
            "token issued"
        );
        metrics::counter!("auth_tokens_issued_total", "type" => token_type.as_str())
            .increment(1);

        Ok(IssuedToken { token, claims })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str =
        "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ01";

    fn issuer(secret: &str) -> TokenIssuer {
        TokenIssuer::new(
            Arc::new(KeyManager::new(secret)),
            ClaimCodec::default(),
            ACCESS_EXPIRATION,
            REFRESH_EXPIRATION,
        )
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    #[test]
    fn test_lifetimes() {
        let issuer = issuer(SECRET);
        let access = issuer
            .issue_access_token("alice", &["ROLE_USER".into()], now())
            .unwrap();
        let refresh = issuer.issue_refresh_token("alice", now()).unwrap();

        assert_eq!(access.claims.token_type, TokenType::Access);
        assert_eq!(access.claims.expires_at, now() + chrono::Duration::hours(24));
        assert_eq!(refresh.claims.token_type, TokenType::Refresh);
        assert_eq!(refresh.claims.expires_at, now() + chrono::Duration::days(7));
        assert!(refresh.claims.authorities.is_empty());
    }

    #[test]
    fn test_same_instant_distinct_ids() {
        let issuer = issuer(SECRET);
        let first = issuer.issue_access_token("alice", &[], now()).unwrap();
        let second = issuer.issue_access_token("alice", &[], now()).unwrap();

        assert_ne!(first.claims.token_id, second.claims.token_id);
        assert_ne!(first.token, second.token);
    }

    #[test]
    fn test_weak_secret_produces_nothing() {
        let issuer = issuer("short");
        assert!(matches!(
            issuer.issue_access_token("alice", &[], now()),
            Err(AuthError::WeakKey { .. })
        ));
        assert!(matches!(
            issuer.issue_refresh_token("alice", now()),
            Err(AuthError::WeakKey { .. })
        ));
    }

    #[test]
    fn test_invalid_lifetimes() {
        let keys = Arc::new(KeyManager::new(SECRET));
        for (access, refresh) in [
            (Duration::ZERO, REFRESH_EXPIRATION),
            (ACCESS_EXPIRATION, ACCESS_EXPIRATION),
            (REFRESH_EXPIRATION, ACCESS_EXPIRATION),
            (ACCESS_EXPIRATION, MAX_LIFETIME + Duration::from_millis(1)),
            (
                Duration::from_millis(u64::MAX - 1),
                Duration::from_millis(u64::MAX),
            ),
        ] {
            assert!(matches!(
                TokenIssuer::new(keys.clone(), ClaimCodec::default(), access, refresh),
                Err(AuthError::InvalidLifetimes)
            ));
        }
    }

    #[test]
    fn test_longest_lifetime_issues() {
        let issuer = TokenIssuer::new(
            Arc::new(KeyManager::new(SECRET)),
            ClaimCodec::default(),
            ACCESS_EXPIRATION,
            MAX_LIFETIME,
        )
        .unwrap();

        let refresh = issuer.issue_refresh_token("alice", now()).unwrap();
        assert_eq!(
            refresh.claims.expires_at,
            now() + chrono::Duration::days(3650)
        );
    }
}
