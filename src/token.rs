//! Manage json web tokens.
//!
//! Tokens are HMAC-SHA256 signed compact JWTs. The pieces are split the
//! same way a token travels: a [`key::KeyManager`] owns the secret, a
//! [`claims::ClaimCodec`] turns a [`ClaimSet`] into a signed string and
//! back, the [`issuer::TokenIssuer`] mints tokens and the
//! [`verifier::TokenVerifier`] runs every check on the way in.

pub mod claims;
pub mod issuer;
pub mod key;
pub mod verifier;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Discriminates access tokens from refresh tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Short-lived token authorizing API requests.
    Access,
    /// Longer-lived token used solely to obtain a new access token.
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    /// Principal the token is about.
    #[serde(rename = "sub")]
    pub subject: String,
    /// Authority that issued the token.
    #[serde(rename = "iss")]
    pub issuer: String,
    /// Population the token is intended for.
    #[serde(rename = "aud")]
    pub audience: String,
    #[serde(rename = "iat", with = "numeric_date")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "nbf", with = "numeric_date")]
    pub not_before: DateTime<Utc>,
    /// Instant after which the token must not be accepted.
    #[serde(rename = "exp", with = "numeric_date")]
    pub expires_at: DateTime<Utc>,
    /// Unique identifier, key of the revocation store.
    #[serde(rename = "jti")]
    pub token_id: String,
    /// Roles and permissions. Always empty on refresh tokens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorities: Vec<String>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

impl ClaimSet {
    /// Check `not_before <= now <= expires_at`.
    pub fn check_window(&self, now: DateTime<Utc>) -> Result<()> {
        if now < self.not_before {
            return Err(AuthError::NotYetValid);
        }
        if now > self.expires_at {
            return Err(AuthError::Expired);
        }
        Ok(())
    }

    /// Whether the token outlived its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// RFC 7519 NumericDate with millisecond precision.
///
/// Whole seconds are written as integers, anything finer as fractional
/// seconds.
mod numeric_date {
    use std::fmt;

    use chrono::{DateTime, Utc};
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    const MILLIS_PER_SECOND: i64 = 1000;

    pub fn serialize<S>(
        instant: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = instant.timestamp_millis();
        if millis % MILLIS_PER_SECOND == 0 {
            serializer.serialize_i64(millis / MILLIS_PER_SECOND)
        } else {
            serializer.serialize_f64(millis as f64 / MILLIS_PER_SECOND as f64)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(NumericDateVisitor)
    }

    struct NumericDateVisitor;

    impl NumericDateVisitor {
        fn from_millis<E: de::Error>(millis: Option<i64>) -> Result<DateTime<Utc>, E> {
            millis
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| E::custom("NumericDate out of range"))
        }
    }

    impl Visitor<'_> for NumericDateVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("seconds since the Unix epoch")
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Self::from_millis(value.checked_mul(MILLIS_PER_SECOND))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            let seconds = i64::try_from(value).ok();
            Self::from_millis(seconds.and_then(|s| s.checked_mul(MILLIS_PER_SECOND)))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            let millis = (value * MILLIS_PER_SECOND as f64).round();
            if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
                return Err(E::custom("NumericDate out of range"));
            }
            Self::from_millis(Some(millis as i64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(iat_millis: i64, lifetime_millis: i64) -> ClaimSet {
        let issued_at = DateTime::from_timestamp_millis(iat_millis).unwrap();
        ClaimSet {
            subject: "alice".into(),
            issuer: "taskmanager-api".into(),
            audience: "taskmanager-clients".into(),
            issued_at,
            not_before: issued_at,
            expires_at: issued_at + chrono::Duration::milliseconds(lifetime_millis),
            token_id: "0f".into(),
            authorities: vec!["ROLE_USER".into()],
            token_type: TokenType::Access,
        }
    }

    #[test]
    fn test_claim_names() {
        let json = serde_json::to_value(claims(1_700_000_000_000, 1000)).unwrap();

        assert_eq!(json["sub"], "alice");
        assert_eq!(json["iss"], "taskmanager-api");
        assert_eq!(json["aud"], "taskmanager-clients");
        assert_eq!(json["iat"], 1_700_000_000i64);
        assert_eq!(json["exp"], 1_700_000_001i64);
        assert_eq!(json["type"], "access");
        assert_eq!(json["authorities"][0], "ROLE_USER");
    }

    #[test]
    fn test_sub_second_dates() {
        let set = claims(1_700_000_000_250, 1);
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.contains("\"iat\":1700000000.25"));
        assert!(json.contains("\"exp\":1700000000.251"));

        let back: ClaimSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_refresh_without_authorities() {
        let mut set = claims(1_700_000_000_000, 1000);
        set.authorities.clear();
        set.token_type = TokenType::Refresh;

        let json = serde_json::to_value(&set).unwrap();
        assert!(json.get("authorities").is_none());
        assert_eq!(json["type"], "refresh");

        let back: ClaimSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_window() {
        let set = claims(1_700_000_000_000, 1);
        let at = |millis| DateTime::from_timestamp_millis(millis).unwrap();

        assert!(matches!(
            set.check_window(at(1_699_999_999_999)),
            Err(AuthError::NotYetValid)
        ));
        assert!(set.check_window(at(1_700_000_000_000)).is_ok());
        assert!(set.check_window(at(1_700_000_000_001)).is_ok());
        assert!(matches!(
            set.check_window(at(1_700_000_000_011)),
            Err(AuthError::Expired)
        ));
        assert!(set.is_expired(at(1_700_000_000_002)));
    }
}
