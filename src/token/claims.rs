//! Build, sign and parse claim sets.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation, decode, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Deserialize;

use super::key::SigningKey;
use super::{ClaimSet, TokenType};
use crate::error::{AuthError, Result};

pub const DEFAULT_ISSUER: &str = "taskmanager-api";
pub const DEFAULT_AUDIENCE: &str = "taskmanager-clients";
const ALGORITHM: Algorithm = Algorithm::HS256;
const HEADER_TYPE: &str = "JWT";
/// 128 bits of randomness per token identifier.
const TOKEN_ID_LENGTH: usize = 16;

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

/// Encode and decode claims for one authority.
#[derive(Clone, Debug)]
pub struct ClaimCodec {
    issuer: String,
    audience: String,
}

impl Default for ClaimCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ISSUER, DEFAULT_AUDIENCE)
    }
}

impl ClaimCodec {
    /// Create a new [`ClaimCodec`].
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Build a claim set valid from `now` for `lifetime`.
    ///
    /// Only the token id is random. Refresh claim sets never carry
    /// authorities.
    pub fn encode(
        &self,
        identity: &str,
        authorities: &[String],
        token_type: TokenType,
        now: DateTime<Utc>,
        lifetime: Duration,
    ) -> Result<ClaimSet> {
        if identity.trim().is_empty() {
            return Err(AuthError::EmptySubject);
        }

        let lifetime = chrono::Duration::from_std(lifetime)
            .map_err(|_| AuthError::InvalidLifetimes)?;
        let expires_at = now
            .checked_add_signed(lifetime)
            .ok_or(AuthError::InvalidLifetimes)?;

        let authorities = match token_type {
            TokenType::Access => authorities.to_vec(),
            TokenType::Refresh => Vec::new(),
        };

        Ok(ClaimSet {
            subject: identity.to_owned(),
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            issued_at: now,
            not_before: now,
            expires_at,
            token_id: token_id(),
            authorities,
            token_type,
        })
    }

    /// Sign a claim set into a compact token.
    pub fn sign(&self, claims: &ClaimSet, key: &SigningKey) -> Result<String> {
        let mut header = Header::new(ALGORITHM);
        header.typ = Some(HEADER_TYPE.to_owned());
        header.kid = Some(key.key_id().to_owned());

        encode(&header, claims, key.encoding()).map_err(AuthError::Signing)
    }

    /// Verify structure, algorithm, signature, issuer and audience, then
    /// return the claims.
    ///
    /// The validity window is not checked here; see [`Self::decode_at`].
    pub fn decode(&self, token: &str, key: &SigningKey) -> Result<ClaimSet> {
        check_header(token)?;

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let claims = decode::<ClaimSet>(token, key.decoding(), &validation)
            .map_err(|err| map_jwt_error(err.into_kind()))?
            .claims;

        if claims.subject.trim().is_empty() {
            return Err(AuthError::Malformed("empty subject".into()));
        }

        Ok(claims)
    }

    /// [`Self::decode`] plus the `not_before <= now <= expires_at` check.
    pub fn decode_at(
        &self,
        token: &str,
        key: &SigningKey,
        now: DateTime<Utc>,
    ) -> Result<ClaimSet> {
        let claims = self.decode(token, key)?;
        claims.check_window(now)?;
        Ok(claims)
    }
}

/// Fresh random token identifier.
fn token_id() -> String {
    let mut bytes = [0u8; TOKEN_ID_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Reject anything that is not a three-part token announcing HS256.
///
/// Done before the codec so an `alg` we do not know (`none` included)
/// reports as unsupported rather than as a parse failure.
fn check_header(token: &str) -> Result<()> {
    let mut parts = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::Malformed("expected three segments".into()));
    };

    let raw = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| AuthError::Malformed("header is not base64url".into()))?;
    let header: RawHeader = serde_json::from_slice(&raw)
        .map_err(|_| AuthError::Malformed("header is not a JWT header".into()))?;

    if header.alg != "HS256" {
        return Err(AuthError::UnsupportedAlgorithm(header.alg));
    }

    Ok(())
}

fn map_jwt_error(kind: ErrorKind) -> AuthError {
    match kind {
        ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
        // The header was checked before, so a base64 failure here comes from
        // the signature segment.
        ErrorKind::Base64(_) => AuthError::SignatureInvalid,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            AuthError::UnsupportedAlgorithm("unknown".into())
        },
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::ImmatureSignature => AuthError::NotYetValid,
        ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
        ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
        ErrorKind::MissingRequiredClaim(claim) => {
            AuthError::Malformed(format!("missing `{claim}` claim"))
        },
        ErrorKind::Json(err) => AuthError::Malformed(err.to_string()),
        ErrorKind::Utf8(_) => AuthError::Malformed("payload is not utf8".into()),
        other => AuthError::Malformed(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::token::key::signing_key;

    const SECRET: &str =
        "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ01";

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn authorities() -> Vec<String> {
        vec!["ROLE_USER".into(), "ROLE_ADMIN".into()]
    }

    #[test]
    fn test_encode_consistency() {
        let codec = ClaimCodec::default();
        let claims = codec
            .encode(
                "alice",
                &authorities(),
                TokenType::Access,
                now(),
                Duration::from_secs(3600),
            )
            .unwrap();

        assert_eq!(claims.subject, "alice");
        assert_eq!(claims.issuer, DEFAULT_ISSUER);
        assert_eq!(claims.audience, DEFAULT_AUDIENCE);
        assert_eq!(claims.not_before, claims.issued_at);
        assert_eq!(
            claims.expires_at - claims.issued_at,
            chrono::Duration::seconds(3600)
        );
        assert_eq!(claims.token_id.len(), TOKEN_ID_LENGTH * 2);
        assert_eq!(claims.authorities, authorities());
    }

    #[test]
    fn test_encode_refresh_drops_authorities() {
        let claims = ClaimCodec::default()
            .encode(
                "alice",
                &authorities(),
                TokenType::Refresh,
                now(),
                Duration::from_secs(60),
            )
            .unwrap();
        assert!(claims.authorities.is_empty());
        assert_eq!(claims.token_type, TokenType::Refresh);
    }

    #[test]
    fn test_encode_empty_subject() {
        let err = ClaimCodec::default()
            .encode("", &[], TokenType::Access, now(), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, AuthError::EmptySubject));
    }

    #[test]
    fn test_unique_token_ids() {
        let codec = ClaimCodec::default();
        let ids: HashSet<String> = (0..1000)
            .map(|_| {
                codec
                    .encode("alice", &[], TokenType::Access, now(), Duration::from_secs(1))
                    .unwrap()
                    .token_id
            })
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_round_trip() {
        let codec = ClaimCodec::default();
        let key = signing_key(SECRET).unwrap();
        let sub_second = now() + chrono::Duration::milliseconds(437);

        for token_type in [TokenType::Access, TokenType::Refresh] {
            let claims = codec
                .encode(
                    "alice",
                    &authorities(),
                    token_type,
                    sub_second,
                    Duration::from_millis(90_061),
                )
                .unwrap();
            let token = codec.sign(&claims, &key).unwrap();
            assert_eq!(codec.decode(&token, &key).unwrap(), claims);
        }
    }

    #[test]
    fn test_header() {
        let codec = ClaimCodec::default();
        let key = signing_key(SECRET).unwrap();
        let claims = codec
            .encode("alice", &[], TokenType::Access, now(), Duration::from_secs(1))
            .unwrap();
        let token = codec.sign(&claims, &key).unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::HS256);
        assert_eq!(header.typ.as_deref(), Some("JWT"));
        assert_eq!(header.kid.as_deref(), Some(key.key_id()));
    }

    #[test]
    fn test_wrong_key() {
        let codec = ClaimCodec::default();
        let key = signing_key(SECRET).unwrap();
        let other =
            signing_key("different-secret-key-with-sufficient-length-for-security")
                .unwrap();
        let claims = codec
            .encode("alice", &[], TokenType::Access, now(), Duration::from_secs(1))
            .unwrap();
        let token = codec.sign(&claims, &key).unwrap();

        assert!(matches!(
            codec.decode(&token, &other),
            Err(AuthError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_other_authority() {
        let key = signing_key(SECRET).unwrap();
        let foreign = ClaimCodec::new("other-api", DEFAULT_AUDIENCE);
        let claims = foreign
            .encode("alice", &[], TokenType::Access, now(), Duration::from_secs(1))
            .unwrap();
        let token = foreign.sign(&claims, &key).unwrap();
        assert!(matches!(
            ClaimCodec::default().decode(&token, &key),
            Err(AuthError::IssuerMismatch)
        ));

        let foreign = ClaimCodec::new(DEFAULT_ISSUER, "other-clients");
        let claims = foreign
            .encode("alice", &[], TokenType::Access, now(), Duration::from_secs(1))
            .unwrap();
        let token = foreign.sign(&claims, &key).unwrap();
        assert!(matches!(
            ClaimCodec::default().decode(&token, &key),
            Err(AuthError::AudienceMismatch)
        ));
    }

    #[test]
    fn test_malformed() {
        let codec = ClaimCodec::default();
        let key = signing_key(SECRET).unwrap();

        for token in ["", "invalid.token.format", "a.b", "a.b.c.d", "###.e30.abc"] {
            assert!(
                matches!(codec.decode(token, &key), Err(AuthError::Malformed(_))),
                "{token:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_unsupported_algorithm() {
        let codec = ClaimCodec::default();
        let key = signing_key(SECRET).unwrap();

        let none = format!(
            "{}.{}.",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(r#"{"sub":"alice"}"#),
        );
        assert!(matches!(
            codec.decode(&none, &key),
            Err(AuthError::UnsupportedAlgorithm(alg)) if alg == "none"
        ));

        let hs512 = format!(
            "{}.{}.c2ln",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS512","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(r#"{"sub":"alice"}"#),
        );
        assert!(matches!(
            codec.decode(&hs512, &key),
            Err(AuthError::UnsupportedAlgorithm(alg)) if alg == "HS512"
        ));
    }

    #[test]
    fn test_decode_at_expired() {
        let codec = ClaimCodec::default();
        let key = signing_key(SECRET).unwrap();
        let claims = codec
            .encode("alice", &[], TokenType::Access, now(), Duration::from_millis(1))
            .unwrap();
        let token = codec.sign(&claims, &key).unwrap();

        assert!(codec.decode_at(&token, &key, now()).is_ok());
        assert!(matches!(
            codec.decode_at(&token, &key, now() + chrono::Duration::milliseconds(10)),
            Err(AuthError::Expired)
        ));
    }
}
