//! Error handler for taskauth.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::token::{ClaimSet, TokenType};

pub type Result<T> = std::result::Result<T, AuthError>;

/// Enum representing every failure of the authentication core.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("signing secret cannot be null or empty")]
    MissingSecret,
    #[error("signing secret is {length} bytes long while {minimum} is required")]
    WeakKey { length: usize, minimum: usize },
    #[error("refresh lifetime must be longer than access lifetime")]
    InvalidLifetimes,

    #[error("subject cannot be empty")]
    EmptySubject,
    #[error("failed to sign token")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("token is malformed: {0}")]
    Malformed(String),
    #[error("token signature is invalid")]
    SignatureInvalid,
    #[error("algorithm `{0}` is not supported")]
    UnsupportedAlgorithm(String),

    #[error("token is expired")]
    Expired,
    #[error("token is not yet valid")]
    NotYetValid,

    #[error("token issuer does not match")]
    IssuerMismatch,
    #[error("token audience does not match")]
    AudienceMismatch,
    #[error("{expected} token expected, found {found} token")]
    TokenTypeMismatch {
        expected: TokenType,
        found: TokenType,
    },
    #[error("token subject does not match")]
    SubjectMismatch,
    #[error("principal `{0}` is unknown or disabled")]
    PrincipalUnavailable(String),

    #[error("token has been revoked")]
    Revoked,
}

/// Families of errors, each handled and logged its own way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    /// Weak or missing key. Fatal at startup or first use.
    Configuration,
    /// Bad signature, bad structure or wrong algorithm.
    MalformedInput,
    /// Expired or not yet valid.
    Temporal,
    /// Type, issuer, audience or subject mismatch.
    Semantic,
    /// Explicit rejection after logout.
    Revocation,
}

/// Machine readable rejection code.
///
/// Stays server-side: clients only ever see [`Unauthenticated`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Configuration,
    Malformed,
    SignatureInvalid,
    UnsupportedAlgorithm,
    Expired,
    NotYetValid,
    IssuerMismatch,
    AudienceMismatch,
    TokenTypeMismatch,
    SubjectMismatch,
    PrincipalUnavailable,
    Revoked,
}

impl RejectReason {
    /// Stable label, used on metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Configuration => "configuration",
            RejectReason::Malformed => "malformed",
            RejectReason::SignatureInvalid => "signature_invalid",
            RejectReason::UnsupportedAlgorithm => "unsupported_algorithm",
            RejectReason::Expired => "expired",
            RejectReason::NotYetValid => "not_yet_valid",
            RejectReason::IssuerMismatch => "issuer_mismatch",
            RejectReason::AudienceMismatch => "audience_mismatch",
            RejectReason::TokenTypeMismatch => "token_type_mismatch",
            RejectReason::SubjectMismatch => "subject_mismatch",
            RejectReason::PrincipalUnavailable => "principal_unavailable",
            RejectReason::Revoked => "revoked",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthError {
    /// Taxonomy family of this error.
    pub fn category(&self) -> Category {
        match self {
            AuthError::MissingSecret
            | AuthError::WeakKey { .. }
            | AuthError::InvalidLifetimes
            | AuthError::Signing(_) => Category::Configuration,
            AuthError::EmptySubject
            | AuthError::Malformed(_)
            | AuthError::SignatureInvalid
            | AuthError::UnsupportedAlgorithm(_) => Category::MalformedInput,
            AuthError::Expired | AuthError::NotYetValid => Category::Temporal,
            AuthError::IssuerMismatch
            | AuthError::AudienceMismatch
            | AuthError::TokenTypeMismatch { .. }
            | AuthError::SubjectMismatch
            | AuthError::PrincipalUnavailable(_) => Category::Semantic,
            AuthError::Revoked => Category::Revocation,
        }
    }

    /// Rejection code of this error.
    pub fn reason(&self) -> RejectReason {
        match self {
            AuthError::MissingSecret
            | AuthError::WeakKey { .. }
            | AuthError::InvalidLifetimes
            | AuthError::Signing(_) => RejectReason::Configuration,
            AuthError::EmptySubject | AuthError::Malformed(_) => {
                RejectReason::Malformed
            },
            AuthError::SignatureInvalid => RejectReason::SignatureInvalid,
            AuthError::UnsupportedAlgorithm(_) => {
                RejectReason::UnsupportedAlgorithm
            },
            AuthError::Expired => RejectReason::Expired,
            AuthError::NotYetValid => RejectReason::NotYetValid,
            AuthError::IssuerMismatch => RejectReason::IssuerMismatch,
            AuthError::AudienceMismatch => RejectReason::AudienceMismatch,
            AuthError::TokenTypeMismatch { .. } => {
                RejectReason::TokenTypeMismatch
            },
            AuthError::SubjectMismatch => RejectReason::SubjectMismatch,
            AuthError::PrincipalUnavailable(_) => {
                RejectReason::PrincipalUnavailable
            },
            AuthError::Revoked => RejectReason::Revoked,
        }
    }

    /// Emit a log record at the level the error family deserves.
    pub fn log(&self) {
        let reason = self.reason();
        match self.category() {
            Category::Configuration => {
                tracing::error!(%reason, error = %self, "authentication misconfigured")
            },
            Category::MalformedInput => {
                tracing::warn!(%reason, error = %self, "rejected malformed token")
            },
            Category::Temporal => {
                tracing::debug!(%reason, error = %self, "rejected token outside its validity window")
            },
            Category::Semantic => tracing::warn!(
                %reason,
                error = %self,
                security_event = true,
                "rejected token failing claim checks"
            ),
            Category::Revocation => {
                tracing::info!(%reason, "rejected revoked token")
            },
        }
    }
}

/// Outcome of a token validation, with no error escaping.
#[derive(Clone, Debug)]
pub enum Verdict {
    Valid(ClaimSet),
    Rejected(RejectReason),
}

impl Verdict {
    /// Whether the token was accepted.
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid(_))
    }

    /// Claims of an accepted token.
    pub fn claims(&self) -> Option<&ClaimSet> {
        match self {
            Verdict::Valid(claims) => Some(claims),
            Verdict::Rejected(_) => None,
        }
    }
}

impl From<Result<ClaimSet>> for Verdict {
    fn from(result: Result<ClaimSet>) -> Self {
        match result {
            Ok(claims) => Verdict::Valid(claims),
            Err(err) => Verdict::Rejected(err.reason()),
        }
    }
}

/// Rejection shown to end clients.
///
/// Every cause renders the same way so a caller cannot tell an expired
/// token from a forged or revoked one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("unauthenticated")]
pub struct Unauthenticated {
    reason: RejectReason,
}

impl Unauthenticated {
    /// Server-side cause of the rejection.
    pub fn reason(&self) -> RejectReason {
        self.reason
    }
}

impl From<AuthError> for Unauthenticated {
    fn from(err: AuthError) -> Self {
        Self {
            reason: err.reason(),
        }
    }
}

impl From<RejectReason> for Unauthenticated {
    fn from(reason: RejectReason) -> Self {
        Self { reason }
    }
}
