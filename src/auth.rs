//! Single entry point for login, per-request authentication, refresh and
//! logout.
//!
//! A token is issued, stays valid while inside its window and not revoked,
//! then ends either expired or revoked. Nothing brings it back.

use std::sync::Arc;

use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::config;
use crate::error::{AuthError, Result, Unauthenticated, Verdict};
use crate::identity::IdentitySource;
use crate::revocation::{MemoryRevocationStore, RevocationStore};
use crate::token::claims::ClaimCodec;
use crate::token::issuer::TokenIssuer;
use crate::token::key::KeyManager;
use crate::token::verifier::TokenVerifier;
use crate::token::{ClaimSet, TokenType};

pub const TOKEN_TYPE: &str = "Bearer";
const BEARER_PREFIX: &str = "bearer ";

/// Tokens handed out at login.
#[derive(Clone, Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime, in seconds, rounded up.
    pub expires_in: u64,
}

/// Extract the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let prefix = header.get(..BEARER_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(BEARER_PREFIX) {
        return None;
    }

    let token = header[BEARER_PREFIX.len()..].trim();
    (!token.is_empty()).then_some(token)
}

/// Lifetime in whole seconds, rounded up so a sub-second token never
/// reports `0`.
fn expires_in(lifetime: std::time::Duration) -> u64 {
    lifetime.as_millis().div_ceil(1000) as u64
}

/// Authentication facade.
pub struct Authenticator {
    keys: Arc<KeyManager>,
    issuer: TokenIssuer,
    verifier: TokenVerifier,
    revocations: Arc<dyn RevocationStore>,
    identities: Option<Arc<dyn IdentitySource>>,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    /// Start building an [`Authenticator`] from token settings.
    pub fn builder(settings: &config::Token) -> AuthenticatorBuilder {
        AuthenticatorBuilder {
            settings: settings.clone(),
            clock: None,
            revocations: None,
            identities: None,
        }
    }

    /// Derive the signing key now rather than on first use.
    ///
    /// Meant for startup, so a weak or missing secret halts the process
    /// before any request is served.
    pub fn ensure_ready(&self) -> Result<()> {
        self.keys.key().map(|_| ())
    }

    /// Issue an access and refresh token for an already authenticated
    /// identity.
    pub fn login(&self, identity: &str, authorities: &[String]) -> Result<TokenPair> {
        let now = self.clock.now();
        let access = self.issuer.issue_access_token(identity, authorities, now)?;
        let refresh = self.issuer.issue_refresh_token(identity, now)?;

        tracing::info!(
            subject = %identity,
            access_token_id = %access.claims.token_id,
            refresh_token_id = %refresh.claims.token_id,
            "login tokens issued"
        );

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: TOKEN_TYPE,
            expires_in: expires_in(self.issuer.access_lifetime()),
        })
    }

    /// Resolve `principal` on the identity source, then [`Self::login`].
    ///
    /// Unknown and disabled accounts get [`AuthError::PrincipalUnavailable`].
    pub fn login_principal(&self, principal: &str) -> Result<TokenPair> {
        let identity = self.resolve(principal)?;
        self.login(&identity.principal, &identity.authorities)
    }

    /// Validate an access token on an incoming request.
    pub fn authenticate(
        &self,
        access_token: &str,
    ) -> std::result::Result<ClaimSet, Unauthenticated> {
        Ok(self.verifier.verify(access_token, TokenType::Access)?)
    }

    /// [`Self::authenticate`] as a [`Verdict`].
    pub fn check(&self, access_token: &str) -> Verdict {
        self.verifier.check(access_token, TokenType::Access)
    }

    /// Whether `token` is a valid access token for `expected_subject`.
    pub fn is_valid(&self, token: &str, expected_subject: &str) -> bool {
        self.verifier.is_valid(token, expected_subject)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The refresh token itself is neither rotated nor revoked. With an
    /// identity source the authorities are resolved again and disabled
    /// accounts are refused; without one the new token carries none.
    pub fn refresh(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<String, Unauthenticated> {
        let claims = self.verifier.verify(refresh_token, TokenType::Refresh)?;

        let authorities = match &self.identities {
            Some(_) => self
                .resolve(&claims.subject)
                .inspect_err(AuthError::log)?
                .authorities,
            None => {
                tracing::warn!(
                    subject = %claims.subject,
                    "no identity source, access token refreshed without authorities"
                );
                Vec::new()
            },
        };

        let access = self
            .issuer
            .issue_access_token(&claims.subject, &authorities, self.clock.now())
            .inspect_err(AuthError::log)?;

        tracing::info!(
            subject = %claims.subject,
            refresh_token_id = %claims.token_id,
            access_token_id = %access.claims.token_id,
            "access token refreshed"
        );

        Ok(access.token)
    }

    /// Revoke a token until its natural expiry.
    ///
    /// The token only needs a valid signature: an expired token is a no-op
    /// and an already revoked one is revoked again.
    pub fn logout(&self, token: &str) -> std::result::Result<(), Unauthenticated> {
        let claims = self.verifier.inspect(token).inspect_err(AuthError::log)?;

        if claims.is_expired(self.clock.now()) {
            tracing::debug!(token_id = %claims.token_id, "logout with an expired token");
            return Ok(());
        }

        self.revocations.revoke(&claims.token_id, claims.expires_at);
        tracing::info!(
            subject = %claims.subject,
            token_id = %claims.token_id,
            token_type = %claims.token_type,
            "logged out"
        );

        Ok(())
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    pub fn revocations(&self) -> &Arc<dyn RevocationStore> {
        &self.revocations
    }

    fn resolve(&self, principal: &str) -> Result<crate::identity::Identity> {
        let Some(identities) = &self.identities else {
            return Err(AuthError::PrincipalUnavailable(principal.to_owned()));
        };

        match identities.lookup(principal) {
            Some(identity) if identity.enabled => Ok(identity),
            _ => Err(AuthError::PrincipalUnavailable(principal.to_owned())),
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("issuer", &self.issuer)
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Authenticator`].
pub struct AuthenticatorBuilder {
    settings: config::Token,
    clock: Option<Arc<dyn Clock>>,
    revocations: Option<Arc<dyn RevocationStore>>,
    identities: Option<Arc<dyn IdentitySource>>,
}

impl AuthenticatorBuilder {
    /// Time source. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Revocation store. Defaults to a [`MemoryRevocationStore`].
    pub fn revocations(mut self, store: Arc<dyn RevocationStore>) -> Self {
        self.revocations = Some(store);
        self
    }

    /// Identity source used by [`Authenticator::login_principal`] and
    /// [`Authenticator::refresh`].
    pub fn identities(mut self, source: Arc<dyn IdentitySource>) -> Self {
        self.identities = Some(source);
        self
    }

    /// Build the [`Authenticator`].
    ///
    /// The secret is not checked here, see [`Authenticator::ensure_ready`].
    pub fn build(self) -> Result<Authenticator> {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        let revocations = self
            .revocations
            .unwrap_or_else(|| Arc::new(MemoryRevocationStore::new(clock.clone())));

        let keys = Arc::new(KeyManager::new(self.settings.secret.as_str()));
        let codec = ClaimCodec::new(&self.settings.issuer, &self.settings.audience);
        let issuer = TokenIssuer::new(
            keys.clone(),
            codec.clone(),
            self.settings.access_lifetime(),
            self.settings.refresh_lifetime(),
        )?;
        let verifier =
            TokenVerifier::new(keys.clone(), codec, revocations.clone(), clock.clone());

        Ok(Authenticator {
            keys,
            issuer,
            verifier,
            revocations,
            identities: self.identities,
            clock,
        })
    }
}
