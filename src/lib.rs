//! taskauth is a stateless JSON Web Token authentication core with
//! server-side revocation.
//!
//! Tokens are HS256 signed, short-lived access tokens carry the identity
//! and its authorities, long-lived refresh tokens only the identity. A
//! logout revokes a token until its natural expiry.

#![forbid(unsafe_code)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod revocation;
pub mod telemetry;
pub mod token;

use std::sync::Arc;

use tokio::task::JoinHandle;

pub use auth::{Authenticator, TokenPair, bearer_token};
pub use error::{AuthError, RejectReason, Result, Unauthenticated, Verdict};
pub use token::{ClaimSet, TokenType};

/// State shared by every caller.
#[derive(Clone)]
pub struct AuthState {
    pub config: Arc<config::Configuration>,
    pub clock: Arc<dyn clock::Clock>,
    pub revocations: Arc<dyn revocation::RevocationStore>,
    pub authenticator: Arc<Authenticator>,
}

impl AuthState {
    /// Start the periodic revocation sweep. Needs a tokio runtime.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        revocation::spawn_sweeper(
            self.revocations.clone(),
            self.clock.clone(),
            self.config.revocation.sweep_period(),
        )
    }
}

/// Initialize the authentication state.
///
/// Fails on a missing or weak secret: a process must not serve requests
/// with a key it cannot trust. The identity source, when given, is put
/// behind a [`identity::cache::CachedIdentitySource`].
pub fn initialize(
    config: Arc<config::Configuration>,
    identities: Option<Arc<dyn identity::IdentitySource>>,
) -> Result<AuthState> {
    let clock: Arc<dyn clock::Clock> = Arc::new(clock::SystemClock::new());
    initialize_with_clock(config, identities, clock)
}

/// [`initialize`] with a chosen time source.
pub fn initialize_with_clock(
    config: Arc<config::Configuration>,
    identities: Option<Arc<dyn identity::IdentitySource>>,
    clock: Arc<dyn clock::Clock>,
) -> Result<AuthState> {
    let revocations: Arc<dyn revocation::RevocationStore> =
        Arc::new(revocation::MemoryRevocationStore::with_max_entries(
            clock.clone(),
            config.revocation.max_entries,
        ));

    let mut builder = Authenticator::builder(&config.token)
        .clock(clock.clone())
        .revocations(revocations.clone());

    if let Some(source) = identities {
        let cached = identity::cache::CachedIdentitySource::new(
            source,
            clock.clone(),
            config.identity_cache.ttl(),
            config.identity_cache.capacity,
        );
        builder = builder.identities(Arc::new(cached));
    }

    let authenticator = builder.build().inspect_err(AuthError::log)?;
    authenticator.ensure_ready().inspect_err(AuthError::log)?;

    tracing::info!(
        issuer = %config.token.issuer,
        audience = %config.token.audience,
        access_lifetime_ms = config.token.expiration,
        refresh_lifetime_ms = config.token.refresh_expiration,
        "authentication initialized"
    );

    Ok(AuthState {
        config,
        clock,
        revocations,
        authenticator: Arc::new(authenticator),
    })
}
