//! Identity source, consulted at login and refresh time.

pub mod cache;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// What the identity source knows about a principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Principal identifier, becomes the token subject.
    pub principal: String,
    /// Disabled accounts get no tokens.
    pub enabled: bool,
    /// Role and permission strings, e.g. `ROLE_USER`.
    pub authorities: Vec<String>,
}

impl Identity {
    /// Create an enabled [`Identity`].
    pub fn new(principal: impl Into<String>, authorities: Vec<String>) -> Self {
        Self {
            principal: principal.into(),
            enabled: true,
            authorities,
        }
    }

    /// Mark the account as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Port to the user directory.
pub trait IdentitySource: Send + Sync {
    /// Resolve a principal, `None` if unknown.
    fn lookup(&self, principal: &str) -> Option<Identity>;
}

/// Identities held in memory.
#[derive(Debug, Default)]
pub struct MemoryIdentitySource {
    identities: DashMap<String, Identity>,
}

impl MemoryIdentitySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an identity.
    pub fn insert(&self, identity: Identity) {
        self.identities.insert(identity.principal.clone(), identity);
    }

    /// Forget a principal.
    pub fn remove(&self, principal: &str) -> Option<Identity> {
        self.identities.remove(principal).map(|(_, identity)| identity)
    }
}

impl FromIterator<Identity> for MemoryIdentitySource {
    fn from_iter<I: IntoIterator<Item = Identity>>(iter: I) -> Self {
        let source = Self::new();
        for identity in iter {
            source.insert(identity);
        }
        source
    }
}

impl IdentitySource for MemoryIdentitySource {
    fn lookup(&self, principal: &str) -> Option<Identity> {
        self.identities.get(principal).map(|entry| entry.value().clone())
    }
}
