//! Configuration manager for taskauth.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::identity::cache;
use crate::revocation;
use crate::token::claims::{DEFAULT_AUDIENCE, DEFAULT_ISSUER};
use crate::token::issuer::{ACCESS_EXPIRATION, REFRESH_EXPIRATION};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
/// Environment variable overriding `token.secret`.
pub const SECRET_ENV: &str = "TOKEN_SECRET";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    #[serde(skip)]
    path: PathBuf,
    /// Related to JsonWebToken configuration.
    pub token: Token,
    /// Related to logout and revocation bookkeeping.
    pub revocation: Revocation,
    /// Related to identity lookups caching.
    pub identity_cache: IdentityCache,
}

/// Signing secret. Wiped from memory on drop, never printed.
#[derive(Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for Secret {
    fn from(secret: String) -> Self {
        Self(Zeroizing::new(secret))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

/// Json Web Token configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Token {
    /// HMAC secret, at least 32 bytes.
    #[serde(skip_serializing)]
    pub secret: Secret,
    /// Access token lifetime in milliseconds.
    /// Default is 24 hours.
    pub expiration: u64,
    /// Refresh token lifetime in milliseconds.
    /// Default is 7 days.
    pub refresh_expiration: u64,
    /// Default is `taskmanager-api`.
    pub issuer: String,
    /// Default is `taskmanager-clients`.
    pub audience: String,
}

impl Default for Token {
    fn default() -> Self {
        Self {
            secret: Secret::default(),
            expiration: ACCESS_EXPIRATION.as_millis() as u64,
            refresh_expiration: REFRESH_EXPIRATION.as_millis() as u64,
            issuer: DEFAULT_ISSUER.to_owned(),
            audience: DEFAULT_AUDIENCE.to_owned(),
        }
    }
}

impl Token {
    pub fn access_lifetime(&self) -> Duration {
        Duration::from_millis(self.expiration)
    }

    pub fn refresh_lifetime(&self) -> Duration {
        Duration::from_millis(self.refresh_expiration)
    }
}

/// Revocation store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Revocation {
    /// Seconds between two background sweeps.
    pub sweep_interval: u64,
    /// Soft bound on stored entries.
    pub max_entries: usize,
}

impl Default for Revocation {
    fn default() -> Self {
        Self {
            sweep_interval: 300,
            max_entries: revocation::MAX_ENTRIES,
        }
    }
}

impl Revocation {
    pub fn sweep_period(&self) -> Duration {
        // A zero period would make `tokio::time::interval` panic.
        Duration::from_secs(self.sweep_interval.max(1))
    }
}

/// Identity cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityCache {
    /// Entry lifetime in seconds.
    pub ttl: u64,
    pub capacity: usize,
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self {
            ttl: cache::DEFAULT_TTL.as_secs(),
            capacity: cache::DEFAULT_CAPACITY,
        }
    }
}

impl IdentityCache {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Replace the token section.
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = token;
        self
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies environment overrides.
    pub fn read(self) -> Arc<Self> {
        let config = self.load();
        Arc::new(config.with_secret(std::env::var(SECRET_ENV).ok()))
    }

    /// Parse the file alone, environment aside.
    fn load(self) -> Self {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file) {
                Ok(config) => config.path(file_path.clone()),
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        }
    }

    /// Override the secret with the value of `TOKEN_SECRET`, if any.
    fn with_secret(mut self, secret: Option<String>) -> Self {
        if let Some(secret) = secret {
            tracing::debug!("signing secret taken from `{SECRET_ENV}`");
            self.token.secret = secret.into();
        }
        self
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, path = %self.path.display(), "configuration file not loaded");
        Self {
            path: self.path.clone(),
            ..Default::default()
        }
    }
}
