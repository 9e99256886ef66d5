//! Secret lookup by [`SecretRef`].
//!
//! Values are wrapped in [`SecretString`] as soon as they are read and are
//! never logged. Stores are declared in `berth.toml`:
//!
//! ```toml
//! [stores.ci]
//! kind = "env"
//!
//! [stores.bot]
//! kind = "dotenv"
//! path = ".env.production"
//! ```

use berth_core::{SecretRef, StoreConfig};
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Capability to resolve secret references.
pub trait SecretStore: Send + Sync {
    fn lookup(&self, secret: &SecretRef) -> Result<SecretString, SecretError>;
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Dispatches lookups to the stores named in configuration.
pub struct ConfiguredSecretStore {
    stores: BTreeMap<String, StoreConfig>,
    base_dir: PathBuf,
    env: EnvLookup,
}

impl ConfiguredSecretStore {
    /// `base_dir` resolves relative dotenv paths (normally the project dir).
    pub fn new(stores: &BTreeMap<String, StoreConfig>, base_dir: &Path) -> Self {
        Self {
            stores: stores.clone(),
            base_dir: base_dir.to_path_buf(),
            env: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replace the process environment used by `env` stores.
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    fn dotenv_lookup(&self, path: &Path, secret: &SecretRef) -> Result<SecretString, SecretError> {
        let path = self.base_dir.join(path);
        let iter = dotenvy::from_path_iter(&path).map_err(|e| SecretError::StoreUnavailable {
            store: secret.store.clone(),
            reason: format!("{}: {e}", path.display()),
        })?;

        for item in iter {
            let (name, value) = item.map_err(|e| SecretError::StoreUnavailable {
                store: secret.store.clone(),
                reason: format!("{}: {e}", path.display()),
            })?;
            if name == secret.key {
                return Ok(SecretString::from(value));
            }
        }
        Err(SecretError::not_found(secret))
    }
}

impl SecretStore for ConfiguredSecretStore {
    fn lookup(&self, secret: &SecretRef) -> Result<SecretString, SecretError> {
        let store = self
            .stores
            .get(&secret.store)
            .ok_or_else(|| SecretError::UnknownStore {
                store: secret.store.clone(),
            })?;

        tracing::debug!(store = %secret.store, key = %secret.key, "secret lookup");

        match store {
            StoreConfig::Env => (self.env)(&secret.key)
                .map(SecretString::from)
                .ok_or_else(|| SecretError::not_found(secret)),
            StoreConfig::Dotenv { path } => self.dotenv_lookup(path, secret),
        }
    }
}

/// In-memory store, keyed by `(store, key)`.
#[derive(Default)]
pub struct StaticSecretStore {
    values: HashMap<SecretRef, SecretString>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, store: &str, key: &str, value: &str) -> Self {
        self.values.insert(
            SecretRef {
                store: store.to_owned(),
                key: key.to_owned(),
            },
            SecretString::from(value.to_owned()),
        );
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn lookup(&self, secret: &SecretRef) -> Result<SecretString, SecretError> {
        self.values
            .get(secret)
            .map(|value| SecretString::from(value.expose_secret().to_owned()))
            .ok_or_else(|| SecretError::not_found(secret))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret '{key}' not found in store '{store}'")]
    NotFound { store: String, key: String },

    #[error("secret store '{store}' is not declared in berth.toml [stores]")]
    UnknownStore { store: String },

    #[error("secret store '{store}' is unavailable: {reason}")]
    StoreUnavailable { store: String, reason: String },
}

impl SecretError {
    fn not_found(secret: &SecretRef) -> Self {
        SecretError::NotFound {
            store: secret.store.clone(),
            key: secret.key.clone(),
        }
    }
}
