//! Secret and volume bindings attached to a workload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pointer to a value held by an external secret store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecretRef {
    pub store: String,
    pub key: String,
}

/// Exposes one secret to the workload as an environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretBinding {
    #[serde(rename = "env")]
    pub env_var: String,
    #[serde(flatten)]
    pub secret_ref: SecretRef,
}

/// Secret bindings, unique by environment variable name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SecretBindings(BTreeMap<String, SecretRef>);

impl SecretBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect bindings, rejecting a second binding for the same env var.
    pub fn try_from_bindings<I>(bindings: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = SecretBinding>,
    {
        let mut set = Self::new();
        for binding in bindings {
            set.insert(binding)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, binding: SecretBinding) -> crate::Result<()> {
        if self.0.contains_key(&binding.env_var) {
            return Err(crate::Error::DuplicateSecretBinding {
                env_var: binding.env_var,
            });
        }
        self.0.insert(binding.env_var, binding.secret_ref);
        Ok(())
    }

    pub fn get(&self, env_var: &str) -> Option<&SecretRef> {
        self.0.get(env_var)
    }

    /// Bindings in env var order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecretRef)> {
        self.0.iter().map(|(env, r)| (env.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Where a mounted volume's contents come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VolumeSource {
    /// Configuration published by the orchestrator (config map or similar).
    Config { name: String },
    /// A provisioned persistent volume claim.
    Persistent { claim: String },
}

impl VolumeSource {
    /// Name of the backing object (config name or claim name).
    pub fn name(&self) -> &str {
        match self {
            VolumeSource::Config { name } => name,
            VolumeSource::Persistent { claim } => claim,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeBinding {
    pub mount_path: String,
    pub source: VolumeSource,
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeBinding {
    pub fn is_persistent(&self) -> bool {
        matches!(self.source, VolumeSource::Persistent { .. })
    }

    /// Mount paths are absolute container paths. `:` is refused because
    /// docker's `-v source:path[:ro]` syntax cannot carry it.
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |reason: &'static str| crate::Error::InvalidMountPath {
            mount_path: self.mount_path.clone(),
            reason,
        };
        if !self.mount_path.starts_with('/') {
            return Err(invalid("must be an absolute path"));
        }
        if self.mount_path.contains(':') {
            return Err(invalid("must not contain ':'"));
        }
        if self.mount_path.chars().any(char::is_control) {
            return Err(invalid("must not contain control characters"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(mount_path: &str) -> VolumeBinding {
        VolumeBinding {
            mount_path: mount_path.to_owned(),
            source: VolumeSource::Persistent {
                claim: "bot-data".to_owned(),
            },
            read_only: false,
        }
    }

    #[test]
    fn mount_path_validation() {
        assert!(volume("/data").validate().is_ok());
        assert!(volume("/data dir").validate().is_ok());
        for bad in ["data", "", "/data:ro", "/data\n/etc"] {
            assert!(
                matches!(volume(bad).validate(), Err(crate::Error::InvalidMountPath { .. })),
                "{bad:?} accepted"
            );
        }
    }

    fn binding(env: &str, key: &str) -> SecretBinding {
        SecretBinding {
            env_var: env.to_owned(),
            secret_ref: SecretRef {
                store: "bot".to_owned(),
                key: key.to_owned(),
            },
        }
    }

    #[test]
    fn bindings_are_unique_by_env_var() {
        let result = SecretBindings::try_from_bindings([
            binding("DISCORD_TOKEN", "discord-token"),
            binding("DISCORD_TOKEN", "other"),
        ]);
        assert!(matches!(
            result,
            Err(crate::Error::DuplicateSecretBinding { ref env_var }) if env_var == "DISCORD_TOKEN"
        ));
    }

    #[test]
    fn bindings_iterate_sorted() {
        let set = SecretBindings::try_from_bindings([
            binding("TWITCH_CLIENT_ID", "twitch-id"),
            binding("DISCORD_TOKEN", "discord-token"),
        ])
        .unwrap();
        let names: Vec<&str> = set.iter().map(|(env, _)| env).collect();
        assert_eq!(names, vec!["DISCORD_TOKEN", "TWITCH_CLIENT_ID"]);
        assert_eq!(set.get("TWITCH_CLIENT_ID").unwrap().key, "twitch-id");
    }

    #[test]
    fn volume_source_parses_tagged_kind() {
        let binding: VolumeBinding = toml::from_str(
            r#"
mount_path = "/data"
source = { kind = "persistent", claim = "bot-data" }
"#,
        )
        .unwrap();
        assert!(binding.is_persistent());
        assert!(!binding.read_only);
        assert_eq!(binding.source.name(), "bot-data");
    }
}
