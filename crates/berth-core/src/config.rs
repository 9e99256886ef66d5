use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::binding::{SecretBinding, SecretBindings, VolumeBinding};
use crate::lifecycle::{DEFAULT_INIT_IMAGE, Ownership};
use crate::scope::CachePolicy;
use crate::tag::DEFAULT_FLOATING_TAG;

/// berth.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BerthConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    /// Named secret stores referenced by `[[deploy.secrets]]`.
    #[serde(default)]
    pub stores: BTreeMap<String, StoreConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Workload name (defaults to Cargo.toml package name)
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Registry host, e.g. `registry.gitlab.com`. Empty means the local daemon's default.
    #[serde(default)]
    pub registry: String,
    /// Repository path (defaults to the project name)
    pub repository: Option<String>,
    /// Tag pushed for untagged branch builds
    #[serde(default = "default_floating_tag")]
    pub floating_tag: String,
    /// Base image the artifact is copied into
    #[serde(default = "default_runtime_image")]
    pub runtime_image: String,
    /// Pass `--no-cache` to the image build
    #[serde(default = "default_true")]
    pub no_cache: bool,
    /// Additional system packages to install via apt-get
    #[serde(default)]
    pub extra_packages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Cargo profile used for the artifact
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Binary target to ship (defaults to the discovered binary)
    pub binary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory of the shared dependency cache
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Never write back to the cache (e.g. merge request pipelines)
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Extra push attempts after a transient push failure
    #[serde(default = "default_push_retries")]
    pub push_retries: u32,
    /// Delay between push attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Render the workload descriptor as part of `berth release`
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Plain environment variables for the workload
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: Vec<SecretBinding>,
    #[serde(default)]
    pub volumes: Vec<VolumeBinding>,
    pub init: Option<InitConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    /// Mount path of the persistent volume to fix up
    pub volume: String,
    #[serde(default = "default_init_image")]
    pub image: String,
    #[serde(default = "default_owner_id")]
    pub uid: u32,
    #[serde(default = "default_owner_id")]
    pub gid: u32,
    /// Octal permission bits for the mount point
    #[serde(default = "default_mode")]
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Secrets read from the process environment
    Env,
    /// Secrets read from a dotenv-format file
    Dotenv { path: PathBuf },
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            registry: String::new(),
            repository: None,
            floating_tag: default_floating_tag(),
            runtime_image: default_runtime_image(),
            no_cache: true,
            extra_packages: Vec::new(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            binary: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            read_only: false,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            push_retries: default_push_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            replicas: default_replicas(),
            env: BTreeMap::new(),
            secrets: Vec::new(),
            volumes: Vec::new(),
            init: None,
        }
    }
}

impl CacheConfig {
    pub fn policy(&self) -> CachePolicy {
        if self.read_only {
            CachePolicy::ReadOnly
        } else {
            CachePolicy::ReadWrite
        }
    }
}

impl DeployConfig {
    pub fn secret_bindings(&self) -> crate::Result<SecretBindings> {
        SecretBindings::try_from_bindings(self.secrets.iter().cloned())
    }

    pub fn init(&self) -> crate::Result<&InitConfig> {
        self.init.as_ref().ok_or_else(|| crate::Error::ConfigInvalid {
            reason: "[deploy.init] is required to render a workload".to_owned(),
        })
    }

    /// The volume binding the init step guards.
    pub fn init_volume(&self) -> crate::Result<&VolumeBinding> {
        let init = self.init()?;
        self.volumes
            .iter()
            .find(|v| v.mount_path == init.volume)
            .ok_or_else(|| crate::Error::ConfigInvalid {
                reason: format!(
                    "[deploy.init].volume {} does not match any [[deploy.volumes]] mount_path",
                    init.volume
                ),
            })
    }
}

impl InitConfig {
    pub fn owner(&self) -> Ownership {
        Ownership {
            uid: self.uid,
            gid: self.gid,
        }
    }
}

impl BerthConfig {
    /// Load from berth.toml at the given path, or return defaults if not found.
    pub fn load(project_dir: &std::path::Path) -> crate::Result<Self> {
        let config_path = project_dir.join("berth.toml");
        if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            let config = toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path.clone(),
                source: e,
            })?;
            tracing::debug!(path = %config_path.display(), "loaded berth.toml");
            Ok(config)
        } else {
            tracing::debug!(path = %config_path.display(), "no berth.toml, using defaults");
            Ok(Self::default())
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_floating_tag() -> String {
    DEFAULT_FLOATING_TAG.to_owned()
}

fn default_runtime_image() -> String {
    "debian:bookworm-slim".to_owned()
}

fn default_profile() -> String {
    "release".to_owned()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".berth/cache")
}

fn default_push_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_replicas() -> u32 {
    1
}

fn default_init_image() -> String {
    DEFAULT_INIT_IMAGE.to_owned()
}

fn default_owner_id() -> u32 {
    1000
}

fn default_mode() -> String {
    "0775".to_owned()
}
