use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {reason}")]
    ConfigInvalid { reason: String },

    // ── Source tree discovery ──
    #[error("cargo metadata failed for {manifest_path}: {detail}")]
    CargoMetadata {
        manifest_path: PathBuf,
        detail: String,
    },

    #[error("failed to resolve project directory {path}")]
    ProjectDirResolve {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(
        "no package found in {dir}; workspace members: {}",
        format_members(workspace_members)
    )]
    NoPackageInDir {
        dir: PathBuf,
        workspace_members: Vec<String>,
    },

    #[error("no binary target in package '{package}' — berth needs a binary to ship")]
    NoBinaryTarget { package: String },

    #[error(
        "multiple binary targets found: {}; set `default-run` in Cargo.toml or [build].binary in berth.toml",
        names.join(", ")
    )]
    MultipleBinaries { names: Vec<String> },

    #[error("binary '{name}' is not a target of package '{package}'")]
    UnknownBinary { name: String, package: String },

    // ── Release refs ──
    #[error("invalid image tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: &'static str },

    #[error("git tag '{tag}' equals the floating tag; it would overwrite the latest branch build")]
    TagShadowsFloating { tag: String },

    // ── Descriptor ──
    #[error("secret binding for env var '{env_var}' declared more than once")]
    DuplicateSecretBinding { env_var: String },

    #[error("mount path '{mount_path}' is claimed by more than one volume binding")]
    MountConflict { mount_path: String },

    #[error("env var '{env_var}' is set both in [deploy.env] and by a secret binding")]
    EnvConflict { env_var: String },

    #[error("invalid env var name {env_var:?}")]
    InvalidEnvVar { env_var: String },

    #[error("invalid mount path {mount_path:?}: {reason}")]
    InvalidMountPath {
        mount_path: String,
        reason: &'static str,
    },

    #[error("invalid permission mode {mode:?}; expected octal like \"0775\"")]
    InvalidMode { mode: String },

    // ── Lifecycle ──
    #[error("invalid lifecycle transition: {event} while {from}")]
    InvalidTransition {
        from: crate::lifecycle::StartState,
        event: &'static str,
    },
}

fn format_members(members: &[String]) -> String {
    if members.is_empty() {
        "(none)".to_owned()
    } else {
        members.join(", ")
    }
}
