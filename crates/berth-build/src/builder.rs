use crate::cache::CacheSession;
use berth_core::SourceTree;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Lines of compiler stderr kept in a [`BuildFailure`] message.
const STDERR_TAIL_LINES: usize = 20;

/// Stage of the release in which a build-side failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Opening the dependency cache session.
    Cache,
    /// Compiling the source tree.
    Compile,
    /// Reading the compiled artifact.
    Artifact,
    /// Assembling the image build context.
    Context,
    /// Building the container image.
    Image,
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BuildStage::Cache => "cache",
            BuildStage::Compile => "compile",
            BuildStage::Artifact => "artifact",
            BuildStage::Context => "context",
            BuildStage::Image => "image",
        })
    }
}

/// A fatal build error. Never retried at this layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("build failed during {stage}: {message}")]
pub struct BuildFailure {
    pub stage: BuildStage,
    pub message: String,
}

impl BuildFailure {
    pub fn new(stage: BuildStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// The compiled release binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub binary_name: String,
    pub path: PathBuf,
    /// Hex-encoded SHA-256 of the binary.
    pub sha256: String,
}

impl Artifact {
    /// Describe an existing binary on disk.
    pub fn from_path(binary_name: &str, path: &Path) -> Result<Self, BuildFailure> {
        let bytes = std::fs::read(path).map_err(|e| {
            BuildFailure::new(
                BuildStage::Artifact,
                format!("failed to read {}: {e}", path.display()),
            )
        })?;
        Ok(Self {
            binary_name: binary_name.to_owned(),
            path: path.to_path_buf(),
            sha256: hex::encode(Sha256::digest(&bytes)),
        })
    }
}

/// Compiles a source tree into a binary.
///
/// Production code uses [`CargoToolchain`]; tests substitute fakes.
#[allow(async_fn_in_trait)]
pub trait Toolchain {
    /// Compile `tree`, keeping downloaded dependencies under `cache_dir`.
    /// Returns the path of the built binary.
    async fn compile(&self, tree: &SourceTree, cache_dir: &Path)
    -> Result<PathBuf, ToolchainError>;
}

/// Runs `cargo build` with `CARGO_HOME` pointed at the cache session.
#[derive(Debug, Clone)]
pub struct CargoToolchain {
    profile: String,
}

impl CargoToolchain {
    pub fn new(profile: &str) -> Self {
        Self {
            profile: profile.to_owned(),
        }
    }

    /// Directory name under `target/` for this profile.
    fn profile_dir(&self) -> &str {
        match self.profile.as_str() {
            "dev" | "test" => "debug",
            "bench" => "release",
            other => other,
        }
    }

    fn build_args(&self, tree: &SourceTree) -> Vec<String> {
        let mut args = vec![
            "build".to_owned(),
            "--profile".to_owned(),
            self.profile.clone(),
            "--bin".to_owned(),
            tree.binary.clone(),
        ];
        if tree.workspace_root.join("Cargo.lock").exists() {
            args.push("--locked".to_owned());
        }
        args
    }
}

impl Toolchain for CargoToolchain {
    async fn compile(
        &self,
        tree: &SourceTree,
        cache_dir: &Path,
    ) -> Result<PathBuf, ToolchainError> {
        let args = self.build_args(tree);
        tracing::debug!(?args, cargo_home = %cache_dir.display(), "running cargo");

        let output = Command::new("cargo")
            .args(&args)
            .current_dir(&tree.package_dir)
            .env("CARGO_HOME", cache_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ToolchainError::Spawn { source: e })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolchainError::Failed {
                status: output.status.to_string(),
                stderr: tail(&stderr, STDERR_TAIL_LINES),
            });
        }

        let binary = tree
            .workspace_root
            .join("target")
            .join(self.profile_dir())
            .join(format!("{}{}", tree.binary, std::env::consts::EXE_SUFFIX));

        if binary.is_file() {
            Ok(binary)
        } else {
            Err(ToolchainError::MissingOutput(binary))
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Compiles the release artifact inside a cache session.
pub struct ArtifactBuilder<T: Toolchain> {
    toolchain: T,
}

impl<T: Toolchain> ArtifactBuilder<T> {
    pub fn new(toolchain: T) -> Self {
        Self { toolchain }
    }

    /// Build `tree`. The session is marked populated only on success.
    pub async fn build(
        &self,
        tree: &SourceTree,
        session: &mut CacheSession,
    ) -> Result<Artifact, BuildFailure> {
        tracing::info!(
            package = %tree.package,
            binary = %tree.binary,
            cache = session.key(),
            warm = session.is_warm(),
            "compiling artifact"
        );

        let binary = self
            .toolchain
            .compile(tree, session.path())
            .await
            .map_err(|e| BuildFailure::new(BuildStage::Compile, e.to_string()))?;

        let artifact = Artifact::from_path(&tree.binary, &binary)?;
        session.mark_populated();

        tracing::info!(path = %artifact.path.display(), sha256 = %artifact.sha256, "artifact built");
        Ok(artifact)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("failed to run cargo")]
    Spawn { source: std::io::Error },

    #[error("cargo build exited with {status}:\n{stderr}")]
    Failed { status: String, stderr: String },

    #[error("cargo build succeeded but {0} was not produced")]
    MissingOutput(PathBuf),
}
