use crate::builder::Artifact;
use std::path::{Path, PathBuf};

/// Directory, relative to the project, holding the image build context.
pub const CONTEXT_DIR: &str = ".berth/context";

/// Assembles the image build context for an artifact.
///
/// The context holds exactly two files: the binary, under its own name, and
/// the generated Dockerfile. Any previous context is removed first so stale
/// binaries never end up in an image.
pub fn create_context(
    project_dir: &Path,
    artifact: &Artifact,
    dockerfile_content: &str,
) -> Result<PathBuf, ContextError> {
    let context_dir = project_dir.join(CONTEXT_DIR);

    if context_dir.exists() {
        std::fs::remove_dir_all(&context_dir).map_err(|e| ContextError::Cleanup {
            path: context_dir.clone(),
            source: e,
        })?;
    }
    std::fs::create_dir_all(&context_dir).map_err(|e| ContextError::Create {
        path: context_dir.clone(),
        source: e,
    })?;

    let binary_dst = context_dir.join(&artifact.binary_name);
    std::fs::copy(&artifact.path, &binary_dst).map_err(|e| ContextError::CopyArtifact {
        path: artifact.path.clone(),
        source: e,
    })?;

    let dockerfile = context_dir.join("Dockerfile");
    std::fs::write(&dockerfile, dockerfile_content).map_err(|e| {
        ContextError::WriteDockerfile {
            path: dockerfile.clone(),
            source: e,
        }
    })?;

    tracing::debug!(path = %context_dir.display(), "image build context ready");
    Ok(context_dir)
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to clean up context directory {path}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create directory {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to copy artifact {path}")]
    CopyArtifact {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write Dockerfile at {path}")]
    WriteDockerfile {
        path: PathBuf,
        source: std::io::Error,
    },
}
