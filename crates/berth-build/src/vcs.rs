//! Release ref detection from CI variables or the local git checkout.

use berth_core::ReleaseRef;
use berth_core::release::DETACHED_SLUG;
use std::path::Path;
use std::process::Command;

/// CI variable holding the tag name on tag pipelines.
pub const CI_TAG_VAR: &str = "CI_COMMIT_TAG";
/// CI variable holding the branch name on branch pipelines.
pub const CI_BRANCH_VAR: &str = "CI_COMMIT_BRANCH";
/// CI variable holding the branch or tag name.
pub const CI_REF_VAR: &str = "CI_COMMIT_REF_NAME";
/// CI variable holding the project's default branch.
pub const CI_DEFAULT_BRANCH_VAR: &str = "CI_DEFAULT_BRANCH";

/// Where a ref was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefSource {
    Override,
    Ci,
    Git,
}

/// Determine the release ref.
///
/// Explicit overrides win, then CI variables (looked up through `env`),
/// then the git checkout in `project_dir`.
pub fn detect_release_ref(
    project_dir: &Path,
    tag_override: Option<&str>,
    branch_override: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(ReleaseRef, RefSource), VcsError> {
    let var = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    if tag_override.is_some() || branch_override.is_some() {
        let branch = branch_override
            .map(str::to_owned)
            .or_else(|| var(CI_DEFAULT_BRANCH_VAR))
            .unwrap_or_else(|| DETACHED_SLUG.to_owned());
        let release = match tag_override {
            Some(tag) => ReleaseRef::tagged(tag, &branch)?,
            None => ReleaseRef::branch(&branch),
        };
        return Ok((release, RefSource::Override));
    }

    if let Some(tag) = var(CI_TAG_VAR) {
        let branch = var(CI_BRANCH_VAR)
            .or_else(|| var(CI_DEFAULT_BRANCH_VAR))
            .unwrap_or_else(|| DETACHED_SLUG.to_owned());
        return Ok((ReleaseRef::tagged(&tag, &branch)?, RefSource::Ci));
    }

    if let Some(branch) = var(CI_BRANCH_VAR).or_else(|| var(CI_REF_VAR)) {
        return Ok((ReleaseRef::branch(&branch), RefSource::Ci));
    }

    let branch = match git(project_dir, &["rev-parse", "--abbrev-ref", "HEAD"])? {
        GitOutput::Success(name) if name != "HEAD" => name,
        _ => DETACHED_SLUG.to_owned(),
    };

    let release = match git(project_dir, &["describe", "--exact-match", "--tags", "HEAD"])? {
        GitOutput::Success(tag) => ReleaseRef::tagged(&tag, &branch)?,
        GitOutput::Failure(detail) => {
            tracing::debug!(%detail, "HEAD is not tagged");
            ReleaseRef::branch(&branch)
        }
    };

    Ok((release, RefSource::Git))
}

/// Checks whether the git working tree has uncommitted changes.
///
/// berth's own working directory (`.berth/`) is not counted.
pub fn is_dirty(project_dir: &Path) -> Result<bool, VcsError> {
    match git(
        project_dir,
        &["status", "--porcelain", "--", ".", ":(exclude).berth"],
    )? {
        GitOutput::Success(out) => Ok(!out.is_empty()),
        GitOutput::Failure(detail) => Err(VcsError::GitFailed {
            detail: format!("git status: {detail}"),
        }),
    }
}

enum GitOutput {
    Success(String),
    Failure(String),
}

fn git(project_dir: &Path, args: &[&str]) -> Result<GitOutput, VcsError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(project_dir)
        .output()
        .map_err(|e| VcsError::GitCommand {
            detail: format!("failed to execute git {}", args.join(" ")),
            source: e,
        })?;

    if output.status.success() {
        Ok(GitOutput::Success(
            String::from_utf8_lossy(&output.stdout).trim().to_owned(),
        ))
    } else {
        Ok(GitOutput::Failure(format!(
            "exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("git command failed: {detail}")]
    GitCommand {
        detail: String,
        source: std::io::Error,
    },
    #[error("git failed: {detail}")]
    GitFailed { detail: String },
    #[error(transparent)]
    InvalidRef(#[from] berth_core::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // Overrides and CI variables never reach git, so any path works.
    fn nowhere() -> &'static Path {
        Path::new("/nonexistent")
    }

    #[test]
    fn overrides_win_over_ci() {
        let env = env_of(&[(CI_TAG_VAR, "9.9.9")]);
        let (release, source) = detect_release_ref(nowhere(), Some("0.1.1"), None, env).unwrap();
        assert_eq!(source, RefSource::Override);
        assert_eq!(release.tag_value(), Some("0.1.1"));
    }

    #[test]
    fn branch_override_is_untagged() {
        let (release, _) =
            detect_release_ref(nowhere(), None, Some("Feature/X"), env_of(&[])).unwrap();
        assert!(!release.is_tagged());
        assert_eq!(release.branch_slug(), "feature-x");
    }

    #[test]
    fn ci_tag_pipeline() {
        let env = env_of(&[
            (CI_TAG_VAR, "0.1.1"),
            (CI_REF_VAR, "0.1.1"),
            (CI_DEFAULT_BRANCH_VAR, "main"),
        ]);
        let (release, source) = detect_release_ref(nowhere(), None, None, env).unwrap();
        assert_eq!(source, RefSource::Ci);
        assert_eq!(release.tag_value(), Some("0.1.1"));
        assert_eq!(release.branch_slug(), "main");
    }

    #[test]
    fn ci_branch_pipeline() {
        let env = env_of(&[(CI_TAG_VAR, ""), (CI_BRANCH_VAR, "main")]);
        let (release, source) = detect_release_ref(nowhere(), None, None, env).unwrap();
        assert_eq!(source, RefSource::Ci);
        assert!(!release.is_tagged());
        assert_eq!(release.branch_slug(), "main");
    }

    #[test]
    fn ci_invalid_tag_is_an_error() {
        let env = env_of(&[(CI_TAG_VAR, "release/1.0")]);
        let result = detect_release_ref(nowhere(), None, None, env);
        assert!(matches!(result, Err(VcsError::InvalidRef(_))));
    }
}
