//! Source tree discovery via `cargo metadata`.
//!
//! Resolves the package that lives in the project directory and the binary
//! target that becomes the release artifact, handling workspace members and
//! inherited versions the same way Cargo does.

use cargo_metadata::{MetadataCommand, TargetKind};
use std::path::{Path, PathBuf};

/// The package being released and the binary selected from it.
///
/// # Examples
///
/// ```no_run
/// use berth_core::SourceTree;
/// use std::path::Path;
///
/// let tree = SourceTree::discover(Path::new("."), None).unwrap();
/// println!("Releasing {} v{} ({})", tree.package, tree.version, tree.binary);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    /// Package name from `[package].name`
    pub package: String,
    /// Resolved version (handles `version.workspace = true`)
    pub version: String,
    /// Absolute path to the package directory
    pub package_dir: PathBuf,
    /// Absolute path to the workspace root, where `target/` and `Cargo.lock` live
    pub workspace_root: PathBuf,
    /// All binary targets in the package
    pub binaries: Vec<String>,
    /// The binary shipped in the image.
    ///
    /// **Invariant:** one of [`binaries`](Self::binaries).
    pub binary: String,
}

impl SourceTree {
    /// Discover the package in `project_dir`.
    ///
    /// `requested` pins the binary (from `[build].binary`); otherwise it is
    /// chosen by `default-run`, a single binary, or the binary named like
    /// the package, in that order.
    pub fn discover(project_dir: &Path, requested: Option<&str>) -> crate::Result<Self> {
        let manifest_path = project_dir.join("Cargo.toml");
        tracing::debug!(path = %manifest_path.display(), "running cargo metadata");

        let metadata = MetadataCommand::new()
            .manifest_path(&manifest_path)
            .no_deps()
            .exec()
            .map_err(|e| crate::Error::CargoMetadata {
                manifest_path: manifest_path.clone(),
                detail: e.to_string(),
            })?;

        let canonical_dir =
            project_dir
                .canonicalize()
                .map_err(|e| crate::Error::ProjectDirResolve {
                    path: project_dir.to_path_buf(),
                    source: e,
                })?;

        let package = metadata
            .packages
            .iter()
            .find(|p| {
                p.manifest_path
                    .as_std_path()
                    .parent()
                    .and_then(|d| match d.canonicalize() {
                        Ok(c) => Some(c),
                        Err(e) => {
                            tracing::warn!(
                                path = %d.display(),
                                error = %e,
                                "failed to canonicalize manifest parent; skipping package"
                            );
                            None
                        }
                    })
                    .is_some_and(|d| d == canonical_dir)
            })
            .ok_or_else(|| crate::Error::NoPackageInDir {
                dir: canonical_dir.clone(),
                workspace_members: metadata
                    .packages
                    .iter()
                    .filter(|p| metadata.workspace_members.contains(&p.id))
                    .map(|p| p.name.to_string())
                    .collect(),
            })?;

        let binaries: Vec<String> = package
            .targets
            .iter()
            .filter(|t| t.kind.contains(&TargetKind::Bin))
            .map(|t| t.name.clone())
            .collect();

        let binary = select_binary(
            &binaries,
            requested,
            package.default_run.as_deref(),
            &package.name,
        )?;

        let package_dir = package
            .manifest_path
            .parent()
            .map(|d| d.as_std_path().to_path_buf())
            .unwrap_or(canonical_dir);

        let tree = Self {
            package: package.name.to_string(),
            version: package.version.to_string(),
            package_dir,
            workspace_root: PathBuf::from(metadata.workspace_root.as_std_path()),
            binaries,
            binary,
        };

        tracing::debug!(
            package = %tree.package,
            version = %tree.version,
            binary = %tree.binary,
            "source tree discovered"
        );

        Ok(tree)
    }
}

/// Pick the binary to ship.
fn select_binary(
    binaries: &[String],
    requested: Option<&str>,
    default_run: Option<&str>,
    package_name: &str,
) -> crate::Result<String> {
    if let Some(name) = requested {
        return if binaries.iter().any(|b| b == name) {
            Ok(name.to_owned())
        } else {
            Err(crate::Error::UnknownBinary {
                name: name.to_owned(),
                package: package_name.to_owned(),
            })
        };
    }

    if let Some(name) = default_run
        && binaries.iter().any(|b| b == name)
    {
        return Ok(name.to_owned());
    }

    match binaries {
        [] => Err(crate::Error::NoBinaryTarget {
            package: package_name.to_owned(),
        }),
        [only] => Ok(only.clone()),
        _ if binaries.iter().any(|b| b == package_name) => Ok(package_name.to_owned()),
        _ => Err(crate::Error::MultipleBinaries {
            names: binaries.to_vec(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn single_binary_is_selected() {
        let result = select_binary(&names(&["bot"]), None, None, "pkg");
        assert_eq!(result.unwrap(), "bot");
    }

    #[test]
    fn requested_binary_wins() {
        let bins = names(&["bot", "migrate"]);
        let result = select_binary(&bins, Some("migrate"), Some("bot"), "pkg");
        assert_eq!(result.unwrap(), "migrate");
    }

    #[test]
    fn requested_unknown_binary_errors() {
        let result = select_binary(&names(&["bot"]), Some("ghost"), None, "pkg");
        assert!(matches!(result, Err(crate::Error::UnknownBinary { .. })));
    }

    #[test]
    fn default_run_beats_package_name() {
        let bins = names(&["pkg", "worker"]);
        let result = select_binary(&bins, None, Some("worker"), "pkg");
        assert_eq!(result.unwrap(), "worker");
    }

    #[test]
    fn multiple_prefers_package_name() {
        let bins = names(&["pkg", "worker"]);
        assert_eq!(select_binary(&bins, None, None, "pkg").unwrap(), "pkg");
    }

    #[test]
    fn ambiguous_lists_candidates() {
        let bins = names(&["server", "worker"]);
        let err = select_binary(&bins, None, None, "pkg").unwrap_err().to_string();
        assert!(err.contains("server, worker"), "got: {err}");
    }

    #[test]
    fn no_binaries_errors() {
        let err = select_binary(&[], None, None, "lib-only").unwrap_err().to_string();
        assert!(err.contains("no binary target"), "got: {err}");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn crate_name() -> impl Strategy<Value = String> {
            "[a-z][a-z0-9-]{0,19}".prop_filter("no trailing hyphen", |s| !s.ends_with('-'))
        }

        proptest! {
            #[test]
            fn selection_is_always_a_known_binary(
                bins in proptest::collection::hash_set(crate_name(), 1..=5),
                default_run in proptest::option::of(crate_name()),
                pkg in crate_name(),
            ) {
                let bins: Vec<String> = bins.into_iter().collect();
                if let Ok(selected) = select_binary(&bins, None, default_run.as_deref(), &pkg) {
                    prop_assert!(bins.contains(&selected));
                }
            }
        }
    }
}
