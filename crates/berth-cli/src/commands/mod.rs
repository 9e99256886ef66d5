mod launch;
mod release;
pub(crate) mod release_pipeline;
pub(crate) mod render;
mod tag;

use berth_build::vcs::{self, RefSource};
use berth_core::{BerthConfig, CacheScope, ImageIdentifier, ReleaseRef, SourceTree, TagResolver};
use std::path::Path;

/// Directory holding berth's per-invocation state inside a project.
pub(crate) const WORK_DIR: &str = ".berth";

pub use launch::launch;
pub use release::{ReleaseArgs, release};
pub use release_pipeline::ReleaseError;
pub use render::render;
pub use tag::tag;

/// Ref overrides shared by every command.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RefArgs {
    /// Release this git tag (overrides CI variables and git)
    #[arg(long)]
    pub tag: Option<String>,
    /// Release from this branch (overrides CI variables and git)
    #[arg(long)]
    pub branch: Option<String>,
}

/// Everything derived from the release ref before any build work starts.
pub(crate) struct Target {
    pub name: String,
    pub release: ReleaseRef,
    pub source: RefSource,
    pub image: ImageIdentifier,
    pub scope: CacheScope,
}

/// Workload name: `[project].name`, else the Cargo package name.
pub(crate) fn workload_name(project_dir: &Path, config: &BerthConfig) -> anyhow::Result<String> {
    match &config.project.name {
        Some(name) => Ok(name.clone()),
        None => Ok(SourceTree::discover(project_dir, config.build.binary.as_deref())?.package),
    }
}

/// Resolve the ref, check it against the floating tag, and derive the
/// image identifier and cache scope.
pub(crate) fn resolve_target(
    project_dir: &Path,
    config: &BerthConfig,
    name: &str,
    refs: &RefArgs,
) -> anyhow::Result<Target> {
    let (release, source) = vcs::detect_release_ref(
        project_dir,
        refs.tag.as_deref(),
        refs.branch.as_deref(),
        |var| std::env::var(var).ok(),
    )?;

    let repository = config.image.repository.as_deref().unwrap_or(name);
    let resolver = TagResolver::new(&config.image.registry, repository, &config.image.floating_tag);
    resolver.check(&release)?;
    let image = resolver.resolve(&release);
    let scope = CacheScope::for_ref(&release, config.cache.policy());

    tracing::info!(%release, ?source, %image, cache = %scope.key, "resolved release target");

    Ok(Target {
        name: name.to_owned(),
        release,
        source,
        image,
        scope,
    })
}
