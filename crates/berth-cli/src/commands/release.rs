use super::release_pipeline::{ReleasePipeline, ReleaseRequest};
use super::render::{self, DESCRIPTOR_FILE, Format};
use super::{RefArgs, ReleaseError, WORK_DIR};
use berth_build::{
    ArtifactBuilder, CacheRelease, CacheScopeManager, CargoToolchain, FsCacheBackend, vcs,
};
use berth_cloud::secrets::ConfiguredSecretStore;
use berth_cloud::{ImagePublisher, RegistryClient, RegistryCredentials};
use berth_core::{BerthConfig, SourceTree};
use std::path::{Path, PathBuf};

pub struct ReleaseArgs {
    pub refs: RefArgs,
    pub render: bool,
    pub no_push: bool,
    pub allow_dirty: bool,
    pub registry_user: Option<String>,
    pub registry_password: Option<String>,
}

/// Execute the full release pipeline for the current ref.
pub async fn release(args: ReleaseArgs) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = BerthConfig::load(&project_dir)?;
    let tree = SourceTree::discover(&project_dir, config.build.binary.as_deref())?;
    let name = config.project.name.clone().unwrap_or_else(|| tree.package.clone());

    let target = super::resolve_target(&project_dir, &config, &name, &args.refs)?;
    println!("Releasing {} as {}", target.release, target.image);

    // Tagged images are immutable; never build one from uncommitted changes.
    if target.release.is_tagged() && !args.allow_dirty && vcs::is_dirty(&project_dir)? {
        anyhow::bail!(
            "uncommitted changes detected while releasing tag '{}'.\n\
             Commit your changes, or use `berth release --allow-dirty` to release anyway.",
            target.image.tag
        );
    }

    let credentials = if args.no_push {
        None
    } else {
        Some(credentials(args.registry_user, args.registry_password)?)
    };

    let render = args.render || config.deploy.enabled;
    let pipeline = ReleasePipeline {
        config: &config,
        builder: ArtifactBuilder::new(CargoToolchain::new(&config.build.profile)),
        cache: CacheScopeManager::new(
            FsCacheBackend::new(project_dir.join(&config.cache.dir)),
            project_dir.join(WORK_DIR).join("sessions"),
        ),
        publisher: publisher(&project_dir, &config),
        secrets: ConfiguredSecretStore::new(&config.stores, &project_dir),
    };

    let outcome = pipeline
        .run(&ReleaseRequest {
            name: &target.name,
            tree: &tree,
            image: &target.image,
            scope: &target.scope,
            credentials: credentials.as_ref(),
            render,
        })
        .await?;

    for step in &outcome.steps {
        println!("  {step}");
    }
    if outcome.cache == CacheRelease::Dropped {
        println!("  Warning: cache write-back failed; the next build on this ref starts cold");
    }

    if let Some(descriptor) = &outcome.descriptor {
        let path = project_dir.join(DESCRIPTOR_FILE);
        render::to_text(descriptor, Format::Json)
            .and_then(|text| render::write(&path, &text))
            .map_err(ReleaseError::Render)?;
        println!("Descriptor written to {DESCRIPTOR_FILE}");
    }

    match &outcome.published {
        Some(published) => println!(
            "\nPublished {} ({})",
            published.image,
            published.digest.as_deref().unwrap_or("no digest reported")
        ),
        None => println!("\nBuilt {} locally (not pushed)", target.image),
    }
    Ok(())
}

fn credentials(
    user: Option<String>,
    password: Option<String>,
) -> anyhow::Result<RegistryCredentials> {
    match (user, password) {
        (Some(user), Some(password)) => Ok(RegistryCredentials::new(user, password)),
        _ => anyhow::bail!(
            "registry credentials missing: set BERTH_REGISTRY_USER and BERTH_REGISTRY_PASSWORD, \
             or pass --no-push"
        ),
    }
}

/// The image runs as the init step's volume owner when one is configured.
fn publisher(project_dir: &Path, config: &BerthConfig) -> ImagePublisher {
    let publisher = ImagePublisher::new(RegistryClient::new(), project_dir, &config.image);
    match &config.deploy.init {
        Some(init) => publisher.with_user(init.owner()),
        None => publisher,
    }
}
