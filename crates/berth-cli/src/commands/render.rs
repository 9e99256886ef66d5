use super::{RefArgs, ReleaseError};
use berth_cloud::secrets::{ConfiguredSecretStore, SecretError, SecretStore};
use berth_core::descriptor;
use berth_core::lifecycle::{self, parse_mode};
use berth_core::{BerthConfig, ImageIdentifier, MainStep, StartSequence, WorkloadDescriptor};
use std::path::{Path, PathBuf};

/// Default descriptor location for `berth release --render`.
pub(crate) const DESCRIPTOR_FILE: &str = ".berth/workload.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// berth's own descriptor JSON
    Json,
    /// A Kubernetes apps/v1 Deployment
    Kubernetes,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Invalid(#[from] berth_core::Error),

    #[error("secret for {env_var} does not resolve")]
    SecretNotFound { env_var: String, source: SecretError },

    #[error("failed to serialize descriptor")]
    Serialize { source: serde_json::Error },

    #[error("failed to write descriptor to {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Build the init-then-main sequence from `[deploy.init]`.
fn start_sequence(
    config: &BerthConfig,
    name: &str,
    image: &ImageIdentifier,
) -> Result<StartSequence, RenderError> {
    let init = config.deploy.init()?;
    let volume = config.deploy.init_volume()?;
    let mode = parse_mode(&init.mode)?;
    let main = MainStep {
        name: name.to_owned(),
        image: image.clone(),
    };
    Ok(lifecycle::sequence(
        volume,
        &init.image,
        init.owner(),
        mode,
        main,
    )?)
}

/// Compose the descriptor from `[deploy]`. With a store, every secret
/// binding must resolve; resolved values are dropped immediately.
pub(crate) fn assemble(
    config: &BerthConfig,
    name: &str,
    image: &ImageIdentifier,
    secrets: Option<&dyn SecretStore>,
) -> Result<WorkloadDescriptor, RenderError> {
    let bindings = config.deploy.secret_bindings()?;
    let sequence = start_sequence(config, name, image)?;
    let descriptor = descriptor::render_with_env(
        name,
        image,
        &config.deploy.env,
        &bindings,
        &config.deploy.volumes,
        &sequence,
        config.deploy.replicas,
    )?;

    if let Some(store) = secrets {
        for (env_var, secret_ref) in bindings.iter() {
            store
                .lookup(secret_ref)
                .map_err(|e| RenderError::SecretNotFound {
                    env_var: env_var.to_owned(),
                    source: e,
                })?;
        }
        tracing::info!(count = bindings.len(), "secret bindings verified");
    }

    Ok(descriptor)
}

pub(crate) fn to_text(descriptor: &WorkloadDescriptor, format: Format) -> Result<String, RenderError> {
    let value = match format {
        Format::Json => descriptor
            .to_json()
            .map_err(|e| RenderError::Serialize { source: e })?,
        Format::Kubernetes => descriptor.to_kubernetes(),
    };
    let mut text =
        serde_json::to_string_pretty(&value).map_err(|e| RenderError::Serialize { source: e })?;
    text.push('\n');
    Ok(text)
}

pub(crate) fn write(path: &Path, text: &str) -> Result<(), RenderError> {
    let io_err = |e| RenderError::Write {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, text).map_err(io_err)
}

/// Render the descriptor for the current ref.
pub fn render(
    refs: &RefArgs,
    format: Format,
    out: Option<&Path>,
    no_verify: bool,
) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = BerthConfig::load(&project_dir)?;
    let name = super::workload_name(&project_dir, &config)?;
    let target = super::resolve_target(&project_dir, &config, &name, refs)?;

    let store = ConfiguredSecretStore::new(&config.stores, &project_dir);
    let store: Option<&dyn SecretStore> = if no_verify { None } else { Some(&store) };

    let text = assemble(&config, &target.name, &target.image, store)
        .and_then(|d| to_text(&d, format))
        .map_err(ReleaseError::Render)?;

    match out {
        Some(path) => {
            write(path, &text).map_err(ReleaseError::Render)?;
            println!("Descriptor written to {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}
