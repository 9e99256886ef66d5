use super::render;
use super::{RefArgs, ReleaseError};
use berth_cloud::launcher::{DockerStepRunner, Launcher};
use berth_cloud::secrets::{ConfiguredSecretStore, SecretStore};
use berth_core::{BerthConfig, Lifecycle};
use std::path::PathBuf;

/// Start the workload locally: init step to completion, then the main container.
pub async fn launch(refs: &RefArgs) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = BerthConfig::load(&project_dir)?;
    let name = super::workload_name(&project_dir, &config)?;
    let target = super::resolve_target(&project_dir, &config, &name, refs)?;

    let store = ConfiguredSecretStore::new(&config.stores, &project_dir);
    let descriptor = render::assemble(
        &config,
        &target.name,
        &target.image,
        Some(&store as &dyn SecretStore),
    )
    .map_err(ReleaseError::Render)?;
    // The launcher enforces exactly the order the descriptor records.
    let sequence = descriptor.init_sequence().clone();

    println!("Launching {} from {}", target.name, target.image);

    let launcher = Launcher::new(DockerStepRunner::new(descriptor, store));
    let mut lifecycle = Lifecycle::new();
    let result = launcher.start(&sequence, &mut lifecycle).await;

    let history: Vec<String> = lifecycle.history().iter().map(|s| s.to_string()).collect();
    println!("  {}", history.join(" → "));

    result.map_err(ReleaseError::Launch)?;
    println!("\n{} is running", target.name);
    Ok(())
}
