//! Workload descriptor handed to the orchestrator.

use crate::binding::{SecretBindings, VolumeBinding, VolumeSource};
use crate::lifecycle::StartSequence;
use crate::tag::ImageIdentifier;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};

/// Longest mount-path slug used in a pod volume name, leaving room for the
/// kind prefix and a dedupe suffix within the 63-char DNS label limit.
const VOLUME_SLUG_LEN: usize = 48;

/// Fully composed description of how to run a release.
///
/// Constructed only by [`render`]; there are no mutating methods, so a
/// rendered descriptor stays exactly as rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadDescriptor {
    name: String,
    image: ImageIdentifier,
    /// Plain, non-secret environment variables.
    env: BTreeMap<String, String>,
    secret_bindings: SecretBindings,
    volume_bindings: Vec<VolumeBinding>,
    init_sequence: StartSequence,
    replicas: u32,
}

impl WorkloadDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &ImageIdentifier {
        &self.image
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn secret_bindings(&self) -> &SecretBindings {
        &self.secret_bindings
    }

    pub fn volume_bindings(&self) -> &[VolumeBinding] {
        &self.volume_bindings
    }

    /// The start sequence the launcher and orchestrator must follow.
    pub fn init_sequence(&self) -> &StartSequence {
        &self.init_sequence
    }

    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    /// The descriptor in its native JSON form.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// An `apps/v1` Deployment carrying the same information.
    pub fn to_kubernetes(&self) -> Value {
        let labels = json!({ "app": self.name });

        let plain = self
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }));
        let from_secrets = self.secret_bindings.iter().map(|(env, secret)| {
            json!({
                "name": env,
                "valueFrom": {
                    "secretKeyRef": { "name": secret.store, "key": secret.key }
                }
            })
        });
        let env: Vec<Value> = plain.chain(from_secrets).collect();

        let names = volume_names(&self.volume_bindings);

        let volumes: Vec<Value> = self
            .volume_bindings
            .iter()
            .zip(&names)
            .map(|(v, name)| match &v.source {
                VolumeSource::Config { name: config } => json!({
                    "name": name,
                    "configMap": { "name": config }
                }),
                VolumeSource::Persistent { claim } => json!({
                    "name": name,
                    "persistentVolumeClaim": { "claimName": claim }
                }),
            })
            .collect();

        let mounts: Vec<Value> = self
            .volume_bindings
            .iter()
            .zip(&names)
            .map(|(v, name)| {
                json!({
                    "name": name,
                    "mountPath": v.mount_path,
                    "readOnly": v.read_only,
                })
            })
            .collect();

        let init = self.init_sequence.init();
        let init_mount = self
            .volume_bindings
            .iter()
            .position(|v| v.mount_path == init.mount_path)
            .map(|idx| names[idx].clone())
            .unwrap_or_else(|| "init".to_owned());
        let init_containers = json!([{
            "name": "fix-permissions",
            "image": init.image,
            "command": init.command(),
            "securityContext": { "runAsUser": 0 },
            "volumeMounts": [{ "name": init_mount, "mountPath": init.mount_path }],
        }]);

        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": self.name, "labels": labels },
            "spec": {
                "replicas": self.replicas,
                "selector": { "matchLabels": labels },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "initContainers": init_containers,
                        "containers": [{
                            "name": self.name,
                            "image": self.image.to_string(),
                            "env": env,
                            "volumeMounts": mounts,
                        }],
                        "volumes": volumes,
                    }
                }
            }
        })
    }
}

/// Pod volume names, one per binding: `<kind>-<mount path slug>`.
///
/// Names follow the mount path rather than the source, so one source
/// mounted twice, or a config map and a claim sharing a name, still get
/// distinct volumes. Slug collisions get a numeric suffix.
fn volume_names(bindings: &[VolumeBinding]) -> Vec<String> {
    let mut seen = HashSet::new();
    bindings
        .iter()
        .map(|binding| {
            let kind = match binding.source {
                VolumeSource::Config { .. } => "config",
                VolumeSource::Persistent { .. } => "pvc",
            };
            let slug = if binding.mount_path.trim_matches('/').is_empty() {
                "root".to_owned()
            } else {
                let mut slug = crate::release::slugify(&binding.mount_path);
                slug.truncate(VOLUME_SLUG_LEN);
                slug.trim_end_matches('-').to_owned()
            };

            let base = format!("{kind}-{slug}");
            let mut name = base.clone();
            let mut suffix = 1;
            while !seen.insert(name.clone()) {
                name = format!("{base}-{suffix}");
                suffix += 1;
            }
            name
        })
        .collect()
}

/// Compose a descriptor with no plain environment variables.
///
/// Fails only when two volume bindings claim the same mount path (or a
/// mount path is malformed). The init sequence is copied through in its
/// given order.
pub fn render(
    name: &str,
    image: &ImageIdentifier,
    secrets: &SecretBindings,
    volumes: &[VolumeBinding],
    init_sequence: &StartSequence,
    replicas: u32,
) -> crate::Result<WorkloadDescriptor> {
    render_with_env(
        name,
        image,
        &BTreeMap::new(),
        secrets,
        volumes,
        init_sequence,
        replicas,
    )
}

/// [`render`], plus plain environment variables. A variable may be set
/// either here or by a secret binding, never both.
pub fn render_with_env(
    name: &str,
    image: &ImageIdentifier,
    env: &BTreeMap<String, String>,
    secrets: &SecretBindings,
    volumes: &[VolumeBinding],
    init_sequence: &StartSequence,
    replicas: u32,
) -> crate::Result<WorkloadDescriptor> {
    let mut seen = HashSet::new();
    for volume in volumes {
        volume.validate()?;
        if !seen.insert(volume.mount_path.as_str()) {
            return Err(crate::Error::MountConflict {
                mount_path: volume.mount_path.clone(),
            });
        }
    }

    for var in env.keys() {
        if var.is_empty() || var.contains('=') || var.chars().any(char::is_control) {
            return Err(crate::Error::InvalidEnvVar {
                env_var: var.clone(),
            });
        }
        if secrets.iter().any(|(secret_var, _)| secret_var == var.as_str()) {
            return Err(crate::Error::EnvConflict {
                env_var: var.clone(),
            });
        }
    }

    tracing::debug!(
        name,
        image = %image,
        env = env.len(),
        secrets = secrets.len(),
        volumes = volumes.len(),
        replicas,
        "rendered workload descriptor"
    );

    Ok(WorkloadDescriptor {
        name: name.to_owned(),
        image: image.clone(),
        env: env.clone(),
        secret_bindings: secrets.clone(),
        volume_bindings: volumes.to_vec(),
        init_sequence: init_sequence.clone(),
        replicas,
    })
}
