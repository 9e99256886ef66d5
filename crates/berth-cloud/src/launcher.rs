//! Runs a [`StartSequence`] against a container runtime.
//!
//! The launcher owns the ordering guarantee: the main step is not even
//! requested until the init step has reported success for this start.

use crate::docker::DockerError;
use crate::executor::{DockerExecutor, RealExecutor};
use crate::secrets::{SecretError, SecretStore};
use berth_core::{InitStep, Lifecycle, MainStep, StartSequence, VolumeBinding, WorkloadDescriptor};
use secrecy::ExposeSecret;
use std::io::Write;

/// Executes individual start steps. Each call resolves once the step's
/// outcome is known.
#[allow(async_fn_in_trait)]
pub trait StepRunner {
    async fn run_init(&self, step: &InitStep) -> Result<(), StepError>;
    async fn run_main(&self, step: &MainStep) -> Result<(), StepError>;
}

pub struct Launcher<R: StepRunner> {
    runner: R,
}

impl<R: StepRunner> Launcher<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Drive one start through `lifecycle`, which must be `Pending`.
    pub async fn start(
        &self,
        sequence: &StartSequence,
        lifecycle: &mut Lifecycle,
    ) -> Result<(), LaunchError> {
        lifecycle.begin_init()?;
        tracing::info!(volume = %sequence.init().mount_path, "running init step");

        if let Err(e) = self.runner.run_init(sequence.init()).await {
            lifecycle.finish_init(false)?;
            tracing::error!(error = %e, state = %lifecycle.state(), "init step failed, main step not started");
            return Err(LaunchError::InitStep { source: e });
        }
        lifecycle.finish_init(true)?;

        lifecycle.begin_main()?;
        tracing::info!(name = %sequence.main().name, image = %sequence.main().image, "starting main step");

        match self.runner.run_main(sequence.main()).await {
            Ok(()) => {
                lifecycle.finish_main(true)?;
                Ok(())
            }
            Err(e) => {
                lifecycle.finish_main(false)?;
                Err(LaunchError::MainStep { source: e })
            }
        }
    }
}

/// Runs steps as local docker containers using a rendered descriptor's
/// env, secrets, and volumes. Plain env goes on the command line; secret
/// values only ever reach docker through the env file.
pub struct DockerStepRunner<S: SecretStore, E: DockerExecutor = RealExecutor> {
    executor: E,
    descriptor: WorkloadDescriptor,
    secrets: S,
}

impl<S: SecretStore> DockerStepRunner<S, RealExecutor> {
    pub fn new(descriptor: WorkloadDescriptor, secrets: S) -> Self {
        Self::with_executor(RealExecutor, descriptor, secrets)
    }
}

impl<S: SecretStore, E: DockerExecutor> DockerStepRunner<S, E> {
    pub fn with_executor(executor: E, descriptor: WorkloadDescriptor, secrets: S) -> Self {
        Self {
            executor,
            descriptor,
            secrets,
        }
    }

    /// Write resolved secrets to a private env file for `docker run --env-file`.
    fn env_file(&self) -> Result<tempfile::NamedTempFile, StepError> {
        let mut file = tempfile::NamedTempFile::new().map_err(|e| StepError::EnvFile { source: e })?;
        for (env_var, secret_ref) in self.descriptor.secret_bindings().iter() {
            let value = self
                .secrets
                .lookup(secret_ref)
                .map_err(|e| StepError::Secret { source: e })?;
            if value.expose_secret().contains(['\n', '\r']) {
                return Err(StepError::MultilineSecret {
                    env_var: env_var.to_owned(),
                });
            }
            writeln!(file, "{env_var}={}", value.expose_secret())
                .map_err(|e| StepError::EnvFile { source: e })?;
        }
        file.flush().map_err(|e| StepError::EnvFile { source: e })?;
        Ok(file)
    }
}

impl<S: SecretStore, E: DockerExecutor> StepRunner for DockerStepRunner<S, E> {
    async fn run_init(&self, step: &InitStep) -> Result<(), StepError> {
        let mut cmd = vec![
            "run".to_owned(),
            "--rm".to_owned(),
            "--user".to_owned(),
            "0:0".to_owned(),
            "-v".to_owned(),
            format!("{}:{}", step.claim, step.mount_path),
            step.image.clone(),
        ];
        cmd.extend(step.command());

        self.executor
            .exec_streaming(&cmd)
            .await
            .map_err(|e| StepError::Docker { source: e })
    }

    async fn run_main(&self, step: &MainStep) -> Result<(), StepError> {
        let env_file = self.env_file()?;
        let env_path = env_file
            .path()
            .to_str()
            .ok_or_else(|| StepError::EnvFile {
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "env file path is not valid UTF-8",
                ),
            })?
            .to_owned();

        let mut cmd = vec![
            "run".to_owned(),
            "--detach".to_owned(),
            "--name".to_owned(),
            step.name.clone(),
            "--env-file".to_owned(),
            env_path,
        ];
        for (name, value) in self.descriptor.env() {
            cmd.push("--env".to_owned());
            cmd.push(format!("{name}={value}"));
        }
        for volume in self.descriptor.volume_bindings() {
            cmd.push("-v".to_owned());
            cmd.push(volume_arg(volume));
        }
        cmd.push(step.image.to_string());

        let container = self
            .executor
            .exec(&cmd)
            .await
            .map_err(|e| StepError::Docker { source: e })?;
        tracing::info!(container = %container.trim(), "main step started");
        Ok(())
    }
}

fn volume_arg(volume: &VolumeBinding) -> String {
    let mut arg = format!("{}:{}", volume.source.name(), volume.mount_path);
    if volume.read_only {
        arg.push_str(":ro");
    }
    arg
}

// ── Error types ──

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("container runtime error")]
    Docker { source: DockerError },

    #[error("failed to resolve a secret binding")]
    Secret { source: SecretError },

    #[error("secret bound to {env_var} contains a line break and cannot be passed via --env-file")]
    MultilineSecret { env_var: String },

    #[error("failed to write the secret env file")]
    EnvFile { source: std::io::Error },
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("init step failed, workload halted")]
    InitStep { source: StepError },

    #[error("main step failed")]
    MainStep { source: StepError },

    #[error(transparent)]
    Lifecycle(#[from] berth_core::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::VolumeSource;

    #[test]
    fn read_only_volume_gets_ro_suffix() {
        let volume = VolumeBinding {
            mount_path: "/config".to_owned(),
            source: VolumeSource::Config {
                name: "bot-config".to_owned(),
            },
            read_only: true,
        };
        assert_eq!(volume_arg(&volume), "bot-config:/config:ro");
    }
}
