pub mod docker;
pub mod executor;
pub mod launcher;
pub mod publisher;
pub mod registry;
pub mod secrets;

pub use docker::DockerError;
pub use executor::{DockerExecutor, RealExecutor};
pub use launcher::{DockerStepRunner, LaunchError, Launcher, StepError, StepRunner};
pub use publisher::{ImagePublisher, PreparedImage, PublishError, PublishResult};
pub use registry::{
    AuthFailure, ImageBuildError, PushFailure, RegistryClient, RegistryCredentials,
    RegistrySession,
};
pub use secrets::{ConfiguredSecretStore, SecretError, SecretStore, StaticSecretStore};
