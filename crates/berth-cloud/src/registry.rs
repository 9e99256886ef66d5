use crate::docker::DockerError;
use crate::executor::{DockerExecutor, RealExecutor};
use berth_core::ImageIdentifier;
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;

/// Registry login details. The password is only ever piped to `docker login`.
#[derive(Debug)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: SecretString,
}

impl RegistryCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Proof of a successful login. Only [`RegistryClient::authenticate`] creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySession {
    registry: String,
    username: String,
}

impl RegistrySession {
    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

/// Container registry operations, parameterized over the executor for testability.
pub struct RegistryClient<E: DockerExecutor = RealExecutor> {
    executor: E,
}

impl RegistryClient<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor,
        }
    }
}

impl Default for RegistryClient<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DockerExecutor> RegistryClient<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    // ── Authentication ──

    /// Log in to `registry` (empty means the daemon's default registry).
    pub async fn authenticate(
        &self,
        registry: &str,
        credentials: &RegistryCredentials,
    ) -> Result<RegistrySession, AuthFailure> {
        let mut cmd = args([
            "login",
            "--username",
            &credentials.username,
            "--password-stdin",
        ]);
        if !registry.is_empty() {
            cmd.push(registry.to_owned());
        }

        tracing::info!(registry, username = %credentials.username, "logging in to registry");

        self.executor
            .exec_with_stdin(&cmd, credentials.password.expose_secret().as_bytes())
            .await
            .map_err(|e| AuthFailure {
                registry: registry.to_owned(),
                detail: e.detail(),
                source: e,
            })?;

        Ok(RegistrySession {
            registry: registry.to_owned(),
            username: credentials.username.clone(),
        })
    }

    // ── Image ──

    pub async fn build_image(
        &self,
        context: &Path,
        image: &ImageIdentifier,
        no_cache: bool,
    ) -> Result<(), ImageBuildError> {
        let context_str = context
            .to_str()
            .ok_or_else(|| ImageBuildError::InvalidPath(context.to_path_buf()))?;
        let tag = image.to_string();

        let mut cmd = args(["build", "--tag", &tag]);
        if no_cache {
            cmd.push("--no-cache".to_owned());
        }
        cmd.push(context_str.to_owned());

        tracing::info!(%image, no_cache, "building image");

        self.executor
            .exec_streaming(&cmd)
            .await
            .map_err(|e| ImageBuildError::Build { source: e })
    }

    /// Push `image`, returning the registry digest when docker reports one.
    ///
    /// The session must belong to the image's registry.
    pub async fn push(
        &self,
        session: &RegistrySession,
        image: &ImageIdentifier,
    ) -> Result<Option<String>, PushFailure> {
        if session.registry != image.registry {
            return Err(PushFailure {
                image: image.clone(),
                detail: format!(
                    "logged in to '{}', not to the image registry '{}'",
                    session.registry, image.registry
                ),
                source: None,
            });
        }

        tracing::info!(%image, "pushing image");

        let output = self
            .executor
            .exec(&args(["push", &image.to_string()]))
            .await
            .map_err(|e| PushFailure {
                image: image.clone(),
                detail: e.detail(),
                source: Some(e),
            })?;

        Ok(parse_digest(&output))
    }
}

/// Extract `sha256:…` from docker push output (`<tag>: digest: sha256:… size: N`).
pub fn parse_digest(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once("digest: ")?;
        let digest = rest.split_whitespace().next()?;
        digest.starts_with("sha256:").then(|| digest.to_owned())
    })
}

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

// ── Error types ──

#[derive(Debug, thiserror::Error)]
#[error("authentication to registry '{registry}' failed: {detail}")]
pub struct AuthFailure {
    pub registry: String,
    pub detail: String,
    source: DockerError,
}

#[derive(Debug, thiserror::Error)]
#[error("push of {image} failed: {detail}")]
pub struct PushFailure {
    pub image: ImageIdentifier,
    pub detail: String,
    source: Option<DockerError>,
}

#[derive(Debug, thiserror::Error)]
pub enum ImageBuildError {
    #[error("build context path is not valid UTF-8: {0}")]
    InvalidPath(std::path::PathBuf),

    #[error("docker build failed")]
    Build { source: DockerError },
}
