use crate::executor::{DockerExecutor, RealExecutor};
use crate::registry::{
    AuthFailure, ImageBuildError, PushFailure, RegistryClient, RegistryCredentials,
    RegistrySession,
};
use berth_build::context::create_context;
use berth_build::{Artifact, BuildFailure, BuildStage, DockerfileGenerator};
use berth_core::{ImageConfig, ImageIdentifier, Ownership};
use std::path::{Path, PathBuf};

/// A locally built image that has not been pushed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub image: ImageIdentifier,
    pub context: PathBuf,
    pub artifact_sha256: String,
}

/// Outcome of a successful push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    pub image: ImageIdentifier,
    /// Registry digest, when the registry reported one.
    pub digest: Option<String>,
    pub artifact_sha256: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Auth(#[from] AuthFailure),

    #[error(transparent)]
    Push(#[from] PushFailure),

    #[error(transparent)]
    Build(#[from] BuildFailure),
}

/// Packages an artifact into an image and pushes it under one identifier.
pub struct ImagePublisher<E: DockerExecutor = RealExecutor> {
    client: RegistryClient<E>,
    project_dir: PathBuf,
    image_config: ImageConfig,
    user: Option<Ownership>,
}

impl<E: DockerExecutor> ImagePublisher<E> {
    pub fn new(client: RegistryClient<E>, project_dir: &Path, image_config: &ImageConfig) -> Self {
        Self {
            client,
            project_dir: project_dir.to_path_buf(),
            image_config: image_config.clone(),
            user: None,
        }
    }

    /// Run the image as `owner` (the init step's volume owner).
    pub fn with_user(mut self, owner: Ownership) -> Self {
        self.user = Some(owner);
        self
    }

    pub async fn authenticate(
        &self,
        credentials: &RegistryCredentials,
    ) -> Result<RegistrySession, AuthFailure> {
        self.client
            .authenticate(&self.image_config.registry, credentials)
            .await
    }

    /// Assemble the build context and build the image locally.
    pub async fn prepare(
        &self,
        artifact: &Artifact,
        image: &ImageIdentifier,
    ) -> Result<PreparedImage, BuildFailure> {
        let mut generator = DockerfileGenerator::new(&self.image_config, &artifact.binary_name);
        if let Some(owner) = self.user {
            generator = generator.user(owner);
        }
        let dockerfile = generator.render();

        let context = create_context(&self.project_dir, artifact, &dockerfile)
            .map_err(|e| BuildFailure::new(BuildStage::Context, e.to_string()))?;

        self.client
            .build_image(&context, image, self.image_config.no_cache)
            .await
            .map_err(|e| BuildFailure::new(BuildStage::Image, image_build_message(&e)))?;

        Ok(PreparedImage {
            image: image.clone(),
            context,
            artifact_sha256: artifact.sha256.clone(),
        })
    }

    /// Push a prepared image. Overwrites any image already under the identifier.
    pub async fn push(
        &self,
        session: &RegistrySession,
        prepared: &PreparedImage,
    ) -> Result<PublishResult, PushFailure> {
        let digest = self.client.push(session, &prepared.image).await?;
        tracing::info!(image = %prepared.image, digest = digest.as_deref().unwrap_or("-"), "pushed");
        Ok(PublishResult {
            image: prepared.image.clone(),
            digest,
            artifact_sha256: prepared.artifact_sha256.clone(),
        })
    }

    /// Single attempt: authenticate, build the image, push.
    pub async fn publish(
        &self,
        artifact: &Artifact,
        image: &ImageIdentifier,
        credentials: &RegistryCredentials,
    ) -> Result<PublishResult, PublishError> {
        let session = self.authenticate(credentials).await?;
        let prepared = self.prepare(artifact, image).await?;
        Ok(self.push(&session, &prepared).await?)
    }
}

fn image_build_message(err: &ImageBuildError) -> String {
    match err {
        ImageBuildError::InvalidPath(_) => err.to_string(),
        ImageBuildError::Build { source } => format!("{err}: {source}"),
    }
}
