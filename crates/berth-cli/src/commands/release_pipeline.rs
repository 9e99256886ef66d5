use super::render::{self, RenderError};
use berth_build::{
    ArtifactBuilder, BuildFailure, BuildStage, CacheBackend, CacheRelease, CacheScopeManager,
    Toolchain,
};
use berth_cloud::launcher::LaunchError;
use berth_cloud::registry::{AuthFailure, PushFailure, RegistryCredentials};
use berth_cloud::secrets::SecretStore;
use berth_cloud::{DockerExecutor, ImagePublisher, PublishResult};
use berth_core::{BerthConfig, CachePolicy, CacheScope, ImageIdentifier, SourceTree, WorkloadDescriptor};
use std::time::Duration;

/// Pipeline stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    Auth,
    Push,
    Render,
    Launch,
}

impl Stage {
    pub fn exit_code(self) -> u8 {
        match self {
            Stage::Build => 10,
            Stage::Auth => 11,
            Stage::Push => 12,
            Stage::Render => 13,
            Stage::Launch => 14,
        }
    }
}

/// A fatal failure, tagged with the stage that produced it.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("build stage failed")]
    Build(#[source] BuildFailure),

    #[error("registry authentication failed")]
    Auth(#[source] AuthFailure),

    #[error("push stage failed after {attempts} attempt(s)")]
    Push {
        attempts: u32,
        #[source]
        source: PushFailure,
    },

    #[error("render stage failed")]
    Render(#[source] RenderError),

    #[error("launch stage failed")]
    Launch(#[source] LaunchError),
}

impl ReleaseError {
    pub fn stage(&self) -> Stage {
        match self {
            ReleaseError::Build(_) => Stage::Build,
            ReleaseError::Auth(_) => Stage::Auth,
            ReleaseError::Push { .. } => Stage::Push,
            ReleaseError::Render(_) => Stage::Render,
            ReleaseError::Launch(_) => Stage::Launch,
        }
    }
}

/// Inputs for one pipeline run. The ref has already been resolved and checked.
pub(crate) struct ReleaseRequest<'a> {
    pub name: &'a str,
    pub tree: &'a SourceTree,
    pub image: &'a ImageIdentifier,
    pub scope: &'a CacheScope,
    /// `None` builds the image locally without pushing.
    pub credentials: Option<&'a RegistryCredentials>,
    pub render: bool,
}

/// Result of a successful pipeline run.
pub(crate) struct ReleaseOutcome {
    pub steps: Vec<String>,
    pub cache: CacheRelease,
    pub published: Option<PublishResult>,
    pub descriptor: Option<WorkloadDescriptor>,
}

/// Run order: cache → compile → cache write-back → login → image build →
/// push (bounded retries) → render. Halts at the first fatal failure.
pub(crate) struct ReleasePipeline<'a, T, B, E, S>
where
    T: Toolchain,
    B: CacheBackend,
    E: DockerExecutor,
    S: SecretStore,
{
    pub config: &'a BerthConfig,
    pub builder: ArtifactBuilder<T>,
    pub cache: CacheScopeManager<B>,
    pub publisher: ImagePublisher<E>,
    pub secrets: S,
}

impl<T, B, E, S> ReleasePipeline<'_, T, B, E, S>
where
    T: Toolchain,
    B: CacheBackend,
    E: DockerExecutor,
    S: SecretStore,
{
    pub(crate) async fn run(&self, req: &ReleaseRequest<'_>) -> Result<ReleaseOutcome, ReleaseError> {
        let mut steps = Vec::new();

        // Cache + compile
        let mut session = self
            .cache
            .acquire(req.scope, CachePolicy::ReadWrite)
            .map_err(|e| ReleaseError::Build(BuildFailure::new(BuildStage::Cache, e.to_string())))?;
        steps.push(format!(
            "Cache '{}' opened ({})",
            session.key(),
            if session.is_warm() { "warm" } else { "cold" }
        ));

        let built = self.builder.build(req.tree, &mut session).await;
        let cache = self.cache.release(session);
        let artifact = built.map_err(ReleaseError::Build)?;
        steps.push(format!("Built {} (sha256 {})", artifact.binary_name, artifact.sha256));
        steps.push(format!("Cache write-back: {cache:?}"));

        // Publish
        let published = match req.credentials {
            Some(credentials) => {
                let session = self
                    .publisher
                    .authenticate(credentials)
                    .await
                    .map_err(ReleaseError::Auth)?;
                steps.push(format!("Logged in as {}", session.username()));

                let prepared = self
                    .publisher
                    .prepare(&artifact, req.image)
                    .await
                    .map_err(ReleaseError::Build)?;
                steps.push(format!("Image built: {}", prepared.image));

                let result = self.push_with_retries(&session, &prepared).await?;
                steps.push(format!("Pushed {}", result.image));
                Some(result)
            }
            None => {
                let prepared = self
                    .publisher
                    .prepare(&artifact, req.image)
                    .await
                    .map_err(ReleaseError::Build)?;
                steps.push(format!("Image built: {} (not pushed)", prepared.image));
                None
            }
        };

        // Render
        let descriptor = if req.render {
            let descriptor = render::assemble(
                self.config,
                req.name,
                req.image,
                Some(&self.secrets as &dyn SecretStore),
            )
            .map_err(ReleaseError::Render)?;
            steps.push(format!("Descriptor rendered for {}", descriptor.image()));
            Some(descriptor)
        } else {
            None
        };

        Ok(ReleaseOutcome {
            steps,
            cache,
            published,
            descriptor,
        })
    }

    async fn push_with_retries(
        &self,
        session: &berth_cloud::RegistrySession,
        prepared: &berth_cloud::PreparedImage,
    ) -> Result<PublishResult, ReleaseError> {
        let retries = self.config.publish.push_retries;
        let delay = Duration::from_millis(self.config.publish.retry_delay_ms);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.publisher.push(session, prepared).await {
                Ok(result) => return Ok(result),
                Err(e) if attempts <= retries => {
                    tracing::warn!(attempt = attempts, error = %e, "push failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(ReleaseError::Push { attempts, source: e }),
            }
        }
    }
}
