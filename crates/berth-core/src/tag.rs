//! Image identifier resolution from release refs.

use crate::release::ReleaseRef;
use serde::{Deserialize, Serialize};

/// Default floating tag for untagged branch builds.
pub const DEFAULT_FLOATING_TAG: &str = "latest";

/// A fully qualified container image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageIdentifier {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageIdentifier {
    /// `registry/repository` without the tag.
    pub fn name(&self) -> String {
        if self.registry.is_empty() {
            self.repository.clone()
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }
}

impl std::fmt::Display for ImageIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name(), self.tag)
    }
}

/// Maps a [`ReleaseRef`] to exactly one [`ImageIdentifier`].
///
/// Tag builds get an immutable identifier carrying the tag itself; branch
/// builds get the floating tag, which is overwritten on every push.
#[derive(Debug, Clone)]
pub struct TagResolver {
    registry: String,
    repository: String,
    floating_tag: String,
}

impl TagResolver {
    pub fn new(registry: &str, repository: &str, floating_tag: &str) -> Self {
        Self {
            registry: registry.to_owned(),
            repository: repository.to_owned(),
            floating_tag: floating_tag.to_owned(),
        }
    }

    pub fn floating_tag(&self) -> &str {
        &self.floating_tag
    }

    /// Reject refs whose tag would be indistinguishable from the floating tag.
    pub fn check(&self, release: &ReleaseRef) -> crate::Result<()> {
        match release.tag_value() {
            Some(tag) if tag == self.floating_tag => Err(crate::Error::TagShadowsFloating {
                tag: tag.to_owned(),
            }),
            _ => Ok(()),
        }
    }

    pub fn resolve(&self, release: &ReleaseRef) -> ImageIdentifier {
        let tag = match release.tag_value() {
            Some(tag) => tag.to_owned(),
            None => self.floating_tag.clone(),
        };

        tracing::debug!(%release, %tag, "resolved image tag");

        ImageIdentifier {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag,
        }
    }
}
