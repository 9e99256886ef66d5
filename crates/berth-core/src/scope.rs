use crate::release::{ReleaseRef, slugify};
use serde::{Deserialize, Serialize};

/// Prefix for tag-build cache keys. Slugs never contain `_`, so a tag key
/// can never collide with a branch key.
const TAG_KEY_PREFIX: &str = "tag_";

/// Whether a session may write its results back to the shared cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    ReadOnly,
    ReadWrite,
}

impl CachePolicy {
    /// The more restrictive of two policies.
    pub fn restrict(self, other: CachePolicy) -> CachePolicy {
        match (self, other) {
            (CachePolicy::ReadWrite, CachePolicy::ReadWrite) => CachePolicy::ReadWrite,
            _ => CachePolicy::ReadOnly,
        }
    }

    pub fn allows_write(self) -> bool {
        matches!(self, CachePolicy::ReadWrite)
    }
}

/// Namespace for cached build intermediates.
///
/// Invocations sharing a key read each other's cache. Writes are
/// last-writer-wins; a lost write only costs a future cache miss.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheScope {
    pub key: String,
    pub policy: CachePolicy,
}

impl CacheScope {
    /// Scope for a release ref: the branch slug for branch builds, a
    /// tag-derived key for tag builds.
    pub fn for_ref(release: &ReleaseRef, policy: CachePolicy) -> Self {
        let key = match release.tag_value() {
            Some(tag) => format!("{TAG_KEY_PREFIX}{}", slugify(tag)),
            None => release.branch_slug().to_owned(),
        };
        Self { key, policy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_scope_key_is_slug() {
        let scope = CacheScope::for_ref(&ReleaseRef::branch("main"), CachePolicy::ReadWrite);
        assert_eq!(scope.key, "main");
        assert_eq!(scope.policy, CachePolicy::ReadWrite);
    }

    #[test]
    fn tag_scope_key_is_prefixed() {
        let release = ReleaseRef::tagged("0.1.1", "main").unwrap();
        let scope = CacheScope::for_ref(&release, CachePolicy::ReadOnly);
        assert_eq!(scope.key, "tag_0-1-1");
    }

    #[test]
    fn branch_named_like_tag_key_does_not_collide() {
        let tag = ReleaseRef::tagged("0.1.1", "main").unwrap();
        let branch = ReleaseRef::branch("tag_0-1-1");
        assert_ne!(
            CacheScope::for_ref(&tag, CachePolicy::ReadWrite).key,
            CacheScope::for_ref(&branch, CachePolicy::ReadWrite).key
        );
    }

    #[test]
    fn restrict_prefers_read_only() {
        use CachePolicy::*;
        assert_eq!(ReadWrite.restrict(ReadWrite), ReadWrite);
        assert_eq!(ReadWrite.restrict(ReadOnly), ReadOnly);
        assert_eq!(ReadOnly.restrict(ReadWrite), ReadOnly);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn tag_and_origin_branch_keys_differ(
                tag in "[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,40}",
                branch in "\\PC*",
            ) {
                let tagged = ReleaseRef::tagged(&tag, &branch).unwrap();
                let origin = ReleaseRef::branch(&branch);
                let tag_key = CacheScope::for_ref(&tagged, CachePolicy::ReadWrite).key;
                let branch_key = CacheScope::for_ref(&origin, CachePolicy::ReadWrite).key;
                prop_assert_ne!(tag_key, branch_key);
            }
        }
    }
}
