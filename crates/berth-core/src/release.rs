//! Version-control state that triggered a release.

use serde::Serialize;

/// Maximum length of a ref slug, matching DNS label limits.
const MAX_SLUG_LEN: usize = 63;

/// Maximum length of an OCI image tag.
const MAX_TAG_LEN: usize = 128;

/// Slug used when a branch name slugifies to nothing (e.g. detached HEAD).
pub const DETACHED_SLUG: &str = "detached";

/// The version-control event a pipeline invocation runs for.
///
/// A ref is either a plain branch build or a tag build cut from a branch.
/// The tag, when present, is always a valid image tag, so downstream
/// resolution never has to fail.
///
/// # Examples
///
/// ```
/// use berth_core::ReleaseRef;
///
/// let branch = ReleaseRef::branch("feature/Login-Page");
/// assert_eq!(branch.branch_slug(), "feature-login-page");
/// assert!(!branch.is_tagged());
///
/// let release = ReleaseRef::tagged("0.1.1", "main").unwrap();
/// assert_eq!(release.tag_value(), Some("0.1.1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ReleaseRef {
    branch_slug: String,
    tag: Option<String>,
}

impl ReleaseRef {
    /// An untagged build of `branch`.
    pub fn branch(branch: &str) -> Self {
        Self {
            branch_slug: slugify(branch),
            tag: None,
        }
    }

    /// A build of tag `tag`, cut from `branch`.
    pub fn tagged(tag: &str, branch: &str) -> crate::Result<Self> {
        validate_tag(tag)?;
        Ok(Self {
            branch_slug: slugify(branch),
            tag: Some(tag.to_owned()),
        })
    }

    pub fn is_tagged(&self) -> bool {
        self.tag.is_some()
    }

    pub fn tag_value(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn branch_slug(&self) -> &str {
        &self.branch_slug
    }
}

impl std::fmt::Display for ReleaseRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "tag {tag} ({})", self.branch_slug),
            None => write!(f, "branch {}", self.branch_slug),
        }
    }
}

/// Reduce a ref name to lowercase ASCII alphanumerics and `-`.
///
/// Runs of other characters collapse into a single `-`, leading and
/// trailing dashes are removed, and the result is capped at 63 chars.
/// The output never contains `_`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }

    slug.truncate(MAX_SLUG_LEN);
    let trimmed = slug.trim_end_matches('-');

    if trimmed.is_empty() {
        DETACHED_SLUG.to_owned()
    } else {
        trimmed.to_owned()
    }
}

fn validate_tag(tag: &str) -> crate::Result<()> {
    let invalid = |reason| crate::Error::InvalidTag {
        tag: tag.to_owned(),
        reason,
    };

    let Some(first) = tag.chars().next() else {
        return Err(invalid("empty"));
    };
    if tag.len() > MAX_TAG_LEN {
        return Err(invalid("longer than 128 characters"));
    }
    if !(first.is_ascii_alphanumeric() || first == '_') {
        return Err(invalid("must start with a letter, digit, or underscore"));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(invalid("only letters, digits, '_', '.', and '-' are allowed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_lowercases_and_dashes() {
        assert_eq!(slugify("Feature/Add_Login"), "feature-add-login");
    }

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("--a//b__c--"), "a-b-c");
    }

    #[test]
    fn slugify_empty_is_detached() {
        assert_eq!(slugify(""), DETACHED_SLUG);
        assert_eq!(slugify("///"), DETACHED_SLUG);
    }

    #[test]
    fn slugify_caps_length() {
        let long = "a".repeat(200);
        assert_eq!(slugify(&long).len(), MAX_SLUG_LEN);
    }

    #[test]
    fn slugify_never_ends_with_dash_after_truncation() {
        let name = format!("{}-b", "a".repeat(62));
        let slug = slugify(&name);
        assert!(!slug.ends_with('-'), "got: {slug}");
    }

    #[test]
    fn tagged_accepts_semver_and_v_prefix() {
        assert!(ReleaseRef::tagged("0.1.1", "main").is_ok());
        assert!(ReleaseRef::tagged("v2.0.0-rc.1", "main").is_ok());
    }

    #[test]
    fn tagged_rejects_slash_and_leading_dot() {
        assert!(matches!(
            ReleaseRef::tagged("release/1.0", "main"),
            Err(crate::Error::InvalidTag { .. })
        ));
        assert!(matches!(
            ReleaseRef::tagged(".hidden", "main"),
            Err(crate::Error::InvalidTag { .. })
        ));
        assert!(matches!(
            ReleaseRef::tagged("", "main"),
            Err(crate::Error::InvalidTag { .. })
        ));
    }

    #[test]
    fn display_names_kind() {
        assert_eq!(ReleaseRef::branch("main").to_string(), "branch main");
        assert_eq!(
            ReleaseRef::tagged("0.1.1", "main").unwrap().to_string(),
            "tag 0.1.1 (main)"
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn slug_alphabet_is_restricted(name in "\\PC*") {
                let slug = slugify(&name);
                prop_assert!(!slug.is_empty());
                prop_assert!(slug.len() <= MAX_SLUG_LEN);
                prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
                prop_assert!(!slug.starts_with('-') && !slug.ends_with('-'));
            }

            #[test]
            fn slugify_is_idempotent(name in "\\PC*") {
                let once = slugify(&name);
                prop_assert_eq!(slugify(&once), once.clone());
            }

            #[test]
            fn tag_present_iff_tagged(tag in "[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,40}", branch in "\\PC*") {
                let tagged = ReleaseRef::tagged(&tag, &branch).unwrap();
                prop_assert!(tagged.is_tagged());
                prop_assert_eq!(tagged.tag_value(), Some(tag.as_str()));

                let untagged = ReleaseRef::branch(&branch);
                prop_assert!(!untagged.is_tagged());
                prop_assert_eq!(untagged.tag_value(), None);
            }
        }
    }
}
