//! Artifact builds, dependency caching, and image build contexts for berth.
//!
//! # Build stage
//!
//! ```text
//! berth release
//!   1. Ref        ── CI variables or git describe / rev-parse
//!   2. Cache      ── CacheScopeManager::acquire(scope of the ref)
//!   3. Compile    ── cargo build with CARGO_HOME = cache session
//!   4. Write-back ── CacheScopeManager::release (successful builds only)
//!   5. Context    ── .berth/context/{binary, Dockerfile}
//! ```
//!
//! # Cache scopes
//!
//! Branch builds share the branch slug's cache; tag builds use a separate
//! `tag_*` key so transient branch state never leaks into a tagged build.

pub mod builder;
pub mod cache;
pub mod context;
pub mod dockerfile;
pub mod vcs;

pub use builder::{Artifact, ArtifactBuilder, BuildFailure, BuildStage, CargoToolchain, Toolchain};
pub use cache::{
    CacheBackend, CacheEntry, CacheRelease, CacheScopeManager, CacheSession, CachedData,
    FsCacheBackend, MemoryCacheBackend,
};
pub use dockerfile::DockerfileGenerator;
