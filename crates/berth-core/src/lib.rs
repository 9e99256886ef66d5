//! Core types and configuration for berth.
//!
//! This crate holds the pure release logic: the `berth.toml` schema
//! ([`BerthConfig`]), release refs and tag resolution ([`ReleaseRef`],
//! [`TagResolver`]), cache scoping ([`CacheScope`]), the init/main start
//! ordering ([`Lifecycle`]), and workload descriptor rendering
//! ([`descriptor::render`]). Nothing here performs network or process I/O
//! apart from `cargo metadata` discovery in [`SourceTree`].

pub mod binding;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod lifecycle;
pub mod release;
pub mod scope;
pub mod source;
pub mod tag;

pub use binding::{SecretBinding, SecretBindings, SecretRef, VolumeBinding, VolumeSource};
pub use config::{
    BerthConfig, BuildConfig, CacheConfig, DeployConfig, ImageConfig, InitConfig, ProjectConfig,
    PublishConfig, StoreConfig,
};
pub use descriptor::WorkloadDescriptor;
pub use error::{Error, Result};
pub use lifecycle::{InitStep, Lifecycle, MainStep, Ownership, StartSequence, StartState, Step};
pub use release::ReleaseRef;
pub use scope::{CachePolicy, CacheScope};
pub use source::SourceTree;
pub use tag::{ImageIdentifier, TagResolver};
