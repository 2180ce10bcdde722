// ivr-common/src/lib.rs
pub mod config;
pub mod dependency;
pub mod error;
pub mod model;

// Re-export key types
pub use config::Config;
pub use error::{IvrError, Result, ResultExt};
pub use model::{ArtifactSpec, Descriptor, ModuleId, ModuleRevision, Revision, VersionConstraint};
