// ivr-common/src/model/mod.rs
pub mod artifact;
pub mod descriptor;
pub mod module;
pub mod version;

pub use artifact::{Artifact, ArtifactSpec};
pub use descriptor::{Configuration, Descriptor, Status};
pub use module::{ModuleId, ModuleRevision, Revision};
pub use version::{Bound, LatestStatus, VersionConstraint};
