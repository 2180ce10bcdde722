// ivr-core/src/publish.rs
use std::path::PathBuf;

use ivr_common::error::{IvrError, Result};
use ivr_common::model::{ArtifactSpec, Descriptor, ModuleRevision, Revision, Status};
use ivr_common::VersionConstraint;
use ivr_net::FileSystemRepository;
use tracing::{debug, info};

use crate::retrieve::substitute;

pub const DEFAULT_ARTIFACT_PATTERN: &str = "[artifact].[ext]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    /// Root of the filesystem repository to publish into.
    pub repository: PathBuf,
    pub descriptor: PathBuf,
    /// Where the artifact files are found, laid out by `pattern`.
    pub artifacts_dir: PathBuf,
    pub pattern: String,
    pub overwrite: bool,
    /// Publishes under this revision instead of the descriptor's.
    pub revision: Option<Revision>,
    pub status: Option<Status>,
}

impl PublishOptions {
    pub fn new(
        repository: impl Into<PathBuf>,
        descriptor: impl Into<PathBuf>,
        artifacts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repository: repository.into(),
            descriptor: descriptor.into(),
            artifacts_dir: artifacts_dir.into(),
            pattern: DEFAULT_ARTIFACT_PATTERN.to_string(),
            overwrite: false,
            revision: None,
            status: None,
        }
    }
}

/// Copies a descriptor and every artifact it declares into a filesystem
/// repository.
pub fn publish(options: &PublishOptions) -> Result<ModuleRevision> {
    let bytes = ivr_aio::read_to_bytes(&options.descriptor)?;
    let mut descriptor = Descriptor::parse(&bytes)
        .map_err(|e| e.context(format!("reading {}", options.descriptor.display())))?;

    let rendered = if options.revision.is_some() || options.status.is_some() {
        if let Some(revision) = &options.revision {
            if VersionConstraint::parse(revision.as_str())?.is_dynamic() {
                return Err(IvrError::Config(format!(
                    "cannot publish under dynamic revision '{revision}'"
                )));
            }
            debug!("Publishing {} as revision {}", descriptor.module, revision);
            descriptor.module.revision = revision.clone();
        }
        if let Some(status) = options.status {
            descriptor.status = status;
        }
        descriptor.to_bytes()?
    } else {
        bytes
    };

    let artifacts = descriptor
        .artifacts
        .iter()
        .map(|spec| {
            let relative = substitute(&options.pattern, &descriptor.module, spec, None)?;
            let path = options.artifacts_dir.join(relative);
            if !path.is_file() {
                return Err(IvrError::NotFound(format!(
                    "artifact {} of {} not found at {}",
                    spec.file_name(),
                    descriptor.module,
                    path.display()
                )));
            }
            Ok((spec.clone(), path))
        })
        .collect::<Result<Vec<(ArtifactSpec, PathBuf)>>>()?;

    let repository = FileSystemRepository::new(options.repository.clone());
    let module = repository.publish(&rendered, &artifacts, options.overwrite)?;
    info!(
        "Published {} with {} artifact(s) to {}",
        module,
        artifacts.len(),
        repository.root().display()
    );
    Ok(module)
}
