// ivr-net/src/filesystem.rs
// Repository on a local or mounted filesystem:
//
//   <root>/<org>/<module>/<rev>/ivr.toml
//   <root>/<org>/<module>/<rev>/<artifact>-<rev>.<ext>

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ivr_common::error::{IvrError, Result};
use ivr_common::model::{ArtifactSpec, Descriptor, ModuleId, ModuleRevision, Revision};
use ivr_common::VersionConstraint;
use tracing::{debug, warn};

use crate::fetcher::{parse_fetched_descriptor, select_revision, Fetcher};

pub const DESCRIPTOR_FILENAME: &str = "ivr.toml";

#[derive(Debug, Clone)]
pub struct FileSystemRepository {
    root: PathBuf,
    name: String,
}

impl FileSystemRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = format!("fs:{}", root.display());
        Self { root, name }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn module_dir(&self, id: &ModuleId) -> PathBuf {
        self.root.join(&id.organisation).join(&id.name)
    }

    pub fn revision_dir(&self, module: &ModuleRevision) -> PathBuf {
        self.module_dir(&module.id).join(module.revision.as_str())
    }

    pub fn descriptor_path(&self, module: &ModuleRevision) -> PathBuf {
        self.revision_dir(module).join(DESCRIPTOR_FILENAME)
    }

    pub fn artifact_path(&self, module: &ModuleRevision, artifact: &ArtifactSpec) -> PathBuf {
        self.revision_dir(module).join(format!(
            "{}-{}.{}",
            artifact.name, module.revision, artifact.ext
        ))
    }

    /// Copies a descriptor and its artifact files into the repository layout.
    /// Every file is written atomically; an existing revision is only
    /// replaced when `overwrite` is set.
    pub fn publish(
        &self,
        descriptor_bytes: &[u8],
        artifacts: &[(ArtifactSpec, PathBuf)],
        overwrite: bool,
    ) -> Result<ModuleRevision> {
        let descriptor = Descriptor::parse(descriptor_bytes)?;
        let module = descriptor.module.clone();
        let target = self.descriptor_path(&module);
        if target.exists() && !overwrite {
            return Err(IvrError::Generic(format!(
                "{module} is already published in {} (use overwrite to replace it)",
                self.root.display()
            )));
        }

        // stage everything before touching the revision directory
        let mut staged = Vec::with_capacity(artifacts.len() + 1);
        for (spec, source) in artifacts {
            let bytes = ivr_aio::read_to_bytes(source).map_err(|e| {
                e.context(format!("reading artifact {} for {module}", source.display()))
            })?;
            let destination = self.artifact_path(&module, spec);
            staged.push((ivr_aio::stage_file(&destination, &bytes)?, destination));
        }
        staged.push((ivr_aio::stage_file(&target, descriptor_bytes)?, target));

        for (temp, destination) in staged {
            ivr_aio::persist_staged(temp, &destination)?;
        }
        debug!("Published {} to {}", module, self.root.display());
        Ok(module)
    }
}

fn list_or_empty(dir: &Path) -> Result<Vec<(String, PathBuf, bool)>> {
    match ivr_aio::list_directory_entries(dir) {
        Ok(entries) => Ok(entries),
        Err(IvrError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn read_or_not_found(path: &Path, what: impl FnOnce() -> String) -> io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} not present at {}", what(), path.display());
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Fetcher for FileSystemRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_modules(&self) -> Result<Vec<ModuleId>> {
        let mut modules = Vec::new();
        for (org, org_path, is_dir) in list_or_empty(&self.root)? {
            if !is_dir || org.starts_with('.') {
                continue;
            }
            for (name, _, is_dir) in list_or_empty(&org_path)? {
                if !is_dir {
                    continue;
                }
                let id = ModuleId::new(org.as_str(), name);
                if id.check().is_ok() && !self.list_revisions(&id).await?.is_empty() {
                    modules.push(id);
                }
            }
        }
        modules.sort();
        Ok(modules)
    }

    async fn list_revisions(&self, id: &ModuleId) -> Result<Vec<Revision>> {
        let mut revisions: Vec<Revision> = list_or_empty(&self.module_dir(id))?
            .into_iter()
            .filter(|(_, path, is_dir)| *is_dir && path.join(DESCRIPTOR_FILENAME).is_file())
            .map(|(name, _, _)| Revision::new(name))
            .collect();
        revisions.sort();
        Ok(revisions)
    }

    async fn fetch_descriptor(
        &self,
        id: &ModuleId,
        constraint: &VersionConstraint,
    ) -> Result<(Descriptor, Vec<u8>)> {
        let revision = select_revision(self, id, constraint).await?;
        let module = id.revision(revision);
        let path = self.descriptor_path(&module);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                IvrError::NotFound(format!("{module} not found in {}", self.name))
            } else {
                warn!("Failed to read descriptor {}: {}", path.display(), e);
                IvrError::from(e)
            }
        })?;
        let descriptor = parse_fetched_descriptor(&module, &bytes)?;
        Ok((descriptor, bytes))
    }

    async fn fetch_artifact(
        &self,
        module: &ModuleRevision,
        artifact: &ArtifactSpec,
    ) -> Result<Vec<u8>> {
        let path = self.artifact_path(module, artifact);
        let found = read_or_not_found(&path, || format!("{artifact} of {module}"))?;
        found.ok_or_else(|| {
            IvrError::NotFound(format!(
                "artifact {} of {module} not found in {}",
                artifact.file_name(),
                self.name
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIB: &str = r#"
[module]
organisation = "org"
name = "lib"
revision = "2.0"
"#;

    fn publish_lib(repo: &FileSystemRepository, scratch: &Path) -> ModuleRevision {
        let jar = scratch.join("lib.jar");
        std::fs::write(&jar, b"jar bytes").unwrap();
        repo.publish(
            LIB.as_bytes(),
            &[(ArtifactSpec::new("lib", "jar", "jar"), jar)],
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn publish_then_fetch() {
        let repo_dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let repo = FileSystemRepository::new(repo_dir.path());
        let module = publish_lib(&repo, scratch.path());

        assert!(repo_dir.path().join("org/lib/2.0/ivr.toml").is_file());
        assert!(repo_dir.path().join("org/lib/2.0/lib-2.0.jar").is_file());

        let id = ModuleId::new("org", "lib");
        assert_eq!(
            repo.list_revisions(&id).await.unwrap(),
            vec![Revision::new("2.0")]
        );
        // a module directory without any published revision is not listed
        std::fs::create_dir_all(repo_dir.path().join("org/empty/1.0")).unwrap();
        assert_eq!(repo.list_modules().await.unwrap(), vec![id.clone()]);
        let (descriptor, bytes) = repo
            .fetch_descriptor(&id, &VersionConstraint::parse("[1.0,)").unwrap())
            .await
            .unwrap();
        assert_eq!(descriptor.module, module);
        assert_eq!(bytes, LIB.as_bytes());
        let jar = repo
            .fetch_artifact(&module, &descriptor.artifacts[0])
            .await
            .unwrap();
        assert_eq!(jar, b"jar bytes");
    }

    #[tokio::test]
    async fn publish_refuses_existing_revision() {
        let repo_dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let repo = FileSystemRepository::new(repo_dir.path());
        publish_lib(&repo, scratch.path());
        let jar = scratch.path().join("lib.jar");
        let again = repo.publish(
            LIB.as_bytes(),
            &[(ArtifactSpec::new("lib", "jar", "jar"), jar.clone())],
            false,
        );
        assert!(again.is_err());
        assert!(repo
            .publish(
                LIB.as_bytes(),
                &[(ArtifactSpec::new("lib", "jar", "jar"), jar)],
                true
            )
            .is_ok());
    }

    #[tokio::test]
    async fn unknown_module_is_not_found() {
        let repo_dir = tempfile::tempdir().unwrap();
        let repo = FileSystemRepository::new(repo_dir.path());
        let id = ModuleId::new("org", "ghost");
        assert!(repo.list_revisions(&id).await.unwrap().is_empty());
        assert!(matches!(
            repo.fetch_descriptor(&id, &VersionConstraint::parse("1.0").unwrap())
                .await,
            Err(IvrError::NotFound(_))
        ));
    }
}
