// ivr-net/src/chain.rs
use std::sync::Arc;

use async_trait::async_trait;
use ivr_common::error::{IvrError, Result};
use ivr_common::model::{ArtifactSpec, Descriptor, ModuleId, ModuleRevision, Revision};
use ivr_common::VersionConstraint;
use tracing::{debug, warn};

use crate::fetcher::{select_revision, Fetcher};

/// Consults repositories in order. Revision lists are merged; descriptors and
/// artifacts come from the first repository that has them.
pub struct RepositoryChain {
    repositories: Vec<Arc<dyn Fetcher>>,
    name: String,
}

impl RepositoryChain {
    pub fn new(repositories: Vec<Arc<dyn Fetcher>>) -> Self {
        let name = format!(
            "chain[{}]",
            repositories
                .iter()
                .map(|r| r.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self { repositories, name }
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Tries `op` against each repository until one succeeds. `NotFound` moves
    /// on silently; other failures are remembered and returned if nothing
    /// else works.
    async fn first_success<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(Arc<dyn Fetcher>) -> futures::future::BoxFuture<'static, Result<T>>,
    {
        let mut failure: Option<IvrError> = None;
        for repository in &self.repositories {
            match op(Arc::clone(repository)).await {
                Ok(value) => {
                    debug!("{} served by {}", what, repository.name());
                    return Ok(value);
                }
                Err(e) if matches!(e.root_cause(), IvrError::NotFound(_)) => {
                    debug!("{} not in {}", what, repository.name());
                }
                Err(e) => {
                    warn!("{} failed in {}: {}", what, repository.name(), e);
                    failure.get_or_insert(e);
                }
            }
        }
        Err(failure.unwrap_or_else(|| {
            IvrError::NotFound(format!("{what} not found in any repository"))
        }))
    }
}

#[async_trait]
impl Fetcher for RepositoryChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_modules(&self) -> Result<Vec<ModuleId>> {
        let mut merged = Vec::new();
        let mut errors = Vec::new();
        for repository in &self.repositories {
            match repository.list_modules().await {
                Ok(modules) => merged.extend(modules),
                Err(e) => {
                    warn!("Listing modules of {} failed: {}", repository.name(), e);
                    errors.push(e);
                }
            }
        }
        if merged.is_empty() && !errors.is_empty() {
            IvrError::aggregate(errors)?;
        }
        merged.sort();
        merged.dedup();
        Ok(merged)
    }

    async fn list_revisions(&self, id: &ModuleId) -> Result<Vec<Revision>> {
        let mut merged = Vec::new();
        let mut errors = Vec::new();
        for repository in &self.repositories {
            match repository.list_revisions(id).await {
                Ok(revisions) => merged.extend(revisions),
                Err(e) => {
                    warn!("Listing {} in {} failed: {}", id, repository.name(), e);
                    errors.push(e);
                }
            }
        }
        if merged.is_empty() && !errors.is_empty() {
            IvrError::aggregate(errors)?;
        }
        merged.sort();
        merged.dedup();
        Ok(merged)
    }

    async fn fetch_descriptor(
        &self,
        id: &ModuleId,
        constraint: &VersionConstraint,
    ) -> Result<(Descriptor, Vec<u8>)> {
        // pick against the merged list so a newer revision in a later
        // repository still wins
        let revision = select_revision(self, id, constraint).await?;
        let module = id.revision(revision.clone());
        let exact = VersionConstraint::Exact(revision);
        self.first_success(&module.to_string(), |repository| {
            let id = id.clone();
            let exact = exact.clone();
            Box::pin(async move { repository.fetch_descriptor(&id, &exact).await })
        })
        .await
    }

    async fn fetch_artifact(
        &self,
        module: &ModuleRevision,
        artifact: &ArtifactSpec,
    ) -> Result<Vec<u8>> {
        let what = format!("{module}!{}", artifact.file_name());
        self.first_success(&what, |repository| {
            let module = module.clone();
            let artifact = artifact.clone();
            Box::pin(async move { repository.fetch_artifact(&module, &artifact).await })
        })
        .await
    }
}
