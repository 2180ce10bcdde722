// ivr-core/src/resolve/download.rs
// Artifact download for a settled graph. Every missing artifact is fetched
// before anything is committed, and entries created by a commit pass that
// fails part way are removed again. Entries that already existed keep the
// artifacts added to them.

use std::fs;
use std::sync::Arc;

use ivr_common::error::{IvrError, Result};
use ivr_common::model::{ArtifactSpec, ModuleRevision};
use ivr_net::Fetcher;
use tracing::{debug, info, warn};

use super::{LoadedDescriptor, ResolvedGraph, Resolver};
use crate::store::CacheStore;

struct DownloadJob {
    module: ModuleRevision,
    descriptor: Arc<LoadedDescriptor>,
    needed: Vec<ArtifactSpec>,
}

impl Resolver {
    /// Brings every non-root node of `graph` into the cache. Returns the
    /// number of entries written.
    pub(super) async fn download(&self, graph: &ResolvedGraph) -> Result<usize> {
        let mut jobs = Vec::new();
        for node in graph.dependencies() {
            if let Some(entry) = self.cache.get(&node.module)? {
                if node.artifacts.iter().all(|a| entry.artifact(a).is_some()) {
                    continue;
                }
            }
            if self.options.offline {
                return Err(IvrError::NotFound(format!(
                    "artifacts of {} are not cached and offline mode is on",
                    node.module
                )));
            }
            let descriptor = self.descriptors.get(&node.module).cloned().ok_or_else(|| {
                IvrError::Generic(format!("descriptor of {} was never loaded", node.module))
            })?;
            jobs.push(DownloadJob {
                module: node.module.clone(),
                descriptor,
                needed: node.artifacts.clone(),
            });
        }
        if jobs.is_empty() {
            debug!("Every resolved module is already cached");
            return Ok(0);
        }

        let fetcher = Arc::clone(&self.fetcher);
        let cache = self.cache.clone();
        let results = self
            .pool
            .run(jobs, |job| {
                fetch_missing(
                    Arc::clone(&fetcher),
                    cache.clone(),
                    job.module.clone(),
                    job.needed.clone(),
                )
            })
            .await?;

        let mut errors = Vec::new();
        let mut staged = Vec::new();
        for (job, result) in results {
            match result {
                Ok(fetched) => staged.push((job, fetched)),
                Err(e) => errors.push(e.context(format!("downloading artifacts of {}", job.module))),
            }
        }
        IvrError::aggregate(errors)?;
        self.cancel.check()?;

        let committed = staged.len();
        let mut created = Vec::new();
        for (job, fetched) in staged {
            let cache = self.cache.clone();
            let module = job.module.clone();
            let result = self
                .cache
                .with_lock(&module, move || async move {
                    commit_entry(&cache, &job.module, &job.descriptor.bytes, fetched)
                })
                .await;
            match result {
                Ok(true) => created.push(module),
                Ok(false) => {}
                Err(e) => {
                    self.discard_created(&created).await;
                    return Err(e.context(format!("committing {module} to the cache")));
                }
            }
        }
        info!("Committed {} module(s) to the cache", committed);
        Ok(committed)
    }

    /// Removes the entries this download created before a later commit failed.
    async fn discard_created(&self, created: &[ModuleRevision]) {
        for module in created.iter().rev() {
            let cache = self.cache.clone();
            let target = module.clone();
            let removed = self
                .cache
                .with_lock(module, move || async move { cache.remove(&target) })
                .await;
            match removed {
                Ok(_) => debug!("Discarded {} after a failed commit", module),
                Err(e) => warn!("Could not discard {} after a failed commit: {}", module, e),
            }
        }
    }
}

/// Fetches the artifacts of `module` that the cache does not hold yet,
/// under the revision lock so concurrent resolutions fetch each file once.
async fn fetch_missing(
    fetcher: Arc<dyn Fetcher>,
    cache: CacheStore,
    module: ModuleRevision,
    needed: Vec<ArtifactSpec>,
) -> Result<Vec<(ArtifactSpec, Vec<u8>)>> {
    let target = module.clone();
    let lock_cache = cache.clone();
    cache
        .with_lock(&module, move || async move {
            let present = lock_cache.get(&target)?;
            let mut fetched = Vec::new();
            for spec in needed {
                if present.as_ref().is_some_and(|e| e.artifact(&spec).is_some()) {
                    continue;
                }
                debug!("Fetching {} of {}", spec, target);
                let bytes = fetcher.fetch_artifact(&target, &spec).await?;
                fetched.push((spec, bytes));
            }
            Ok(fetched)
        })
        .await
}

/// Writes the entry for `module`, keeping artifacts another resolution
/// already cached. True when the entry did not exist before.
fn commit_entry(
    cache: &CacheStore,
    module: &ModuleRevision,
    descriptor_bytes: &[u8],
    fetched: Vec<(ArtifactSpec, Vec<u8>)>,
) -> Result<bool> {
    let mut artifacts: Vec<(ArtifactSpec, Vec<u8>)> = Vec::new();
    let existing = cache.get(module)?;
    let created = existing.is_none();
    if let Some(existing) = existing {
        for cached in &existing.artifacts {
            let replaced = fetched
                .iter()
                .any(|(spec, _)| spec.file_name() == cached.spec.file_name());
            if !replaced {
                artifacts.push((cached.spec.clone(), fs::read(existing.dir.join(&cached.file))?));
            }
        }
    }
    artifacts.extend(fetched);
    cache.put(module, descriptor_bytes, &artifacts)?;
    Ok(created)
}
