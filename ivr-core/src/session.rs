// ivr-core/src/session.rs
use std::path::Path;
use std::sync::Arc;

use ivr_common::config::Config;
use ivr_common::error::{IvrError, Result};
use ivr_common::model::{Descriptor, ModuleId, ModuleRevision, Revision};
use ivr_common::VersionConstraint;
use ivr_net::{Fetcher, RepositoryChain};
use tracing::debug;

use crate::buildnumber::{next_build_number, BuildNumber, BuildNumberOptions};
use crate::cancel::CancelSignal;
use crate::listing::ModuleFilter;
use crate::resolve::{ResolveOptions, ResolvedGraph, Resolver};
use crate::store::CacheStore;

/// Everything a command needs: configuration, the repository chain, the
/// cache and the cancellation signal shared by the work it starts.
#[derive(Clone)]
pub struct Session {
    config: Config,
    fetcher: Arc<dyn Fetcher>,
    cache: CacheStore,
    cancel: CancelSignal,
}

impl Session {
    pub fn new(config: Config, fetcher: Arc<dyn Fetcher>, cache: CacheStore) -> Self {
        Self {
            config,
            fetcher,
            cache,
            cancel: CancelSignal::new(),
        }
    }

    /// Builds the configured repositories and opens the cache.
    pub fn from_config(config: Config) -> Result<Self> {
        let fetcher = if config.offline && config.repositories.is_empty() {
            Arc::new(RepositoryChain::new(Vec::new())) as Arc<dyn Fetcher>
        } else {
            ivr_net::build_fetcher(&config)?
        };
        let cache = CacheStore::new(config.cache_dir())?;
        debug!(
            "Session uses {} with cache at {}",
            fetcher.name(),
            cache.root().display()
        );
        Ok(Self::new(config, fetcher, cache))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Options for resolving `conf` under this session's configuration.
    pub fn resolve_options(&self, conf: impl Into<String>) -> ResolveOptions {
        ResolveOptions::from_config(&self.config, conf)
    }

    pub async fn resolve(&self, root: &Descriptor, options: &ResolveOptions) -> Result<ResolvedGraph> {
        let mut resolver = Resolver::new(
            Arc::clone(&self.fetcher),
            self.cache.clone(),
            options.clone(),
            self.cancel.clone(),
        );
        resolver.resolve(root).await
    }

    /// Reads a descriptor file and resolves it.
    pub async fn resolve_file(&self, path: &Path, options: &ResolveOptions) -> Result<ResolvedGraph> {
        let bytes = ivr_aio::read_to_bytes(path)?;
        let root = Descriptor::parse(&bytes)
            .map_err(|e| e.context(format!("reading {}", path.display())))?;
        self.resolve(&root, options).await
    }

    /// Published revisions of `id`, or the cached ones when offline.
    async fn known_revisions(&self, id: &ModuleId) -> Result<Vec<Revision>> {
        let known = if self.config.offline {
            self.cache.known_revisions(id)?
        } else {
            match self.fetcher.list_revisions(id).await {
                Ok(known) => known,
                Err(e) if matches!(e.root_cause(), IvrError::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            }
        };
        debug!("{} known revision(s) of {}", known.len(), id);
        Ok(known)
    }

    /// The revision a constraint selects among the published ones, or
    /// `None` when nothing matches.
    pub async fn find_revision(
        &self,
        id: &ModuleId,
        constraint: &VersionConstraint,
    ) -> Result<Option<Revision>> {
        let known = self.known_revisions(id).await?;
        Ok(constraint.best_match(&known))
    }

    /// The build number and revision to publish next for `id`.
    pub async fn build_number(&self, id: &ModuleId, options: &BuildNumberOptions) -> Result<BuildNumber> {
        let known = self.known_revisions(id).await?;
        next_build_number(&known, options)
    }

    /// Published module revisions matching `filter`, sorted. Offline, only
    /// the cache is consulted.
    pub async fn list_modules(&self, filter: &ModuleFilter) -> Result<Vec<ModuleRevision>> {
        let ids: Vec<ModuleId> = if self.config.offline {
            let mut ids: Vec<ModuleId> =
                self.cache.entries()?.into_iter().map(|e| e.module.id).collect();
            ids.sort();
            ids.dedup();
            ids
        } else {
            self.fetcher.list_modules().await?
        };
        let mut found = Vec::new();
        for id in ids.into_iter().filter(|id| filter.matches_id(id)) {
            self.cancel.check()?;
            for revision in self.known_revisions(&id).await? {
                let module = id.revision(revision);
                if filter.matches(&module) {
                    found.push(module);
                }
            }
        }
        found.sort();
        debug!("{} module revision(s) match {:?}", found.len(), filter);
        Ok(found)
    }
}
