// ivr-net/src/memory.rs
// In-memory repository with injectable latency and failures. Used by the
// resolver and cache tests; also handy for dry runs.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ivr_common::error::{IvrError, Result};
use ivr_common::model::{ArtifactSpec, Descriptor, ModuleId, ModuleRevision, Revision};
use ivr_common::VersionConstraint;
use tracing::debug;

use crate::fetcher::{select_revision, Fetcher};

struct StoredModule {
    descriptor: Descriptor,
    bytes: Vec<u8>,
    artifacts: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct MemoryFetcher {
    modules: Mutex<BTreeMap<ModuleRevision, StoredModule>>,
    delays: Mutex<HashMap<ModuleId, Duration>>,
    failures: Mutex<HashMap<ModuleId, VecDeque<IvrError>>>,
    broken_artifacts: Mutex<HashMap<ModuleRevision, IvrError>>,
    descriptor_fetches: AtomicUsize,
    artifact_fetches: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module from its descriptor text. Every declared artifact gets
    /// the content `"<org#name;rev>!<file>"` unless replaced later.
    pub fn add(&self, descriptor_toml: &str) -> Result<ModuleRevision> {
        let bytes = descriptor_toml.as_bytes().to_vec();
        let descriptor = Descriptor::parse(&bytes)?;
        let module = descriptor.module.clone();
        let artifacts = descriptor
            .artifacts
            .iter()
            .map(|a| {
                let name = a.file_name();
                let content = format!("{module}!{name}").into_bytes();
                (name, content)
            })
            .collect();
        self.lock_modules().insert(
            module.clone(),
            StoredModule {
                descriptor,
                bytes,
                artifacts,
            },
        );
        Ok(module)
    }

    /// Adds a module with no dependencies and the default single jar.
    pub fn add_simple(
        &self,
        organisation: &str,
        name: &str,
        revision: &str,
    ) -> Result<ModuleRevision> {
        self.add(&format!(
            "[module]\norganisation = \"{organisation}\"\nname = \"{name}\"\nrevision = \"{revision}\"\n"
        ))
    }

    pub fn set_artifact(&self, module: &ModuleRevision, file_name: &str, content: &[u8]) {
        if let Some(stored) = self.lock_modules().get_mut(module) {
            stored
                .artifacts
                .insert(file_name.to_string(), content.to_vec());
        }
    }

    /// Every descriptor fetch for `id` sleeps this long first.
    pub fn set_delay(&self, id: &ModuleId, delay: Duration) {
        lock(&self.delays).insert(id.clone(), delay);
    }

    /// The next `times` descriptor fetches for `id` fail with `error`.
    pub fn fail_times(&self, id: &ModuleId, times: usize, error: IvrError) {
        let mut failures = lock(&self.failures);
        let queue = failures.entry(id.clone()).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Every artifact fetch of `module` fails with `error`.
    pub fn break_artifacts(&self, module: &ModuleRevision, error: IvrError) {
        lock(&self.broken_artifacts).insert(module.clone(), error);
    }

    pub fn descriptor_fetches(&self) -> usize {
        self.descriptor_fetches.load(Ordering::SeqCst)
    }

    pub fn artifact_fetches(&self) -> usize {
        self.artifact_fetches.load(Ordering::SeqCst)
    }

    fn lock_modules(&self) -> std::sync::MutexGuard<'_, BTreeMap<ModuleRevision, StoredModule>> {
        lock(&self.modules)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_modules(&self) -> Result<Vec<ModuleId>> {
        let mut modules: Vec<ModuleId> = self.lock_modules().keys().map(|m| m.id.clone()).collect();
        modules.dedup();
        Ok(modules)
    }

    async fn list_revisions(&self, id: &ModuleId) -> Result<Vec<Revision>> {
        Ok(self
            .lock_modules()
            .keys()
            .filter(|m| &m.id == id)
            .map(|m| m.revision.clone())
            .collect())
    }

    async fn fetch_descriptor(
        &self,
        id: &ModuleId,
        constraint: &VersionConstraint,
    ) -> Result<(Descriptor, Vec<u8>)> {
        self.descriptor_fetches.fetch_add(1, Ordering::SeqCst);
        let injected = lock(&self.failures)
            .get_mut(id)
            .and_then(VecDeque::pop_front);
        if let Some(error) = injected {
            debug!("memory: injected failure for {}: {}", id, error);
            return Err(error);
        }
        let delay = lock(&self.delays).get(id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let revision = select_revision(self, id, constraint).await?;
        let module = id.revision(revision);
        self.lock_modules()
            .get(&module)
            .map(|m| (m.descriptor.clone(), m.bytes.clone()))
            .ok_or_else(|| IvrError::NotFound(format!("{module} not in memory repository")))
    }

    async fn fetch_artifact(
        &self,
        module: &ModuleRevision,
        artifact: &ArtifactSpec,
    ) -> Result<Vec<u8>> {
        self.artifact_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.broken_artifacts).get(module) {
            return Err(error.clone());
        }
        let file_name = artifact.file_name();
        self.lock_modules()
            .get(module)
            .and_then(|m| m.artifacts.get(&file_name).cloned())
            .ok_or_else(|| {
                IvrError::NotFound(format!("artifact {file_name} of {module} not in memory repository"))
            })
    }
}
