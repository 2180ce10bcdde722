// ivr-core/src/store.rs
// Local artifact cache.
//
//   <root>/<org>/<module>/<rev>/descriptor.toml
//   <root>/<org>/<module>/<rev>/entry.json
//   <root>/<org>/<module>/<rev>/artifacts/<name>.<ext>
//   <root>/<org>/<module>/<rev>.lock
//   <root>/.tmp/                       staging area for put and evict
//
// Entries are staged in full under `.tmp` and renamed into place, so a
// reader either sees a complete entry or none at all.

use std::collections::BTreeSet;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use ivr_common::error::{IvrError, Result};
use ivr_common::model::module::check_coordinate;
use ivr_common::model::{Artifact, ArtifactSpec, Descriptor, ModuleId, ModuleRevision, Revision};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

const DESCRIPTOR_FILE: &str = "descriptor.toml";
const ENTRY_FILE: &str = "entry.json";
const ARTIFACTS_DIR: &str = "artifacts";
const STAGING_DIR: &str = ".tmp";

/// One artifact file inside a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedArtifact {
    pub spec: ArtifactSpec,
    /// Path relative to the entry directory.
    pub file: String,
    pub sha256: String,
    pub size: u64,
}

/// The `entry.json` record of a cached module revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub module: ModuleRevision,
    pub descriptor: String,
    pub artifacts: Vec<CachedArtifact>,
    /// Hash over the descriptor and every artifact, in order.
    pub sha256: String,
    pub size: u64,
    pub created: SystemTime,
    pub last_access: SystemTime,
    #[serde(skip)]
    pub dir: PathBuf,
}

impl CacheEntry {
    pub fn descriptor_path(&self) -> PathBuf {
        self.dir.join(&self.descriptor)
    }

    pub fn artifact(&self, spec: &ArtifactSpec) -> Option<&CachedArtifact> {
        self.artifacts.iter().find(|a| a.spec == *spec)
    }

    pub fn artifact_path(&self, spec: &ArtifactSpec) -> Option<PathBuf> {
        self.artifact(spec).map(|a| self.dir.join(&a.file))
    }

    /// Cache-resident artifacts of this entry.
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts
            .iter()
            .map(|a| Artifact {
                module: self.module.clone(),
                spec: a.spec.clone(),
                path: self.dir.join(&a.file),
            })
            .collect()
    }

    pub fn read_descriptor(&self) -> Result<(Descriptor, Vec<u8>)> {
        let bytes = ivr_aio::read_to_bytes(&self.descriptor_path())?;
        let descriptor = Descriptor::parse(&bytes)
            .map_err(|e| e.context(format!("cached descriptor of {}", self.module)))?;
        Ok((descriptor, bytes))
    }

    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.last_access)
            .unwrap_or(Duration::ZERO)
    }
}

/// What `clean-cache` removes. Criteria are combined with "or"; no criteria
/// at all matches nothing.
#[derive(Debug, Clone, Default)]
pub struct EvictOptions {
    pub older_than: Option<Duration>,
    pub module: Option<ModuleId>,
    /// Evict least recently used entries until the cache fits.
    pub max_total_size: Option<u64>,
}

#[derive(Clone)]
pub struct CacheStore {
    root: PathBuf,
    locks: Arc<DashMap<ModuleRevision, Arc<Mutex<()>>>>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        ivr_aio::create_dir_all(&root)?;
        debug!("Cache store at {}", root.display());
        Ok(Self {
            root,
            locks: Arc::new(DashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a revision's entry. Coordinates that would resolve
    /// outside the cache root are refused.
    pub fn entry_dir(&self, module: &ModuleRevision) -> Result<PathBuf> {
        module.check()?;
        Ok(self
            .root
            .join(&module.id.organisation)
            .join(&module.id.name)
            .join(module.revision.as_str()))
    }

    pub fn lock_path(&self, module: &ModuleRevision) -> Result<PathBuf> {
        module.check()?;
        Ok(self
            .root
            .join(&module.id.organisation)
            .join(&module.id.name)
            .join(format!("{}.lock", module.revision)))
    }

    fn staging_dir(&self) -> Result<PathBuf> {
        let dir = self.root.join(STAGING_DIR);
        ivr_aio::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn memory_lock(&self, module: &ModuleRevision) -> Arc<Mutex<()>> {
        self.locks
            .entry(module.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read_entry(dir: &Path) -> Result<Option<CacheEntry>> {
        let path = dir.join(ENTRY_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut entry: CacheEntry = serde_json::from_slice(&bytes).map_err(|e| {
            IvrError::Cache(format!("corrupt cache record {}: {e}", path.display()))
        })?;
        entry.dir = dir.to_path_buf();
        Ok(Some(entry))
    }

    /// Looks up a cached revision on local disk and refreshes its last-access
    /// time. Never touches the network.
    pub fn get(&self, module: &ModuleRevision) -> Result<Option<CacheEntry>> {
        let dir = self.entry_dir(module)?;
        let Some(mut entry) = Self::read_entry(&dir)? else {
            return Ok(None);
        };
        if entry.module != *module {
            return Err(IvrError::Cache(format!(
                "cache record in {} describes {} instead of {}",
                dir.display(),
                entry.module,
                module
            )));
        }

        // Best effort. Skipped while a writer holds the revision so the
        // refresh cannot clobber a freshly renamed entry.
        let lock = self.memory_lock(module);
        if let Ok(_guard) = lock.try_lock() {
            entry.last_access = SystemTime::now();
            if let Err(e) = Self::write_record(&entry) {
                debug!("Could not refresh last access of {}: {}", module, e);
            }
        }
        Ok(Some(entry))
    }

    fn write_record(entry: &CacheEntry) -> Result<()> {
        let json = serde_json::to_vec_pretty(entry)?;
        ivr_aio::atomic_write_file(&entry.dir.join(ENTRY_FILE), &json)
    }

    /// Stores a module revision with the given artifacts. The whole entry is
    /// written to a staging directory first and renamed into place. Putting
    /// identical content again is a no-op; different content replaces the
    /// entry.
    pub fn put(
        &self,
        module: &ModuleRevision,
        descriptor_bytes: &[u8],
        artifacts: &[(ArtifactSpec, Vec<u8>)],
    ) -> Result<CacheEntry> {
        let target = self.entry_dir(module)?;
        let mut seen = BTreeSet::new();
        for (spec, _) in artifacts {
            check_coordinate("artifact", &spec.file_name())?;
            if !seen.insert(spec.file_name()) {
                return Err(IvrError::Cache(format!(
                    "{module} lists artifact file {} twice",
                    spec.file_name()
                )));
            }
        }

        let staging = tempfile::Builder::new()
            .prefix("entry-")
            .tempdir_in(self.staging_dir()?)?;
        let stage = staging.path();
        fs::write(stage.join(DESCRIPTOR_FILE), descriptor_bytes)?;
        fs::create_dir_all(stage.join(ARTIFACTS_DIR))?;

        let mut hasher = ivr_aio::ContentHasher::new();
        hasher.part(DESCRIPTOR_FILE, descriptor_bytes);
        let mut size = descriptor_bytes.len() as u64;
        let mut cached = Vec::with_capacity(artifacts.len());
        for (spec, bytes) in artifacts {
            let file = format!("{ARTIFACTS_DIR}/{}", spec.file_name());
            fs::write(stage.join(&file), bytes)?;
            hasher.part(&file, bytes);
            size += bytes.len() as u64;
            cached.push(CachedArtifact {
                spec: spec.clone(),
                file,
                sha256: ivr_aio::sha256_hex(bytes),
                size: bytes.len() as u64,
            });
        }

        let now = SystemTime::now();
        let mut entry = CacheEntry {
            module: module.clone(),
            descriptor: DESCRIPTOR_FILE.to_string(),
            artifacts: cached,
            sha256: hasher.finish(),
            size,
            created: now,
            last_access: now,
            dir: stage.to_path_buf(),
        };
        // the record goes last; its presence marks a complete entry
        fs::write(stage.join(ENTRY_FILE), serde_json::to_vec_pretty(&entry)?)?;

        if let Some(parent) = target.parent() {
            ivr_aio::create_dir_all(parent)?;
        }
        if let Some(existing) = Self::read_entry(&target)? {
            if existing.sha256 == entry.sha256 {
                debug!("{} already cached with identical content", module);
                return Ok(existing);
            }
            debug!("Replacing cached {} ({} -> {})", module, existing.sha256, entry.sha256);
            self.discard_dir(&target)?;
        }

        if let Err(e) = fs::rename(stage, &target) {
            // lost a race with a writer that did not hold the lock
            if let Some(existing) = Self::read_entry(&target)? {
                if existing.sha256 == entry.sha256 {
                    return Ok(existing);
                }
            }
            error!("Failed to move staged entry for {} into place: {}", module, e);
            return Err(IvrError::Cache(format!(
                "cannot commit {module} to {}: {e}",
                target.display()
            )));
        }
        entry.dir = target;
        debug!("Cached {} ({} bytes)", module, entry.size);
        Ok(entry)
    }

    /// Deletes the entry of `module`. The caller holds the revision's lock.
    /// False when there was no entry.
    pub fn remove(&self, module: &ModuleRevision) -> Result<bool> {
        let dir = self.entry_dir(module)?;
        if Self::read_entry(&dir)?.is_none() {
            return Ok(false);
        }
        self.discard_dir(&dir)?;
        debug!("Removed cached {}", module);
        Ok(true)
    }

    /// Moves a directory out of the live tree, then deletes it.
    fn discard_dir(&self, dir: &Path) -> Result<()> {
        let trash = self.staging_dir()?.join(format!(
            "trash-{}-{:016x}",
            std::process::id(),
            rand::random::<u64>()
        ));
        match fs::rename(dir, &trash) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = ivr_aio::remove_directory_recursive(&trash) {
            warn!("Could not delete {}: {}", trash.display(), e);
        }
        Ok(())
    }

    /// Runs `f` while holding the revision's lock: first an in-process mutex,
    /// then an exclusive OS lock on `<rev>.lock`. Both are released when this
    /// returns, whatever `f` returned.
    pub async fn with_lock<T, F, Fut>(&self, module: &ModuleRevision, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let memory_lock = self.memory_lock(module);
        let _memory_guard = memory_lock.lock().await;
        let _file_guard = self.lock_file(module).await?;
        debug!("Acquired cache lock for {}", module);
        f().await
    }

    async fn lock_file(&self, module: &ModuleRevision) -> Result<fs::File> {
        use fs4::fs_std::FileExt;

        let path = self.lock_path(module)?;
        if let Some(parent) = path.parent() {
            ivr_aio::create_dir_all(parent)?;
        }
        let lock_file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        let std_file = lock_file.into_std().await;
        // blocks until other processes let go
        tokio::task::spawn_blocking(move || {
            std_file.lock_exclusive()?;
            Ok::<_, io::Error>(std_file)
        })
        .await
        .map_err(|e| IvrError::Generic(format!("lock task for {module} failed: {e}")))?
        .map_err(IvrError::from)
    }

    /// Every complete entry, sorted by module revision. Unreadable records
    /// are reported and skipped.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for (org, org_path, is_dir) in list_or_empty(&self.root)? {
            if !is_dir || org.starts_with('.') {
                continue;
            }
            for (_, module_path, is_dir) in list_or_empty(&org_path)? {
                if !is_dir {
                    continue;
                }
                for (_, rev_path, is_dir) in list_or_empty(&module_path)? {
                    if !is_dir {
                        continue;
                    }
                    match Self::read_entry(&rev_path) {
                        Ok(Some(entry)) => entries.push(entry),
                        Ok(None) => {}
                        Err(e) => warn!("Skipping cache entry {}: {}", rev_path.display(), e),
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.module.cmp(&b.module));
        Ok(entries)
    }

    /// Revisions of a module present in the cache, ascending.
    pub fn known_revisions(&self, id: &ModuleId) -> Result<Vec<Revision>> {
        id.check()?;
        let dir = self.root.join(&id.organisation).join(&id.name);
        let mut revisions: Vec<Revision> = list_or_empty(&dir)?
            .into_iter()
            .filter(|(_, path, is_dir)| *is_dir && path.join(ENTRY_FILE).is_file())
            .map(|(name, _, _)| Revision::new(name))
            .collect();
        revisions.sort();
        Ok(revisions)
    }

    /// Total bytes on disk, staging area and lock files included.
    pub fn size(&self) -> u64 {
        ivr_aio::directory_size(&self.root)
    }

    /// Checks every file of an entry against its recorded hashes.
    pub fn verify(&self, entry: &CacheEntry) -> Result<()> {
        let descriptor = ivr_aio::read_to_bytes(&entry.descriptor_path())?;
        let mut hasher = ivr_aio::ContentHasher::new();
        hasher.part(&entry.descriptor, &descriptor);
        for artifact in &entry.artifacts {
            let path = entry.dir.join(&artifact.file);
            let bytes = ivr_aio::read_to_bytes(&path)?;
            let actual = ivr_aio::sha256_hex(&bytes);
            if actual != artifact.sha256 {
                return Err(IvrError::ChecksumError(format!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    path.display(),
                    artifact.sha256,
                    actual
                )));
            }
            hasher.part(&artifact.file, &bytes);
        }
        let actual = hasher.finish();
        if actual != entry.sha256 {
            return Err(IvrError::ChecksumError(format!(
                "Content hash mismatch for cached {}: expected {}, got {}",
                entry.module, entry.sha256, actual
            )));
        }
        Ok(())
    }

    /// Removes every entry matching `predicate`. Entries locked in this
    /// process are skipped; for the rest the file lock is taken and the
    /// predicate checked again before removal.
    pub async fn evict<P>(&self, predicate: P) -> Result<Vec<ModuleRevision>>
    where
        P: Fn(&CacheEntry) -> bool,
    {
        let mut evicted = Vec::new();
        for entry in self.entries()? {
            if !predicate(&entry) {
                continue;
            }
            let module = entry.module.clone();
            let memory_lock = self.memory_lock(&module);
            let Ok(_memory_guard) = memory_lock.try_lock() else {
                debug!("Not evicting {}: in use", module);
                continue;
            };
            let _file_guard = self.lock_file(&module).await?;
            let dir = self.entry_dir(&module)?;
            match Self::read_entry(&dir)? {
                Some(current) if predicate(&current) => {
                    self.discard_dir(&dir)?;
                    debug!("Evicted {}", module);
                    evicted.push(module);
                }
                _ => debug!("Not evicting {}: changed while waiting for its lock", module),
            }
        }
        Ok(evicted)
    }

    pub async fn evict_with(&self, options: &EvictOptions) -> Result<Vec<ModuleRevision>> {
        let mut over_budget = BTreeSet::new();
        if let Some(limit) = options.max_total_size {
            let mut entries = self.entries()?;
            let mut total: u64 = entries.iter().map(|e| e.size).sum();
            entries.sort_by_key(|e| e.last_access);
            for entry in entries {
                if total <= limit {
                    break;
                }
                total = total.saturating_sub(entry.size);
                over_budget.insert(entry.module);
            }
        }
        self.evict(|entry| {
            options.older_than.is_some_and(|age| entry.age() >= age)
                || options.module.as_ref() == Some(&entry.module.id)
                || over_budget.contains(&entry.module)
        })
        .await
    }

    /// Removes every entry, lock file and the staging area. Logs are kept.
    /// Entries in use by this process survive along with their directories.
    pub async fn clean_all(&self) -> Result<usize> {
        let removed = self.evict(|_| true).await?.len();
        ivr_aio::remove_directory_recursive(&self.root.join(STAGING_DIR))?;
        if self.entries()?.is_empty() {
            for (name, path, is_dir) in list_or_empty(&self.root)? {
                if is_dir && !name.starts_with('.') {
                    ivr_aio::remove_directory_recursive(&path)?;
                }
            }
        }
        Ok(removed)
    }
}

fn list_or_empty(dir: &Path) -> Result<Vec<(String, PathBuf, bool)>> {
    match ivr_aio::list_directory_entries(dir) {
        Ok(entries) => Ok(entries),
        Err(IvrError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}
