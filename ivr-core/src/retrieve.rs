// ivr-core/src/retrieve.rs
// Copies resolved artifacts out of the cache into a pattern-based layout.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use ivr_common::error::{IvrError, Result};
use ivr_common::model::{ArtifactSpec, ModuleRevision};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, error, info, warn};

use crate::resolve::ResolvedGraph;
use crate::store::{CacheEntry, CacheStore};

/// What happens to the successful copies when some copies fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strictness {
    /// Nothing is written unless every copy succeeds.
    #[default]
    Atomic,
    /// Successful copies are kept; the failures are reported.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveOptions {
    pub pattern: String,
    /// Directory the pattern is relative to.
    pub base_dir: PathBuf,
    pub overwrite: bool,
    pub strictness: Strictness,
    /// Delete files under the pattern's fixed prefix that were not retrieved.
    pub sync: bool,
}

impl RetrieveOptions {
    pub fn new(pattern: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            pattern: pattern.into(),
            base_dir: base_dir.into(),
            overwrite: false,
            strictness: Strictness::default(),
            sync: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrieveReport {
    pub written: Vec<PathBuf>,
    pub up_to_date: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Organisation,
    Module,
    Revision,
    Artifact,
    Type,
    Ext,
    Conf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(Token),
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = pattern;
    while let Some(open) = rest.find('[') {
        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }
        let close = rest[open..].find(']').map(|i| open + i).ok_or_else(|| {
            IvrError::Config(format!("unclosed '[' in retrieve pattern '{pattern}'"))
        })?;
        let token = match &rest[open + 1..close] {
            "organisation" | "organization" => Token::Organisation,
            "module" => Token::Module,
            "revision" => Token::Revision,
            "artifact" => Token::Artifact,
            "type" => Token::Type,
            "ext" => Token::Ext,
            "conf" => Token::Conf,
            other => {
                return Err(IvrError::Config(format!(
                    "unknown token '[{other}]' in retrieve pattern '{pattern}'"
                )))
            }
        };
        segments.push(Segment::Token(token));
        rest = &rest[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

fn render(segments: &[Segment], module: &ModuleRevision, artifact: &ArtifactSpec, conf: Option<&str>) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Token(Token::Organisation) => out.push_str(&module.id.organisation),
            Segment::Token(Token::Module) => out.push_str(&module.id.name),
            Segment::Token(Token::Revision) => out.push_str(module.revision.as_str()),
            Segment::Token(Token::Artifact) => out.push_str(&artifact.name),
            Segment::Token(Token::Type) => out.push_str(&artifact.kind),
            Segment::Token(Token::Ext) => out.push_str(&artifact.ext),
            Segment::Token(Token::Conf) => out.push_str(conf.unwrap_or_default()),
        }
    }
    out
}

/// Substitutes every token of `pattern` for one artifact.
pub fn substitute(
    pattern: &str,
    module: &ModuleRevision,
    artifact: &ArtifactSpec,
    conf: Option<&str>,
) -> Result<String> {
    Ok(render(&parse_pattern(pattern)?, module, artifact, conf))
}

/// The directory every destination of `pattern` lives under.
fn static_root(pattern: &str, base_dir: &Path) -> PathBuf {
    let fixed = pattern.split('[').next().unwrap_or_default();
    match fixed.rfind('/') {
        Some(slash) => base_dir.join(&fixed[..slash]),
        None => base_dir.to_path_buf(),
    }
}

#[derive(Debug, Clone)]
struct Planned {
    destination: PathBuf,
    module: ModuleRevision,
    spec: ArtifactSpec,
}

impl Planned {
    fn label(&self) -> String {
        format!("{}:{}", self.module, self.spec.file_name())
    }
}

/// Destinations in graph order, then artifact order. With `overwrite` a
/// later artifact takes over the slot of an earlier one.
fn plan(graph: &ResolvedGraph, options: &RetrieveOptions) -> Result<Vec<Planned>> {
    let segments = parse_pattern(&options.pattern)?;
    let per_conf = segments.contains(&Segment::Token(Token::Conf));
    let mut slots: BTreeMap<PathBuf, usize> = BTreeMap::new();
    let mut planned: Vec<Planned> = Vec::new();

    for node in graph.dependencies() {
        for spec in &node.artifacts {
            let confs: Vec<Option<&str>> = if per_conf {
                let mut confs: BTreeSet<&str> = node
                    .confs
                    .iter()
                    .filter(|c| spec.confs.contains(c.as_str()))
                    .map(String::as_str)
                    .collect();
                if confs.is_empty() {
                    confs = node.confs.iter().map(String::as_str).collect();
                }
                confs.into_iter().map(Some).collect()
            } else {
                vec![None]
            };

            for conf in confs {
                let item = Planned {
                    destination: options
                        .base_dir
                        .join(render(&segments, &node.module, spec, conf)),
                    module: node.module.clone(),
                    spec: spec.clone(),
                };
                match slots.get(&item.destination) {
                    Some(&index) => {
                        if !options.overwrite {
                            return Err(IvrError::RetrievalConflict {
                                destination: item.destination.clone(),
                                first: planned[index].label(),
                                second: item.label(),
                            });
                        }
                        debug!(
                            "{} replaces {} at {}",
                            item.label(),
                            planned[index].label(),
                            item.destination.display()
                        );
                        planned[index] = item;
                    }
                    None => {
                        slots.insert(item.destination.clone(), planned.len());
                        planned.push(item);
                    }
                }
            }
        }
    }
    Ok(planned)
}

/// Stages one copy. `None` when the destination already holds the content.
fn stage(
    cache: &CacheStore,
    entries: &mut BTreeMap<ModuleRevision, CacheEntry>,
    item: &Planned,
) -> Result<Option<NamedTempFile>> {
    if !entries.contains_key(&item.module) {
        let entry = cache
            .get(&item.module)?
            .ok_or_else(|| IvrError::Cache(format!("{} is not cached", item.module)))?;
        entries.insert(item.module.clone(), entry);
    }
    let entry = entries
        .get(&item.module)
        .ok_or_else(|| IvrError::Cache(format!("{} is not cached", item.module)))?;
    let cached = entry.artifact(&item.spec).ok_or_else(|| {
        IvrError::Cache(format!(
            "{} has no cached artifact {}",
            item.module,
            item.spec.file_name()
        ))
    })?;
    let source = entry.dir.join(&cached.file);
    ivr_aio::verify_checksum(&source, &cached.sha256)?;
    if ivr_aio::files_equal(&source, &item.destination)? {
        return Ok(None);
    }
    let bytes = ivr_aio::read_to_bytes(&source)?;
    ivr_aio::stage_file(&item.destination, &bytes).map(Some)
}

/// Topmost ancestor of `path` below `base` that does not exist yet.
fn first_missing_dir(path: &Path, base: &Path) -> Option<PathBuf> {
    let mut missing = None;
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.exists() || dir == base {
            break;
        }
        missing = Some(dir.to_path_buf());
        current = dir.parent();
    }
    missing
}

/// Copies every artifact of `graph` from the cache to the layout described
/// by `options`.
pub fn retrieve(
    graph: &ResolvedGraph,
    cache: &CacheStore,
    options: &RetrieveOptions,
) -> Result<RetrieveReport> {
    let planned = plan(graph, options)?;
    let mut report = RetrieveReport::default();
    let mut entries = BTreeMap::new();
    let mut staged: Vec<(NamedTempFile, &Planned)> = Vec::new();
    let mut failures: Vec<(IvrError, &Planned)> = Vec::new();
    let mut created_dirs: BTreeSet<PathBuf> = BTreeSet::new();

    for item in &planned {
        let missing_dir = first_missing_dir(&item.destination, &options.base_dir);
        match stage(cache, &mut entries, item) {
            Ok(None) => report.up_to_date.push(item.destination.clone()),
            Ok(Some(temp)) => {
                created_dirs.extend(missing_dir);
                staged.push((temp, item));
            }
            Err(e) => {
                created_dirs.extend(missing_dir);
                failures.push((e, item));
            }
        }
    }

    match options.strictness {
        Strictness::Atomic => {
            if !failures.is_empty() {
                staged.clear();
                remove_dirs(&created_dirs);
                let errors = failures
                    .into_iter()
                    .map(|(e, item)| e.context(format!("retrieving {}", item.label())))
                    .collect();
                IvrError::aggregate(errors)?;
            }
            let mut undo = Rollback::default();
            for (temp, item) in staged {
                if let Err(e) = undo.persist(temp, &item.destination) {
                    error!("Rolling back retrieval after {} failed", item.label());
                    undo.restore();
                    remove_dirs(&created_dirs);
                    return Err(e.context(format!("retrieving {}", item.label())));
                }
                report.written.push(item.destination.clone());
            }
        }
        Strictness::Partial => {
            for (temp, item) in staged {
                match ivr_aio::persist_staged(temp, &item.destination) {
                    Ok(()) => report.written.push(item.destination.clone()),
                    Err(e) => failures.push((e, item)),
                }
            }
            if !failures.is_empty() {
                return Err(IvrError::PartialRetrieval {
                    written: report.written,
                    failures: failures
                        .into_iter()
                        .map(|(e, item)| format!("{}: {}", item.label(), e))
                        .collect(),
                });
            }
        }
    }

    if options.sync {
        let keep: BTreeSet<&Path> = planned.iter().map(|p| p.destination.as_path()).collect();
        let root = static_root(&options.pattern, &options.base_dir);
        for file in ivr_aio::list_files_recursive(&root) {
            if !keep.contains(file.as_path()) {
                ivr_aio::remove_file_if_exists(&file)?;
                debug!("Removed stale {}", file.display());
                report.removed.push(file);
            }
        }
    }

    info!(
        "Retrieved {} artifact(s): {} written, {} up to date, {} removed",
        planned.len(),
        report.written.len(),
        report.up_to_date.len(),
        report.removed.len()
    );
    Ok(report)
}

/// Files an atomic retrieval has written so far. Replaced files are moved
/// aside next to their destination until the retrieval completes; dropping
/// the rollback deletes them.
#[derive(Default)]
struct Rollback {
    fresh: Vec<PathBuf>,
    replaced: Vec<(TempPath, PathBuf)>,
}

impl Rollback {
    fn persist(&mut self, temp: NamedTempFile, destination: &Path) -> Result<()> {
        if destination.is_file() {
            let dir = destination.parent().unwrap_or(Path::new("."));
            let backup = tempfile::Builder::new()
                .prefix(".ivr-replaced-")
                .tempfile_in(dir)?
                .into_temp_path();
            fs::rename(destination, &backup)?;
            self.replaced.push((backup, destination.to_path_buf()));
            ivr_aio::persist_staged(temp, destination)
        } else {
            ivr_aio::persist_staged(temp, destination)?;
            self.fresh.push(destination.to_path_buf());
            Ok(())
        }
    }

    /// Puts every replaced file back and deletes every new one.
    fn restore(self) {
        for path in &self.fresh {
            if let Err(e) = ivr_aio::remove_file_if_exists(path) {
                warn!("Could not roll back {}: {}", path.display(), e);
            }
        }
        for (backup, destination) in self.replaced.into_iter().rev() {
            if let Err(e) = fs::rename(&backup, &destination) {
                warn!("Could not restore {}: {}", destination.display(), e);
                // leave the old content on disk rather than deleting it
                if let Err(e) = backup.keep() {
                    warn!("Could not keep backup of {}: {}", destination.display(), e);
                }
            }
        }
    }
}

fn remove_dirs(dirs: &BTreeSet<PathBuf>) {
    for dir in dirs {
        if let Err(e) = fs::remove_dir_all(dir) {
            warn!("Could not remove {}: {}", dir.display(), e);
        }
    }
}

/// Cache paths of every artifact in `graph`, in graph order.
pub fn cachepath(graph: &ResolvedGraph, cache: &CacheStore) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let mut errors = Vec::new();
    for node in graph.dependencies() {
        if node.artifacts.is_empty() {
            continue;
        }
        let Some(entry) = cache.get(&node.module)? else {
            errors.push(IvrError::Cache(format!("{} is not cached", node.module)));
            continue;
        };
        for spec in &node.artifacts {
            match entry.artifact_path(spec) {
                Some(path) => paths.push(path),
                None => errors.push(IvrError::Cache(format!(
                    "{} has no cached artifact {}",
                    node.module,
                    spec.file_name()
                ))),
            }
        }
    }
    IvrError::aggregate(errors)?;
    Ok(paths)
}

/// Joins paths with the platform's path-list separator.
pub fn join_cachepath(paths: &[PathBuf]) -> Result<OsString> {
    std::env::join_paths(paths)
        .map_err(|e| IvrError::Generic(format!("cannot build cache path: {e}")))
}
