// ivr-core/src/resolve/mod.rs
// Transitive resolution.
//
// Resolution runs in rounds. Each round walks the graph breadth-first from
// the root, using the revisions selected by the previous round wherever a
// module was already decided, and records every caller's request. The
// conflict stage then picks one winner per module. Rounds repeat until the
// selection no longer changes; that fixpoint is the result.

pub mod conflict;
mod download;
pub mod graph;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ivr_common::config::{CircularStrategy, Config, ConflictManagerKind};
use ivr_common::dependency::{merge_exclusions, ExclusionSet};
use ivr_common::error::{IvrError, Result};
use ivr_common::model::{Descriptor, ModuleId, ModuleRevision, Revision};
use ivr_common::VersionConstraint;
use ivr_net::Fetcher;
use tracing::{debug, info, instrument, warn};

pub use conflict::{choose, conflict_manager, Candidate, ConflictManager};
pub use graph::{find_cycle, Edge, Eviction, ResolvedGraph, ResolvedNode};

use crate::cancel::CancelSignal;
use crate::pool::WorkerPool;
use crate::store::CacheStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Configuration of the root module to resolve.
    pub conf: String,
    pub conflict_manager: ConflictManagerKind,
    pub circular: CircularStrategy,
    pub max_rounds: usize,
    pub workers: usize,
    /// Never contact a repository; everything must already be cached.
    pub offline: bool,
    /// Fetch the artifacts of every winner and commit them to the cache.
    pub download: bool,
}

impl ResolveOptions {
    pub fn new(conf: impl Into<String>) -> Self {
        Self::from_config(&Config::default(), conf)
    }

    pub fn from_config(config: &Config, conf: impl Into<String>) -> Self {
        Self {
            conf: conf.into(),
            conflict_manager: config.conflict_manager,
            circular: config.circular,
            max_rounds: config.max_rounds.max(1),
            workers: config.workers.max(1),
            offline: config.offline,
            download: true,
        }
    }
}

/// A descriptor together with the exact bytes it was parsed from.
#[derive(Debug)]
pub(crate) struct LoadedDescriptor {
    pub descriptor: Descriptor,
    pub bytes: Vec<u8>,
}

/// One module reached during a round.
#[derive(Debug)]
struct Visit {
    module: ModuleRevision,
    confs: BTreeSet<String>,
    excludes: ExclusionSet,
    callers: BTreeSet<ModuleRevision>,
    depth: usize,
    transitive: bool,
}

/// Work item for the next breadth-first level.
#[derive(Debug)]
struct Expansion {
    module: ModuleRevision,
    /// Configurations whose dependencies still have to be followed.
    confs: BTreeSet<String>,
    excludes: ExclusionSet,
    path: Vec<ModuleId>,
    depth: usize,
    transitive: bool,
}

/// A dependency declared by an expanded module.
#[derive(Debug)]
struct Request {
    caller: ModuleRevision,
    dependency: ModuleId,
    constraint: VersionConstraint,
    confs: BTreeSet<String>,
    forced: bool,
    excludes: ExclusionSet,
    path: Vec<ModuleId>,
    depth: usize,
    transitive: bool,
}

#[derive(Debug)]
struct PendingEdge {
    caller: ModuleRevision,
    callee: ModuleId,
    constraint: VersionConstraint,
    confs: BTreeSet<String>,
    forced: bool,
}

#[derive(Debug, Default)]
struct Traversal {
    visits: BTreeMap<ModuleId, Visit>,
    order: Vec<ModuleId>,
    candidates: BTreeMap<ModuleId, Vec<Candidate>>,
    edges: Vec<PendingEdge>,
    errors: Vec<IvrError>,
}

impl Traversal {
    fn record(&mut self, request: &Request, revision: Revision) {
        let candidate = Candidate {
            revision,
            constraint: request.constraint.clone(),
            caller: request.caller.clone(),
            forced: request.forced,
        };
        let candidates = self.candidates.entry(request.dependency.clone()).or_default();
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }

        let existing = self.edges.iter_mut().find(|e| {
            e.caller == request.caller
                && e.callee == request.dependency
                && e.constraint == request.constraint
        });
        match existing {
            Some(edge) => {
                edge.confs.extend(request.confs.iter().cloned());
                edge.forced |= request.forced;
            }
            None => self.edges.push(PendingEdge {
                caller: request.caller.clone(),
                callee: request.dependency.clone(),
                constraint: request.constraint.clone(),
                confs: request.confs.clone(),
                forced: request.forced,
            }),
        }
    }

    /// Marks the requested module as reached. Returns the expansion still
    /// owed: everything on a first visit, only new configurations on a
    /// revisit, or everything again when fewer exclusions apply than before.
    fn visit(&mut self, request: &Request, revision: Revision) -> Option<Expansion> {
        let Some(visit) = self.visits.get_mut(&request.dependency) else {
            let module = request.dependency.revision(revision);
            self.visits.insert(
                request.dependency.clone(),
                Visit {
                    module: module.clone(),
                    confs: request.confs.clone(),
                    excludes: request.excludes.clone(),
                    callers: BTreeSet::from([request.caller.clone()]),
                    depth: request.depth,
                    transitive: request.transitive,
                },
            );
            self.order.push(request.dependency.clone());
            return Some(Expansion {
                module,
                confs: request.confs.clone(),
                excludes: request.excludes.clone(),
                path: request.path.clone(),
                depth: request.depth,
                transitive: request.transitive,
            });
        };

        visit.callers.insert(request.caller.clone());
        visit.depth = visit.depth.min(request.depth);
        let narrowed = visit.excludes.intersection(&request.excludes);
        let widened = narrowed.len() < visit.excludes.len()
            || (request.transitive && !visit.transitive);
        let fresh: BTreeSet<String> = request.confs.difference(&visit.confs).cloned().collect();
        visit.confs.extend(request.confs.iter().cloned());
        visit.excludes = narrowed;
        visit.transitive |= request.transitive;

        let confs = if widened {
            visit.confs.clone()
        } else if !fresh.is_empty() {
            fresh
        } else {
            return None;
        };
        Some(Expansion {
            module: visit.module.clone(),
            confs,
            excludes: visit.excludes.clone(),
            path: request.path.clone(),
            depth: request.depth,
            transitive: visit.transitive,
        })
    }
}

/// Outcome of the conflict stage.
#[derive(Debug, Default)]
struct Settlement {
    selections: BTreeMap<ModuleId, Revision>,
    evicted: Vec<Eviction>,
    errors: Vec<IvrError>,
}

/// One resolution. Descriptors and revision listings are memoized for the
/// lifetime of the resolver so later rounds never refetch them.
pub struct Resolver {
    fetcher: Arc<dyn Fetcher>,
    cache: CacheStore,
    options: ResolveOptions,
    manager: Box<dyn ConflictManager>,
    pool: WorkerPool,
    cancel: CancelSignal,
    descriptors: BTreeMap<ModuleRevision, Arc<LoadedDescriptor>>,
    known: BTreeMap<ModuleId, Arc<Vec<Revision>>>,
}

impl Resolver {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        cache: CacheStore,
        options: ResolveOptions,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            manager: conflict_manager(options.conflict_manager),
            pool: WorkerPool::new(options.workers, cancel.clone()),
            fetcher,
            cache,
            options,
            cancel,
            descriptors: BTreeMap::new(),
            known: BTreeMap::new(),
        }
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolves `root` in the configured configuration. On success with
    /// `download` set, every winner and its artifacts are in the cache.
    #[instrument(skip_all, fields(root = %root.module, conf = %self.options.conf))]
    pub async fn resolve(&mut self, root: &Descriptor) -> Result<ResolvedGraph> {
        let requested = BTreeSet::from([self.options.conf.clone()]);
        for conf in root.expand_confs(&requested) {
            root.active_confs(&conf)
                .map_err(|e| e.context(format!("resolving {}", root.module)))?;
        }
        self.descriptors.insert(
            root.module.clone(),
            Arc::new(LoadedDescriptor {
                descriptor: root.clone(),
                bytes: Vec::new(),
            }),
        );
        info!(
            "Resolving {} ({}, conflict manager {})",
            root.module,
            self.options.conf,
            self.manager.name()
        );

        let mut selections: BTreeMap<ModuleId, Revision> = BTreeMap::new();
        for round in 1..=self.options.max_rounds.max(1) {
            self.cancel.check()?;
            let mut traversal = self.traverse(root, &selections).await?;
            let settlement = self.settle(&traversal).await?;
            debug!(
                "Round {}: {} module(s), {} conflict(s), {} failure(s)",
                round,
                traversal.visits.len(),
                settlement.evicted.len(),
                traversal.errors.len()
            );

            if !settlement.errors.is_empty() {
                let mut errors = settlement.errors;
                errors.append(&mut traversal.errors);
                IvrError::aggregate(errors)?;
            }
            if settlement.selections != selections {
                // failures may belong to revisions the new selection drops
                selections = settlement.selections;
                continue;
            }
            IvrError::aggregate(std::mem::take(&mut traversal.errors))?;

            let graph = self.build_graph(root, traversal, settlement.evicted)?;
            info!(
                "Resolved {} module(s) for {} in {} round(s)",
                graph.len(),
                root.module,
                round
            );
            if self.options.download {
                self.download(&graph).await?;
            }
            return Ok(graph);
        }

        Err(IvrError::UnresolvableConflict {
            module: root.module.to_string(),
            paths: vec![format!(
                "selection did not settle after {} rounds",
                self.options.max_rounds
            )],
        })
    }

    async fn traverse(
        &mut self,
        root: &Descriptor,
        selections: &BTreeMap<ModuleId, Revision>,
    ) -> Result<Traversal> {
        let mut traversal = Traversal::default();
        let confs = BTreeSet::from([self.options.conf.clone()]);
        traversal.visits.insert(
            root.id().clone(),
            Visit {
                module: root.module.clone(),
                confs: confs.clone(),
                excludes: ExclusionSet::new(),
                callers: BTreeSet::new(),
                depth: 0,
                transitive: true,
            },
        );
        traversal.order.push(root.id().clone());
        let mut frontier = vec![Expansion {
            module: root.module.clone(),
            confs,
            excludes: ExclusionSet::new(),
            path: vec![root.id().clone()],
            depth: 0,
            transitive: true,
        }];

        while !frontier.is_empty() {
            self.cancel.check()?;
            let requests = self.expand(&frontier, &mut traversal)?;

            let dynamic: Vec<ModuleId> = requests
                .iter()
                .filter(|r| r.constraint.is_dynamic())
                .map(|r| r.dependency.clone())
                .collect();
            let listing_failures = self.ensure_known(dynamic).await?;

            let mut next = Vec::new();
            for request in &requests {
                let candidate = match self.candidate_revision(request, &listing_failures) {
                    Ok(revision) => revision,
                    Err(e) => {
                        traversal.errors.push(e.context(format!(
                            "{} requires {};{}",
                            request.caller, request.dependency, request.constraint
                        )));
                        continue;
                    }
                };
                let revision = selections
                    .get(&request.dependency)
                    .cloned()
                    .unwrap_or_else(|| candidate.clone());
                traversal.record(request, candidate);
                if let Some(expansion) = traversal.visit(request, revision) {
                    next.push(expansion);
                }
            }

            let mut pending: Vec<ModuleRevision> = Vec::new();
            for expansion in &next {
                if !self.descriptors.contains_key(&expansion.module)
                    && !pending.contains(&expansion.module)
                {
                    pending.push(expansion.module.clone());
                }
            }
            let failures = self.load_descriptors(pending).await?;
            for (module, error) in &failures {
                let callers = traversal
                    .visits
                    .get(&module.id)
                    .map(|v| {
                        v.callers
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                traversal.errors.push(
                    error
                        .clone()
                        .context(format!("loading {module} (required by {callers})")),
                );
            }
            next.retain(|e| !failures.contains_key(&e.module));
            frontier = next;
        }
        Ok(traversal)
    }

    /// Collects the dependency requests of one breadth-first level, in
    /// frontier order then declaration order.
    fn expand(&self, frontier: &[Expansion], traversal: &mut Traversal) -> Result<Vec<Request>> {
        let mut requests = Vec::new();
        for expansion in frontier {
            if !expansion.transitive {
                continue;
            }
            let Some(loaded) = self.descriptors.get(&expansion.module) else {
                continue;
            };
            let descriptor = &loaded.descriptor;

            let mut active = BTreeSet::new();
            let mut undeclared = false;
            for conf in descriptor.expand_confs(&expansion.confs) {
                match descriptor.active_confs(&conf) {
                    Ok(confs) => active.extend(confs),
                    Err(e) => {
                        undeclared = true;
                        traversal
                            .errors
                            .push(e.context(format!("expanding {}", expansion.module)));
                    }
                }
            }
            if undeclared {
                continue;
            }

            let inherited = merge_exclusions(&expansion.excludes, &descriptor.excludes);
            for dependency in &descriptor.dependencies {
                let confs: BTreeSet<String> = active
                    .iter()
                    .flat_map(|master| dependency.conf.targets(master))
                    .collect();
                if confs.is_empty() {
                    continue;
                }
                if inherited.excludes_module(&dependency.id) {
                    debug!("{} excluded below {}", dependency.id, expansion.module);
                    continue;
                }
                if expansion.path.contains(&dependency.id) {
                    let cycle: Vec<String> = expansion
                        .path
                        .iter()
                        .chain(std::iter::once(&dependency.id))
                        .map(ToString::to_string)
                        .collect();
                    match self.options.circular {
                        CircularStrategy::Error => {
                            return Err(IvrError::CyclicDependency { path: cycle });
                        }
                        CircularStrategy::Warn => {
                            warn!("Circular dependency: {}", cycle.join(" -> "))
                        }
                        CircularStrategy::Ignore => {
                            debug!("Ignoring circular dependency: {}", cycle.join(" -> "))
                        }
                    }
                    continue;
                }

                let mut path = expansion.path.clone();
                path.push(dependency.id.clone());
                requests.push(Request {
                    caller: expansion.module.clone(),
                    dependency: dependency.id.clone(),
                    constraint: dependency.constraint.clone(),
                    confs,
                    forced: dependency.force,
                    excludes: merge_exclusions(&inherited, &dependency.excludes),
                    path,
                    depth: expansion.depth + 1,
                    transitive: dependency.transitive,
                });
            }
        }
        Ok(requests)
    }

    /// The revision a request's constraint points at on its own.
    fn candidate_revision(
        &self,
        request: &Request,
        listing_failures: &BTreeMap<ModuleId, IvrError>,
    ) -> Result<Revision> {
        if let Some(exact) = request.constraint.exact() {
            return Ok(exact.clone());
        }
        if let Some(error) = listing_failures.get(&request.dependency) {
            return Err(error.clone());
        }
        let known = self
            .known
            .get(&request.dependency)
            .map(|k| k.as_slice())
            .unwrap_or_default();
        request.constraint.best_match(known).ok_or_else(|| {
            IvrError::NotFound(format!(
                "no revision of {} matches {} (known: {})",
                request.dependency,
                request.constraint,
                known
                    .iter()
                    .map(Revision::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }

    /// Lists revisions of every id not listed yet. Returns the failures.
    async fn ensure_known(&mut self, ids: Vec<ModuleId>) -> Result<BTreeMap<ModuleId, IvrError>> {
        let missing: Vec<ModuleId> = ids
            .into_iter()
            .filter(|id| !self.known.contains_key(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut failures = BTreeMap::new();
        if missing.is_empty() {
            return Ok(failures);
        }

        let fetcher = Arc::clone(&self.fetcher);
        let cache = self.cache.clone();
        let offline = self.options.offline;
        let results = self
            .pool
            .run(missing, |id| {
                list_known(Arc::clone(&fetcher), cache.clone(), id.clone(), offline)
            })
            .await?;
        for (id, result) in results {
            match result {
                Ok(revisions) => {
                    debug!("{} has {} known revision(s)", id, revisions.len());
                    self.known.insert(id, Arc::new(revisions));
                }
                Err(e) => {
                    failures.insert(id, e);
                }
            }
        }
        Ok(failures)
    }

    /// Loads descriptors concurrently. Returns the failures.
    async fn load_descriptors(
        &mut self,
        modules: Vec<ModuleRevision>,
    ) -> Result<BTreeMap<ModuleRevision, IvrError>> {
        let mut failures = BTreeMap::new();
        if modules.is_empty() {
            return Ok(failures);
        }
        let fetcher = Arc::clone(&self.fetcher);
        let cache = self.cache.clone();
        let offline = self.options.offline;
        let results = self
            .pool
            .run(modules, |module| {
                load_descriptor(Arc::clone(&fetcher), cache.clone(), module.clone(), offline)
            })
            .await?;
        for (module, result) in results {
            match result {
                Ok(loaded) => {
                    self.descriptors.insert(module, Arc::new(loaded));
                }
                Err(e) => {
                    failures.insert(module, e);
                }
            }
        }
        Ok(failures)
    }

    /// Picks one revision per requested module and records the losers.
    async fn settle(&mut self, traversal: &Traversal) -> Result<Settlement> {
        let mut settlement = Settlement::default();
        if self.manager.needs_known_revisions() {
            let failures = self
                .ensure_known(traversal.candidates.keys().cloned().collect())
                .await?;
            settlement.errors.extend(
                failures
                    .into_iter()
                    .map(|(id, e)| e.context(format!("listing revisions of {id}"))),
            );
        }

        for (id, candidates) in &traversal.candidates {
            let known = self.known.get(id).map(|k| k.as_slice()).unwrap_or_default();
            let winner = match choose(self.manager.as_ref(), id, candidates, known) {
                Ok(winner) => winner,
                Err(e) => {
                    settlement.errors.push(e);
                    continue;
                }
            };
            let winner_module = id.revision(winner.clone());
            let mut losers: BTreeMap<&Revision, BTreeSet<ModuleRevision>> = BTreeMap::new();
            for candidate in candidates.iter().filter(|c| c.revision != winner) {
                losers
                    .entry(&candidate.revision)
                    .or_default()
                    .insert(candidate.caller.clone());
            }
            for (revision, requested_by) in losers {
                debug!("{} evicted by {}", id.revision(revision.clone()), winner_module);
                settlement.evicted.push(Eviction {
                    module: id.revision(revision.clone()),
                    evicted_by: winner_module.clone(),
                    requested_by,
                });
            }
            settlement.selections.insert(id.clone(), winner);
        }
        Ok(settlement)
    }

    fn build_graph(
        &self,
        root: &Descriptor,
        traversal: Traversal,
        evicted: Vec<Eviction>,
    ) -> Result<ResolvedGraph> {
        let Traversal {
            mut visits,
            order,
            mut edges,
            ..
        } = traversal;

        // cycles that never sat on a single breadth-first path
        while let Some(cycle) = find_cycle(
            root.id(),
            edges.iter().map(|e| (&e.caller.id, &e.callee)),
        ) {
            let path: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            match self.options.circular {
                CircularStrategy::Error => return Err(IvrError::CyclicDependency { path }),
                CircularStrategy::Warn => warn!("Circular dependency: {}", path.join(" -> ")),
                CircularStrategy::Ignore => {
                    debug!("Ignoring circular dependency: {}", path.join(" -> "))
                }
            }
            let [.., from, to] = cycle.as_slice() else {
                break;
            };
            edges.retain(|e| !(e.caller.id == *from && e.callee == *to));
            if let Some(visit) = visits.get_mut(to) {
                visit.callers.retain(|caller| caller.id != *from);
            }
        }

        let mut nodes = BTreeMap::new();
        for (id, visit) in visits {
            let loaded = self.descriptors.get(&visit.module).ok_or_else(|| {
                IvrError::Generic(format!("descriptor of {} was never loaded", visit.module))
            })?;
            let descriptor = &loaded.descriptor;
            let confs = descriptor.expand_confs(&visit.confs);
            let artifacts = if visit.module == root.module {
                Vec::new()
            } else {
                descriptor
                    .artifacts_for(&confs)
                    .map_err(|e| e.context(format!("selecting artifacts of {}", visit.module)))?
                    .into_iter()
                    .filter(|a| !visit.excludes.excludes_artifact(&id, &a.name))
                    .cloned()
                    .collect()
            };
            nodes.insert(
                id,
                ResolvedNode {
                    module: visit.module,
                    status: descriptor.status,
                    callers: visit.callers,
                    confs,
                    excludes: visit.excludes,
                    depth: visit.depth,
                    artifacts,
                },
            );
        }

        let edges = edges
            .into_iter()
            .filter_map(|e| {
                let callee = nodes.get(&e.callee)?.module.clone();
                Some(Edge {
                    caller: e.caller,
                    callee,
                    constraint: e.constraint,
                    confs: e.confs,
                    forced: e.forced,
                })
            })
            .collect();

        Ok(ResolvedGraph {
            root: root.module.clone(),
            conf: self.options.conf.clone(),
            nodes,
            order,
            edges,
            evicted,
        })
    }
}

async fn list_known(
    fetcher: Arc<dyn Fetcher>,
    cache: CacheStore,
    id: ModuleId,
    offline: bool,
) -> Result<Vec<Revision>> {
    let mut revisions = if offline {
        cache.known_revisions(&id)?
    } else {
        fetcher.list_revisions(&id).await?
    };
    revisions.sort();
    revisions.dedup();
    Ok(revisions)
}

fn cached_descriptor(cache: &CacheStore, module: &ModuleRevision) -> Result<Option<LoadedDescriptor>> {
    let Some(entry) = cache.get(module)? else {
        return Ok(None);
    };
    let (descriptor, bytes) = entry.read_descriptor()?;
    debug!("Using cached descriptor of {}", module);
    Ok(Some(LoadedDescriptor { descriptor, bytes }))
}

/// Cache first, then the repositories. Nothing is written here; entries are
/// only committed once the whole resolution succeeded.
async fn load_descriptor(
    fetcher: Arc<dyn Fetcher>,
    cache: CacheStore,
    module: ModuleRevision,
    offline: bool,
) -> Result<LoadedDescriptor> {
    if let Some(loaded) = cached_descriptor(&cache, &module)? {
        return Ok(loaded);
    }
    if offline {
        return Err(IvrError::NotFound(format!(
            "{module} is not cached and offline mode is on"
        )));
    }

    let target = module.clone();
    let lock_cache = cache.clone();
    cache
        .with_lock(&module, move || async move {
            if let Some(loaded) = cached_descriptor(&lock_cache, &target)? {
                return Ok(loaded);
            }
            let (descriptor, bytes) = fetcher
                .fetch_descriptor(&target.id, &VersionConstraint::Exact(target.revision.clone()))
                .await?;
            if descriptor.module != target {
                return Err(IvrError::malformed(
                    "module",
                    format!("requested {target} but the repository returned {}", descriptor.module),
                ));
            }
            debug!("Fetched descriptor of {} from {}", target, fetcher.name());
            Ok(LoadedDescriptor { descriptor, bytes })
        })
        .await
}
