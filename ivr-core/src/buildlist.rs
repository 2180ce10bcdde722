// ivr-core/src/buildlist.rs
// Build order for a set of local modules: every module comes after the
// modules of the set it depends on.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use ivr_common::config::CircularStrategy;
use ivr_common::error::{IvrError, Result};
use ivr_common::model::{Descriptor, ModuleId};
use tracing::{debug, warn};

use crate::resolve::find_cycle;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildListOptions {
    /// Keep only this module and what it depends on.
    pub root: Option<ModuleId>,
    /// With `root`, keep only its direct dependencies.
    pub only_direct: bool,
    /// Keep only this module and what depends on it.
    pub leaf: Option<ModuleId>,
    /// Dependents first.
    pub reverse: bool,
    pub circular: CircularStrategy,
}

/// Descriptor files named `file_name` under each path, or the path itself
/// when it is a file.
pub fn find_descriptors(paths: &[PathBuf], file_name: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for path in paths {
        if path.is_dir() {
            found.extend(
                ivr_aio::list_files_recursive(path)
                    .into_iter()
                    .filter(|f| f.file_name().is_some_and(|n| n == file_name)),
            );
        } else {
            found.push(path.clone());
        }
    }
    found
}

pub fn load_descriptors(files: &[PathBuf]) -> Result<Vec<Descriptor>> {
    files.iter().map(|f| load_descriptor(f)).collect()
}

fn load_descriptor(path: &Path) -> Result<Descriptor> {
    let bytes = ivr_aio::read_to_bytes(path)?;
    Descriptor::parse(&bytes).map_err(|e| e.context(format!("reading {}", path.display())))
}

/// Orders `descriptors` so that each module follows the modules of the set
/// it depends on. A dependency only counts when its constraint accepts the
/// revision of the descriptor in the set. Ties keep the input order.
pub fn build_list(descriptors: Vec<Descriptor>, options: &BuildListOptions) -> Result<Vec<Descriptor>> {
    let mut index: BTreeMap<ModuleId, usize> = BTreeMap::new();
    for (i, descriptor) in descriptors.iter().enumerate() {
        if index.insert(descriptor.id().clone(), i).is_some() {
            return Err(IvrError::Config(format!(
                "{} is described more than once",
                descriptor.id()
            )));
        }
    }

    let mut edges: BTreeSet<(ModuleId, ModuleId)> = BTreeSet::new();
    for descriptor in &descriptors {
        for dependency in &descriptor.dependencies {
            let Some(&target) = index.get(&dependency.id) else {
                continue;
            };
            if dependency.id == *descriptor.id() {
                continue;
            }
            let provided = &descriptors[target].module.revision;
            if dependency.constraint.matches(provided) {
                edges.insert((descriptor.id().clone(), dependency.id.clone()));
            } else {
                warn!(
                    "{} wants {};{} but the build list has {}, not ordering them",
                    descriptor.module, dependency.id, dependency.constraint, provided
                );
            }
        }
    }
    break_cycles(&descriptors, &mut edges, options.circular)?;

    let mut keep: BTreeSet<ModuleId> = index.keys().cloned().collect();
    if let Some(root) = &options.root {
        known(&index, root)?;
        keep = if options.only_direct {
            edges
                .iter()
                .filter(|(from, _)| from == root)
                .map(|(_, to)| to.clone())
                .chain([root.clone()])
                .collect()
        } else {
            reachable(root, edges.iter().map(|(from, to)| (from, to)))
        };
    }
    if let Some(leaf) = &options.leaf {
        known(&index, leaf)?;
        let dependents = reachable(leaf, edges.iter().map(|(from, to)| (to, from)));
        keep.retain(|id| dependents.contains(id));
    }

    // repeatedly take the first module, in input order, whose dependencies
    // are all placed
    let mut placed: BTreeSet<&ModuleId> = BTreeSet::new();
    let mut order: Vec<usize> = Vec::with_capacity(keep.len());
    while order.len() < keep.len() {
        let next = descriptors.iter().position(|d| {
            let id = d.id();
            keep.contains(id)
                && !placed.contains(id)
                && edges
                    .iter()
                    .filter(|(from, to)| from == id && keep.contains(to))
                    .all(|(_, to)| placed.contains(to))
        });
        let Some(next) = next else {
            return Err(IvrError::Generic(
                "build list did not converge after breaking cycles".to_string(),
            ));
        };
        placed.insert(descriptors[next].id());
        order.push(next);
    }
    if options.reverse {
        order.reverse();
    }
    debug!("Build list of {} module(s)", order.len());

    let mut slots: Vec<Option<Descriptor>> = descriptors.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

fn known(index: &BTreeMap<ModuleId, usize>, id: &ModuleId) -> Result<()> {
    if index.contains_key(id) {
        Ok(())
    } else {
        Err(IvrError::Config(format!("{id} is not among the build list descriptors")))
    }
}

fn reachable<'a, I>(start: &ModuleId, edges: I) -> BTreeSet<ModuleId>
where
    I: IntoIterator<Item = (&'a ModuleId, &'a ModuleId)>,
{
    let mut adjacency: BTreeMap<&ModuleId, Vec<&ModuleId>> = BTreeMap::new();
    for (from, to) in edges {
        adjacency.entry(from).or_default().push(to);
    }
    let mut seen = BTreeSet::from([start.clone()]);
    let mut stack = vec![start.clone()];
    while let Some(id) = stack.pop() {
        for next in adjacency.get(&id).into_iter().flatten() {
            if seen.insert((*next).clone()) {
                stack.push((*next).clone());
            }
        }
    }
    seen
}

/// Drops the closing edge of every cycle, or fails under `Error`.
fn break_cycles(
    descriptors: &[Descriptor],
    edges: &mut BTreeSet<(ModuleId, ModuleId)>,
    circular: CircularStrategy,
) -> Result<()> {
    for descriptor in descriptors {
        while let Some(cycle) = find_cycle(descriptor.id(), edges.iter().map(|(f, t)| (f, t))) {
            let path: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            match circular {
                CircularStrategy::Error => return Err(IvrError::CyclicDependency { path }),
                CircularStrategy::Warn => warn!("Circular dependency: {}", path.join(" -> ")),
                CircularStrategy::Ignore => {
                    debug!("Ignoring circular dependency: {}", path.join(" -> "))
                }
            }
            let [.., from, to] = cycle.as_slice() else {
                break;
            };
            edges.remove(&(from.clone(), to.clone()));
        }
    }
    Ok(())
}
