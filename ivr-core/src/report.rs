// ivr-core/src/report.rs
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ivr_common::error::Result;
use ivr_common::model::Status;
use serde::Serialize;
use tracing::debug;

use crate::resolve::ResolvedGraph;
use crate::store::CacheStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactReport {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub ext: String,
    /// Location in the cache, when the artifact is cached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleReport {
    pub organisation: String,
    pub name: String,
    pub revision: String,
    pub status: Status,
    pub depth: usize,
    pub confs: Vec<String>,
    pub callers: Vec<String>,
    pub artifacts: Vec<ArtifactReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub module: String,
    pub evicted_by: String,
    pub requested_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyReport {
    pub caller: String,
    pub callee: String,
    pub constraint: String,
    pub confs: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub forced: bool,
}

/// JSON summary of a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub root: String,
    pub conf: String,
    pub generated: String,
    pub modules: Vec<ModuleReport>,
    pub evicted: Vec<EvictionReport>,
    pub dependencies: Vec<DependencyReport>,
}

impl ResolutionReport {
    /// Summarises `graph`; with a cache, artifacts carry their cached
    /// location and checksum.
    pub fn build(graph: &ResolvedGraph, cache: Option<&CacheStore>) -> Result<Self> {
        let mut modules = Vec::with_capacity(graph.len());
        for node in graph.ordered_nodes() {
            let entry = match cache {
                Some(cache) if !node.artifacts.is_empty() => cache.get(&node.module)?,
                _ => None,
            };
            let artifacts = node
                .artifacts
                .iter()
                .map(|spec| {
                    let cached = entry.as_ref().and_then(|e| e.artifact(spec));
                    ArtifactReport {
                        name: spec.name.clone(),
                        kind: spec.kind.clone(),
                        ext: spec.ext.clone(),
                        path: entry.as_ref().and_then(|e| e.artifact_path(spec)),
                        sha256: cached.map(|c| c.sha256.clone()),
                        size: cached.map(|c| c.size),
                    }
                })
                .collect();
            modules.push(ModuleReport {
                organisation: node.module.id.organisation.clone(),
                name: node.module.id.name.clone(),
                revision: node.module.revision.to_string(),
                status: node.status,
                depth: node.depth,
                confs: node.confs.iter().cloned().collect(),
                callers: node.callers.iter().map(ToString::to_string).collect(),
                artifacts,
            });
        }

        Ok(Self {
            root: graph.root.to_string(),
            conf: graph.conf.clone(),
            generated: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
            modules,
            evicted: graph
                .evicted
                .iter()
                .map(|e| EvictionReport {
                    module: e.module.to_string(),
                    evicted_by: e.evicted_by.to_string(),
                    requested_by: e.requested_by.iter().map(ToString::to_string).collect(),
                })
                .collect(),
            dependencies: graph
                .edges
                .iter()
                .map(|e| DependencyReport {
                    caller: e.caller.to_string(),
                    callee: e.callee.to_string(),
                    constraint: e.constraint.to_string(),
                    confs: e.confs.iter().cloned().collect(),
                    forced: e.forced,
                })
                .collect(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        ivr_aio::atomic_write_file(path, json.as_bytes())?;
        debug!("Wrote resolution report to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use ivr_common::model::{ArtifactSpec, ModuleRevision};
    use ivr_common::VersionConstraint;

    use super::*;
    use crate::resolve::{Edge, Eviction, ResolvedNode};

    fn sample() -> ResolvedGraph {
        let app = ModuleRevision::new("org", "app", "1.0");
        let util = ModuleRevision::new("org", "util", "1.2");
        let mut nodes = BTreeMap::new();
        nodes.insert(
            app.id.clone(),
            ResolvedNode {
                module: app.clone(),
                status: Status::Integration,
                callers: BTreeSet::new(),
                confs: BTreeSet::from(["default".to_string()]),
                excludes: Default::default(),
                depth: 0,
                artifacts: Vec::new(),
            },
        );
        nodes.insert(
            util.id.clone(),
            ResolvedNode {
                module: util.clone(),
                status: Status::Release,
                callers: BTreeSet::from([app.clone()]),
                confs: BTreeSet::from(["default".to_string()]),
                excludes: Default::default(),
                depth: 1,
                artifacts: vec![ArtifactSpec::new("util", "jar", "jar")],
            },
        );
        ResolvedGraph {
            root: app.clone(),
            conf: "default".to_string(),
            order: vec![app.id.clone(), util.id.clone()],
            nodes,
            edges: vec![Edge {
                caller: app.clone(),
                callee: util.clone(),
                constraint: VersionConstraint::parse("1.0").unwrap(),
                confs: BTreeSet::from(["default".to_string()]),
                forced: false,
            }],
            evicted: vec![Eviction {
                module: ModuleRevision::new("org", "util", "1.0"),
                evicted_by: util,
                requested_by: BTreeSet::from([app]),
            }],
        }
    }

    #[test]
    fn report_includes_cache_locations() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path().join("cache")).unwrap();
        let graph = sample();
        let util = ModuleRevision::new("org", "util", "1.2");
        cache
            .put(&util, b"descriptor", &[(ArtifactSpec::new("util", "jar", "jar"), b"bytes".to_vec())])
            .unwrap();

        let report = ResolutionReport::build(&graph, Some(&cache)).unwrap();
        assert_eq!(report.modules.len(), 2);
        assert_eq!(report.modules[0].name, "app");
        let artifact = &report.modules[1].artifacts[0];
        assert_eq!(artifact.size, Some(5));
        assert!(artifact.path.as_ref().unwrap().starts_with(cache.root()));
        assert_eq!(report.evicted[0].module, "org#util;1.0");

        let path = dir.path().join("report.json");
        report.write_to(&path).unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["root"], "org#app;1.0");
        assert_eq!(json["modules"][1]["status"], "release");
        assert_eq!(json["modules"][1]["artifacts"][0]["type"], "jar");
        assert_eq!(json["dependencies"][0]["constraint"], "1.0");
    }

    #[test]
    fn report_without_cache_omits_locations() {
        let report = ResolutionReport::build(&sample(), None).unwrap();
        let json = report.to_json().unwrap();
        assert!(!json.contains("\"path\""));
        assert!(json.contains("\"evicted_by\": \"org#util;1.2\""));
    }
}
