// ivr-common/src/model/artifact.rs
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::module::ModuleRevision;

/// An artifact published by a module, as declared in its descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_kind")]
    pub ext: String,
    /// Configurations the artifact is published in; empty means all.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub confs: BTreeSet<String>,
}

fn default_kind() -> String {
    "jar".to_string()
}

impl ArtifactSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            ext: ext.into(),
            confs: BTreeSet::new(),
        }
    }

    pub fn in_confs<'a, I>(&self, confs: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        if self.confs.is_empty() || self.confs.contains("*") {
            return true;
        }
        confs.into_iter().any(|c| self.confs.contains(c))
    }

    /// `name.ext`, the file name used inside a cache entry.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.ext)
    }
}

impl fmt::Display for ArtifactSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({})", self.name, self.ext, self.kind)
    }
}

/// An artifact resident in the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub module: ModuleRevision,
    pub spec: ArtifactSpec,
    pub path: PathBuf,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.module, self.spec.file_name())
    }
}
