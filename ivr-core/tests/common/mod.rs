// Shared fixtures for ivr-core integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use ivr_common::config::Config;
use ivr_common::model::{Descriptor, ModuleRevision};
use ivr_core::{CacheStore, Session};
use ivr_net::{Fetcher, MemoryFetcher};
use tempfile::TempDir;

/// Descriptor text for `org#name;rev` depending on `deps` given as
/// `(name, constraint)` pairs in the same organisation.
pub fn module(name: &str, rev: &str, deps: &[(&str, &str)]) -> String {
    let mut toml = format!(
        "[module]\norganisation = \"org\"\nname = \"{name}\"\nrevision = \"{rev}\"\n"
    );
    for (dep, constraint) in deps {
        toml.push_str(&format!(
            "\n[[dependencies]]\norg = \"org\"\nname = \"{dep}\"\nrev = \"{constraint}\"\n"
        ));
    }
    toml
}

pub fn parse(toml: &str) -> Descriptor {
    Descriptor::parse(toml.as_bytes()).unwrap()
}

pub fn rev(s: &str) -> ModuleRevision {
    ModuleRevision::parse(s).unwrap()
}

/// lib 1.0 and 1.5 (1.5 needs util 1.2), util 1.0 and 1.2.
pub fn sample_repository() -> Arc<MemoryFetcher> {
    let repo = Arc::new(MemoryFetcher::new());
    repo.add(&module("lib", "1.0", &[("util", "1.0")])).unwrap();
    repo.add(&module("lib", "1.5", &[("util", "1.2")])).unwrap();
    repo.add(&module("util", "1.0", &[])).unwrap();
    repo.add(&module("util", "1.2", &[])).unwrap();
    repo
}

/// app 1.0 needing lib [1.0,2.0) and util 1.0.
pub fn sample_root() -> Descriptor {
    parse(&module("app", "1.0", &[("lib", "[1.0,2.0)"), ("util", "1.0")]))
}

pub struct Fixture {
    pub dir: TempDir,
    pub cache: CacheStore,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path().join("cache")).unwrap();
        Self { dir, cache }
    }

    pub fn config(&self) -> Config {
        Config {
            cache_dir: self.cache.root().to_path_buf(),
            repositories: Vec::new(),
            workers: 4,
            ..Config::default()
        }
    }

    pub fn session(&self, fetcher: Arc<dyn Fetcher>) -> Session {
        Session::new(self.config(), fetcher, self.cache.clone())
    }
}
