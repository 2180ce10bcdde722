mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{module, parse, rev, sample_repository, sample_root, Fixture};
use ivr_common::config::{CircularStrategy, ConflictManagerKind};
use ivr_common::error::IvrError;
use ivr_common::model::{ModuleId, Revision};
use ivr_core::{retrieve, RetrieveOptions};
use ivr_net::{Fetcher, MemoryFetcher, RetryPolicy, RetryingFetcher};

fn id(name: &str) -> ModuleId {
    ModuleId::new("org", name)
}

#[tokio::test]
async fn latest_revision_wins_across_paths() {
    let fixture = Fixture::new();
    let repo = sample_repository();
    let session = fixture.session(repo.clone());
    let options = session.resolve_options("default");

    let graph = session.resolve(&sample_root(), &options).await.unwrap();

    assert_eq!(graph.len(), 3);
    assert_eq!(graph.revision_of(&id("lib")), Some(&rev("org#lib;1.5")));
    assert_eq!(graph.revision_of(&id("util")), Some(&rev("org#util;1.2")));
    assert_eq!(graph.order, vec![id("app"), id("lib"), id("util")]);

    assert_eq!(graph.evicted.len(), 1);
    let eviction = &graph.evicted[0];
    assert_eq!(eviction.module, rev("org#util;1.0"));
    assert_eq!(eviction.evicted_by, rev("org#util;1.2"));
    assert!(eviction.requested_by.contains(&rev("org#app;1.0")));

    let util = graph.node(&id("util")).unwrap();
    assert!(util.callers.contains(&rev("org#app;1.0")));
    assert!(util.callers.contains(&rev("org#lib;1.5")));
    assert_eq!(util.depth, 1);
    assert_eq!(util.artifacts[0].name, "util");

    // winners are cached, losers are not
    assert!(fixture.cache.get(&rev("org#util;1.2")).unwrap().is_some());
    assert!(fixture.cache.get(&rev("org#lib;1.5")).unwrap().is_some());
    assert!(fixture.cache.get(&rev("org#util;1.0")).unwrap().is_none());
    assert!(fixture.cache.get(&rev("org#app;1.0")).unwrap().is_none());
}

#[tokio::test]
async fn warm_cache_gives_same_graph_with_fewer_fetches() {
    let fixture = Fixture::new();
    let repo = sample_repository();
    let session = fixture.session(repo.clone());
    let options = session.resolve_options("default");

    let cold = session.resolve(&sample_root(), &options).await.unwrap();
    let cold_descriptors = repo.descriptor_fetches();
    let cold_artifacts = repo.artifact_fetches();
    assert_eq!(cold_artifacts, 2);

    let warm = session.resolve(&sample_root(), &options).await.unwrap();
    assert_eq!(cold, warm);
    assert!(repo.descriptor_fetches() - cold_descriptors < cold_descriptors);
    assert_eq!(repo.artifact_fetches(), cold_artifacts);
}

#[tokio::test]
async fn result_is_independent_of_fetch_timing() {
    let reference = {
        let fixture = Fixture::new();
        let session = fixture.session(sample_repository());
        session
            .resolve(&sample_root(), &session.resolve_options("default"))
            .await
            .unwrap()
    };

    let fixture = Fixture::new();
    let repo = sample_repository();
    repo.set_delay(&id("lib"), Duration::from_millis(40));
    repo.set_delay(&id("util"), Duration::from_millis(5));
    let session = fixture.session(repo);
    let mut options = session.resolve_options("default");
    options.workers = 1;
    let slow = session.resolve(&sample_root(), &options).await.unwrap();
    assert_eq!(reference, slow);
}

#[tokio::test]
async fn forced_pin_overrides_latest() {
    let fixture = Fixture::new();
    let session = fixture.session(sample_repository());
    let root = parse(
        r#"
[module]
organisation = "org"
name = "app"
revision = "1.0"

[[dependencies]]
org = "org"
name = "lib"
rev = "1.5"

[[dependencies]]
org = "org"
name = "util"
rev = "1.0"
force = true
"#,
    );
    let graph = session
        .resolve(&root, &session.resolve_options("default"))
        .await
        .unwrap();
    assert_eq!(graph.revision_of(&id("util")), Some(&rev("org#util;1.0")));
    assert_eq!(graph.evicted[0].module, rev("org#util;1.2"));
}

#[tokio::test]
async fn disagreeing_pins_fail_with_conflict() {
    let fixture = Fixture::new();
    let repo = sample_repository();
    repo.add(
        r#"
[module]
organisation = "org"
name = "pinner"
revision = "1.0"

[[dependencies]]
org = "org"
name = "util"
rev = "1.2"
force = true
"#,
    )
    .unwrap();
    let session = fixture.session(repo);
    let root = parse(
        r#"
[module]
organisation = "org"
name = "app"
revision = "1.0"

[[dependencies]]
org = "org"
name = "pinner"
rev = "1.0"

[[dependencies]]
org = "org"
name = "util"
rev = "1.0"
force = true
"#,
    );
    let err = session
        .resolve(&root, &session.resolve_options("default"))
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), IvrError::UnresolvableConflict { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(fixture.cache.entries().unwrap().is_empty());
}

#[tokio::test]
async fn strict_manager_rejects_any_disagreement() {
    let fixture = Fixture::new();
    let session = fixture.session(sample_repository());
    let mut options = session.resolve_options("default");
    options.conflict_manager = ConflictManagerKind::Strict;
    let err = session.resolve(&sample_root(), &options).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn latest_compatible_honours_every_range() {
    let fixture = Fixture::new();
    let repo = sample_repository();
    repo.add(&module("util", "2.0", &[])).unwrap();
    repo.add(&module("other", "1.0", &[("util", "[1.0,1.5)")])).unwrap();
    let session = fixture.session(repo);
    let root = parse(&module("app", "1.0", &[("util", "latest.integration"), ("other", "1.0")]));

    let latest = session
        .resolve(&root, &session.resolve_options("default"))
        .await
        .unwrap();
    assert_eq!(latest.revision_of(&id("util")), Some(&rev("org#util;2.0")));

    let mut options = session.resolve_options("default");
    options.conflict_manager = ConflictManagerKind::LatestCompatible;
    let compatible = session.resolve(&root, &options).await.unwrap();
    assert_eq!(compatible.revision_of(&id("util")), Some(&rev("org#util;1.2")));
}

#[tokio::test]
async fn direct_cycle_is_reported() {
    let fixture = Fixture::new();
    let repo = Arc::new(MemoryFetcher::new());
    repo.add(&module("b", "1.0", &[("a", "1.0")])).unwrap();
    let session = fixture.session(repo);
    let root = parse(&module("a", "1.0", &[("b", "1.0")]));

    let err = session
        .resolve(&root, &session.resolve_options("default"))
        .await
        .unwrap_err();
    match err.root_cause() {
        IvrError::CyclicDependency { path } => {
            assert_eq!(path, &vec!["org#a", "org#b", "org#a"]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn cycle_between_siblings_is_found() {
    let fixture = Fixture::new();
    let repo = Arc::new(MemoryFetcher::new());
    repo.add(&module("b", "1.0", &[("c", "1.0")])).unwrap();
    repo.add(&module("c", "1.0", &[("b", "1.0")])).unwrap();
    let session = fixture.session(repo);
    let root = parse(&module("r", "1.0", &[("b", "1.0"), ("c", "1.0")]));

    let err = session
        .resolve(&root, &session.resolve_options("default"))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 3);

    let mut options = session.resolve_options("default");
    options.circular = CircularStrategy::Warn;
    let graph = session.resolve(&root, &options).await.unwrap();
    assert_eq!(graph.len(), 3);
    assert!(graph.edges.iter().all(|e| e.caller.id != e.callee.id));
    assert_eq!(graph.edges.len(), 3);
}

#[tokio::test]
async fn warn_drops_back_edge_to_root() {
    let fixture = Fixture::new();
    let repo = Arc::new(MemoryFetcher::new());
    repo.add(&module("b", "1.0", &[("a", "1.0")])).unwrap();
    let session = fixture.session(repo);
    let root = parse(&module("a", "1.0", &[("b", "1.0")]));
    let mut options = session.resolve_options("default");
    options.circular = CircularStrategy::Ignore;

    let graph = session.resolve(&root, &options).await.unwrap();
    assert_eq!(graph.len(), 2);
    assert_eq!(graph.edges.len(), 1);
    assert!(graph.node(&id("a")).unwrap().callers.is_empty());
}

#[tokio::test]
async fn exclusions_prune_subtrees_unless_another_path_needs_them() {
    let fixture = Fixture::new();
    let repo = sample_repository();
    repo.add(&module("other", "1.0", &[("lib", "1.5")])).unwrap();
    let session = fixture.session(repo);
    let excluding = r#"
[module]
organisation = "org"
name = "app"
revision = "1.0"

[[dependencies]]
org = "org"
name = "lib"
rev = "1.5"

[[dependencies.exclude]]
module = "util"
"#;

    let graph = session
        .resolve(&parse(excluding), &session.resolve_options("default"))
        .await
        .unwrap();
    assert!(graph.node(&id("util")).is_none());
    assert_eq!(graph.len(), 2);

    let with_second_path = format!(
        "{excluding}\n[[dependencies]]\norg = \"org\"\nname = \"other\"\nrev = \"1.0\"\n"
    );
    let graph = session
        .resolve(&parse(&with_second_path), &session.resolve_options("default"))
        .await
        .unwrap();
    assert_eq!(graph.revision_of(&id("util")), Some(&rev("org#util;1.2")));
    assert!(graph.node(&id("lib")).unwrap().excludes.is_empty());
}

#[tokio::test]
async fn non_transitive_dependency_is_not_expanded() {
    let fixture = Fixture::new();
    let session = fixture.session(sample_repository());
    let root = parse(
        r#"
[module]
organisation = "org"
name = "app"
revision = "1.0"

[[dependencies]]
org = "org"
name = "lib"
rev = "1.5"
transitive = false
"#,
    );
    let graph = session
        .resolve(&root, &session.resolve_options("default"))
        .await
        .unwrap();
    assert_eq!(graph.len(), 2);
    assert!(graph.node(&id("lib")).is_some());
}

#[tokio::test]
async fn configurations_select_dependencies_and_artifacts() {
    let fixture = Fixture::new();
    let repo = sample_repository();
    repo.add(
        r#"
[module]
organisation = "org"
name = "tool"
revision = "3.0"

[[configurations]]
name = "default"

[[configurations]]
name = "sources"

[[artifacts]]
name = "tool"

[[artifacts]]
name = "tool-src"
type = "source"
ext = "zip"
confs = ["sources"]
"#,
    )
    .unwrap();
    let session = fixture.session(repo);
    let root = parse(
        r#"
[module]
organisation = "org"
name = "app"
revision = "1.0"

[[configurations]]
name = "default"

[[configurations]]
name = "test"
extends = ["default"]

[[dependencies]]
org = "org"
name = "util"
rev = "1.0"
conf = "default->default"

[[dependencies]]
org = "org"
name = "tool"
rev = "3.0"
conf = "test->*"
"#,
    );

    let default = session
        .resolve(&root, &session.resolve_options("default"))
        .await
        .unwrap();
    assert_eq!(default.len(), 2);

    let test = session
        .resolve(&root, &session.resolve_options("test"))
        .await
        .unwrap();
    let tool = test.node(&id("tool")).unwrap();
    assert_eq!(tool.artifacts.len(), 2);
    assert!(tool.confs.contains("sources"));
    assert!(test.node(&id("util")).is_some());

    let err = session
        .resolve(&root, &session.resolve_options("docs"))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn independent_failures_are_aggregated() {
    let fixture = Fixture::new();
    let repo = sample_repository();
    repo.fail_times(&id("lib"), 100, IvrError::Network("connection reset".into()));
    let session = fixture.session(repo);
    let root = parse(&module("app", "1.0", &[("lib", "1.5"), ("missing", "1.0")]));

    let err = session
        .resolve(&root, &session.resolve_options("default"))
        .await
        .unwrap_err();
    match &err {
        IvrError::Aggregate(errors) => assert_eq!(errors.len(), 2),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(err.exit_code(), 4);
    assert!(fixture.cache.entries().unwrap().is_empty());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let fixture = Fixture::new();
    let repo = sample_repository();
    repo.fail_times(&id("lib"), 2, IvrError::Network("timed out".into()));
    let policy = RetryPolicy {
        attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
        retry_not_found: false,
    };
    let fetcher: Arc<dyn Fetcher> = Arc::new(RetryingFetcher::new(repo.clone(), policy));
    let session = fixture.session(fetcher);

    let graph = session
        .resolve(&sample_root(), &session.resolve_options("default"))
        .await
        .unwrap();
    assert_eq!(graph.revision_of(&id("lib")), Some(&rev("org#lib;1.5")));
}

#[tokio::test]
async fn cancellation_leaves_cache_untouched() {
    let fixture = Fixture::new();
    let repo = sample_repository();
    repo.set_delay(&id("lib"), Duration::from_secs(30));
    let session = fixture.session(repo);
    let options = session.resolve_options("default");

    let signal = session.cancel_signal().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        signal.cancel();
    });
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        session.resolve(&sample_root(), &options),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(IvrError::Cancelled)));
    assert!(fixture.cache.entries().unwrap().is_empty());
}

#[tokio::test]
async fn failed_download_commits_nothing() {
    let fixture = Fixture::new();
    let repo = sample_repository();
    repo.break_artifacts(&rev("org#util;1.2"), IvrError::Network("refused".into()));
    let session = fixture.session(repo);

    let err = session
        .resolve(&sample_root(), &session.resolve_options("default"))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 4);
    assert!(fixture.cache.entries().unwrap().is_empty());
}

#[tokio::test]
async fn failed_commit_discards_entries_created_before_it() {
    let fixture = Fixture::new();
    let repo = Arc::new(MemoryFetcher::new());
    repo.add_simple("org", "lib", "1.0").unwrap();
    repo.add_simple("org", "util", "1.0").unwrap();
    // both artifacts land on dup.jar, which the cache refuses at commit time
    repo.add(
        "[module]\norganisation = \"org\"\nname = \"dup\"\nrevision = \"1.0\"\n\
         [[artifacts]]\nname = \"dup\"\ntype = \"jar\"\next = \"jar\"\n\
         [[artifacts]]\nname = \"dup\"\ntype = \"bundle\"\next = \"jar\"\n",
    )
    .unwrap();
    let session = fixture.session(repo);
    let root = parse(&module("app", "1.0", &[("lib", "1.0"), ("util", "1.0"), ("dup", "1.0")]));

    let err = session
        .resolve(&root, &session.resolve_options("default"))
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), IvrError::Cache(_)));
    assert!(fixture.cache.entries().unwrap().is_empty());
    assert!(fixture.cache.get(&rev("org#lib;1.0")).unwrap().is_none());
}

#[tokio::test]
async fn offline_resolution_uses_only_the_cache() {
    let fixture = Fixture::new();
    let online = fixture.session(sample_repository());
    let expected = online
        .resolve(&sample_root(), &online.resolve_options("default"))
        .await
        .unwrap();

    let mut config = fixture.config();
    config.offline = true;
    let empty = Arc::new(MemoryFetcher::new());
    let offline = ivr_core::Session::new(config, empty.clone(), fixture.cache.clone());
    let graph = offline
        .resolve(&sample_root(), &offline.resolve_options("default"))
        .await
        .unwrap();
    assert_eq!(graph.nodes, expected.nodes);
    assert_eq!(empty.descriptor_fetches(), 0);

    let unknown = parse(&module("app", "1.0", &[("nowhere", "1.0")]));
    let err = offline
        .resolve(&unknown, &offline.resolve_options("default"))
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), IvrError::NotFound(_)));
}

#[tokio::test]
async fn find_revision_picks_best_match() {
    let fixture = Fixture::new();
    let session = fixture.session(sample_repository());
    let constraint = ivr_common::VersionConstraint::parse("1.+").unwrap();
    assert_eq!(
        session.find_revision(&id("util"), &constraint).await.unwrap(),
        Some(Revision::new("1.2"))
    );
    let none = ivr_common::VersionConstraint::parse("[3.0,)").unwrap();
    assert_eq!(session.find_revision(&id("util"), &none).await.unwrap(), None);
}

#[tokio::test]
async fn build_number_follows_published_revisions() {
    let fixture = Fixture::new();
    let repo = sample_repository();
    repo.add_simple("org", "util", "1.2.7").unwrap();
    let session = fixture.session(repo);
    let options = ivr_core::BuildNumberOptions {
        prefix: "1.2".to_string(),
        ..Default::default()
    };
    let next = session.build_number(&id("util"), &options).await.unwrap();
    assert_eq!(next.revision, Some(Revision::new("1.2.7")));
    assert_eq!(next.new_revision, Revision::new("1.2.8"));

    let fresh = session.build_number(&id("unknown"), &options).await.unwrap();
    assert_eq!(fresh.new_revision, Revision::new("1.2.0"));
}

#[tokio::test]
async fn list_modules_filters_published_revisions() {
    let fixture = Fixture::new();
    let session = fixture.session(sample_repository());
    let filter = ivr_core::ModuleFilter {
        organisation: Some("org".to_string()),
        module: Some("*".to_string()),
        revision: Some(ivr_common::VersionConstraint::parse("1.+").unwrap()),
    };
    let found = session.list_modules(&filter).await.unwrap();
    assert_eq!(
        found,
        vec![
            rev("org#lib;1.0"),
            rev("org#lib;1.5"),
            rev("org#util;1.0"),
            rev("org#util;1.2"),
        ]
    );
    let only_util = ivr_core::ModuleFilter {
        module: Some("util".to_string()),
        revision: Some(ivr_common::VersionConstraint::parse("1.0").unwrap()),
        ..Default::default()
    };
    assert_eq!(
        session.list_modules(&only_util).await.unwrap(),
        vec![rev("org#util;1.0")]
    );
}

#[tokio::test]
async fn offline_list_modules_reads_the_cache() {
    let fixture = Fixture::new();
    let online = fixture.session(sample_repository());
    online
        .resolve(&sample_root(), &online.resolve_options("default"))
        .await
        .unwrap();

    let mut config = fixture.config();
    config.offline = true;
    let offline =
        ivr_core::Session::new(config, Arc::new(MemoryFetcher::new()), fixture.cache.clone());
    let found = offline
        .list_modules(&ivr_core::ModuleFilter::default())
        .await
        .unwrap();
    assert_eq!(found, vec![rev("org#lib;1.5"), rev("org#util;1.2")]);
}

#[tokio::test]
async fn resolved_artifacts_can_be_retrieved() {
    let fixture = Fixture::new();
    let session = fixture.session(sample_repository());
    let graph = session
        .resolve(&sample_root(), &session.resolve_options("default"))
        .await
        .unwrap();

    let target = fixture.dir.path().join("project");
    let options = RetrieveOptions::new("lib/[artifact]-[revision].[ext]", &target);
    let report = retrieve(&graph, &fixture.cache, &options).unwrap();
    assert_eq!(report.written.len(), 2);
    let util = std::fs::read_to_string(target.join("lib/util-1.2.jar")).unwrap();
    assert_eq!(util, "org#util;1.2!util.jar");

    let paths = ivr_core::cachepath(&graph, &fixture.cache).unwrap();
    assert_eq!(paths.len(), 2);
    assert!(paths.iter().all(|p| p.starts_with(fixture.cache.root())));
}
