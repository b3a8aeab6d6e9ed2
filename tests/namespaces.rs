// ABOUTME: Namespace management tests against the in-memory runtime.
// ABOUTME: Covers listing with counts, label updates, guarded removal and inspect.

mod support;

use highk::diagnostics::Diagnostics;
use highk::error::ErrorKind;
use highk::namespace::NamespaceManager;
use highk::runtime::MemoryRuntime;
use highk::store::VolumeStore;
use highk::types::MAX_IDENTIFIER_LEN;
use std::collections::BTreeMap;

fn labels(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

#[tokio::test]
async fn created_namespaces_are_listed_with_counts() {
    support::init_tracing();
    let store = tempfile::tempdir().unwrap();
    let runtime = support::runtime_with_alpine("default");
    let manager = NamespaceManager::new(&runtime, store.path());

    manager
        .create("builds", &labels(&["team=ci", "ephemeral"]))
        .await
        .unwrap();
    VolumeStore::new(store.path(), "default")
        .unwrap()
        .create(Some("data"), BTreeMap::new())
        .unwrap();

    let mut diagnostics = Diagnostics::default();
    let rows = manager.list(&mut diagnostics).await.unwrap();
    assert!(diagnostics.warnings().is_empty());
    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["builds", "default"]);

    let builds = &rows[0];
    assert_eq!(builds.containers, Some(0));
    assert_eq!(builds.images, Some(0));
    assert_eq!(builds.volumes, Some(0));
    assert_eq!(builds.labels["team"], "ci");
    assert_eq!(builds.labels["ephemeral"], "true");

    let default = &rows[1];
    assert_eq!(default.images, Some(1));
    assert_eq!(default.volumes, Some(1));
}

#[tokio::test]
async fn duplicate_create_is_already_exists() {
    let store = tempfile::tempdir().unwrap();
    let runtime = MemoryRuntime::new();
    let manager = NamespaceManager::new(&runtime, store.path());

    manager.create("dup", &[]).await.unwrap();
    let err = manager.create("dup", &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn update_merges_labels_and_needs_the_namespace() {
    let store = tempfile::tempdir().unwrap();
    let runtime = MemoryRuntime::new();
    let manager = NamespaceManager::new(&runtime, store.path());

    manager.create("web", &labels(&["a=1"])).await.unwrap();
    manager.update("web", &labels(&["b=2"])).await.unwrap();
    let (docs, result) = manager.inspect(&["web".to_string()]).await;
    result.unwrap();
    assert_eq!(docs[0].labels["a"], "1");
    assert_eq!(docs[0].labels["b"], "2");

    let err = manager.update("ghost", &labels(&["a=1"])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn namespaces_holding_volumes_are_kept() {
    let store = tempfile::tempdir().unwrap();
    let runtime = MemoryRuntime::new();
    let manager = NamespaceManager::new(&runtime, store.path());
    manager.create("data", &[]).await.unwrap();
    let volumes = VolumeStore::new(store.path(), "data").unwrap();
    volumes.create(Some("pg"), BTreeMap::new()).unwrap();

    let mut diagnostics = Diagnostics::default();
    let (removed, result) = manager
        .remove(&["data".to_string()], false, &mut diagnostics)
        .await;
    assert!(removed.is_empty());
    assert_eq!(result.unwrap_err().kind(), ErrorKind::PreconditionFailed);

    volumes
        .remove(&["pg".to_string()], &Default::default())
        .unwrap();
    let (removed, result) = manager
        .remove(&["data".to_string()], false, &mut diagnostics)
        .await;
    result.unwrap();
    assert_eq!(removed, ["data"]);
}

#[tokio::test]
async fn one_unknown_namespace_does_not_stop_the_batch() {
    let store = tempfile::tempdir().unwrap();
    let runtime = MemoryRuntime::new();
    let manager = NamespaceManager::new(&runtime, store.path());
    manager.create("one", &[]).await.unwrap();
    manager.create("two", &[]).await.unwrap();

    let mut diagnostics = Diagnostics::default();
    let names = labels(&["one", "missing", "two"]);
    let (removed, result) = manager.remove(&names, false, &mut diagnostics).await;
    assert_eq!(removed, ["one", "two"]);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn non_empty_namespaces_are_refused_by_the_runtime() {
    let store = tempfile::tempdir().unwrap();
    let runtime = support::runtime_with_alpine("images");
    let manager = NamespaceManager::new(&runtime, store.path());

    let mut diagnostics = Diagnostics::default();
    let (removed, result) = manager
        .remove(&["images".to_string()], false, &mut diagnostics)
        .await;
    assert!(removed.is_empty());
    assert_eq!(result.unwrap_err().kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn inspect_returns_known_namespaces_and_reports_unknown() {
    let store = tempfile::tempdir().unwrap();
    let runtime = MemoryRuntime::new();
    let manager = NamespaceManager::new(&runtime, store.path());
    manager.create("known", &labels(&["x=y"])).await.unwrap();

    let (docs, result) = manager
        .inspect(&["known".to_string(), "unknown".to_string()])
        .await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].name, "known");
    assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn namespace_names_must_be_identifiers() {
    let store = tempfile::tempdir().unwrap();
    let runtime = MemoryRuntime::new();
    let manager = NamespaceManager::new(&runtime, store.path());

    let longest = "a".repeat(MAX_IDENTIFIER_LEN);
    manager.create(&longest, &[]).await.unwrap();

    let too_long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
    for name in [too_long.as_str(), "UPPER", "Bad/NS", "-leading", ""] {
        let err = manager.create(name, &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{name:?}");
    }

    let mut diagnostics = Diagnostics::default();
    let names: Vec<String> = manager
        .list(&mut diagnostics)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.name)
        .collect();
    assert_eq!(names, [longest]);
}
