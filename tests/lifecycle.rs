// ABOUTME: Lifecycle tests for create, start, stop, pause, rename and remove.
// ABOUTME: Run against the in-memory runtime with a temporary data store.

mod support;

use highk::container::{AttachOutcome, ContainerManager, CreateOptions, StartOptions};
use highk::error::ErrorKind;
use highk::network::NetworkingOptions;
use highk::runtime::{
    ContainerOps, MemoryRuntime, PullPolicy, TaskBehavior, TaskOps,
    TaskStatus,
};
use highk::store::container_state_dir;
use highk::types::ContainerId;
use std::path::Path;
use std::time::Duration;

const NS: &str = "default";

fn runtime() -> MemoryRuntime {
    support::runtime_with_alpine(NS)
}

fn options(name: &str) -> CreateOptions {
    CreateOptions {
        image: support::IMAGE.to_string(),
        name: Some(name.to_string()),
        networking: NetworkingOptions {
            networks: vec!["none".to_string()],
            ..Default::default()
        },
        pull: PullPolicy::Never,
        ..Default::default()
    }
}

fn manager<'a>(runtime: &'a MemoryRuntime, store: &Path) -> ContainerManager<'a, MemoryRuntime> {
    ContainerManager::new(runtime, NS, store).with_stop_timeout(Duration::from_millis(200))
}

async fn status(runtime: &MemoryRuntime, id: &ContainerId) -> Option<TaskStatus> {
    runtime.task_state(NS, id).await.ok().map(|s| s.status)
}

#[tokio::test]
async fn full_lifecycle_keeps_bookkeeping_in_step() {
    support::init_tracing();
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    let id = manager.create(&options("web")).await.unwrap();
    let state_dir = container_state_dir(store.path(), NS, id.as_str());
    assert!(state_dir.is_dir());
    assert!(store.path().join("names").join(NS).join("web").is_file());
    assert!(runtime.has_snapshot(NS, "overlayfs", id.as_str()));

    let outcome = manager.start("web", &StartOptions::default()).await.unwrap();
    assert!(matches!(outcome, AttachOutcome::Detached));
    assert_eq!(status(&runtime, &id).await, Some(TaskStatus::Running));
    let io = runtime.task_io(NS, &id).unwrap();
    assert!(io.stdout.starts_with("file://"));

    manager.stop("web", None).await.unwrap();
    assert_eq!(status(&runtime, &id).await, Some(TaskStatus::Stopped));
    assert_eq!(runtime.received_signals(NS, &id), vec![15]);

    manager.remove("web", false, true).await.unwrap();
    assert!(runtime.get_container(NS, &id).await.is_err());
    assert!(!state_dir.exists());
    assert!(!store.path().join("names").join(NS).join("web").exists());
    assert!(!runtime.has_snapshot(NS, "overlayfs", id.as_str()));
}

#[tokio::test]
async fn duplicate_name_is_rejected_and_rolled_back() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    manager.create(&options("db")).await.unwrap();
    let err = manager.create(&options("db")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(runtime.list_containers(NS).await.unwrap().len(), 1);
    let dirs = std::fs::read_dir(store.path().join("containers").join(NS))
        .unwrap()
        .count();
    assert_eq!(dirs, 1);
}

#[tokio::test]
async fn missing_image_with_never_policy_leaves_nothing() {
    let store = tempfile::tempdir().unwrap();
    let runtime = MemoryRuntime::new();
    let manager = manager(&runtime, store.path());

    let err = manager.create(&options("ghost")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(runtime.list_containers(NS).await.unwrap().is_empty());
    assert!(!store.path().join("names").join(NS).join("ghost").exists());
}

#[tokio::test]
async fn zero_timeout_kills_immediately() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    let id = manager.create(&options("quick")).await.unwrap();
    manager.start(id.as_str(), &StartOptions::default()).await.unwrap();
    manager.stop("quick", Some(Duration::ZERO)).await.unwrap();
    assert_eq!(runtime.received_signals(NS, &id), vec![9]);
}

#[tokio::test]
async fn stubborn_task_is_killed_after_timeout() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    let id = manager.create(&options("stubborn")).await.unwrap();
    runtime.set_task_behavior(&id, TaskBehavior::IgnoreTerm);
    manager.start("stubborn", &StartOptions::default()).await.unwrap();
    manager.stop("stubborn", Some(Duration::from_millis(50))).await.unwrap();
    assert_eq!(runtime.received_signals(NS, &id), vec![15, 9]);
    assert_eq!(status(&runtime, &id).await, Some(TaskStatus::Stopped));
}

#[tokio::test]
async fn stopping_a_created_container_is_a_no_op() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    let id = manager.create(&options("idle")).await.unwrap();
    manager.stop("idle", None).await.unwrap();
    assert_eq!(status(&runtime, &id).await, None);
    let record = runtime.get_container(NS, &id).await.unwrap();
    assert_eq!(
        record.labels.get("highk/explicitly-stopped").map(String::as_str),
        Some("true")
    );
}

#[tokio::test]
async fn paused_container_needs_force_to_remove() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    let id = manager.create(&options("frozen")).await.unwrap();
    manager.start("frozen", &StartOptions::default()).await.unwrap();
    manager.pause("frozen").await.unwrap();
    assert_eq!(status(&runtime, &id).await, Some(TaskStatus::Paused));

    let err = manager.remove("frozen", false, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert!(runtime.get_container(NS, &id).await.is_ok());

    manager.remove("frozen", true, false).await.unwrap();
    assert!(runtime.get_container(NS, &id).await.is_err());
}

#[tokio::test]
async fn running_container_cannot_be_started_again() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    manager.create(&options("busy")).await.unwrap();
    manager.start("busy", &StartOptions::default()).await.unwrap();
    let err = manager
        .start("busy", &StartOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn stopped_container_restarts_with_a_fresh_task() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    let id = manager.create(&options("again")).await.unwrap();
    manager.start("again", &StartOptions::default()).await.unwrap();
    runtime.exit_task(NS, &id, 1).unwrap();
    assert_eq!(manager.wait("again").await.unwrap().code, 1);

    manager.restart("again", None).await.unwrap();
    assert_eq!(status(&runtime, &id).await, Some(TaskStatus::Running));
}

#[tokio::test]
async fn pause_and_unpause_check_state() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    manager.create(&options("p")).await.unwrap();
    let err = manager.pause("p").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    manager.start("p", &StartOptions::default()).await.unwrap();
    let err = manager.unpause("p").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    manager.pause("p").await.unwrap();
    manager.unpause("p").await.unwrap();
}

#[tokio::test]
async fn rename_moves_name_and_label() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    let id = manager.create(&options("old")).await.unwrap();
    manager.rename("old", "new").await.unwrap();

    let names = store.path().join("names").join(NS);
    assert!(!names.join("old").exists());
    assert_eq!(std::fs::read_to_string(names.join("new")).unwrap(), id.as_str());
    let record = manager.find("new").await.unwrap();
    assert_eq!(record.id, id);

    let err = manager.rename("new", "new").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn removing_twice_converges() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    let id = manager.create(&options("gone")).await.unwrap();
    manager.remove("gone", false, false).await.unwrap();
    manager.remove("gone", true, false).await.unwrap();
    manager.remove("never-existed", true, false).await.unwrap();

    assert!(!store.path().join("names").join(NS).join("gone").exists());
    assert!(!container_state_dir(store.path(), NS, id.as_str()).exists());
    assert!(runtime.list_containers(NS).await.unwrap().is_empty());

    let err = manager.remove("gone", false, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn kill_requires_a_running_task() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    let id = manager.create(&options("k")).await.unwrap();
    let err = manager
        .kill("k", nix::sys::signal::Signal::SIGKILL)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    manager.start("k", &StartOptions::default()).await.unwrap();
    manager
        .kill("k", nix::sys::signal::Signal::SIGKILL)
        .await
        .unwrap();
    assert_eq!(status(&runtime, &id).await, Some(TaskStatus::Stopped));
}

#[tokio::test]
async fn ps_lists_running_unless_all() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    manager.create(&options("one")).await.unwrap();
    manager.create(&options("two")).await.unwrap();
    manager.start("two", &StartOptions::default()).await.unwrap();

    let mut diagnostics = highk::diagnostics::Diagnostics::default();
    let running = manager.list(false, &[], &mut diagnostics).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].names, "two");
    assert_eq!(running[0].status, "Up");

    let all = manager.list(true, &[], &mut diagnostics).await.unwrap();
    assert_eq!(all.len(), 2);

    let created = manager
        .list(true, &["status=created".to_string()], &mut diagnostics)
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].names, "one");
}

#[tokio::test]
async fn inspect_reports_labels_and_state() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    let mut opts = options("look");
    opts.labels.insert("team".to_string(), "infra".to_string());
    let id = manager.create(&opts).await.unwrap();
    manager.start("look", &StartOptions::default()).await.unwrap();

    let doc = manager.inspect("look").await.unwrap();
    assert_eq!(doc.id, id.as_str());
    assert_eq!(doc.name, "look");
    assert_eq!(doc.path, "sh");
    assert!(doc.state.running);
    assert_eq!(doc.config.labels.get("team").map(String::as_str), Some("infra"));
    assert_eq!(doc.config.hostname, id.short());
}

#[tokio::test]
async fn reserved_label_prefix_is_rejected() {
    let store = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let manager = manager(&runtime, store.path());

    let mut opts = options("bad");
    opts.labels
        .insert("highk/name".to_string(), "sneaky".to_string());
    let err = manager.create(&opts).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}
