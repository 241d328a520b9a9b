//! Lifecycle manager tests

use deployctl::deploy::fsm::RebuildPhase;
use deployctl::deploy::lifecycle::LifecycleManager;
use deployctl::errors::DeployError;
use deployctl::models::deployment::{Deployment, RebuildOptions};

use crate::support::{Call, FakeRuntime};

fn deployment(namespace: &str) -> Deployment {
    Deployment::new("app", "bookai", namespace, 8000, ".")
}

#[tokio::test]
async fn test_rebuild_replaces_stale_container() {
    let runtime = FakeRuntime::new();
    let manager = LifecycleManager::new(runtime.clone());
    let app = deployment("bookai");
    let stale = runtime.seed_running(&app);

    let options = RebuildOptions {
        no_cache: true,
        ..Default::default()
    };
    let report = manager.rebuild(&app, options).await.unwrap();

    assert_eq!(runtime.containers_at_build(), vec![0]);
    assert_eq!(runtime.running_ids(&app), vec![report.container_id.clone()]);
    assert_ne!(report.container_id, stale);
    assert!(runtime.calls().contains(&Call::Build {
        target: "bookai/bookai".to_string(),
        no_cache: true,
    }));
    assert_eq!(report.phases.last(), Some(&RebuildPhase::Running));
}

#[tokio::test]
async fn test_rebuild_twice_leaves_one_container() {
    let runtime = FakeRuntime::new();
    let manager = LifecycleManager::new(runtime.clone());
    let app = deployment("bookai");

    manager.rebuild(&app, RebuildOptions::default()).await.unwrap();
    assert_eq!(runtime.container_count(&app), 1);

    manager.rebuild(&app, RebuildOptions::default()).await.unwrap();
    assert_eq!(runtime.container_count(&app), 1);
    assert_eq!(runtime.running_ids(&app).len(), 1);
}

#[tokio::test]
async fn test_cleanup_tolerates_absent_container_and_image() {
    let runtime = FakeRuntime::new();
    let manager = LifecycleManager::new(runtime.clone());
    let app = deployment("fresh");

    let options = RebuildOptions {
        remove_image: true,
        ..Default::default()
    };
    let report = manager.rebuild(&app, options).await.unwrap();

    assert!(report.phases.contains(&RebuildPhase::RemovingImage));
    assert_eq!(runtime.running_ids(&app).len(), 1);
}

#[tokio::test]
async fn test_image_removal_is_scoped_to_the_deployment() {
    let runtime = FakeRuntime::new();
    let manager = LifecycleManager::new(runtime.clone());
    let app = deployment("bookai");
    runtime.seed_running(&app);

    let options = RebuildOptions {
        remove_image: true,
        ..Default::default()
    };
    manager.rebuild(&app, options).await.unwrap();

    let removed: Vec<_> = runtime
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::RemoveImage(tag) => Some(tag),
            _ => None,
        })
        .collect();
    assert_eq!(removed, vec!["bookai-bookai".to_string()]);
}

#[tokio::test]
async fn test_build_failure_aborts_before_start() {
    let runtime = FakeRuntime::new();
    runtime.fail_builds();
    let manager = LifecycleManager::new(runtime.clone());
    let app = deployment("bookai");
    runtime.seed_running(&app);

    let err = manager.rebuild(&app, RebuildOptions::default()).await.unwrap_err();

    assert!(matches!(err, DeployError::BuildFailed { .. }));
    assert_eq!(err.to_string(), "Build failed for bookai/bookai: exit status: 1");
    assert_eq!(runtime.starts(), 0);
    assert!(runtime.running_ids(&app).is_empty());
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let runtime = FakeRuntime::new();
    let manager = LifecycleManager::new(runtime.clone());
    let staging = deployment("staging");
    let production = deployment("production");
    let untouched = runtime.seed_running(&production);
    runtime.seed_running(&staging);

    manager.rebuild(&staging, RebuildOptions::default()).await.unwrap();
    manager.teardown(&staging).await;

    assert_eq!(runtime.running_ids(&production), vec![untouched]);
    assert!(runtime.running_ids(&staging).is_empty());
    assert!(runtime
        .calls()
        .iter()
        .all(|c| !matches!(c, Call::Stop(t) | Call::Remove(t) if t == "production/bookai")));
}

#[tokio::test]
async fn test_recreate_forces_a_new_container() {
    let runtime = FakeRuntime::new();
    let manager = LifecycleManager::new(runtime.clone());
    let app = deployment("bookai");
    let old = runtime.seed_running(&app);

    let report = manager.recreate(&app).await.unwrap();

    assert_ne!(report.container_id, old);
    assert_eq!(
        runtime.calls(),
        vec![Call::Start {
            target: "bookai/bookai".to_string(),
            force: true,
        }]
    );
}

#[tokio::test]
async fn test_attach_requires_running_container() {
    let runtime = FakeRuntime::new();
    let manager = LifecycleManager::new(runtime.clone());
    let app = deployment("bookai");

    assert!(matches!(
        manager.attach(&app).await,
        Err(DeployError::NotRunning(_))
    ));

    runtime.seed_running(&app);
    manager.attach(&app).await.unwrap();
    assert!(runtime.calls().contains(&Call::ExecInteractive {
        target: "bookai/bookai".to_string(),
        command: vec!["python".to_string(), "chat_cli.py".to_string()],
    }));
}
