//! Integration tests for container lifecycle management.

use std::sync::Arc;

use marina::engine::ContainerSpec;
use marina::lifecycle::LifecycleManager;
use marina::stream::sink::DiscardSink;
use marina::{CacheSpec, ContainerEngine, ImageConfig, MarinaError};
use marina_test_utils::FakeEngine;

fn manager(engine: &Arc<FakeEngine>) -> LifecycleManager {
    let engine: Arc<dyn ContainerEngine> = engine.clone();
    LifecycleManager::new(engine)
}

// ============================================================================
// CACHE
// ============================================================================

#[tokio::test]
async fn no_cache_means_no_engine_calls() {
    let engine = FakeEngine::new().into_arc();
    manager(&engine).create_cache(None).await.unwrap();
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn cache_volume_created_once() {
    let engine = FakeEngine::new().into_arc();
    let lifecycle = manager(&engine);
    let cache = CacheSpec::for_app("web");

    lifecycle.create_cache(Some(&cache)).await.unwrap();
    lifecycle.create_cache(Some(&cache)).await.unwrap();

    assert!(engine.has_volume("web__buildcache"));
    assert_eq!(engine.calls_with_prefix("create_volume:").len(), 1);
}

#[tokio::test]
async fn cache_volume_create_failure_is_raised() {
    let engine = FakeEngine::new().fail_on("create_volume").into_arc();
    let err = manager(&engine)
        .create_cache(Some(&CacheSpec::for_app("web")))
        .await
        .unwrap_err();
    assert!(err.is_engine_fault());
}

// ============================================================================
// IMAGES
// ============================================================================

#[tokio::test]
async fn ensure_image_pulls_only_when_missing() {
    let config = ImageConfig {
        user: Some("app".to_string()),
        ..Default::default()
    };
    let engine = FakeEngine::new().with_image("local:1", config).into_arc();
    let lifecycle = manager(&engine);

    let local = lifecycle.ensure_image("local:1").await.unwrap();
    assert_eq!(local.user.as_deref(), Some("app"));
    lifecycle.ensure_image("remote:1").await.unwrap();

    assert_eq!(engine.calls_with_prefix("pull:"), vec!["pull:remote:1"]);
}

#[tokio::test]
async fn ensure_image_pull_failure_is_raised() {
    let engine = FakeEngine::new().fail_on("pull_image").into_arc();
    let err = manager(&engine).ensure_image("remote:1").await.unwrap_err();
    assert!(matches!(err, MarinaError::Engine(_)));
}

#[tokio::test]
async fn remove_missing_image_is_a_warning() {
    let engine = FakeEngine::new().into_arc();
    let mut lifecycle = manager(&engine);
    lifecycle.track_image("gone:1");

    let report = lifecycle.teardown().await;

    assert_eq!(report.warnings().len(), 1);
    assert_eq!(report.warnings()[0].operation, "remove image gone:1");
    assert!(lifecycle.images().is_empty());
}

// ============================================================================
// CONTAINERS
// ============================================================================

#[tokio::test]
async fn run_phase_returns_exit_code() {
    let engine = FakeEngine::new().with_exit_code("builder:1", 3).into_arc();
    let mut lifecycle = manager(&engine);

    let run = lifecycle
        .run_phase(&ContainerSpec::new("builder:1", ["make"]), Box::new(DiscardSink))
        .await
        .unwrap();

    assert_eq!(run.exit_code, 3);
    assert!(!run.succeeded());
    assert_eq!(lifecycle.containers(), &[run.container.clone()]);
    let id = run.container.as_str();
    assert_eq!(
        engine.calls(),
        vec![
            "create:builder:1".to_string(),
            format!("attach:{}", id),
            format!("attached:{}", id),
            format!("start:{}", id),
            format!("wait:{}", id),
        ]
    );
}

#[tokio::test]
async fn start_failure_keeps_container_for_teardown() {
    let engine = FakeEngine::new().fail_on("start_container").into_arc();
    let mut lifecycle = manager(&engine);

    let err = lifecycle
        .run_phase(&ContainerSpec::new("builder:1", ["make"]), Box::new(DiscardSink))
        .await
        .unwrap_err();
    assert!(err.is_engine_fault());
    assert_eq!(lifecycle.containers().len(), 1);

    assert!(lifecycle.teardown().await.is_clean());
    assert!(engine.live_containers().is_empty());
}

#[tokio::test]
async fn attach_failure_prevents_start() {
    let engine = FakeEngine::new().fail_on("attach_container").into_arc();
    let mut lifecycle = manager(&engine);

    let err = lifecycle
        .run_phase(&ContainerSpec::new("builder:1", ["make"]), Box::new(DiscardSink))
        .await
        .unwrap_err();

    assert!(err.is_engine_fault());
    assert!(engine.calls_with_prefix("start:").is_empty());
}

#[tokio::test]
async fn remove_container_never_raises() {
    let engine = FakeEngine::new().fail_on("stop_container").into_arc();
    let mut lifecycle = manager(&engine);
    let id = lifecycle
        .create(&ContainerSpec::new("builder:1", ["true"]))
        .await
        .unwrap();

    let report = lifecycle.remove_container(&id).await;

    assert_eq!(report.warnings().len(), 1);
    assert!(report.warnings()[0].operation.starts_with("stop container"));
    // removal is still attempted after a failed stop
    assert!(engine.live_containers().is_empty());
    assert!(lifecycle.containers().is_empty());
}

#[tokio::test]
async fn teardown_removes_newest_first_and_is_idempotent() {
    let engine = FakeEngine::new().into_arc();
    let mut lifecycle = manager(&engine);
    let first = lifecycle
        .create(&ContainerSpec::new("a:1", ["true"]))
        .await
        .unwrap();
    let second = lifecycle
        .create(&ContainerSpec::new("b:1", ["true"]))
        .await
        .unwrap();

    assert!(lifecycle.teardown().await.is_clean());
    let calls = engine.calls().len();
    assert!(lifecycle.teardown().await.is_clean());

    assert_eq!(engine.calls().len(), calls);
    let removed = engine.calls_with_prefix("remove:");
    assert_eq!(
        removed,
        vec![
            format!("remove:{}", second.as_str()),
            format!("remove:{}", first.as_str()),
        ]
    );
}

#[tokio::test]
async fn release_forgets_resources() {
    let engine = FakeEngine::new().into_arc();
    let mut lifecycle = manager(&engine);
    lifecycle
        .create(&ContainerSpec::new("a:1", ["true"]))
        .await
        .unwrap();
    lifecycle.track_image("a:stage");

    let (containers, images) = lifecycle.release();

    assert_eq!(containers.len(), 1);
    assert_eq!(images, vec!["a:stage"]);
    assert!(lifecycle.teardown().await.is_clean());
    assert_eq!(engine.live_containers().len(), 1);
}
