//! Delegation flows across the hierarchy: route, reassign, escalate, cancel

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use hopper_core::{
    DelegationStatus, DelegationType, HopperError, InstanceScope, TaskStatus,
};
use hopper_delegation::DelegationEngine;
use hopper_instances::{InstanceRegistry, InstanceSpec};
use hopper_storage::{InMemoryTaskStore, TaskSpec, TaskStore};

struct Tree {
    registry: Arc<InstanceRegistry>,
    tasks: Arc<InMemoryTaskStore>,
    engine: DelegationEngine,
    global: String,
    alpha: String,
    beta: String,
    workers: String,
}

async fn tree() -> Tree {
    let registry = InstanceRegistry::shared();
    let tasks = Arc::new(InMemoryTaskStore::new());

    let global = registry
        .create(InstanceSpec::new("root", InstanceScope::Global))
        .await
        .unwrap();
    let alpha = registry
        .create(InstanceSpec::new("alpha", InstanceScope::Project).with_parent(&global.id))
        .await
        .unwrap();
    let beta = registry
        .create(InstanceSpec::new("beta", InstanceScope::Project).with_parent(&global.id))
        .await
        .unwrap();
    let workers = registry
        .create(InstanceSpec::new("workers", InstanceScope::Orchestration).with_parent(&alpha.id))
        .await
        .unwrap();

    let engine = DelegationEngine::new(Arc::clone(&registry), tasks.clone() as Arc<dyn TaskStore>);

    Tree {
        registry,
        tasks,
        engine,
        global: global.id,
        alpha: alpha.id,
        beta: beta.id,
        workers: workers.id,
    }
}

async fn place(tree: &Tree, title: &str, at: &str) -> String {
    let task = tree.tasks.create(TaskSpec::titled(title)).await.unwrap();
    tree.tasks
        .assign_instance(&task.id, None, Some(at.to_string()))
        .await
        .unwrap();
    task.id
}

#[tokio::test]
async fn full_route_down_and_bubble_up() {
    let t = tree().await;
    let task = place(&t, "ship feature", &t.global).await;

    // global → alpha
    let hop1 = t
        .engine
        .delegate(&task, &t.alpha, DelegationType::Route, None, Some("router".into()))
        .await
        .unwrap();
    t.engine.accept(&hop1.id, Some("taking it")).await.unwrap();
    t.engine.complete(&hop1.id, None).await.unwrap();

    // alpha → workers
    let hop2 = t
        .engine
        .delegate(&task, &t.workers, DelegationType::Route, None, None)
        .await
        .unwrap();
    t.engine.accept(&hop2.id, None).await.unwrap();

    // work it to done, then bubble
    t.tasks
        .transition_status(&task, TaskStatus::Claimed)
        .await
        .unwrap();
    t.tasks
        .transition_status(&task, TaskStatus::InProgress)
        .await
        .unwrap();
    let bubbled = t
        .engine
        .complete_task(&task, Some(json!({"commit": "abc123"})))
        .await
        .unwrap();

    assert_eq!(bubbled.len(), 1);
    assert_eq!(bubbled[0].id, hop2.id);
    assert_eq!(
        bubbled[0].result.as_ref().unwrap()["commit"],
        json!("abc123")
    );

    let chain = t.engine.chain(&task);
    assert_eq!(chain.len(), 2);
    assert!(chain.iter().all(|d| d.status == DelegationStatus::Completed));

    // hop order is origin → current
    assert_eq!(chain[0].source_instance_id.as_deref(), Some(t.global.as_str()));
    assert_eq!(chain[1].target_instance_id, t.workers);
}

#[tokio::test]
async fn reassign_between_siblings() {
    let t = tree().await;
    let task = place(&t, "wrong team", &t.alpha).await;

    let hop = t
        .engine
        .delegate(&task, &t.beta, DelegationType::Reassign, Some("belongs to beta".into()), None)
        .await
        .unwrap();
    assert_eq!(hop.delegation_type, DelegationType::Reassign);

    let owned = t.tasks.get(&task).await.unwrap().unwrap();
    assert_eq!(owned.instance_id.as_deref(), Some(t.beta.as_str()));
}

#[tokio::test]
async fn cancel_rolls_back_like_reject() {
    let t = tree().await;
    let task = place(&t, "changed our minds", &t.global).await;

    let hop = t
        .engine
        .delegate(&task, &t.alpha, DelegationType::Route, None, None)
        .await
        .unwrap();
    t.engine.accept(&hop.id, None).await.unwrap();

    // cancel works from accepted, unlike reject
    let cancelled = t.engine.cancel(&hop.id).await.unwrap();
    assert_eq!(cancelled.status, DelegationStatus::Cancelled);

    let owned = t.tasks.get(&task).await.unwrap().unwrap();
    assert_eq!(owned.instance_id.as_deref(), Some(t.global.as_str()));
    assert!(t.engine.active(&task).is_none());
}

#[tokio::test]
async fn rejected_task_can_be_redelegated() {
    let t = tree().await;
    let task = place(&t, "bounced", &t.global).await;

    let first = t
        .engine
        .delegate(&task, &t.alpha, DelegationType::Route, None, None)
        .await
        .unwrap();
    t.engine.reject(&first.id, "at capacity").await.unwrap();

    // the rejection freed the active slot; a new hop is legal
    let second = t
        .engine
        .delegate(&task, &t.beta, DelegationType::Route, None, None)
        .await
        .unwrap();
    assert_eq!(second.status, DelegationStatus::Pending);

    let chain = t.engine.chain(&task);
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].status, DelegationStatus::Rejected);
    assert_eq!(chain[0].rejection_reason.as_deref(), Some("at capacity"));

    let summary = t.engine.chain_summary(&task);
    assert_eq!(summary.overall_status, "has_rejections");
}

#[tokio::test]
async fn delegate_to_paused_instance_is_refused() {
    let t = tree().await;
    let task = place(&t, "held", &t.global).await;

    t.registry.start(&t.alpha).await.unwrap();
    t.registry.pause(&t.alpha).await.unwrap();

    let err = t
        .engine
        .delegate(&task, &t.alpha, DelegationType::Route, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, HopperError::Validation { .. }));

    // task never moved
    let owned = t.tasks.get(&task).await.unwrap().unwrap();
    assert_eq!(owned.instance_id.as_deref(), Some(t.global.as_str()));
}

#[tokio::test]
async fn expected_source_guard_detects_races() {
    let t = tree().await;
    let task = place(&t, "contested", &t.global).await;

    // a competing actor moved the task before our commit
    t.tasks
        .assign_instance(&task, Some(&t.global), Some(t.beta.clone()))
        .await
        .unwrap();

    let err = t
        .engine
        .delegate_expecting(
            &task,
            Some(t.global.as_str()),
            &t.alpha,
            DelegationType::Route,
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HopperError::ConflictingUpdate));

    // re-read and commit against the fresh source succeeds
    t.engine
        .delegate_expecting(
            &task,
            Some(t.beta.as_str()),
            &t.alpha,
            DelegationType::Reassign,
            None,
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn bubbling_honors_cancellation() {
    let t = tree().await;
    let task = place(&t, "cancelled mid-bubble", &t.global).await;

    let hop = t
        .engine
        .delegate(&task, &t.alpha, DelegationType::Route, None, None)
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let bubbled = t
        .engine
        .bubble_completion(&task, None, &cancel)
        .await
        .unwrap();

    // nothing processed, the hop is still active
    assert!(bubbled.is_empty());
    assert_eq!(t.engine.active(&task).unwrap().id, hop.id);
}
