//! Store contract: both backends behave identically through the trait

use std::sync::Arc;

use tempfile::TempDir;

use hopper_core::{HopperError, TaskPriority, TaskStatus};
use hopper_storage::{
    InMemoryTaskStore, MarkdownTaskStore, Page, TaskFilter, TaskPatch, TaskSpec, TaskStore,
};

fn backends() -> Vec<(&'static str, Arc<dyn TaskStore>, Option<TempDir>)> {
    let dir = TempDir::new().unwrap();
    let markdown = MarkdownTaskStore::open(dir.path()).unwrap();
    vec![
        ("memory", Arc::new(InMemoryTaskStore::new()), None),
        ("markdown", Arc::new(markdown), Some(dir)),
    ]
}

#[tokio::test]
async fn crud_roundtrip() {
    for (name, store, _guard) in backends() {
        let mut spec = TaskSpec::titled("contract task");
        spec.description = Some("does the thing".into());
        spec.tags = vec!["contract".into()];
        spec.priority = TaskPriority::High;
        let task = store.create(spec).await.unwrap();

        let fetched = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "contract task", "backend {name}");
        assert_eq!(fetched.priority, TaskPriority::High, "backend {name}");

        let patched = store
            .update(
                &task.id,
                TaskPatch {
                    title: Some("renamed".into()),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(patched.title, "renamed", "backend {name}");
        // untouched fields survive the patch
        assert_eq!(patched.description.as_deref(), Some("does the thing"));

        assert!(store.delete(&task.id).await.unwrap(), "backend {name}");
        assert!(store.get(&task.id).await.unwrap().is_none(), "backend {name}");
    }
}

#[tokio::test]
async fn update_missing_task_is_not_found() {
    for (name, store, _guard) in backends() {
        let err = store
            .update("task-ghost", TaskPatch::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, HopperError::NotFound { .. }),
            "backend {name}"
        );
    }
}

#[tokio::test]
async fn status_machine_is_enforced_everywhere() {
    for (name, store, _guard) in backends() {
        let task = store.create(TaskSpec::titled("walk me")).await.unwrap();

        store
            .transition_status(&task.id, TaskStatus::Claimed)
            .await
            .unwrap();
        store
            .transition_status(&task.id, TaskStatus::InProgress)
            .await
            .unwrap();
        store
            .transition_status(&task.id, TaskStatus::Blocked)
            .await
            .unwrap();
        store
            .transition_status(&task.id, TaskStatus::InProgress)
            .await
            .unwrap();
        let done = store
            .transition_status(&task.id, TaskStatus::Done)
            .await
            .unwrap();
        assert!(done.stopped_at.is_some(), "backend {name}");

        let err = store
            .transition_status(&task.id, TaskStatus::InProgress)
            .await
            .unwrap_err();
        assert!(
            matches!(err, HopperError::InvalidStateTransition { .. }),
            "backend {name}"
        );
    }
}

#[tokio::test]
async fn release_returns_claimed_task_to_pending() {
    for (name, store, _guard) in backends() {
        let task = store.create(TaskSpec::titled("maybe later")).await.unwrap();
        store
            .transition_status(&task.id, TaskStatus::Claimed)
            .await
            .unwrap();
        let released = store
            .transition_status(&task.id, TaskStatus::Pending)
            .await
            .unwrap();
        assert_eq!(released.status, TaskStatus::Pending, "backend {name}");
    }
}

#[tokio::test]
async fn listing_order_is_stable() {
    for (name, store, _guard) in backends() {
        for i in 0..5 {
            store
                .create(TaskSpec::titled(format!("task {i}")))
                .await
                .unwrap();
        }

        let (first, total) = store
            .list(&TaskFilter::default(), Page::default())
            .await
            .unwrap();
        let (second, _) = store
            .list(&TaskFilter::default(), Page::default())
            .await
            .unwrap();

        assert_eq!(total, 5, "backend {name}");
        let first_ids: Vec<&str> = first.iter().map(|t| t.id.as_str()).collect();
        let second_ids: Vec<&str> = second.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(first_ids, second_ids, "backend {name}");
    }
}

#[tokio::test]
async fn assign_instance_race_is_detected() {
    for (name, store, _guard) in backends() {
        let task = store.create(TaskSpec::titled("contested")).await.unwrap();
        store
            .assign_instance(&task.id, None, Some("hop-a".into()))
            .await
            .unwrap();

        let err = store
            .assign_instance(&task.id, Some("hop-stale"), Some("hop-b".into()))
            .await
            .unwrap_err();
        assert!(
            matches!(err, HopperError::ConflictingUpdate),
            "backend {name}"
        );
    }
}

#[tokio::test]
async fn markdown_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let task_id = {
        let store = MarkdownTaskStore::open(dir.path()).unwrap();
        let mut spec = TaskSpec::titled("persistent");
        spec.tags = vec!["durable".into()];
        let task = store.create(spec).await.unwrap();
        store
            .transition_status(&task.id, TaskStatus::Claimed)
            .await
            .unwrap();
        task.id
    };

    let reopened = MarkdownTaskStore::open(dir.path()).unwrap();
    let task = reopened.get(&task_id).await.unwrap().unwrap();
    assert_eq!(task.title, "persistent");
    assert_eq!(task.status, TaskStatus::Claimed);
    assert_eq!(task.tags, vec!["durable"]);

    let (all, total) = reopened
        .list(&TaskFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(all[0].id, task_id);
}
