use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use instructor_task::models::{NewTaskEntry, TaskEntry, TaskProgress};
use instructor_task::progress::{EntryTransition, PgProgressTracker, ProgressError, ProgressTracker};
use instructor_task::state_machine::TaskEntryState;
use instructor_task::update::Outcome;

async fn queued_entry(tracker: &PgProgressTracker) -> TaskEntry {
    tracker
        .create_entry(NewTaskEntry::new(
            "course-v1:Org+C1+2024",
            "reset_problem_attempts",
            json!({"problem_url": "block@P1"}),
        ))
        .await
        .expect("Failed to create task entry")
}

fn transition(from: TaskEntryState, to: TaskEntryState) -> EntryTransition {
    EntryTransition {
        from,
        to,
        progress: TaskProgress::default(),
        last_record_id: None,
        total: None,
        task_output: None,
    }
}

fn progress_of(outcomes: &[Outcome]) -> TaskProgress {
    let mut progress = TaskProgress::default();
    for outcome in outcomes {
        progress.record(outcome);
    }
    progress
}

#[sqlx::test(migrator = "instructor_task::database::MIGRATOR")]
async fn test_create_and_load_entry(pool: PgPool) {
    let tracker = PgProgressTracker::new(pool);
    let created = queued_entry(&tracker).await;

    let loaded = tracker.load_entry(created.id).await.unwrap();
    assert_eq!(loaded.status, TaskEntryState::Queued);
    assert_eq!(loaded.progress, TaskProgress::default());
    assert_eq!(loaded.task_input, json!({"problem_url": "block@P1"}));
    assert_eq!(loaded.last_record_id, None);
    assert!(!loaded.cancel_requested);

    assert!(matches!(
        tracker.load_entry(Uuid::new_v4()).await,
        Err(ProgressError::EntryNotFound { .. })
    ));
}

#[sqlx::test(migrator = "instructor_task::database::MIGRATOR")]
async fn test_stale_transition_is_rejected(pool: PgPool) {
    let tracker = PgProgressTracker::new(pool);
    let entry = queued_entry(&tracker).await;

    let start = EntryTransition {
        total: Some(6),
        ..transition(TaskEntryState::Queued, TaskEntryState::Running)
    };
    tracker.persist_transition(entry.id, &start).await.unwrap();

    // A second worker still believing the entry is queued loses the race
    match tracker.persist_transition(entry.id, &start).await {
        Err(ProgressError::ConcurrentModification {
            expected, actual, ..
        }) => {
            assert_eq!(expected, "queued");
            assert_eq!(actual, "running");
        }
        other => panic!("expected a concurrent modification, got {other:?}"),
    }

    let stored = tracker.load_entry(entry.id).await.unwrap();
    assert_eq!(stored.status, TaskEntryState::Running);
    assert_eq!(stored.total, Some(6));
}

#[sqlx::test(migrator = "instructor_task::database::MIGRATOR")]
async fn test_transition_of_unknown_entry(pool: PgPool) {
    let tracker = PgProgressTracker::new(pool);
    let result = tracker
        .persist_transition(
            Uuid::new_v4(),
            &transition(TaskEntryState::Queued, TaskEntryState::Running),
        )
        .await;

    assert!(matches!(result, Err(ProgressError::EntryNotFound { .. })));
}

#[sqlx::test(migrator = "instructor_task::database::MIGRATOR")]
async fn test_checkpoint_round_trips_counters_cursor_and_cancel_flag(pool: PgPool) {
    let tracker = PgProgressTracker::new(pool);
    let entry = queued_entry(&tracker).await;

    match tracker
        .checkpoint(entry.id, &TaskProgress::default(), None)
        .await
    {
        Err(ProgressError::NotRunning { status, .. }) => assert_eq!(status, "queued"),
        other => panic!("checkpoint on a queued entry should fail, got {other:?}"),
    }

    tracker
        .persist_transition(
            entry.id,
            &transition(TaskEntryState::Queued, TaskEntryState::Running),
        )
        .await
        .unwrap();

    let first = progress_of(&[Outcome::Succeeded]);
    let ack = tracker.checkpoint(entry.id, &first, Some(41)).await.unwrap();
    assert!(!ack.cancel_requested);

    tracker.request_cancel(entry.id).await.unwrap();
    let second = progress_of(&[Outcome::Succeeded, Outcome::Failed("timeout".into())]);
    let ack = tracker.checkpoint(entry.id, &second, Some(42)).await.unwrap();
    assert!(ack.cancel_requested);

    let stored = tracker.load_entry(entry.id).await.unwrap();
    assert_eq!(stored.progress, second);
    assert_eq!(stored.last_record_id, Some(42));
    assert!(stored.cancel_requested);

    assert!(matches!(
        tracker.request_cancel(Uuid::new_v4()).await,
        Err(ProgressError::EntryNotFound { .. })
    ));
}

#[sqlx::test(migrator = "instructor_task::database::MIGRATOR")]
async fn test_entering_running_clears_output_and_keeps_total(pool: PgPool) {
    let tracker = PgProgressTracker::new(pool);
    let entry = queued_entry(&tracker).await;

    tracker
        .persist_transition(
            entry.id,
            &EntryTransition {
                total: Some(4),
                ..transition(TaskEntryState::Queued, TaskEntryState::Running)
            },
        )
        .await
        .unwrap();
    tracker
        .persist_transition(
            entry.id,
            &EntryTransition {
                progress: progress_of(&[Outcome::Failed("missing content".into())]),
                last_record_id: Some(7),
                task_output: Some(r#"{"status":"failed"}"#.to_string()),
                ..transition(TaskEntryState::Running, TaskEntryState::Failed)
            },
        )
        .await
        .unwrap();

    let failed = tracker.load_entry(entry.id).await.unwrap();
    assert_eq!(failed.task_output.as_deref(), Some(r#"{"status":"failed"}"#));
    assert_eq!(failed.last_record_id, Some(7));

    // A rerun starts over: output and cursor are cleared, the total survives
    tracker
        .persist_transition(
            entry.id,
            &transition(TaskEntryState::Failed, TaskEntryState::Running),
        )
        .await
        .unwrap();

    let rerun = tracker.load_entry(entry.id).await.unwrap();
    assert_eq!(rerun.status, TaskEntryState::Running);
    assert_eq!(rerun.task_output, None);
    assert_eq!(rerun.last_record_id, None);
    assert_eq!(rerun.progress, TaskProgress::default());
    assert_eq!(rerun.total, Some(4));
}
