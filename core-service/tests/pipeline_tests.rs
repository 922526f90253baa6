//! End-to-end pipeline runs against temporary directories and a fake daemon.

mod common;

use common::Fixture;
use core_library::BatchStatus;
use core_runtime::config::DebugSettings;
use core_runtime::events::PipelineEvent;
use core_service::{StepData, StepName, StepStatus};
use provider_syncthing::SyncthingError;

fn names(run: &core_service::PipelineRunResult) -> Vec<StepName> {
    run.steps.iter().map(|step| step.name).collect()
}

fn sorted_files(fx: &Fixture) -> Vec<String> {
    let day = fx.sorted_dir().join("2021/06/15");
    let mut files: Vec<String> = std::fs::read_dir(day)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

#[tokio::test]
async fn test_full_run_dedups_batches_syncs_and_sorts() {
    let fx = Fixture::new().await;
    fx.source_file("a.jpg", b"sunrise");
    fx.source_file("nested/b.jpg", b"sunrise");
    fx.source_file("c.jpg", b"sunset");
    let orchestrator = fx.orchestrator(&fx.config(DebugSettings::default()));

    let run = orchestrator.run_pipeline("run-1", None).await;

    assert!(run.errors.is_empty(), "unexpected errors: {:?}", run.errors);
    assert!(run.finished_at.is_some());
    assert_eq!(
        names(&run),
        vec![StepName::Dedup, StepName::Batch, StepName::Sync, StepName::Sort, StepName::Cleanup]
    );
    assert!(run.steps.iter().all(|step| step.status == StepStatus::Completed));

    match &run.step(StepName::Dedup).unwrap().data {
        StepData::Dedup(progress) => assert_eq!(progress.duplicate_files, 1),
        other => panic!("unexpected dedup data: {:?}", other),
    }
    match &run.step(StepName::Batch).unwrap().data {
        StepData::Batch(result) => {
            assert_eq!(result.batch_name.as_deref(), Some("batch_001"));
            assert_eq!(result.file_count, 2);
        }
        other => panic!("unexpected batch data: {:?}", other),
    }
    match &run.step(StepName::Sync).unwrap().data {
        StepData::Sync(data) => {
            assert!(data.started);
            assert_eq!(data.status, Some(BatchStatus::Synced));
            assert_eq!(data.progress, Some(100.0));
            assert!(data.batch_id.is_some());
            assert!(!data.trace.is_empty());
        }
        other => panic!("unexpected sync data: {:?}", other),
    }

    assert_eq!(sorted_files(&fx).len(), 2);
    let batch = fx.store.batches().find_by_name("batch_001").await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Sorted);
    assert_eq!(fx.daemon.rescan_count(), 1);
}

#[tokio::test]
async fn test_empty_source_skips_later_stages() {
    let fx = Fixture::new().await;
    let orchestrator = fx.orchestrator(&fx.config(DebugSettings::default()));

    let run = orchestrator.run_pipeline("run-empty", None).await;

    assert!(run.errors.is_empty());
    let batch = run.step(StepName::Batch).unwrap();
    assert_eq!(batch.status, StepStatus::Skipped);
    assert_eq!(batch.message.as_deref(), Some("No eligible files for batching"));
    for name in [StepName::Sync, StepName::Sort] {
        let step = run.step(name).unwrap();
        assert_eq!(step.status, StepStatus::Skipped);
        assert_eq!(step.message.as_deref(), Some("No batch created"));
    }
    assert_eq!(run.step(StepName::Cleanup).unwrap().status, StepStatus::Completed);
    assert_eq!(fx.daemon.rescan_count(), 0);
}

#[tokio::test]
async fn test_rescan_failure_is_recorded_and_resumed_next_run() {
    let fx = Fixture::new().await;
    fx.source_file("a.jpg", b"alpha");
    fx.daemon
        .fail_rescans(SyncthingError::Unreachable("connection refused".into()));
    let orchestrator = fx.orchestrator(&fx.config(DebugSettings::default()));

    let first = orchestrator.run_pipeline("run-1", None).await;

    let sync = first.step(StepName::Sync).unwrap();
    assert_eq!(sync.status, StepStatus::Error);
    let sort = first.step(StepName::Sort).unwrap();
    assert_eq!(sort.status, StepStatus::Skipped);
    assert_eq!(sort.message.as_deref(), Some("Sorting deferred until sync completes"));
    assert_eq!(
        first.errors,
        vec!["sync: Unable to reach Syncthing: connection refused".to_string()]
    );
    let batch = fx.store.batches().find_by_name("batch_001").await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Error);

    fx.daemon.clear_rescan_error();
    let second = orchestrator.run_pipeline("run-2", None).await;

    assert!(second.errors.is_empty(), "unexpected errors: {:?}", second.errors);
    let blocked = second.step(StepName::Batch).unwrap();
    assert_eq!(blocked.status, StepStatus::Skipped);
    assert_eq!(blocked.message.as_deref(), Some("Batch 'batch_001' is still error"));
    assert_eq!(second.step(StepName::Sync).unwrap().status, StepStatus::Completed);
    assert_eq!(second.step(StepName::Sort).unwrap().status, StepStatus::Completed);
    assert_eq!(sorted_files(&fx), vec!["a.jpg".to_string()]);
}

#[tokio::test]
async fn test_incomplete_sync_warns_and_finishes_on_next_run() {
    let fx = Fixture::new().await;
    fx.source_file("a.jpg", b"alpha");
    fx.daemon.set_completion(40.0);
    let orchestrator = fx.orchestrator(&fx.config(DebugSettings::default()));

    let first = orchestrator.run_pipeline("run-1", None).await;

    let sync = first.step(StepName::Sync).unwrap();
    assert_eq!(sync.status, StepStatus::Warning);
    assert_eq!(sync.message.as_deref(), Some("Sync did not reach completion"));
    assert_eq!(first.errors, vec!["sync: Sync did not reach completion".to_string()]);
    assert_eq!(
        first.step(StepName::Sort).unwrap().message.as_deref(),
        Some("Sorting deferred until sync completes")
    );

    fx.daemon.set_completion(100.0);
    let second = orchestrator.run_pipeline("run-2", None).await;

    let sync = second.step(StepName::Sync).unwrap();
    assert_eq!(sync.status, StepStatus::Completed);
    match &sync.data {
        StepData::Sync(data) => assert!(!data.started),
        other => panic!("unexpected sync data: {:?}", other),
    }
    assert_eq!(second.step(StepName::Sort).unwrap().status, StepStatus::Completed);
    assert_eq!(fx.daemon.rescan_count(), 1);
}

#[tokio::test]
async fn test_still_syncing_batch_is_reported_as_skipped() {
    let fx = Fixture::new().await;
    fx.source_file("a.jpg", b"alpha");
    fx.daemon.set_completion(10.0);
    let orchestrator = fx.orchestrator(&fx.config(DebugSettings::default()));

    orchestrator.run_pipeline("run-1", None).await;
    let second = orchestrator.run_pipeline("run-2", None).await;

    let sync = second.step(StepName::Sync).unwrap();
    assert_eq!(sync.status, StepStatus::Skipped);
    assert_eq!(sync.message.as_deref(), Some("Batch already syncing"));
    assert_eq!(
        second.step(StepName::Sort).unwrap().message.as_deref(),
        Some("Sorting deferred until sync completes")
    );
}

#[tokio::test]
async fn test_synced_blocking_batch_is_sorted_before_new_batch() {
    let fx = Fixture::new().await;
    fx.source_file("a.jpg", b"alpha");
    let orchestrator = fx.orchestrator(&fx.config(DebugSettings::default()));

    orchestrator.run_dedup().await;
    assert_eq!(orchestrator.run_batch().await.status, StepStatus::Completed);
    assert_eq!(orchestrator.run_sync("batch_001").await.status, StepStatus::Completed);

    fx.source_file("b.jpg", b"bravo");
    let run = orchestrator.run_pipeline("run-1", None).await;

    assert!(run.errors.is_empty(), "unexpected errors: {:?}", run.errors);
    assert_eq!(
        names(&run),
        vec![
            StepName::Dedup,
            StepName::Batch,
            StepName::Sort,
            StepName::Batch,
            StepName::Sync,
            StepName::Sort,
            StepName::Cleanup
        ]
    );
    assert_eq!(run.steps[1].status, StepStatus::Skipped);
    assert_eq!(run.steps[1].message.as_deref(), Some("Batch 'batch_001' is still synced"));
    assert_eq!(run.steps[2].status, StepStatus::Completed);
    match &run.steps[3].data {
        StepData::Batch(result) => assert_eq!(result.batch_name.as_deref(), Some("batch_002")),
        other => panic!("unexpected batch data: {:?}", other),
    }
    assert_eq!(sorted_files(&fx), vec!["a.jpg".to_string(), "b.jpg".to_string()]);
}

#[tokio::test]
async fn test_run_broadcasts_lifecycle_events() {
    let fx = Fixture::new().await;
    fx.source_file("a.jpg", b"alpha");
    let mut rx = fx.events.subscribe();
    let orchestrator = fx.orchestrator(&fx.config(DebugSettings::default()));

    orchestrator.run_pipeline("run-events", None).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(
        events.first(),
        Some(&PipelineEvent::RunStarted {
            run_id: "run-events".into()
        })
    );
    assert_eq!(
        events.last(),
        Some(&PipelineEvent::RunFinished {
            run_id: "run-events".into(),
            errors: vec![]
        })
    );
    assert!(events.contains(&PipelineEvent::BatchSynced {
        batch: "batch_001".into()
    }));
    assert!(events.iter().any(|e| matches!(e, PipelineEvent::BatchCreated { file_count: 1, .. })));
    let stages = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::StageFinished { .. }))
        .count();
    assert_eq!(stages, 5);
}
