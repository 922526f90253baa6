//! # Pipeline Orchestrator
//!
//! Runs the stages in their fixed order and turns each outcome into a
//! [`PipelineStepResult`].
//!
//! ## Overview
//!
//! ```text
//! dedup -> batch -> [sort blocking batch -> batch] -> sync -> post-sync delay -> sort -> cleanup
//! ```
//!
//! A failing stage is recorded in the run's error list and the run moves on;
//! stages that depend on an earlier one are reported as skipped with the
//! reason. When allocation is refused because a previous batch is still
//! `pending`, `syncing` or in `error`, the sync stage picks that batch up so
//! an interrupted run resumes where it stopped.

use crate::cleanup::CleanupService;
use crate::overview::{Overview, OverviewConfig, RECENT_BATCH_LIMIT};
use crate::steps::{
    PipelineRunResult, PipelineStepResult, StepData, StepName, StepStatus, SyncStepData,
};
use crate::Result;
use async_trait::async_trait;
use core_ingest::{BatchAllocator, BatchCreationResult, DedupEngine, DedupOutcome, NO_ELIGIBLE_FILES};
use core_library::{BatchStatus, PipelineStore};
use core_runtime::config::PipelineConfig;
use core_runtime::events::{EventBus, PipelineEvent};
use core_sort::SortResolver;
use core_sync::{PollPolicy, SyncCoordinator, SyncStatus};
use provider_syncthing::SyncDaemon;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

pub const DEDUP_ALREADY_RUNNING: &str = "Deduplication already running";
pub const BATCH_ALREADY_SYNCING: &str = "Batch already syncing";
pub const SYNC_INCOMPLETE: &str = "Sync did not reach completion";
pub const SORT_DEFERRED: &str = "Sorting deferred until sync completes";
pub const NO_BATCH_CREATED: &str = "No batch created";

/// Receives every finished step of a run, in order.
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn after_step(&self, step: &PipelineStepResult);
}

/// What the batch step left for the rest of the run.
enum BatchOutcome {
    Created(String),
    Blocked(String, BatchStatus),
    Nothing,
}

impl BatchOutcome {
    fn of(step: &PipelineStepResult) -> Self {
        let StepData::Batch(result) = &step.data else {
            return BatchOutcome::Nothing;
        };
        match (&result.batch_name, &result.blocking_batch, result.blocking_status) {
            (Some(name), _, _) if result.created => BatchOutcome::Created(name.clone()),
            (_, Some(name), Some(status)) => BatchOutcome::Blocked(name.clone(), status),
            _ => BatchOutcome::Nothing,
        }
    }

    /// Batch the sync stage should work on, if any.
    fn sync_target(self) -> Option<String> {
        match self {
            BatchOutcome::Created(name) => Some(name),
            BatchOutcome::Blocked(
                name,
                BatchStatus::Pending | BatchStatus::Syncing | BatchStatus::Error,
            ) => Some(name),
            _ => None,
        }
    }
}

pub struct PipelineOrchestrator {
    store: PipelineStore,
    dedup: DedupEngine,
    allocator: BatchAllocator,
    sync: SyncCoordinator,
    sorter: SortResolver,
    cleanup: CleanupService,
    events: EventBus,
    poll_policy: PollPolicy,
    post_sync_delay: Duration,
    overview_config: OverviewConfig,
}

impl PipelineOrchestrator {
    /// Build every stage from `config`.
    ///
    /// # Errors
    ///
    /// Fails on configuration the stages cannot work with (unsupported
    /// hash algorithm, malformed naming or folder pattern).
    pub fn from_config(
        store: PipelineStore,
        daemon: Arc<dyn SyncDaemon>,
        config: &PipelineConfig,
        events: EventBus,
    ) -> Result<Self> {
        Ok(Self {
            dedup: DedupEngine::from_config(store.clone(), config)?,
            allocator: BatchAllocator::from_config(store.clone(), config)?,
            sync: SyncCoordinator::from_config(store.clone(), daemon, config),
            sorter: SortResolver::from_config(store.clone(), config)?,
            cleanup: CleanupService::from_config(config)?,
            events,
            poll_policy: PollPolicy::from_config(config),
            post_sync_delay: config.workflow.post_sync_delay(),
            overview_config: OverviewConfig::from_config(config),
            store,
        })
    }

    pub fn store(&self) -> &PipelineStore {
        &self.store
    }

    pub fn dedup(&self) -> &DedupEngine {
        &self.dedup
    }

    pub fn allocator(&self) -> &BatchAllocator {
        &self.allocator
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    pub fn sorter(&self) -> &SortResolver {
        &self.sorter
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ========================================================================
    // Stages
    // ========================================================================

    pub async fn run_dedup(&self) -> PipelineStepResult {
        match self.dedup.run().await {
            DedupOutcome::Completed(progress) => match progress.error.clone() {
                Some(message) => PipelineStepResult::new(
                    StepName::Dedup,
                    StepStatus::Error,
                    StepData::Dedup(progress),
                )
                .with_message(message),
                None => PipelineStepResult::new(
                    StepName::Dedup,
                    StepStatus::Completed,
                    StepData::Dedup(progress),
                ),
            },
            DedupOutcome::AlreadyRunning(progress) => PipelineStepResult::new(
                StepName::Dedup,
                StepStatus::Error,
                StepData::Dedup(progress),
            )
            .with_message(DEDUP_ALREADY_RUNNING),
        }
    }

    pub async fn run_batch(&self) -> PipelineStepResult {
        match self.allocator.create_batch().await {
            Ok(result) if result.created => {
                self.emit(PipelineEvent::BatchCreated {
                    batch: result.batch_name.clone().unwrap_or_default(),
                    file_count: result.file_count,
                    size_bytes: result.size_bytes,
                });
                batch_step(StepStatus::Completed, result)
            }
            Ok(result) => {
                let reason = result
                    .reason
                    .clone()
                    .unwrap_or_else(|| NO_ELIGIBLE_FILES.to_string());
                batch_step(StepStatus::Skipped, result).with_message(reason)
            }
            Err(e) => PipelineStepResult::error(StepName::Batch, e.to_string()),
        }
    }

    /// Start syncing `batch_name` and wait for it within the poll policy.
    ///
    /// A batch that is already `syncing` is not restarted; its progress is
    /// checked once instead.
    pub async fn run_sync(&self, batch_name: &str) -> PipelineStepResult {
        let mut data = SyncStepData {
            batch: batch_name.to_string(),
            batch_id: None,
            started: false,
            status: None,
            progress: None,
            synced_at: None,
            detail: None,
            settle_delay_sec: self.poll_policy.settle.as_secs_f64(),
            post_sync_delay_sec: self.post_sync_delay.as_secs_f64(),
            trace: vec![self.sync.snapshot("pre-start").await],
        };

        let start = match self.sync.start(batch_name).await {
            Ok(start) => start,
            Err(e) => return self.sync_step(data, StepStatus::Error, Some(e.to_string())).await,
        };
        data.started = start.started;
        data.status = Some(start.status);

        if start.started {
            return match self.sync.wait_for_sync(batch_name, self.poll_policy).await {
                Ok(outcome) => {
                    data.trace.extend(outcome.trace);
                    let synced = apply_status(&mut data, &outcome.status);
                    if synced {
                        self.emit(PipelineEvent::BatchSynced {
                            batch: batch_name.to_string(),
                        });
                        self.sync_step(data, StepStatus::Completed, None).await
                    } else {
                        self.sync_step(data, StepStatus::Warning, Some(SYNC_INCOMPLETE.to_string()))
                            .await
                    }
                }
                Err(e) => self.sync_step(data, StepStatus::Error, Some(e.to_string())).await,
            };
        }

        match self.sync.status(batch_name).await {
            Ok(status) => {
                if apply_status(&mut data, &status) {
                    if start.status == BatchStatus::Syncing {
                        self.emit(PipelineEvent::BatchSynced {
                            batch: batch_name.to_string(),
                        });
                    }
                    self.sync_step(data, StepStatus::Completed, None).await
                } else {
                    self.sync_step(data, StepStatus::Skipped, Some(BATCH_ALREADY_SYNCING.to_string()))
                        .await
                }
            }
            Err(e) => self.sync_step(data, StepStatus::Error, Some(e.to_string())).await,
        }
    }

    pub async fn run_sort(&self, batch_name: &str) -> PipelineStepResult {
        match self.sorter.start(batch_name).await {
            Ok(result) if result.started => {
                self.emit(PipelineEvent::BatchSorted {
                    batch: result.batch.clone(),
                    sorted_files: result.sorted_files,
                    skipped_files: result.skipped_files,
                });
                PipelineStepResult::new(StepName::Sort, StepStatus::Completed, StepData::Sort(result))
            }
            Ok(result) => {
                let reason = result.reason.clone().unwrap_or_default();
                PipelineStepResult::new(StepName::Sort, StepStatus::Skipped, StepData::Sort(result))
                    .with_message(reason)
            }
            Err(e) => PipelineStepResult::error(StepName::Sort, e.to_string()),
        }
    }

    pub async fn run_cleanup(&self) -> PipelineStepResult {
        match self.cleanup.run().await {
            Ok(report) => PipelineStepResult::new(
                StepName::Cleanup,
                StepStatus::Completed,
                StepData::Cleanup(report),
            ),
            Err(e) => PipelineStepResult::error(StepName::Cleanup, e.to_string()),
        }
    }

    // ========================================================================
    // Full run
    // ========================================================================

    /// Execute one complete run. Stage failures end up in the result, never
    /// as an `Err`.
    #[instrument(skip(self, observer))]
    pub async fn run_pipeline(
        &self,
        run_id: &str,
        observer: Option<&dyn StepObserver>,
    ) -> PipelineRunResult {
        let mut run = PipelineRunResult::new(run_id);
        info!("Pipeline run started");
        self.emit(PipelineEvent::RunStarted {
            run_id: run_id.to_string(),
        });

        let dedup = self.run_dedup().await;
        self.finish_step(&mut run, dedup, observer).await;

        let batch = self.run_batch().await;
        let outcome = BatchOutcome::of(&batch);
        self.finish_step(&mut run, batch, observer).await;

        let outcome = match outcome {
            BatchOutcome::Blocked(name, BatchStatus::Synced | BatchStatus::Sorting) => {
                info!(batch = %name, "Sorting blocking batch before allocating");
                let sort = self.run_sort(&name).await;
                self.finish_step(&mut run, sort, observer).await;

                let retry = self.run_batch().await;
                let outcome = BatchOutcome::of(&retry);
                self.finish_step(&mut run, retry, observer).await;
                outcome
            }
            other => other,
        };

        match outcome.sync_target() {
            Some(name) => {
                let sync = self.run_sync(&name).await;
                let synced = sync.is_completed();
                self.finish_step(&mut run, sync, observer).await;

                if synced {
                    if !self.post_sync_delay.is_zero() {
                        tokio::time::sleep(self.post_sync_delay).await;
                    }
                    let sort = self.run_sort(&name).await;
                    self.finish_step(&mut run, sort, observer).await;
                } else {
                    let sort = PipelineStepResult::skipped(StepName::Sort, SORT_DEFERRED);
                    self.finish_step(&mut run, sort, observer).await;
                }
            }
            None => {
                let sync = PipelineStepResult::skipped(StepName::Sync, NO_BATCH_CREATED);
                self.finish_step(&mut run, sync, observer).await;
                let sort = PipelineStepResult::skipped(StepName::Sort, NO_BATCH_CREATED);
                self.finish_step(&mut run, sort, observer).await;
            }
        }

        let cleanup = self.run_cleanup().await;
        self.finish_step(&mut run, cleanup, observer).await;

        run.finish();
        if run.errors.is_empty() {
            info!("Pipeline run finished");
        } else {
            warn!(errors = ?run.errors, "Pipeline run finished with errors");
        }
        self.emit(PipelineEvent::RunFinished {
            run_id: run_id.to_string(),
            errors: run.errors.clone(),
        });
        run
    }

    /// Live status of every stage; nothing is cached between calls.
    pub async fn overview(&self, running: bool, last_run: Option<PipelineRunResult>) -> Result<Overview> {
        let dedup = self.dedup.status().await;
        let syncing_batches = self.sync.refresh_syncing_batches().await?;
        let recent_batches = self.store.batches().recent(RECENT_BATCH_LIMIT).await?;
        let file_counts = self.store.files().count_by_status().await?;

        let mut config = self.overview_config.clone();
        config.last_error = self.sync.last_error().await;

        Ok(Overview {
            running,
            dedup,
            recent_batches,
            file_counts,
            syncing_batches,
            config,
            last_run,
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn finish_step(
        &self,
        run: &mut PipelineRunResult,
        step: PipelineStepResult,
        observer: Option<&dyn StepObserver>,
    ) {
        match step.status {
            StepStatus::Error => error!(step = %step.name, message = ?step.message, "Step failed"),
            StepStatus::Warning => warn!(step = %step.name, message = ?step.message, "Step finished with warning"),
            _ => info!(step = %step.name, status = %step.status, message = ?step.message, "Step finished"),
        }
        self.emit(PipelineEvent::StageFinished {
            stage: step.name.to_string(),
            status: step.status.to_string(),
            message: step.message.clone(),
        });
        if let Some(observer) = observer {
            observer.after_step(&step).await;
        }
        run.push(step);
    }

    async fn sync_step(
        &self,
        mut data: SyncStepData,
        status: StepStatus,
        message: Option<String>,
    ) -> PipelineStepResult {
        if let Ok(Some(record)) = self.store.batches().find_by_name(&data.batch).await {
            data.batch_id = Some(record.id);
        }
        let step = PipelineStepResult::new(StepName::Sync, status, StepData::Sync(Box::new(data)));
        match message {
            Some(message) => step.with_message(message),
            None => step,
        }
    }

    fn emit(&self, event: PipelineEvent) {
        // Nobody listening is fine.
        self.events.emit(event).ok();
    }
}

fn batch_step(status: StepStatus, result: BatchCreationResult) -> PipelineStepResult {
    PipelineStepResult::new(StepName::Batch, status, StepData::Batch(Box::new(result)))
}

/// Copy the observed status into `data`; returns whether the batch is synced.
fn apply_status(data: &mut SyncStepData, status: &SyncStatus) -> bool {
    data.status = Some(status.status);
    data.progress = Some(status.progress);
    data.synced_at = status.synced_at;
    data.detail = status.detail.clone();
    status.is_synced()
}
