//! # Workflow Manager
//!
//! Runs the pipeline in the background, one run at a time.
//!
//! ## Overview
//!
//! [`WorkflowManager::trigger`] spawns a run unless one is already active,
//! in which case it returns `false` and nothing is queued. The result of the
//! last run, the error of a run that died, and the debug controller state
//! stay available until the next trigger replaces them.

use crate::debug::{DebugController, DebugState};
use crate::orchestrator::{PipelineOrchestrator, StepObserver};
use crate::overview::Overview;
use crate::steps::PipelineRunResult;
use crate::Result;
use core_runtime::config::DebugSettings;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};
use uuid::Uuid;

type RunHandle = Shared<BoxFuture<'static, ()>>;

/// Status of the workflow as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStatus {
    pub running: bool,
    pub last_result: Option<PipelineRunResult>,
    /// Set when the last run terminated abnormally
    pub error: Option<String>,
    pub debug: DebugState,
}

struct WorkflowInner {
    orchestrator: Arc<PipelineOrchestrator>,
    debug: Arc<DebugController>,
    debug_settings: RwLock<DebugSettings>,
    running: AtomicBool,
    run: Mutex<Option<RunHandle>>,
    last_result: RwLock<Option<PipelineRunResult>>,
    last_error: RwLock<Option<String>>,
}

#[derive(Clone)]
pub struct WorkflowManager {
    inner: Arc<WorkflowInner>,
}

impl WorkflowManager {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, debug_settings: DebugSettings) -> Self {
        let debug = Arc::new(DebugController::new(
            debug_settings.clone(),
            orchestrator.events().clone(),
        ));
        Self {
            inner: Arc::new(WorkflowInner {
                orchestrator,
                debug,
                debug_settings: RwLock::new(debug_settings),
                running: AtomicBool::new(false),
                run: Mutex::new(None),
                last_result: RwLock::new(None),
                last_error: RwLock::new(None),
            }),
        }
    }

    pub fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        &self.inner.orchestrator
    }

    /// Debug settings applied from the next trigger on.
    pub async fn set_debug_settings(&self, settings: DebugSettings) {
        *self.inner.debug_settings.write().await = settings;
    }

    /// Start a run in the background. Returns `false` if one is active.
    pub async fn trigger(&self) -> bool {
        let mut run = self.inner.run.lock().await;
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Pipeline run already active, trigger ignored");
            return false;
        }

        let settings = self.inner.debug_settings.read().await.clone();
        self.inner.debug.prepare(settings.clone()).await;
        *self.inner.last_error.write().await = None;

        let run_id = Uuid::new_v4().to_string();
        info!(%run_id, debug = settings.enabled, "Pipeline run triggered");

        let pipeline = {
            let orchestrator = Arc::clone(&self.inner.orchestrator);
            let debug = Arc::clone(&self.inner.debug);
            let run_id = run_id.clone();
            tokio::spawn(async move {
                let observer = settings
                    .enabled
                    .then_some(debug.as_ref() as &dyn StepObserver);
                orchestrator.run_pipeline(&run_id, observer).await
            })
        };

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            match pipeline.await {
                Ok(result) => *inner.last_result.write().await = Some(result),
                Err(e) => {
                    error!(%run_id, error = %e, "Pipeline run aborted");
                    *inner.last_error.write().await = Some(e.to_string());
                }
            }
            inner.debug.finish().await;
            inner.running.store(false, Ordering::SeqCst);
        });
        *run = Some(handle.map(|_| ()).boxed().shared());
        true
    }

    /// Wait for the active run, if any, to finish.
    pub async fn wait_for_completion(&self) {
        let handle = self.inner.run.lock().await.clone();
        if let Some(handle) = handle {
            handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub async fn last_result(&self) -> Option<PipelineRunResult> {
        self.inner.last_result.read().await.clone()
    }

    pub async fn status(&self) -> WorkflowStatus {
        WorkflowStatus {
            running: self.is_running(),
            last_result: self.last_result().await,
            error: self.inner.last_error.read().await.clone(),
            debug: self.inner.debug.snapshot().await,
        }
    }

    pub async fn overview(&self) -> Result<Overview> {
        self.inner
            .orchestrator
            .overview(self.is_running(), self.last_result().await)
            .await
    }

    pub async fn debug_state(&self) -> DebugState {
        self.inner.debug.snapshot().await
    }

    /// Release a run paused in debug mode.
    pub async fn advance_debug(&self) -> DebugState {
        self.inner.debug.advance().await
    }
}
