//! Step and run results reported by the orchestrator.

use crate::cleanup::CleanupReport;
use chrono::{DateTime, Utc};
use core_ingest::{BatchCreationResult, DedupProgress};
use core_library::BatchStatus;
use core_sort::SortResult;
use core_sync::DaemonSnapshot;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepName {
    Dedup,
    Batch,
    Sync,
    Sort,
    Cleanup,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Dedup => "dedup",
            StepName::Batch => "batch",
            StepName::Sync => "sync",
            StepName::Sort => "sort",
            StepName::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Skipped,
    Warning,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Completed => "completed",
            StepStatus::Skipped => "skipped",
            StepStatus::Warning => "warning",
            StepStatus::Error => "error",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the sync stage observed for its batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStepData {
    pub batch: String,
    pub batch_id: Option<i64>,
    pub started: bool,
    pub status: Option<BatchStatus>,
    pub progress: Option<f64>,
    pub synced_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
    pub settle_delay_sec: f64,
    pub post_sync_delay_sec: f64,
    pub trace: Vec<DaemonSnapshot>,
}

/// Stage-specific payload of a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepData {
    None,
    Dedup(DedupProgress),
    Batch(Box<BatchCreationResult>),
    Sync(Box<SyncStepData>),
    Sort(SortResult),
    Cleanup(CleanupReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStepResult {
    pub name: StepName,
    pub status: StepStatus,
    pub message: Option<String>,
    pub data: StepData,
}

impl PipelineStepResult {
    pub fn new(name: StepName, status: StepStatus, data: StepData) -> Self {
        Self {
            name,
            status,
            message: None,
            data,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn skipped(name: StepName, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Skipped, StepData::None).with_message(message)
    }

    pub fn error(name: StepName, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Error, StepData::None).with_message(message)
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    /// Entry for the run's error list, if this step contributes one.
    pub fn error_entry(&self) -> Option<String> {
        match self.status {
            StepStatus::Error | StepStatus::Warning => Some(format!(
                "{}: {}",
                self.name,
                self.message.as_deref().unwrap_or(self.status.as_str())
            )),
            _ => None,
        }
    }
}

/// Ordered steps of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRunResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<PipelineStepResult>,
    pub errors: Vec<String>,
}

impl PipelineRunResult {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, step: PipelineStepResult) {
        if let Some(entry) = step.error_entry() {
            self.errors.push(entry);
        }
        self.steps.push(step);
    }

    pub fn step(&self, name: StepName) -> Option<&PipelineStepResult> {
        self.steps.iter().rev().find(|step| step.name == name)
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}
