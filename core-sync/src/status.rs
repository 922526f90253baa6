//! Result and snapshot types reported by the sync stage.

use chrono::{DateTime, Utc};
use core_library::BatchStatus;
use core_runtime::config::PipelineConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Outcome of [`crate::SyncCoordinator::start`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStartResult {
    pub batch: String,
    pub started: bool,
    pub status: BatchStatus,
}

/// Replication progress of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub batch: String,
    pub status: BatchStatus,
    /// Percentage in `[0, 100]`
    pub progress: f64,
    pub synced_at: Option<DateTime<Utc>>,
    /// Why progress could not be read, when the daemon failed
    pub detail: Option<String>,
}

impl SyncStatus {
    pub fn is_synced(&self) -> bool {
        matches!(
            self.status,
            BatchStatus::Synced | BatchStatus::Sorting | BatchStatus::Sorted
        )
    }
}

/// Raw daemon state for troubleshooting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncDiagnostics {
    pub folder_id: Option<String>,
    pub device_id: Option<String>,
    pub last_error: Option<String>,
    pub system_status: Option<Map<String, Value>>,
    pub folder_status: Option<Map<String, Value>>,
    /// Failures hit while collecting the two status maps
    pub errors: Vec<String>,
}

/// One sample of a sync trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSnapshot {
    /// `pre-start`, `settle` or `poll`
    pub phase: String,
    pub timestamp: DateTime<Utc>,
    /// Folder state as reported by the daemon (`idle`, `scanning`, ...)
    pub state: Option<String>,
    pub status: Option<BatchStatus>,
    pub progress: Option<f64>,
    pub detail: Option<String>,
}

impl DaemonSnapshot {
    pub(crate) fn new(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            timestamp: Utc::now(),
            state: None,
            status: None,
            progress: None,
            detail: None,
        }
    }

    /// Whether the daemon is still scanning or pulling the folder.
    pub fn daemon_busy(&self) -> bool {
        match self.state.as_deref().map(str::to_lowercase) {
            Some(state) => state.contains("scan") || state == "syncing",
            None => false,
        }
    }
}

/// How [`crate::SyncCoordinator::wait_for_sync`] samples the daemon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    /// Time given to the daemon to notice the new batch before polling
    pub settle: Duration,
    pub interval: Duration,
    /// Upper bound on samples, settle phase included
    pub max_samples: usize,
}

impl PollPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            settle: config.workflow.settle_delay(),
            interval: config.syncthing.pipeline_poll_interval(),
            max_samples: config.workflow.trace_samples().max(1),
        }
    }
}

/// Final status of a monitored batch plus the samples taken on the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncWaitOutcome {
    pub status: SyncStatus,
    pub trace: Vec<DaemonSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_busy_states() {
        let mut snapshot = DaemonSnapshot::new("poll");
        assert!(!snapshot.daemon_busy());

        for (state, busy) in [
            ("idle", false),
            ("scanning", true),
            ("scan-waiting", true),
            ("syncing", true),
            ("sync-preparing", false),
        ] {
            snapshot.state = Some(state.to_string());
            assert_eq!(snapshot.daemon_busy(), busy, "state {}", state);
        }
    }

    #[test]
    fn test_poll_policy_from_config() {
        let config = PipelineConfig::builder()
            .poll_interval_sec(30.0)
            .settle_delay_sec(4.0)
            .trace_samples(10)
            .build()
            .unwrap();

        let policy = PollPolicy::from_config(&config);
        assert_eq!(policy.interval, Duration::from_secs(6));
        assert_eq!(policy.settle, Duration::from_secs(4));
        assert_eq!(policy.max_samples, 10);
    }
}
