//! # Event Bus System
//!
//! Broadcasts pipeline lifecycle events using `tokio::sync::broadcast` so that
//! observers (the audit recorder, a UI, tests) can follow a run without being
//! coupled to the orchestrator.
//!
//! ## Overview
//!
//! - **PipelineEvent**: tagged enum describing run, stage and batch milestones
//! - **EventBus**: cloneable handle around a broadcast sender
//!
//! ```rust
//! use core_runtime::events::{EventBus, PipelineEvent};
//!
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//! bus.emit(PipelineEvent::BatchSynced { batch: "batch_001".into() }).ok();
//! assert!(rx.try_recv().is_ok());
//! ```
//!
//! Emitting without subscribers returns an error that callers are free to
//! ignore; events are advisory and never part of the persisted state machine.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::SendError};

/// Default per-subscriber buffer size.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Severity attached to an event when it is written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warning => "warning",
            EventLevel::Error => "error",
        }
    }
}

/// Events published while the pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
    },
    RunFinished {
        run_id: String,
        errors: Vec<String>,
    },
    StageFinished {
        stage: String,
        status: String,
        message: Option<String>,
    },
    BatchCreated {
        batch: String,
        file_count: u64,
        size_bytes: u64,
    },
    BatchSynced {
        batch: String,
    },
    BatchSorted {
        batch: String,
        sorted_files: u64,
        skipped_files: u64,
    },
    DebugPaused {
        step: String,
    },
}

impl PipelineEvent {
    /// Component that produced the event.
    pub fn module(&self) -> &'static str {
        match self {
            PipelineEvent::RunStarted { .. }
            | PipelineEvent::RunFinished { .. }
            | PipelineEvent::StageFinished { .. } => "workflow",
            PipelineEvent::BatchCreated { .. } => "batch",
            PipelineEvent::BatchSynced { .. } => "sync",
            PipelineEvent::BatchSorted { .. } => "sort",
            PipelineEvent::DebugPaused { .. } => "debug",
        }
    }

    pub fn level(&self) -> EventLevel {
        match self {
            PipelineEvent::RunFinished { errors, .. } if !errors.is_empty() => EventLevel::Warning,
            PipelineEvent::StageFinished { status, .. } if status == "error" => EventLevel::Error,
            PipelineEvent::StageFinished { status, .. } if status == "warning" => {
                EventLevel::Warning
            }
            _ => EventLevel::Info,
        }
    }

    /// Returns a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            PipelineEvent::RunStarted { run_id } => format!("Pipeline run {} started", run_id),
            PipelineEvent::RunFinished { run_id, errors } => {
                if errors.is_empty() {
                    format!("Pipeline run {} finished", run_id)
                } else {
                    format!(
                        "Pipeline run {} finished with {} error(s)",
                        run_id,
                        errors.len()
                    )
                }
            }
            PipelineEvent::StageFinished { stage, status, .. } => {
                format!("Stage {} {}", stage, status)
            }
            PipelineEvent::BatchCreated {
                batch, file_count, ..
            } => format!("Batch {} created with {} file(s)", batch, file_count),
            PipelineEvent::BatchSynced { batch } => format!("Batch {} synced", batch),
            PipelineEvent::BatchSorted {
                batch, sorted_files, ..
            } => format!("Batch {} sorted ({} file(s))", batch, sorted_files),
            PipelineEvent::DebugPaused { step } => {
                format!("Run paused after step {}", step)
            }
        }
    }
}

/// Central broadcast channel for [`PipelineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Creates a new event bus with the given per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error when nobody is listening.
    pub fn emit(&self, event: PipelineEvent) -> Result<usize, SendError<PipelineEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber; past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let delivered = bus
            .emit(PipelineEvent::BatchCreated {
                batch: "batch_001".to_string(),
                file_count: 2,
                size_bytes: 10,
            })
            .unwrap();
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.module(), "batch");
        assert_eq!(event.description(), "Batch batch_001 created with 2 file(s)");
    }

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::default();
        assert!(bus
            .emit(PipelineEvent::BatchSynced {
                batch: "batch_001".to_string()
            })
            .is_err());
    }

    #[test]
    fn test_event_levels() {
        let failed = PipelineEvent::StageFinished {
            stage: "sync".to_string(),
            status: "error".to_string(),
            message: Some("daemon unreachable".to_string()),
        };
        assert_eq!(failed.level(), EventLevel::Error);

        let finished = PipelineEvent::RunFinished {
            run_id: "r".to_string(),
            errors: vec!["sync: boom".to_string()],
        };
        assert_eq!(finished.level(), EventLevel::Warning);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = PipelineEvent::DebugPaused {
            step: "batch".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "DebugPaused");
        assert_eq!(json["payload"]["step"], "batch");
    }
}
