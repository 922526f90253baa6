//! # Debug Controller
//!
//! Single-step control over a pipeline run.
//!
//! ## Overview
//!
//! When debug mode is on, the orchestrator reports each finished step to
//! the controller, which records it and (unless `auto_advance` is set)
//! suspends the run until [`DebugController::advance`] is called or the
//! step timeout elapses. A timeout is noted in the state so an operator can
//! tell that the run continued on its own.

use crate::orchestrator::StepObserver;
use crate::steps::{PipelineStepResult, StepName};
use async_trait::async_trait;
use core_runtime::config::DebugSettings;
use core_runtime::events::{EventBus, PipelineEvent};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

pub const MANUAL_CONTINUE_NOTE: &str = "Manual continue requested";

/// Snapshot of the controller, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugState {
    pub enabled: bool,
    pub auto_advance: bool,
    /// Zero waits indefinitely
    pub step_timeout_sec: f64,
    pub waiting: bool,
    /// Step the run is paused after
    pub current_step: Option<StepName>,
    pub last_step: Option<PipelineStepResult>,
    /// Most recent steps, oldest first
    pub history: Vec<PipelineStepResult>,
    pub note: Option<String>,
}

struct ControllerState {
    settings: DebugSettings,
    waiting: bool,
    current_step: Option<StepName>,
    last_step: Option<PipelineStepResult>,
    history: VecDeque<PipelineStepResult>,
    note: Option<String>,
}

impl ControllerState {
    fn new(settings: DebugSettings) -> Self {
        Self {
            settings,
            waiting: false,
            current_step: None,
            last_step: None,
            history: VecDeque::new(),
            note: None,
        }
    }

    fn snapshot(&self) -> DebugState {
        DebugState {
            enabled: self.settings.enabled,
            auto_advance: self.settings.auto_advance,
            step_timeout_sec: self.settings.step_timeout_sec,
            waiting: self.waiting,
            current_step: self.current_step,
            last_step: self.last_step.clone(),
            history: self.history.iter().cloned().collect(),
            note: self.note.clone(),
        }
    }
}

pub struct DebugController {
    state: Mutex<ControllerState>,
    resume: Notify,
    events: EventBus,
}

impl DebugController {
    pub fn new(settings: DebugSettings, events: EventBus) -> Self {
        Self {
            state: Mutex::new(ControllerState::new(settings)),
            resume: Notify::new(),
            events,
        }
    }

    /// Reset for a new run, keeping nothing from the previous one.
    pub async fn prepare(&self, settings: DebugSettings) {
        let mut state = self.state.lock().await;
        *state = ControllerState::new(settings);
    }

    pub async fn snapshot(&self) -> DebugState {
        self.state.lock().await.snapshot()
    }

    /// Release a paused run. Has no effect on a run that is not waiting,
    /// apart from the note.
    pub async fn advance(&self) -> DebugState {
        let mut state = self.state.lock().await;
        state.note = Some(MANUAL_CONTINUE_NOTE.to_string());
        if state.waiting {
            state.waiting = false;
            // Wakes only a registered pause; nothing is stored for later ones.
            self.resume.notify_waiters();
            info!(step = ?state.current_step, "Manual continue requested");
        }
        state.snapshot()
    }

    /// Clear the pause markers once a run is over.
    pub async fn finish(&self) {
        let mut state = self.state.lock().await;
        state.waiting = false;
        state.current_step = None;
    }

    async fn pause(&self, step: StepName, timeout: Option<Duration>) {
        // Registered under the lock that publishes `waiting`, so an advance
        // seen as waiting always reaches this pause and no other.
        let resumed = {
            let mut state = self.state.lock().await;
            state.waiting = true;
            state.current_step = Some(step);
            self.resume.notified()
        };
        self.events
            .emit(PipelineEvent::DebugPaused {
                step: step.to_string(),
            })
            .ok();
        debug!(%step, ?timeout, "Run paused");

        let timed_out = match timeout {
            Some(limit) => tokio::time::timeout(limit, resumed).await.is_err(),
            None => {
                resumed.await;
                false
            }
        };

        let mut state = self.state.lock().await;
        state.waiting = false;
        state.current_step = None;
        if timed_out {
            info!(%step, "Debug pause timed out");
            state.note = Some(format!("Step '{}' auto-continued after timeout", step));
        }
    }
}

#[async_trait]
impl StepObserver for DebugController {
    async fn after_step(&self, step: &PipelineStepResult) {
        let (pauses, timeout) = {
            let mut state = self.state.lock().await;
            let limit = state.settings.history_limit.max(1);
            state.history.push_back(step.clone());
            while state.history.len() > limit {
                state.history.pop_front();
            }
            state.last_step = Some(step.clone());
            (state.settings.pauses(), state.settings.step_timeout())
        };

        if pauses {
            self.pause(step.name, timeout).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{StepData, StepStatus};
    use std::sync::Arc;

    fn settings(auto_advance: bool, timeout: f64, history_limit: usize) -> DebugSettings {
        DebugSettings {
            enabled: true,
            auto_advance,
            step_timeout_sec: timeout,
            history_limit,
        }
    }

    fn step(name: StepName) -> PipelineStepResult {
        PipelineStepResult::new(name, StepStatus::Completed, StepData::None)
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let controller = DebugController::new(settings(true, 0.0, 2), EventBus::default());

        controller.after_step(&step(StepName::Dedup)).await;
        controller.after_step(&step(StepName::Batch)).await;
        controller.after_step(&step(StepName::Sync)).await;

        let state = controller.snapshot().await;
        let names: Vec<_> = state.history.iter().map(|s| s.name).collect();
        assert_eq!(names, vec![StepName::Batch, StepName::Sync]);
        assert_eq!(state.last_step.map(|s| s.name), Some(StepName::Sync));
        assert!(!state.waiting);
    }

    #[tokio::test]
    async fn test_timeout_auto_continues_with_note() {
        let controller = DebugController::new(settings(false, 0.01, 25), EventBus::default());

        controller.after_step(&step(StepName::Batch)).await;

        let state = controller.snapshot().await;
        assert!(!state.waiting);
        assert_eq!(
            state.note.as_deref(),
            Some("Step 'batch' auto-continued after timeout")
        );
    }

    #[tokio::test]
    async fn test_advance_releases_pause() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let controller = Arc::new(DebugController::new(settings(false, 0.0, 25), events));

        let paused = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.after_step(&step(StepName::Dedup)).await })
        };

        let event = rx.recv().await.unwrap();
        assert_eq!(event, PipelineEvent::DebugPaused { step: "dedup".into() });
        let waiting = controller.snapshot().await;
        assert!(waiting.waiting);
        assert_eq!(waiting.current_step, Some(StepName::Dedup));

        let state = controller.advance().await;
        assert_eq!(state.note.as_deref(), Some(MANUAL_CONTINUE_NOTE));
        paused.await.unwrap();

        let state = controller.snapshot().await;
        assert!(!state.waiting);
        assert!(state.current_step.is_none());
    }

    #[tokio::test]
    async fn test_advance_without_pause_does_not_skip_next_pause() {
        let controller = DebugController::new(settings(false, 0.01, 25), EventBus::default());

        controller.advance().await;
        controller.after_step(&step(StepName::Sort)).await;

        let state = controller.snapshot().await;
        assert_eq!(
            state.note.as_deref(),
            Some("Step 'sort' auto-continued after timeout")
        );
    }

    #[tokio::test]
    async fn test_advance_racing_a_timeout_does_not_skip_next_pause() {
        let controller = DebugController::new(settings(false, 0.05, 25), EventBus::default());

        // A pause whose wait already timed out but which has not yet
        // cleared `waiting` when the advance arrives.
        controller.state.lock().await.waiting = true;
        let state = controller.advance().await;
        assert!(!state.waiting);

        controller.after_step(&step(StepName::Cleanup)).await;

        let state = controller.snapshot().await;
        assert_eq!(
            state.note.as_deref(),
            Some("Step 'cleanup' auto-continued after timeout")
        );
    }
}
