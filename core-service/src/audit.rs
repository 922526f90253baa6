//! Persistence of pipeline events and configuration changes.

use crate::Result;
use core_library::PipelineStore;
use core_runtime::config::{ConfigChange, PipelineConfig};
use core_runtime::events::{EventBus, PipelineEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Writes every [`PipelineEvent`] into the `events` table.
#[derive(Clone)]
pub struct EventRecorder {
    store: PipelineStore,
}

impl EventRecorder {
    pub fn new(store: PipelineStore) -> Self {
        Self { store }
    }

    pub async fn record(&self, event: &PipelineEvent) -> Result<i64> {
        let context = serde_json::to_value(event).ok();
        let id = self
            .store
            .audit()
            .record_event(
                event.module(),
                event.level().as_str(),
                &event.description(),
                context.as_ref(),
            )
            .await?;
        Ok(id)
    }

    /// Follow `bus` until it closes. Lagging drops the missed events.
    pub fn spawn(self, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.record(&event).await {
                            warn!(error = %e, "Failed to persist pipeline event");
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Event recorder lagged behind");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event bus closed, recorder stopping");
                        break;
                    }
                }
            }
        })
    }
}

/// Log every key that differs between `previous` and `current`.
pub async fn record_config_update(
    store: &PipelineStore,
    previous: &PipelineConfig,
    current: &PipelineConfig,
    actor: &str,
) -> Result<Vec<ConfigChange>> {
    let changes = previous.diff(current);
    if !changes.is_empty() {
        store.audit().record_config_changes(&changes, actor).await?;
        debug!(count = changes.len(), %actor, "Configuration changes recorded");
    }
    Ok(changes)
}
