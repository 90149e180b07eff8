//! Pipeline status events.
//!
//! Events are serialized to JSON and fanned out on a broadcast channel; the
//! `/ws` endpoint forwards them to connected clients. Publishing never fails,
//! even with no subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::errors::WorkspaceError;
use crate::workspace::{BuildWorkspace, RequestId, WorkspaceStage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// `None` for events not tied to one request (gate, shutdown purge).
    pub request_id: Option<RequestId>,
    pub stage: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(
        request_id: Option<RequestId>,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            stage: stage.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusPublisher {
    tx: broadcast::Sender<String>,
}

impl StatusPublisher {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }

    /// A publisher whose events go nowhere until someone subscribes.
    pub fn detached() -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: StatusEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(e) => warn!(error = %e, "failed to serialize status event"),
        }
    }

    /// Move `workspace` to `next` and announce it.
    pub fn advance(
        &self,
        workspace: &mut BuildWorkspace,
        next: WorkspaceStage,
        message: impl Into<String>,
    ) -> Result<(), WorkspaceError> {
        workspace.advance(next)?;
        let message = message.into();
        info!(request_id = %workspace.request_id(), stage = %next, "{}", message);
        self.publish(StatusEvent::new(
            Some(workspace.request_id().clone()),
            next.as_str(),
            message,
        ));
        Ok(())
    }
}
