//! Progress notifications. Purely observational: nothing in the engine
//! depends on whether an event was delivered.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::decision::Decision;
use crate::goal::ExecutionSummary;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PilotEvent {
    Status {
        message: String,
    },
    AiThinking {
        step: usize,
        goal: String,
    },
    AiDecision {
        step: usize,
        decision: Decision,
    },
    ActionStart {
        action: String,
        description: String,
    },
    ActionComplete {
        action: String,
        success: bool,
        attempts: u32,
        error: Option<String>,
    },
    Retry {
        action: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error: String,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
    ExecutionComplete {
        summary: ExecutionSummary,
    },
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: &PilotEvent);
}

/// Drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &PilotEvent) {}
}

/// Logs each event through `tracing`.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &PilotEvent) {
        match event {
            PilotEvent::Warning { message } => warn!("{}", message),
            PilotEvent::Error { message } => warn!("error: {}", message),
            PilotEvent::Retry {
                action,
                attempt,
                max_attempts,
                error,
                ..
            } => warn!("{} failed (attempt {}/{}): {}", action, attempt, max_attempts, error),
            PilotEvent::Status { message } => info!("{}", message),
            PilotEvent::ExecutionComplete { summary } => info!(
                "done: {}/{} steps ok, goal completed: {}",
                summary.successful_steps, summary.total_steps, summary.goal_completed
            ),
            other => debug!("{:?}", other),
        }
    }
}

/// Fans events out to any number of subscribers. Shared across sessions.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<PilotEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PilotEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &PilotEvent) {
        // no receivers is fine
        let _ = self.tx.send(event.clone());
    }
}
