//! Execution lifecycle events.
//!
//! Every state transition of an execution record is reported to an
//! [`EventSink`]. Sinks are synchronous and must not block: the queue calls
//! them inline after the store write succeeded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::execution::{ExecutionRecord, ExecutionState};

/// One execution state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub execution_id: Uuid,
    pub job_id: String,
    pub queue: String,
    pub attempt: u32,
    pub state: ExecutionState,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

impl ExecutionEvent {
    /// Snapshot `record` as an event at `at`.
    pub fn from_record(record: &ExecutionRecord, at: DateTime<Utc>) -> Self {
        Self {
            execution_id: record.id,
            job_id: record.job_id.clone(),
            queue: record.queue.clone(),
            attempt: record.attempt,
            state: record.state,
            at,
            detail: record.last_error.clone(),
        }
    }

    /// Whether this event closes the execution.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Receiver of execution events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ExecutionEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &ExecutionEvent) {
        match event.state {
            ExecutionState::Failed | ExecutionState::Abandoned => warn!(
                execution_id = %event.execution_id,
                job_id = %event.job_id,
                queue = %event.queue,
                attempt = event.attempt,
                state = %event.state,
                detail = event.detail.as_deref().unwrap_or(""),
                "execution {}",
                event.state
            ),
            _ => info!(
                execution_id = %event.execution_id,
                job_id = %event.job_id,
                queue = %event.queue,
                attempt = event.attempt,
                state = %event.state,
                "execution {}",
                event.state
            ),
        }
    }
}

/// Publishes events on a `tokio::sync::broadcast` channel.
pub struct BroadcastEventSink {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: &ExecutionEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
    }
}

/// Forwards every event to several sinks.
#[derive(Default, Clone)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: &ExecutionEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
