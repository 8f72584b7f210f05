//! Domain event system — decoupled observation of the loop and resolver.
//!
//! Events are published when something interesting happens in the system.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The model returned a completion
    CompletionReceived {
        model: String,
        stop_reason: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed through the executor
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was not executed because of a permission decision
    ToolBlocked {
        tool_name: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An identical tool call exceeded the duplicate threshold
    LoopDetected {
        tool_name: String,
        count: u32,
        timestamp: DateTime<Utc>,
    },

    /// The loop gave up after too many tool-use rounds
    IterationLimitExceeded {
        iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// An agent context was resolved for an inbound query
    ContextResolved {
        agent_id: String,
        skills: usize,
        model: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
