//! Progress event bus
//!
//! An append-only, timestamped trace of in-flight work, pushed
//! synchronously to an optional observer at the point of emission.
//! The bus performs no buffering; any buffering belongs to the
//! streaming bridge in the API layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Thinking,
    ToolCall,
    ToolResult,
    AgentComplete,
    Final,
    Error,
    Complete,
}

/// Transient notification describing one step of in-flight work.
/// Exists only for the duration of one request; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub agent: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        kind: ProgressKind,
        agent: impl Into<String>,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            kind,
            agent: agent.into(),
            message: message.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Observer callback, invoked synchronously at emission. Must be safe
/// to call from whichever task runs the orchestration; the streaming
/// bridge hands in a closure that forwards onto a channel.
pub type ProgressObserver = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Per-session event bus. Owned by a single orchestration session;
/// events are observed in exactly emission order.
pub struct ProgressBus {
    events: Vec<ProgressEvent>,
    observer: Option<ProgressObserver>,
}

impl ProgressBus {
    pub fn new(observer: Option<ProgressObserver>) -> Self {
        Self {
            events: Vec::new(),
            observer,
        }
    }

    pub fn emit(
        &mut self,
        kind: ProgressKind,
        agent: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) {
        let event = ProgressEvent::new(kind, agent, message, data);
        tracing::debug!(agent = %event.agent, kind = ?event.kind, message = %event.message, "progress");
        if let Some(observer) = &self.observer {
            observer(event.clone());
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[ProgressEvent] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emits_in_order_and_notifies_observer() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));
        let seen_clone = Arc::clone(&seen);

        let observer: ProgressObserver = Arc::new(move |event| {
            seen_clone.lock().unwrap().push(event.message);
        });

        let mut bus = ProgressBus::new(Some(observer));
        bus.emit(ProgressKind::Thinking, "Orchestrator", "first", None);
        bus.emit(ProgressKind::ToolCall, "Orchestrator", "second", None);
        bus.emit(ProgressKind::Error, "News Sentiment Agent", "third", None);

        assert_eq!(bus.events().len(), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn works_without_observer() {
        let mut bus = ProgressBus::new(None);
        bus.emit(ProgressKind::Final, "Orchestrator", "done", None);
        assert_eq!(bus.events().len(), 1);
        assert_eq!(bus.events()[0].kind, ProgressKind::Final);
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ProgressKind::ToolCall).unwrap(),
            "\"tool_call\""
        );
        assert_eq!(
            serde_json::to_string(&ProgressKind::AgentComplete).unwrap(),
            "\"agent_complete\""
        );
    }
}
