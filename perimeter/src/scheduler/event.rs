//! Events and their state machine.
//!
//! An event is the scheduler's unit of work: an asset to examine, a system
//! request, or a custom task. State transitions are the scheduler's
//! exclusive responsibility; actions ask for a transition through the
//! [`EventHandle`] they receive, never by touching the event directly.

use crate::asset::Asset;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// Error returned by an event action.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("{0}")]
    Failed(String),
}

impl EventError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Classifies events for stats filtering and payload interpretation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventType {
    Asset,
    System,
    Custom,
    Log,
    #[default]
    Unknown,
}

/// Lifecycle states of an event.
///
/// ```text
/// Waiting ──▶ Processable ──▶ InProcess ──▶ Done ──▶ (Processable, on repeat)
///                                  │
///                                  └──▶ Error (action failed or timed out)
/// Cancelled is reachable from any state and terminal.
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventState {
    /// Every known dependency is already done.
    #[default]
    Waiting,
    /// Eligible for execution; dependencies are satisfied or unknown.
    Processable,
    /// An action is currently running for this event.
    InProcess,
    Done,
    Cancelled,
    Error,
}

impl EventState {
    /// Terminal states release the event's concurrency slot.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Error)
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "Waiting",
            Self::Processable => "Processable",
            Self::InProcess => "InProcess",
            Self::Done => "Done",
            Self::Cancelled => "Cancelled",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Tagged event payload.
///
/// Actions and handlers match on the variant instead of downcasting an
/// opaque value.
#[derive(Clone, Debug, Default)]
pub enum EventData {
    Asset(Asset),
    System(serde_json::Value),
    Custom(serde_json::Value),
    Log(String),
    #[default]
    None,
}

impl EventData {
    /// The asset payload, when this is an asset event.
    pub fn asset(&self) -> Option<&Asset> {
        match self {
            Self::Asset(asset) => Some(asset),
            _ => None,
        }
    }
}

/// The closure bound to an event at dispatch time.
pub type Action = Arc<
    dyn Fn(EventHandle) -> Pin<Box<dyn Future<Output = Result<(), EventError>> + Send>>
        + Send
        + Sync,
>;

/// A unit of work in the scheduler.
#[derive(Clone)]
pub struct Event {
    /// Unique within a scheduler instance; the nil UUID means "assign one".
    pub uuid: Uuid,
    pub session_id: Uuid,
    /// Human label used in logs.
    pub name: String,
    pub event_type: EventType,
    pub state: EventState,
    /// Events that must reach `Done` first; the nil UUID entry is ignored.
    pub depends_on: Vec<Uuid>,
    /// Lower value wins; defaults to 1.
    pub priority: i32,
    /// Milliseconds between repetitions; 0 runs as soon as eligible.
    pub repeat_every: u64,
    /// Remaining repetitions; -1 repeats forever.
    pub repeat_times: i64,
    /// Scheduling time; reset on repetition when `repeat_every > 0`.
    pub timestamp: Instant,
    /// Absolute deadline once `InProcess`.
    pub timeout: Option<Instant>,
    pub data: EventData,
    pub action: Option<Action>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::nil(),
            session_id: Uuid::nil(),
            name: name.into(),
            event_type: EventType::default(),
            state: EventState::default(),
            depends_on: Vec::new(),
            priority: 0,
            repeat_every: 0,
            repeat_times: 0,
            timestamp: Instant::now(),
            timeout: None,
            data: EventData::None,
            action: None,
        }
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_depends_on(mut self, deps: impl IntoIterator<Item = Uuid>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }

    pub fn with_repeat(mut self, every_ms: u64, times: i64) -> Self {
        self.repeat_every = every_ms;
        self.repeat_times = times;
        self
    }

    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = data;
        self
    }

    pub fn with_action<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(EventHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventError>> + Send + 'static,
    {
        self.action = Some(Arc::new(move |handle| Box::pin(action(handle))));
        self
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("depends_on", &self.depends_on.len())
            .finish_non_exhaustive()
    }
}

/// Non-owning reference an action uses to transition its own event.
///
/// The scheduler owns the event map; the handle carries only the event's
/// UUID and a weak pointer to the shared state, so a handle outliving the
/// scheduler degrades to a no-op.
#[derive(Clone)]
pub struct EventHandle {
    uuid: Uuid,
    inner: Weak<Mutex<super::core::Inner>>,
}

impl EventHandle {
    pub(crate) fn new(uuid: Uuid, inner: Weak<Mutex<super::core::Inner>>) -> Self {
        Self { uuid, inner }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Requests a state transition for this event.
    pub fn set_state(&self, state: EventState) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock().expect("scheduler state poisoned");
            inner.set_state(self.uuid, state);
        }
    }

    /// Clones the event's payload out of the scheduler, if it still exists.
    pub fn data(&self) -> Option<EventData> {
        let inner = self.inner.upgrade()?;
        let inner = inner.lock().expect("scheduler state poisoned");
        inner.event_data(self.uuid)
    }
}

/// Outcome of one executed action, delivered to the completion sink.
#[derive(Debug)]
pub struct EventOutcome {
    pub uuid: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub error: Option<EventError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(EventState::Done.is_terminal());
        assert!(EventState::Cancelled.is_terminal());
        assert!(EventState::Error.is_terminal());
        assert!(!EventState::Waiting.is_terminal());
        assert!(!EventState::Processable.is_terminal());
        assert!(!EventState::InProcess.is_terminal());
    }

    #[test]
    fn test_event_defaults() {
        let event = Event::new("probe");
        assert!(event.uuid.is_nil());
        assert_eq!(event.state, EventState::Waiting);
        assert_eq!(event.event_type, EventType::Unknown);
        assert_eq!(event.priority, 0);
        assert_eq!(event.repeat_times, 0);
        assert!(event.action.is_none());
    }

    #[test]
    fn test_event_data_asset_accessor() {
        let data = EventData::Asset(Asset::fqdn("example.com"));
        assert_eq!(data.asset(), Some(&Asset::fqdn("example.com")));
        assert_eq!(EventData::None.asset(), None);
    }
}
