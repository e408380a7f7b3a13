//! Scheduler core - shared state and the scheduling API.
//!
//! The scheduler owns a priority queue of event references and a
//! `UUID -> Event` map behind one mutex. The mutex is never held across an
//! await point; the process loop (see `process.rs`) takes it once per
//! iteration, decides, releases, and only then sleeps or spawns.

use super::event::{
    Action, Event, EventData, EventError, EventHandle, EventOutcome, EventState,
};
use super::queue::EventQueue;
use super::stats::{type_matches, SchedulerStats, SessionEventStats};
use crate::scheduler::EventType;
use crate::session::SessionManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Errors returned synchronously from [`Scheduler::schedule`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The event's asset was already dispatched in its session. Producers
    /// treat this as benign.
    #[error("this event has been scheduled previously: {0}")]
    AlreadyScheduled(String),
}

/// Run state of the scheduler itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchedulerState {
    #[default]
    Active,
    /// The process loop idles without dequeuing.
    Paused,
    /// The process loop exits at its next iteration.
    Shutdown,
}

pub(crate) struct Inner {
    pub(crate) events: HashMap<Uuid, Event>,
    pub(crate) queue: EventQueue,
    pub(crate) state: SchedulerState,
    pub(crate) current_running: usize,
    pub(crate) stats: SchedulerStats,
}

impl Inner {
    fn new() -> Self {
        Self {
            events: HashMap::new(),
            queue: EventQueue::new(),
            state: SchedulerState::Active,
            current_running: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Transitions an event, updating counters and the concurrency slot.
    pub(crate) fn set_state(&mut self, uuid: Uuid, new: EventState) {
        let Some(event) = self.events.get_mut(&uuid) else {
            debug!(event = %uuid, "set_state: event not found");
            return;
        };
        let old = event.state;
        if old == new {
            return;
        }
        if old == EventState::InProcess && new.is_terminal() {
            self.current_running = self.current_running.saturating_sub(1);
        }
        event.state = new;
        self.stats.transition(old, new);
    }

    pub(crate) fn event_data(&self, uuid: Uuid) -> Option<EventData> {
        self.events.get(&uuid).map(|e| e.data.clone())
    }

    /// Pops queue entries until one still backed by the map surfaces.
    ///
    /// Returns the event's UUID and its current (map) priority.
    pub(crate) fn pop_next(&mut self) -> Option<(Uuid, i32)> {
        while let Some(entry) = self.queue.pop() {
            if let Some(event) = self.events.get(&entry.uuid) {
                return Some((entry.uuid, event.priority));
            }
            // Stale reference: the event was removed or replaced.
        }
        None
    }

    /// Dependency check; an unknown dependency UUID does not block.
    pub(crate) fn is_processable(&self, uuid: Uuid) -> bool {
        let Some(event) = self.events.get(&uuid) else {
            return false;
        };
        for dep in &event.depends_on {
            if *dep == event.uuid || dep.is_nil() {
                continue;
            }
            if let Some(dep_event) = self.events.get(dep) {
                if dep_event.state != EventState::Done {
                    return false;
                }
            }
        }
        true
    }

    /// Cancels every event depending on `uuid`, then removes `uuid`.
    ///
    /// Propagation is one hop per call; transitive dependents are handled
    /// when they surface in the queue with their dependency now unknown
    /// and cancelled upstream.
    pub(crate) fn remove_event_and_deps(&mut self, uuid: Uuid) {
        let dependents: Vec<Uuid> = self
            .events
            .values()
            .filter(|e| e.uuid != uuid && e.depends_on.contains(&uuid))
            .map(|e| e.uuid)
            .collect();
        for dependent in dependents {
            self.set_state(dependent, EventState::Cancelled);
            self.events.remove(&dependent);
        }
        self.events.remove(&uuid);
    }

    /// Handles a `Done` event surfacing in the queue: re-inserts it while
    /// repetition budget remains, removes it otherwise.
    pub(crate) fn reschedule(&mut self, uuid: Uuid) {
        let Some(event) = self.events.get(&uuid) else {
            return;
        };
        let repeat_every = event.repeat_every;
        let repeat_times = event.repeat_times;
        let priority = event.priority;

        if repeat_every == 0 && repeat_times > 1 {
            // Repeat as soon as eligible; the original timestamp stands.
            self.set_state(uuid, EventState::Processable);
            if let Some(event) = self.events.get_mut(&uuid) {
                event.repeat_times -= 1;
            }
            self.queue.push(uuid, priority);
        } else if repeat_every > 0 && repeat_times > 1 {
            self.set_state(uuid, EventState::Processable);
            if let Some(event) = self.events.get_mut(&uuid) {
                event.repeat_times -= 1;
                event.timestamp = Instant::now();
            }
            self.queue.push(uuid, priority);
        } else if repeat_times == -1 {
            // Infinite repetition; the budget is never decremented.
            self.set_state(uuid, EventState::Processable);
            if let Some(event) = self.events.get_mut(&uuid) {
                event.timestamp = Instant::now();
            }
            self.queue.push(uuid, priority);
        } else {
            self.events.remove(&uuid);
        }
    }
}

/// Priority scheduler for events with dependencies, repetition, and
/// timeouts.
pub struct Scheduler {
    pub(crate) inner: Arc<Mutex<Inner>>,
    pub(crate) manager: Option<Arc<SessionManager>>,
    pub(crate) outcome_tx: Option<mpsc::UnboundedSender<EventOutcome>>,
}

impl Scheduler {
    /// Creates a standalone scheduler (no session deduplication).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            manager: None,
            outcome_tx: None,
        }
    }

    /// Creates a scheduler that deduplicates asset events against the
    /// session cache.
    pub fn with_sessions(manager: Arc<SessionManager>) -> Self {
        Self {
            manager: Some(manager),
            ..Self::new()
        }
    }

    /// Sends an [`EventOutcome`] for every executed action to `tx`.
    pub fn with_outcome_sink(mut self, tx: mpsc::UnboundedSender<EventOutcome>) -> Self {
        self.outcome_tx = Some(tx);
        self
    }

    /// Schedules an event.
    ///
    /// Assigns a UUID when the event carries the nil UUID, stamps the
    /// scheduling time, normalizes the repetition fields, computes the
    /// initial state from the event's dependencies, and inserts the event
    /// into the map and the priority queue. Re-scheduling an existing UUID
    /// replaces the map entry; the slot is reused, not counted again.
    pub fn schedule(&self, mut event: Event) -> Result<Uuid, SchedulerError> {
        // Per session, the first schedule of a given asset wins.
        if let EventData::Asset(ref asset) = event.data {
            if let Some(manager) = &self.manager {
                if let Some(session) = manager.get(event.session_id) {
                    if session.cache().get_asset(&asset.key()).is_some() {
                        return Err(SchedulerError::AlreadyScheduled(asset.key()));
                    }
                }
            }
        }

        if event.uuid.is_nil() {
            event.uuid = Uuid::new_v4();
        }
        event.timestamp = Instant::now();
        event.timeout = None;
        if event.repeat_times < -1 {
            event.repeat_times = -1;
        }

        let mut inner = self.inner.lock().expect("scheduler state poisoned");

        // An event starts Waiting only when every dependency is already
        // satisfied; anything unknown or unfinished makes it Processable,
        // and the loop's dependency check gates actual execution. Each
        // satisfied dependency at or below this event's priority pulls the
        // event ahead of it so completed chains drain promptly.
        let mut state = EventState::Waiting;
        let deps = event.depends_on.clone();
        for dep in deps {
            if dep.is_nil() {
                continue;
            }
            match inner.events.get(&dep) {
                Some(dep_event) if dep_event.state == EventState::Done => {
                    if dep_event.priority <= event.priority {
                        event.priority = dep_event.priority - 1;
                    }
                }
                _ => state = EventState::Processable,
            }
        }
        if event.priority <= 0 {
            event.priority = 1;
        }
        event.state = state;

        if event.action.is_none() {
            event.action = Some(default_action());
        }

        let uuid = event.uuid;
        let priority = event.priority;
        match inner.events.insert(uuid, event) {
            Some(previous) => {
                if previous.state == EventState::InProcess && state != EventState::InProcess {
                    inner.current_running = inner.current_running.saturating_sub(1);
                }
                inner.stats.transition(previous.state, state);
            }
            None => {
                inner.stats.total_received += 1;
                inner.stats.count_initial(state);
            }
        }
        inner.queue.push(uuid, priority);
        Ok(uuid)
    }

    /// Cancels an event and every event that depends on it.
    ///
    /// In-flight actions are not aborted; their result is discarded by the
    /// state check when they report back.
    pub fn cancel(&self, uuid: Uuid) {
        let mut inner = self.inner.lock().expect("scheduler state poisoned");
        if inner.events.contains_key(&uuid) {
            inner.set_state(uuid, EventState::Cancelled);
            inner.remove_event_and_deps(uuid);
        }
    }

    /// Marks every event cancelled; the process loop discards them as they
    /// surface.
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock().expect("scheduler state poisoned");
        let uuids: Vec<Uuid> = inner.events.keys().copied().collect();
        for uuid in uuids {
            inner.set_state(uuid, EventState::Cancelled);
        }
    }

    /// Cancels all events and stops the process loop at its next iteration.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("scheduler state poisoned");
        let uuids: Vec<Uuid> = inner.events.keys().copied().collect();
        for uuid in uuids {
            inner.set_state(uuid, EventState::Cancelled);
        }
        inner.state = SchedulerState::Shutdown;
    }

    /// Pauses the process loop.
    pub fn pause(&self) {
        self.inner.lock().expect("scheduler state poisoned").state = SchedulerState::Paused;
    }

    /// Resumes a paused process loop.
    pub fn resume(&self) {
        let mut inner = self.inner.lock().expect("scheduler state poisoned");
        if inner.state == SchedulerState::Paused {
            inner.state = SchedulerState::Active;
        }
    }

    /// Transitions an event by UUID.
    pub fn set_event_state(&self, uuid: Uuid, state: EventState) {
        let mut inner = self.inner.lock().expect("scheduler state poisoned");
        inner.set_state(uuid, state);
    }

    /// Snapshot of one event, if it is still in the map.
    pub fn event(&self, uuid: Uuid) -> Option<Event> {
        let inner = self.inner.lock().expect("scheduler state poisoned");
        inner.events.get(&uuid).cloned()
    }

    /// Number of events currently in the map.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("scheduler state poisoned").events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// System-wide counters.
    pub fn system_stats(&self) -> SchedulerStats {
        self.inner.lock().expect("scheduler state poisoned").stats
    }

    /// Live work-item counts for one session, filtered by event type;
    /// [`EventType::Unknown`] matches every type.
    pub fn session_stats(&self, session_id: Uuid, filter: EventType) -> SessionEventStats {
        let mut stats = SessionEventStats::default();
        if session_id.is_nil() {
            return stats;
        }
        let inner = self.inner.lock().expect("scheduler state poisoned");
        for event in inner.events.values() {
            if event.session_id != session_id || !type_matches(filter, event.event_type) {
                continue;
            }
            match event.state {
                EventState::InProcess => stats.work_items_in_process += 1,
                EventState::Processable => stats.work_items_processable += 1,
                EventState::Waiting => stats.work_items_waiting += 1,
                _ => {}
            }
        }
        stats
    }

    pub(crate) fn handle_for(&self, uuid: Uuid) -> EventHandle {
        EventHandle::new(uuid, Arc::downgrade(&self.inner))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Bound to events scheduled without an action.
fn default_action() -> Action {
    let action: Action = Arc::new(|handle: EventHandle| {
        Box::pin(async move {
            handle.set_state(EventState::Done);
            Ok::<(), EventError>(())
        })
    });
    action
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_assigns_uuid_and_defaults() {
        let scheduler = Scheduler::new();
        let uuid = scheduler.schedule(Event::new("probe")).unwrap();
        assert!(!uuid.is_nil());

        let event = scheduler.event(uuid).expect("event in map");
        assert_eq!(event.priority, 1);
        assert_eq!(event.state, EventState::Waiting);
        assert!(event.action.is_some());
        assert_eq!(scheduler.system_stats().total_received, 1);
    }

    #[test]
    fn test_schedule_same_uuid_reuses_slot() {
        let scheduler = Scheduler::new();
        let uuid = Uuid::new_v4();
        scheduler
            .schedule(Event::new("first").with_uuid(uuid))
            .unwrap();
        scheduler
            .schedule(Event::new("second").with_uuid(uuid))
            .unwrap();

        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.event(uuid).unwrap().name, "second");
        let stats = scheduler.system_stats();
        assert_eq!(stats.total_received, 1);
        assert_eq!(stats.bucket_sum(), 1);
    }

    #[test]
    fn test_unknown_dependency_makes_processable() {
        let scheduler = Scheduler::new();
        let uuid = scheduler
            .schedule(Event::new("dependent").with_depends_on([Uuid::new_v4()]))
            .unwrap();
        assert_eq!(scheduler.event(uuid).unwrap().state, EventState::Processable);
    }

    #[test]
    fn test_nil_dependency_is_ignored() {
        let scheduler = Scheduler::new();
        let uuid = scheduler
            .schedule(Event::new("no-deps").with_depends_on([Uuid::nil()]))
            .unwrap();
        assert_eq!(scheduler.event(uuid).unwrap().state, EventState::Waiting);
    }

    #[test]
    fn test_done_dependency_lowers_priority() {
        let scheduler = Scheduler::new();
        let dep = scheduler
            .schedule(Event::new("dependency").with_priority(3))
            .unwrap();
        scheduler.set_event_state(dep, EventState::Done);

        let uuid = scheduler
            .schedule(
                Event::new("dependent")
                    .with_priority(5)
                    .with_depends_on([dep]),
            )
            .unwrap();

        let event = scheduler.event(uuid).unwrap();
        assert_eq!(event.priority, 2);
        assert_eq!(event.state, EventState::Waiting);
    }

    #[test]
    fn test_unfinished_dependency_keeps_priority() {
        let scheduler = Scheduler::new();
        let dep = scheduler
            .schedule(Event::new("dependency").with_priority(5))
            .unwrap();
        let uuid = scheduler
            .schedule(
                Event::new("dependent")
                    .with_priority(5)
                    .with_depends_on([dep]),
            )
            .unwrap();

        let event = scheduler.event(uuid).unwrap();
        assert_eq!(event.priority, 5);
        assert_eq!(event.state, EventState::Processable);
    }

    #[test]
    fn test_cancel_cascades_to_dependents() {
        let scheduler = Scheduler::new();
        let e0 = scheduler.schedule(Event::new("e0")).unwrap();
        let e1 = scheduler
            .schedule(Event::new("e1").with_depends_on([e0]))
            .unwrap();

        scheduler.cancel(e0);

        assert!(scheduler.event(e0).is_none());
        assert!(scheduler.event(e1).is_none());
        assert_eq!(scheduler.system_stats().cancelled, 2);
    }

    #[test]
    fn test_cancel_unknown_event_is_a_no_op() {
        let scheduler = Scheduler::new();
        scheduler.schedule(Event::new("keep")).unwrap();
        scheduler.cancel(Uuid::new_v4());
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.system_stats().cancelled, 0);
    }

    #[test]
    fn test_shutdown_cancels_everything() {
        let scheduler = Scheduler::new();
        scheduler.schedule(Event::new("a")).unwrap();
        scheduler.schedule(Event::new("b")).unwrap();

        scheduler.shutdown();

        let stats = scheduler.system_stats();
        assert_eq!(stats.cancelled, 2);
        assert_eq!(stats.bucket_sum(), stats.total_received);
    }

    #[test]
    fn test_session_stats_filters_by_session() {
        let scheduler = Scheduler::new();
        let sid = Uuid::new_v4();
        scheduler
            .schedule(Event::new("mine").with_session(sid))
            .unwrap();
        scheduler
            .schedule(Event::new("other").with_session(Uuid::new_v4()))
            .unwrap();

        let stats = scheduler.session_stats(sid, EventType::Unknown);
        assert_eq!(stats.work_items_waiting, 1);
        assert_eq!(scheduler.session_stats(Uuid::nil(), EventType::Unknown),
            SessionEventStats::default());
    }

    #[test]
    fn test_repeat_times_normalized() {
        let scheduler = Scheduler::new();
        let uuid = scheduler
            .schedule(Event::new("forever").with_repeat(0, -42))
            .unwrap();
        assert_eq!(scheduler.event(uuid).unwrap().repeat_times, -1);
    }
}
