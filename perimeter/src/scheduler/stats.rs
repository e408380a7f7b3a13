//! Scheduler counters.
//!
//! Buckets track the current state of every event the scheduler has
//! received: an event's initial state is counted at insert and every
//! transition moves one count between buckets, so at quiescence the bucket
//! sum equals the number of events received. Terminal buckets accumulate;
//! removing a finished event from the map does not touch them.

use super::event::{EventState, EventType};

/// System-wide event counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_received: u64,
    pub done: u64,
    pub cancelled: u64,
    pub error: u64,
    pub in_process: u64,
    pub waiting: u64,
    pub processable: u64,
}

impl SchedulerStats {
    pub(crate) fn count_initial(&mut self, state: EventState) {
        *self.bucket(state) += 1;
    }

    pub(crate) fn transition(&mut self, old: EventState, new: EventState) {
        if old == new {
            return;
        }
        let from = self.bucket(old);
        *from = from.saturating_sub(1);
        *self.bucket(new) += 1;
    }

    fn bucket(&mut self, state: EventState) -> &mut u64 {
        match state {
            EventState::Done => &mut self.done,
            EventState::Cancelled => &mut self.cancelled,
            EventState::Error => &mut self.error,
            EventState::InProcess => &mut self.in_process,
            EventState::Waiting => &mut self.waiting,
            EventState::Processable => &mut self.processable,
        }
    }

    /// Sum of all state buckets; equals `total_received` at quiescence.
    pub fn bucket_sum(&self) -> u64 {
        self.done + self.cancelled + self.error + self.in_process + self.waiting + self.processable
    }
}

/// Per-session work-item counts for one event type filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionEventStats {
    pub work_items_waiting: u64,
    pub work_items_processable: u64,
    pub work_items_in_process: u64,
}

/// Filter for [`super::Scheduler::session_stats`]; `Unknown` matches all.
pub fn type_matches(filter: EventType, event_type: EventType) -> bool {
    filter == EventType::Unknown || filter == event_type
}
