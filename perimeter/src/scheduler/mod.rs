//! Event scheduler.
//!
//! The heart of the engine: a priority queue of events with dependencies,
//! repetition, per-action timeouts, and a state machine driven by a single
//! process loop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Scheduler                           │
//! │  schedule / cancel / pause / shutdown / stats            │
//! ├──────────────────────────────────────────────────────────┤
//! │                    Process loop                          │
//! │  pop highest priority -> advance state machine ->        │
//! │  spawn action workers under the concurrency ceiling      │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────┐   │
//! │  │ Event map   │  │ Priority     │  │ Counters       │   │
//! │  │ UUID→Event  │  │ queue (heap) │  │                │   │
//! │  └─────────────┘  └──────────────┘  └────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The event map and queue live behind one mutex that is never held across
//! an await. Actions run on fresh tasks and transition their own event
//! through a non-owning [`EventHandle`].

mod core;
mod event;
mod process;
mod queue;
mod stats;

pub use self::core::{Scheduler, SchedulerError, SchedulerState};
pub use event::{
    Action, Event, EventData, EventError, EventHandle, EventOutcome, EventState, EventType,
};
pub use process::ProcessConfig;
pub use queue::{EventQueue, QueuedEvent};
pub use stats::{SchedulerStats, SessionEventStats};
