//! The process loop.
//!
//! A single dedicated task drives the scheduler: it pops the
//! highest-priority event, advances its state machine, and spawns a worker
//! task per executable action under the configured concurrency ceiling.
//! Timeout enforcement is polling - an in-process event past its deadline
//! flips to `Error` the next time it surfaces in the queue, the running
//! action is never preempted.

use super::core::{Scheduler, SchedulerState};
use super::event::{Action, EventOutcome, EventState};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long the loop idles when paused or when the queue is empty.
const IDLE_SLEEP: Duration = Duration::from_secs(1);

/// Backoff applied when a ready event finds every action slot busy.
const CAPACITY_BACKOFF: Duration = Duration::from_millis(25);

/// Iterations between cooperative yields, for runtime fairness.
const YIELD_EVERY_N_ITERATIONS: u64 = 50;

/// Controls for one invocation of [`Scheduler::process`].
#[derive(Clone, Debug)]
pub struct ProcessConfig {
    /// Return once the queue is empty instead of idling.
    pub exit_when_empty: bool,
    /// Log every event as it is selected for execution.
    pub check_event: bool,
    /// When `false`, eligible events are marked `Processable` without
    /// running their action (dry-run).
    pub execute_action: bool,
    /// Return after the first event is selected for execution.
    pub return_if_found: bool,
    /// Extra diagnostics; >1 logs dependency stalls.
    pub debug_level: u8,
    /// Per-action deadline applied at the `InProcess` transition;
    /// zero disables timeout enforcement.
    pub action_timeout: Duration,
    /// Ceiling on concurrently running actions.
    pub max_concurrent_actions: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            exit_when_empty: false,
            check_event: false,
            execute_action: true,
            return_if_found: false,
            debug_level: 0,
            action_timeout: Duration::from_secs(60),
            max_concurrent_actions: 10,
        }
    }
}

/// Everything a worker task needs, captured under the lock.
struct WorkerSpec {
    uuid: Uuid,
    session_id: Uuid,
    name: String,
    action: Option<Action>,
}

/// What one loop iteration decided to do after releasing the lock.
enum Step {
    QueueEmpty,
    Continue,
    Spawn(WorkerSpec),
    /// A ready event was re-queued because every action slot is busy.
    Saturated,
    /// Leave the loop, spawning a final worker first when one was selected.
    Return(Option<WorkerSpec>),
}

impl Scheduler {
    /// Runs the process loop until shutdown (or until empty/found when the
    /// configuration asks for that).
    pub async fn process(&self, config: ProcessConfig) {
        let mut average_waiting = Duration::ZERO;
        let mut previous_average = Duration::ZERO;
        let mut iterations: u64 = 0;

        info!(
            max_concurrent_actions = config.max_concurrent_actions,
            action_timeout_secs = config.action_timeout.as_secs(),
            "Scheduler process loop started"
        );

        loop {
            iterations += 1;
            if iterations % YIELD_EVERY_N_ITERATIONS == 0 {
                tokio::task::yield_now().await;
            }

            match self.run_state() {
                SchedulerState::Shutdown => return,
                SchedulerState::Paused => {
                    tokio::time::sleep(IDLE_SLEEP).await;
                    continue;
                }
                SchedulerState::Active => {}
            }

            // Events gated on repetition intervals set the pace; the
            // average is reset whenever something dispatches.
            if average_waiting > Duration::ZERO {
                tokio::time::sleep(average_waiting).await;
            }

            let step = self.step(&config, &mut average_waiting, &mut previous_average);
            match step {
                Step::QueueEmpty => {
                    if config.exit_when_empty {
                        return;
                    }
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
                Step::Continue => {}
                Step::Spawn(spec) => self.spawn_worker(spec),
                Step::Saturated => tokio::time::sleep(CAPACITY_BACKOFF).await,
                Step::Return(spec) => {
                    if let Some(spec) = spec {
                        self.spawn_worker(spec);
                    }
                    return;
                }
            }
        }
    }

    fn run_state(&self) -> SchedulerState {
        self.inner.lock().expect("scheduler state poisoned").state
    }

    /// One iteration of the loop body, entirely under the lock.
    fn step(
        &self,
        config: &ProcessConfig,
        average_waiting: &mut Duration,
        previous_average: &mut Duration,
    ) -> Step {
        let mut inner = self.inner.lock().expect("scheduler state poisoned");

        let Some((uuid, priority)) = inner.pop_next() else {
            return Step::QueueEmpty;
        };
        let now = Instant::now();
        let state = inner.events[&uuid].state;

        match state {
            EventState::InProcess => {
                if config.action_timeout > Duration::ZERO {
                    let expired = inner.events[&uuid].timeout.is_some_and(|t| now > t);
                    if expired {
                        warn!(event = %uuid, "Action deadline exceeded");
                        inner.set_state(uuid, EventState::Error);
                    }
                }
                inner.queue.push(uuid, priority);
                Step::Continue
            }
            EventState::Cancelled | EventState::Error => {
                if state == EventState::Error {
                    warn!(event = %uuid, "Discarding failed event");
                }
                inner.remove_event_and_deps(uuid);
                Step::Continue
            }
            EventState::Done => {
                inner.reschedule(uuid);
                Step::Continue
            }
            EventState::Waiting | EventState::Processable => {
                let can_process = inner.is_processable(uuid);
                if !can_process && config.debug_level > 1 {
                    debug!(event = %uuid, "Event blocked by unfinished dependencies");
                }

                let event = &inner.events[&uuid];
                let gate = event.timestamp + Duration::from_millis(event.repeat_every);

                if can_process && now > gate {
                    if config.check_event {
                        info!(event = %inner.events[&uuid].name, uuid = %uuid, "Processing event");
                    }

                    let has_capacity = inner.current_running < config.max_concurrent_actions;
                    if has_capacity {
                        inner.set_state(uuid, EventState::InProcess);
                    }
                    if let Some(event) = inner.events.get_mut(&uuid) {
                        event.timeout = Some(now + config.action_timeout);
                    }

                    let mut step = Step::Continue;
                    if config.execute_action {
                        *average_waiting = Duration::ZERO;
                        // Re-enqueue so the new state is visible to the
                        // next iteration (and for timeout polling).
                        inner.queue.push(uuid, priority);
                        if has_capacity {
                            inner.current_running += 1;
                            let event = &inner.events[&uuid];
                            step = Step::Spawn(WorkerSpec {
                                uuid,
                                session_id: event.session_id,
                                name: event.name.clone(),
                                action: event.action.clone(),
                            });
                        } else {
                            // No slot free: back off instead of spinning
                            // on the same over-capacity events.
                            step = Step::Saturated;
                        }
                    } else {
                        inner.set_state(uuid, EventState::Processable);
                    }

                    if config.return_if_found {
                        return Step::Return(match step {
                            Step::Spawn(spec) => Some(spec),
                            _ => None,
                        });
                    }
                    step
                } else {
                    if can_process {
                        // Track how far off the repetition gate is so the
                        // loop sleeps instead of spinning.
                        let waiting = gate.saturating_duration_since(now);
                        *average_waiting = (waiting + *previous_average) / 2;
                        *previous_average = *average_waiting;
                    }
                    inner.queue.push(uuid, priority);
                    Step::Continue
                }
            }
        }
    }

    /// Runs one action on a fresh task and reports its outcome.
    fn spawn_worker(&self, spec: WorkerSpec) {
        let handle = self.handle_for(spec.uuid);
        let outcome_tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let result = match spec.action {
                Some(action) => action(handle.clone()).await,
                None => {
                    handle.set_state(EventState::Done);
                    Ok(())
                }
            };
            if let Err(ref err) = result {
                warn!(event = %spec.name, error = %err, "Event action failed");
                handle.set_state(EventState::Error);
            }
            if let Some(tx) = outcome_tx {
                let _ = tx.send(EventOutcome {
                    uuid: spec.uuid,
                    session_id: spec.session_id,
                    name: spec.name,
                    error: result.err(),
                });
            }
        });
    }
}
