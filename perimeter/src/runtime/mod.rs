//! Handler runtime.
//!
//! Executes registered handlers against dispatched work items. Every
//! handler in a pipeline gets a dedicated worker pool of `max_instances`
//! tasks; stages are chained by channels, so an element visits handlers in
//! priority order and lands on the dispatcher's completion queue with the
//! first error it picked up along the way. Back-pressure comes from the
//! per-handler pool sizes and the per-plugin rate limiters, not from the
//! queues themselves.

mod pool;
mod rate_limit;

pub use pool::{HandlerRuntime, RuntimeConfig, DEFAULT_PLUGIN_QPS};
pub use rate_limit::RateLimiter;
