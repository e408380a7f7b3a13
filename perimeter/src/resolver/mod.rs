//! Shared DNS resolution substrate.
//!
//! A process-wide pool of public resolvers, each annotated with a QPS
//! weight, used by every DNS discovery handler. The pool shuffles its
//! resolver list at startup to spread load, rotates across resolvers per
//! query, enforces per-resolver token buckets, and discards answers from
//! wildcard zones so arbitrary-subdomain zones cannot flood the engine
//! with false positives.

mod answers;
mod pool;
mod wildcard;

pub use answers::{answers_by_type, extract_answers, ExtractedAnswer};
pub use pool::{ResolverPool, ResolverError, DETECTION_RESOLVER, QUERY_ATTEMPTS, QUERY_TIMEOUT};
