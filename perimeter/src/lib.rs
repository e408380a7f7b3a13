//! Perimeter - asset-discovery engine for attack-surface mapping
//!
//! Given one or more seed network assets (domain names, IP addresses,
//! netblocks), the engine iteratively discovers related assets by routing
//! each discovered asset through a catalog of pluggable handlers, every one
//! of which may emit new assets, until the derived graph reaches quiescence
//! or the session is torn down.
//!
//! # High-Level API
//!
//! For most use cases, the [`engine`] module provides a simplified facade:
//!
//! ```ignore
//! use perimeter::engine::{Engine, EngineSettings};
//! use perimeter::session::SessionConfig;
//!
//! let engine = Engine::new(EngineSettings::default()).await?;
//! let sid = engine.create_session(SessionConfig::in_scope(["example.com"]));
//!
//! engine.dispatch_fqdn(sid, "example.com")?;
//! ```

pub mod asset;
pub mod cache;
pub mod dispatcher;
pub mod engine;
pub mod graph;
pub mod logging;
pub mod plugins;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod scheduler;
pub mod session;

/// Version of the Perimeter library.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
