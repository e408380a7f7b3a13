//! Integration tests for the dispatcher and handler runtime.
//!
//! These tests verify the complete dispatch workflow including:
//! - Deduplication against the session cache
//! - Pipeline routing and completion counting
//! - Discovery feedback (handlers dispatching new assets)
//! - Clean shutdown with queued work

use async_trait::async_trait;
use perimeter::asset::{Asset, AssetType};
use perimeter::dispatcher::{AssetEvent, DispatchError, Dispatcher};
use perimeter::registry::{Handler, HandlerCallback, HandlerContext, HandlerError, Registry};
use perimeter::runtime::RuntimeConfig;
use perimeter::session::{Session, SessionConfig, SessionManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Test Helpers
// =============================================================================

/// A handler that dispatches one subdomain for every apex it sees.
struct SubdomainFinder {
    handled: Arc<AtomicUsize>,
}

#[async_trait]
impl HandlerCallback for SubdomainFinder {
    async fn handle(&self, ctx: &HandlerContext) -> Result<(), HandlerError> {
        self.handled.fetch_add(1, Ordering::SeqCst);

        let Asset::Fqdn { name } = &ctx.asset else {
            return Err(HandlerError::WrongAssetType {
                handler: "subdomain-finder".to_string(),
            });
        };
        // Only the apex produces a discovery, so the chain terminates.
        if !name.starts_with("www.") {
            ctx.discovered(format!("www.{name}"), Asset::fqdn(format!("www.{name}")));
        }
        Ok(())
    }
}

fn finder_handler(handled: Arc<AtomicUsize>) -> Handler {
    Handler {
        plugin: "finder".to_string(),
        name: "subdomain-finder".to_string(),
        event_type: AssetType::Fqdn,
        transforms: vec!["fqdn".to_string()],
        priority: 1,
        max_instances: 4,
        callback: Arc::new(SubdomainFinder { handled }),
    }
}

async fn wait_for_completed(session: &Session, total: u64) {
    for _ in 0..200 {
        if session.stats().snapshot().work_items_completed >= total {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "work items never completed: {:?}",
        session.stats().snapshot()
    );
}

// =============================================================================
// Integration Tests
// =============================================================================

#[tokio::test]
async fn test_discovery_chain_feeds_back_through_dispatcher() {
    let registry = Registry::new();
    let handled = Arc::new(AtomicUsize::new(0));
    registry
        .register_handler(finder_handler(Arc::clone(&handled)))
        .unwrap();

    let manager = Arc::new(SessionManager::new());
    let dispatcher = Dispatcher::start(&registry, Arc::clone(&manager), RuntimeConfig::default());
    let session = manager.new_session(SessionConfig::in_scope(["example.com"]));

    dispatcher
        .dispatch(AssetEvent::new(
            "example.com",
            session.id(),
            Asset::fqdn("example.com"),
        ))
        .unwrap();

    // The seed plus the discovered www subdomain.
    wait_for_completed(&session, 2).await;

    let snap = session.stats().snapshot();
    assert_eq!(snap.work_items_total, 2);
    assert_eq!(snap.work_items_completed, 2);
    assert_eq!(handled.load(Ordering::SeqCst), 2);

    assert!(session.cache().get_asset("fqdn:example.com").is_some());
    assert!(session.cache().get_asset("fqdn:www.example.com").is_some());

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_discoveries_collapse() {
    let registry = Registry::new();
    let handled = Arc::new(AtomicUsize::new(0));
    registry
        .register_handler(finder_handler(Arc::clone(&handled)))
        .unwrap();

    let manager = Arc::new(SessionManager::new());
    let dispatcher = Dispatcher::start(&registry, Arc::clone(&manager), RuntimeConfig::default());
    let session = manager.new_session(SessionConfig::in_scope(["example.com"]));

    // Both apexes discover www.example.com; the second discovery must be
    // rejected by the session cache.
    dispatcher
        .dispatch(AssetEvent::new(
            "example.com",
            session.id(),
            Asset::fqdn("example.com"),
        ))
        .unwrap();
    let second = dispatcher.dispatch(AssetEvent::new(
        "www.example.com",
        session.id(),
        Asset::fqdn("www.example.com"),
    ));

    // The direct dispatch may race the handler's discovery; whichever
    // lands second is the duplicate.
    if let Err(err) = second {
        assert!(matches!(err, DispatchError::AlreadyScheduled(_)));
    }

    wait_for_completed(&session, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snap = session.stats().snapshot();
    assert_eq!(snap.work_items_total, 2);
    assert_eq!(snap.work_items_completed, 2);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_sessions_do_not_share_dedup_state() {
    let registry = Registry::new();
    let handled = Arc::new(AtomicUsize::new(0));
    registry
        .register_handler(finder_handler(Arc::clone(&handled)))
        .unwrap();

    let manager = Arc::new(SessionManager::new());
    let dispatcher = Dispatcher::start(&registry, Arc::clone(&manager), RuntimeConfig::default());
    let first = manager.new_session(SessionConfig::in_scope(["example.com"]));
    let second = manager.new_session(SessionConfig::in_scope(["example.com"]));

    dispatcher
        .dispatch(AssetEvent::new(
            "example.com",
            first.id(),
            Asset::fqdn("example.com"),
        ))
        .unwrap();
    dispatcher
        .dispatch(AssetEvent::new(
            "example.com",
            second.id(),
            Asset::fqdn("example.com"),
        ))
        .unwrap();

    wait_for_completed(&first, 2).await;
    wait_for_completed(&second, 2).await;

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_failed_handler_still_completes_item() {
    struct FailingHandler;

    #[async_trait]
    impl HandlerCallback for FailingHandler {
        async fn handle(&self, _ctx: &HandlerContext) -> Result<(), HandlerError> {
            Err(HandlerError::failed("data source unreachable"))
        }
    }

    let registry = Registry::new();
    registry
        .register_handler(Handler {
            plugin: "failing".to_string(),
            name: "failing-handler".to_string(),
            event_type: AssetType::Fqdn,
            transforms: vec![],
            priority: 1,
            max_instances: 1,
            callback: Arc::new(FailingHandler),
        })
        .unwrap();

    let manager = Arc::new(SessionManager::new());
    let dispatcher = Dispatcher::start(&registry, Arc::clone(&manager), RuntimeConfig::default());
    let session = manager.new_session(SessionConfig::default());

    dispatcher
        .dispatch(AssetEvent::new(
            "example.com",
            session.id(),
            Asset::fqdn("example.com"),
        ))
        .unwrap();

    wait_for_completed(&session, 1).await;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_flushes_in_flight_items() {
    struct SlowHandler;

    #[async_trait]
    impl HandlerCallback for SlowHandler {
        async fn handle(&self, _ctx: &HandlerContext) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }
    }

    let registry = Registry::new();
    registry
        .register_handler(Handler {
            plugin: "slow".to_string(),
            name: "slow-handler".to_string(),
            event_type: AssetType::Fqdn,
            transforms: vec![],
            priority: 1,
            max_instances: 2,
            callback: Arc::new(SlowHandler),
        })
        .unwrap();

    let manager = Arc::new(SessionManager::new());
    let dispatcher = Dispatcher::start(&registry, Arc::clone(&manager), RuntimeConfig::default());
    let session = manager.new_session(SessionConfig::default());

    for i in 0..4 {
        dispatcher
            .dispatch(AssetEvent::new(
                format!("host-{i}.example.com"),
                session.id(),
                Asset::fqdn(format!("host-{i}.example.com")),
            ))
            .unwrap();
    }

    // Shutdown drains the pools and the completion queue; every item that
    // entered a worker is counted before this returns.
    dispatcher.shutdown().await;

    let snap = session.stats().snapshot();
    assert_eq!(snap.work_items_total, 4);
    assert!(snap.work_items_completed <= snap.work_items_total);
}
