//! End-to-end routing: hint in, tenant-scoped connection out, with
//! enforcement and stats observable along the way.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use tessera_core::RouterError;
use tessera_router::testing::{
    dedicated_tenant, shared_tenant, test_config, FakeBackend, InMemoryMetadataStore,
};
use tessera_router::{
    PoolKey, QueryVerb, Statement, StructuredQuery, TenantContext, Verdict,
};

use helpers::router_with;

#[tokio::test]
async fn test_unit_of_work_end_to_end() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let acme = dedicated_tenant("acme");
    let acme_id = acme.tenant.id;
    store.insert(acme);
    let router = router_with(test_config(), Arc::clone(&store), FakeBackend::new()).await;

    let before = router.stats().await;
    assert_eq!(before.pools.live_tenant_pools, 0);

    let session = router.begin("acme").await.unwrap();
    assert_eq!(session.tenant_id(), acme_id);
    assert_eq!(session.handle().marker, "acme.db.internal/acme");

    let during = router.stats().await;
    assert_eq!(during.pools.live_tenant_pools, 1);
    let tenant_stat = during
        .pools
        .pools
        .iter()
        .find(|p| p.key == PoolKey::Tenant(acme_id).to_string())
        .unwrap();
    assert_eq!(tenant_stat.in_use, 1);

    // Enforcement sees the established context
    let active = session.active().clone();
    TenantContext::scope(active, async {
        let query = StructuredQuery::new(QueryVerb::Select, "invoices")
            .with_predicate("tenant_id", acme_id.to_string());
        assert_eq!(
            router
                .enforcer()
                .check_current(&Statement::Structured(query))
                .unwrap(),
            Verdict::Scoped
        );
    })
    .await;

    // Dropping the session returns the connection
    drop(session);
    let after = router.stats().await;
    let tenant_stat = after
        .pools
        .pools
        .iter()
        .find(|p| p.key == PoolKey::Tenant(acme_id).to_string())
        .unwrap();
    assert_eq!(tenant_stat.in_use, 0);
}

#[tokio::test]
async fn test_scoped_establishes_context_for_the_closure() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let acme = dedicated_tenant("acme");
    let acme_id = acme.tenant.id;
    store.insert(acme);
    let router = router_with(test_config(), store, FakeBackend::new()).await;

    let marker = router
        .scoped("acme", |session| async move {
            assert_eq!(TenantContext::current()?.tenant_id, acme_id);
            Ok(session.handle().marker.clone())
        })
        .await
        .unwrap();
    assert_eq!(marker, "acme.db.internal/acme");
    assert!(!TenantContext::is_established());
}

#[tokio::test]
async fn test_scoped_tears_down_on_error() {
    let store = Arc::new(InMemoryMetadataStore::new());
    store.insert(dedicated_tenant("acme"));
    let router = router_with(test_config(), store, FakeBackend::new()).await;

    let result: Result<(), RouterError> = router
        .scoped("acme", |_session| async move {
            Err(RouterError::Internal("work failed".to_string()))
        })
        .await;
    assert!(result.is_err());
    assert!(!TenantContext::is_established());

    // The connection went back to the pool
    let stats = router.stats().await;
    assert!(stats.pools.pools.iter().all(|p| p.in_use == 0));
}

#[tokio::test]
async fn test_concurrent_units_of_work_stay_isolated() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let acme = dedicated_tenant("acme");
    let globex = dedicated_tenant("globex");
    let acme_id = acme.tenant.id;
    let globex_id = globex.tenant.id;
    store.insert(acme);
    store.insert(globex);
    let router = Arc::new(router_with(test_config(), store, FakeBackend::new()).await);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let router = Arc::clone(&router);
        let (hint, expected_id, expected_marker) = if i % 2 == 0 {
            ("acme", acme_id, "acme.db.internal/acme")
        } else {
            ("globex", globex_id, "globex.db.internal/globex")
        };
        tasks.push(tokio::spawn(async move {
            router
                .scoped(hint, |session| async move {
                    for _ in 0..20 {
                        assert_eq!(TenantContext::current()?.tenant_id, expected_id);
                        assert_eq!(session.handle().marker, expected_marker);
                        tokio::task::yield_now().await;
                    }
                    Ok(())
                })
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_shared_tenant_work_runs_on_admin_pool() {
    let store = Arc::new(InMemoryMetadataStore::new());
    store.insert(shared_tenant("smallco"));
    let router = router_with(test_config(), store, FakeBackend::new()).await;

    let session = router.begin("smallco").await.unwrap();
    assert_eq!(session.handle().key(), PoolKey::Admin);
    assert_eq!(router.stats().await.pools.live_tenant_pools, 0);
}

#[tokio::test]
async fn test_invalidate_tenant_drops_cache_and_pool() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let acme = dedicated_tenant("acme");
    let acme_id = acme.tenant.id;
    store.insert(acme);
    let backend = FakeBackend::new();
    let router = router_with(test_config(), Arc::clone(&store), backend.clone()).await;

    drop(router.begin("acme").await.unwrap());
    assert_eq!(store.fetch_count(), 1);
    assert_eq!(router.stats().await.pools.live_tenant_pools, 1);

    router.invalidate_tenant(acme_id).await;
    assert_eq!(router.stats().await.pools.live_tenant_pools, 0);

    // Fresh resolution and a fresh pool on the next unit of work
    drop(router.begin("acme").await.unwrap());
    assert_eq!(store.fetch_count(), 2);
    assert_eq!(backend.build_count(), 3);
}

#[tokio::test]
async fn test_violations_surface_in_stats() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let acme = dedicated_tenant("acme");
    store.insert(acme);
    let router = router_with(test_config(), store, FakeBackend::new()).await;

    let result: Result<(), RouterError> = router
        .scoped("acme", |_session| async {
            let query = StructuredQuery::new(QueryVerb::Delete, "invoices");
            router
                .enforcer()
                .check_current(&Statement::Structured(query))?;
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(RouterError::IsolationViolation(_))));
    assert_eq!(router.stats().await.violations.enforced, 1);
}

#[tokio::test]
async fn test_unresolvable_hint_never_reaches_a_pool() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let backend = FakeBackend::new();
    let router = router_with(test_config(), store, backend.clone()).await;

    let err = router.begin("nobody").await.unwrap_err();
    assert!(matches!(err, RouterError::TenantNotResolved(_)));
    // Only the admin pool was ever built
    assert_eq!(backend.build_count(), 1);
}

#[tokio::test]
async fn test_background_sweeper_via_router() {
    let store = Arc::new(InMemoryMetadataStore::new());
    store.insert(dedicated_tenant("acme"));
    let router = router_with(test_config(), store, FakeBackend::new()).await;

    drop(router.begin("acme").await.unwrap());
    let sweeper = router.start_idle_sweeper();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(router.stats().await.pools.live_tenant_pools, 0);
    sweeper.abort();
}
