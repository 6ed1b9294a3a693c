//! Pool manager behavior: lazy builds, LRU admission, idle reclamation,
//! saturation, and build-failure writeback.

use std::sync::Arc;
use std::time::Duration;

use tessera_core::{RouterConfig, RouterError};
use tessera_db::MetadataStore;
use tessera_router::testing::{
    dedicated_tenant, shared_tenant, test_codec, test_config, FakeBackend, InMemoryMetadataStore,
};
use tessera_router::{ConnectionPoolManager, PoolKey};

async fn manager(
    config: RouterConfig,
    store: &Arc<InMemoryMetadataStore>,
    backend: FakeBackend,
) -> Arc<ConnectionPoolManager<FakeBackend>> {
    let store_dyn: Arc<dyn MetadataStore> = Arc::clone(store) as Arc<dyn MetadataStore>;
    Arc::new(
        ConnectionPoolManager::new(backend, store_dyn, test_codec(), config)
            .await
            .expect("manager construction"),
    )
}

#[tokio::test]
async fn test_pools_are_built_lazily() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let backend = FakeBackend::new();
    let pools = manager(test_config(), &store, backend.clone()).await;

    // Only the admin pool exists at startup
    assert_eq!(backend.build_count(), 1);
    assert_eq!(pools.stats().await.live_tenant_pools, 0);

    let acme = dedicated_tenant("acme");
    let handle = pools.acquire(&acme).await.unwrap();
    assert_eq!(backend.build_count(), 2);
    assert_eq!(handle.marker, "acme.db.internal/acme");
    drop(handle);

    // Reuse, not rebuild
    pools.acquire(&acme).await.unwrap();
    assert_eq!(backend.build_count(), 2);
}

#[tokio::test]
async fn test_connections_carry_their_tenants_database() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let pools = manager(test_config(), &store, FakeBackend::new()).await;

    let acme = dedicated_tenant("acme");
    let globex = dedicated_tenant("globex");
    let a = pools.acquire(&acme).await.unwrap();
    let g = pools.acquire(&globex).await.unwrap();
    assert_eq!(a.marker, "acme.db.internal/acme");
    assert_eq!(g.marker, "globex.db.internal/globex");
    assert_ne!(a.marker, g.marker);
}

#[tokio::test]
async fn test_shared_tenants_route_to_admin_pool() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let backend = FakeBackend::new();
    let mut config = test_config();
    config.database_url = "postgres://central.internal/core".to_string();
    let pools = manager(config, &store, backend.clone()).await;

    let handle = pools.acquire(&shared_tenant("acme")).await.unwrap();
    assert_eq!(handle.key(), PoolKey::Admin);
    assert_eq!(handle.marker, "postgres://central.internal/core");
    assert_eq!(backend.build_count(), 1);
    assert_eq!(pools.stats().await.live_tenant_pools, 0);
}

#[tokio::test]
async fn test_lru_eviction_at_capacity() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let backend = FakeBackend::new();
    let mut config = test_config();
    config.max_tenant_pools = 2;
    let pools = manager(config, &store, backend.clone()).await;

    let a = dedicated_tenant("a");
    let b = dedicated_tenant("b");
    let c = dedicated_tenant("c");

    pools.acquire(&a).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    pools.acquire(&b).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    pools.acquire(&c).await.unwrap();

    let stats = pools.stats().await;
    assert_eq!(stats.live_tenant_pools, 2);
    let keys: Vec<&str> = stats.pools.iter().map(|p| p.key.as_str()).collect();
    assert!(!keys.contains(&PoolKey::Tenant(a.tenant.id).to_string().as_str()));
    assert!(keys.contains(&PoolKey::Tenant(b.tenant.id).to_string().as_str()));
    assert!(keys.contains(&PoolKey::Tenant(c.tenant.id).to_string().as_str()));
}

#[tokio::test]
async fn test_recent_access_protects_from_eviction() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let mut config = test_config();
    config.max_tenant_pools = 2;
    let pools = manager(config, &store, FakeBackend::new()).await;

    let a = dedicated_tenant("a");
    let b = dedicated_tenant("b");
    let c = dedicated_tenant("c");

    pools.acquire(&a).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    pools.acquire(&b).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    // Re-touch a, making b the oldest
    pools.acquire(&a).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    pools.acquire(&c).await.unwrap();

    let stats = pools.stats().await;
    let keys: Vec<&str> = stats.pools.iter().map(|p| p.key.as_str()).collect();
    assert!(keys.contains(&PoolKey::Tenant(a.tenant.id).to_string().as_str()));
    assert!(!keys.contains(&PoolKey::Tenant(b.tenant.id).to_string().as_str()));
    assert!(keys.contains(&PoolKey::Tenant(c.tenant.id).to_string().as_str()));
}

#[tokio::test]
async fn test_concurrent_first_acquire_builds_one_pool() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let backend = FakeBackend::new();
    backend.set_build_delay(Duration::from_millis(100));
    let mut config = test_config();
    // Wide enough that the checkout after the slow build never times out
    config.acquire_timeout = Duration::from_secs(2);
    let pools = manager(config, &store, backend.clone()).await;

    let acme = Arc::new(dedicated_tenant("acme"));
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pools = Arc::clone(&pools);
        let acme = Arc::clone(&acme);
        tasks.push(tokio::spawn(async move {
            let handle = pools.acquire(&acme).await.unwrap();
            handle.marker.clone()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), "acme.db.internal/acme");
    }
    // Admin pool plus exactly one tenant pool
    assert_eq!(backend.build_count(), 2);
}

#[tokio::test]
async fn test_idle_sweep_reclaims_and_acquire_rebuilds() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let backend = FakeBackend::new();
    let pools = manager(test_config(), &store, backend.clone()).await;

    let acme = dedicated_tenant("acme");
    drop(pools.acquire(&acme).await.unwrap());
    assert_eq!(backend.build_count(), 2);

    // idle_timeout is 200ms in the test config
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pools.evict_idle().await, 1);
    assert_eq!(pools.stats().await.live_tenant_pools, 0);

    // Next acquisition rebuilds transparently
    let handle = pools.acquire(&acme).await.unwrap();
    assert_eq!(handle.marker, "acme.db.internal/acme");
    assert_eq!(backend.build_count(), 3);
}

#[tokio::test]
async fn test_in_use_pool_survives_idle_sweep() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let pools = manager(test_config(), &store, FakeBackend::new()).await;

    let acme = dedicated_tenant("acme");
    let handle = pools.acquire(&acme).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pools.evict_idle().await, 0);
    assert_eq!(pools.stats().await.live_tenant_pools, 1);
    drop(handle);
}

#[tokio::test]
async fn test_saturated_pool_times_out_with_exhausted() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let pools = manager(test_config(), &store, FakeBackend::new()).await;

    // tenant_pool_size 2 + overflow 1 = 3 connections
    let acme = dedicated_tenant("acme");
    let _h1 = pools.acquire(&acme).await.unwrap();
    let _h2 = pools.acquire(&acme).await.unwrap();
    let _h3 = pools.acquire(&acme).await.unwrap();

    let err = pools.acquire(&acme).await.unwrap_err();
    assert!(matches!(err, RouterError::PoolExhausted { .. }));
    assert_eq!(pools.stats().await.exhausted_total, 1);

    // Releasing a connection unblocks acquisition
    drop(_h1);
    assert!(pools.acquire(&acme).await.is_ok());
}

#[tokio::test]
async fn test_build_failure_is_recorded_and_retried() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let backend = FakeBackend::new();
    let pools = manager(test_config(), &store, backend.clone()).await;

    let acme = dedicated_tenant("acme");
    backend.fail_host("acme.db.internal");

    let err = pools.acquire(&acme).await.unwrap_err();
    assert!(matches!(
        err,
        RouterError::ConnectionBuildFailed { tenant_id, .. } if tenant_id == acme.tenant.id
    ));
    let recorded = store.last_error_for(acme.tenant.id).unwrap();
    assert!(recorded.contains("connection refused"));
    assert_eq!(pools.stats().await.live_tenant_pools, 0);

    // The failure is not sticky: a later acquire retries the build
    backend.restore_host("acme.db.internal");
    assert!(pools.acquire(&acme).await.is_ok());
    assert_eq!(store.last_error_for(acme.tenant.id), None);
}

#[tokio::test]
async fn test_dedicated_tenant_without_metadata_fails() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let pools = manager(test_config(), &store, FakeBackend::new()).await;

    let mut acme = dedicated_tenant("acme");
    acme.metadata = None;
    let err = pools.acquire(&acme).await.unwrap_err();
    assert!(matches!(err, RouterError::ConnectionBuildFailed { .. }));
}

#[tokio::test]
async fn test_retire_closes_pool_and_next_acquire_rebuilds() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let backend = FakeBackend::new();
    let pools = manager(test_config(), &store, backend.clone()).await;

    let acme = dedicated_tenant("acme");
    drop(pools.acquire(&acme).await.unwrap());
    pools.retire(acme.tenant.id).await;
    assert_eq!(pools.stats().await.live_tenant_pools, 0);

    assert!(pools.acquire(&acme).await.is_ok());
    assert_eq!(backend.build_count(), 3);
}

#[tokio::test]
async fn test_background_sweeper_reclaims_idle_pools() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let pools = manager(test_config(), &store, FakeBackend::new()).await;

    let acme = dedicated_tenant("acme");
    drop(pools.acquire(&acme).await.unwrap());

    let sweeper = Arc::clone(&pools).start_idle_sweeper();
    // idle_timeout 200ms + sweep_interval 50ms, with slack
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(pools.stats().await.live_tenant_pools, 0);
    sweeper.abort();
}
