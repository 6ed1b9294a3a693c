//! Test doubles and fixtures shared by unit and integration tests.
//!
//! An in-memory metadata store and a fake connection backend let the
//! routing, pooling, and enforcement behavior be exercised without a
//! running database. Fake connections carry a marker derived from the
//! host/database they were "built" against, so cross-tenant leakage is
//! directly assertable.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use tessera_core::models::{
    ConnectionMetadata, DbCredentials, DbEngine, IsolationMode, ResolvedTenant, Tenant,
    TenantStatus,
};
use tessera_core::{CredentialCodec, IsolationPolicy, RouterConfig, RouterError};
use tessera_db::MetadataStore;

use crate::backend::{ConnectionBackend, PhysicalPool, PoolSpec};
use crate::cache::DistributedTier;

pub fn test_codec() -> CredentialCodec {
    CredentialCodec::from_key_bytes(b"01234567890123456789012345678901")
        .expect("test key is 32 bytes")
}

/// A router config with short timeouts suitable for tests.
pub fn test_config() -> RouterConfig {
    RouterConfig {
        environment: "development".to_string(),
        database_url: "postgres://central.internal/core".to_string(),
        admin_pool_size: 8,
        max_tenant_pools: 100,
        tenant_pool_size: 2,
        tenant_pool_overflow: 1,
        acquire_timeout: Duration::from_millis(250),
        idle_timeout: Duration::from_millis(200),
        drain_timeout: Duration::from_millis(200),
        sweep_interval: Duration::from_millis(50),
        cache_ttl: Duration::from_secs(60),
        cache_capacity: 64,
        cache_fail_open: false,
        fetch_timeout: Duration::from_millis(250),
        isolation_policy: IsolationPolicy::Enforce,
        tenant_global_tables: vec!["plans".to_string()],
        hint_fallback_enabled: false,
        hint_strip_suffixes: vec![],
    }
}

fn tenant(hint: &str, isolation_mode: IsolationMode, status: TenantStatus) -> Tenant {
    let now = Utc::now();
    Tenant {
        id: Uuid::new_v4(),
        code: hint.to_uppercase(),
        routing_hint: hint.to_string(),
        isolation_mode,
        status,
        created_at: now,
        updated_at: now,
    }
}

/// A dedicated tenant whose database host is derived from the hint, so the
/// fake connection marker identifies it.
pub fn dedicated_tenant(hint: &str) -> ResolvedTenant {
    let tenant = tenant(hint, IsolationMode::Dedicated, TenantStatus::Active);
    let creds = DbCredentials {
        username: format!("{}_app", hint),
        password: "pw".to_string(),
    };
    let metadata = ConnectionMetadata {
        tenant_id: tenant.id,
        host: format!("{}.db.internal", hint),
        port: 5432,
        database_name: hint.to_string(),
        encrypted_credentials: test_codec()
            .encrypt_credentials(&creds)
            .expect("encrypt test credentials"),
        engine: DbEngine::Postgres,
        tls: false,
        pool_size: None,
        pool_overflow: None,
        read_only: false,
        last_ok_at: None,
        last_error: None,
    };
    ResolvedTenant {
        tenant,
        metadata: Some(metadata),
    }
}

pub fn shared_tenant(hint: &str) -> ResolvedTenant {
    ResolvedTenant {
        tenant: tenant(hint, IsolationMode::Shared, TenantStatus::Active),
        metadata: None,
    }
}

pub fn with_status(mut resolved: ResolvedTenant, status: TenantStatus) -> ResolvedTenant {
    resolved.tenant.status = status;
    resolved
}

/// In-memory metadata store with switchable availability.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    tenants: StdMutex<HashMap<Uuid, ResolvedTenant>>,
    hints: StdMutex<HashMap<String, Vec<Uuid>>>,
    unavailable: AtomicBool,
    hung: AtomicBool,
    fetches: AtomicUsize,
    connection_errors: StdMutex<HashMap<Uuid, String>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resolved: ResolvedTenant) {
        let id = resolved.tenant.id;
        let hint = resolved.tenant.routing_hint.clone();
        self.hints.lock().unwrap().entry(hint).or_default().push(id);
        self.tenants.lock().unwrap().insert(id, resolved);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make fetches block forever, simulating a stalled store connection.
    pub fn set_hung(&self, hung: bool) {
        self.hung.store(hung, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn last_error_for(&self, tenant_id: Uuid) -> Option<String> {
        self.connection_errors.lock().unwrap().get(&tenant_id).cloned()
    }

    async fn check_available(&self) -> Result<(), RouterError> {
        if self.hung.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RouterError::StoreUnavailable(
                "metadata store is down".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn fetch_by_hint(&self, hint: &str) -> Result<Option<ResolvedTenant>, RouterError> {
        self.check_available().await?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let ids = self
            .hints
            .lock()
            .unwrap()
            .get(hint)
            .cloned()
            .unwrap_or_default();
        match ids.as_slice() {
            [] => Ok(None),
            [id] => Ok(self.tenants.lock().unwrap().get(id).cloned()),
            many => Err(RouterError::Internal(format!(
                "routing hint '{}' is ambiguous ({} live tenants)",
                hint,
                many.len()
            ))),
        }
    }

    async fn fetch_by_id(&self, tenant_id: Uuid) -> Result<Option<ResolvedTenant>, RouterError> {
        self.check_available().await?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.tenants.lock().unwrap().get(&tenant_id).cloned())
    }

    async fn record_connection_error(
        &self,
        tenant_id: Uuid,
        detail: &str,
    ) -> Result<(), RouterError> {
        self.connection_errors
            .lock()
            .unwrap()
            .insert(tenant_id, detail.to_string());
        Ok(())
    }

    async fn record_connection_ok(&self, tenant_id: Uuid) -> Result<(), RouterError> {
        self.connection_errors.lock().unwrap().remove(&tenant_id);
        Ok(())
    }
}

/// In-memory distributed tier, with a switch to simulate unreachability.
#[derive(Default)]
pub struct InMemoryDistributedTier {
    entries: StdMutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl InMemoryDistributedTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), RouterError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RouterError::Internal("distributed tier is down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DistributedTier for InMemoryDistributedTier {
    async fn get(&self, key: &str) -> Result<Option<String>, RouterError> {
        self.check_available()?;
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), RouterError> {
        self.check_available()?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), RouterError> {
        self.check_available()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// A fake connection checked out of a fake pool. The marker records which
/// physical database the pool was built against.
pub struct FakeConn {
    pub marker: String,
    _permit: OwnedSemaphorePermit,
}

pub struct FakePool {
    label: String,
    pub marker: String,
    acquire_timeout: Duration,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
}

#[async_trait]
impl PhysicalPool for FakePool {
    type Conn = FakeConn;

    async fn checkout(&self) -> Result<FakeConn, RouterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RouterError::Internal(format!(
                "pool {} is closed",
                self.label
            )));
        }
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| RouterError::PoolExhausted {
            key: self.label.clone(),
        })?
        .map_err(|_| RouterError::Internal(format!("pool {} is closed", self.label)))?;

        Ok(FakeConn {
            marker: self.marker.clone(),
            _permit: permit,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.semaphore.close();
    }
}

/// Fake backend that counts builds and can simulate unreachable hosts and
/// slow builds (to widen first-acquire race windows).
#[derive(Clone, Default)]
pub struct FakeBackend {
    builds: Arc<AtomicUsize>,
    build_delay: Arc<StdMutex<Duration>>,
    failing_hosts: Arc<StdMutex<HashSet<String>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn set_build_delay(&self, delay: Duration) {
        *self.build_delay.lock().unwrap() = delay;
    }

    pub fn fail_host(&self, host: &str) {
        self.failing_hosts.lock().unwrap().insert(host.to_string());
    }

    pub fn restore_host(&self, host: &str) {
        self.failing_hosts.lock().unwrap().remove(host);
    }
}

#[async_trait]
impl ConnectionBackend for FakeBackend {
    type Pool = FakePool;

    async fn build(&self, spec: &PoolSpec) -> anyhow::Result<FakePool> {
        let delay = *self.build_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.builds.fetch_add(1, Ordering::SeqCst);

        match spec {
            PoolSpec::Admin {
                url,
                max_connections,
                acquire_timeout,
            } => Ok(FakePool {
                label: "admin".to_string(),
                marker: url.clone(),
                acquire_timeout: *acquire_timeout,
                semaphore: Arc::new(Semaphore::new(*max_connections as usize)),
                closed: AtomicBool::new(false),
            }),
            PoolSpec::Tenant(params) => {
                if self.failing_hosts.lock().unwrap().contains(&params.host) {
                    anyhow::bail!("connection refused: {}:{}", params.host, params.port);
                }
                Ok(FakePool {
                    label: params.label.clone(),
                    marker: format!("{}/{}", params.host, params.database_name),
                    acquire_timeout: params.acquire_timeout,
                    semaphore: Arc::new(Semaphore::new(params.max_connections as usize)),
                    closed: AtomicBool::new(false),
                })
            }
        }
    }
}
