//! MetadataStore: read-mostly access to the tenant directory.
//!
//! The trait is the seam the cache and resolver depend on; `PgMetadataStore`
//! is the production implementation over the admin database. Tests swap in
//! an in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use tessera_core::models::{ConnectionMetadata, DbEngine, ResolvedTenant, Tenant};
use tessera_core::RouterError;

/// Durable source of truth for tenant identity and connection metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch a tenant and its connection metadata by routing hint.
    ///
    /// Fails (rather than picking arbitrarily) if two live records somehow
    /// share the hint; the uniqueness invariant upstream should prevent it.
    async fn fetch_by_hint(&self, hint: &str) -> Result<Option<ResolvedTenant>, RouterError>;

    /// Fetch a tenant and its connection metadata by tenant id.
    async fn fetch_by_id(&self, tenant_id: Uuid) -> Result<Option<ResolvedTenant>, RouterError>;

    /// Write back the last failure observed while building a physical
    /// connection, for operator visibility. Best-effort.
    async fn record_connection_error(
        &self,
        tenant_id: Uuid,
        detail: &str,
    ) -> Result<(), RouterError>;

    /// Mark a successful physical connection build.
    async fn record_connection_ok(&self, tenant_id: Uuid) -> Result<(), RouterError>;
}

/// Postgres-backed metadata store over the admin database.
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

/// Row shape for tenant_connections; port is INT in Postgres.
#[derive(sqlx::FromRow)]
struct ConnectionRow {
    tenant_id: Uuid,
    host: String,
    port: i32,
    database_name: String,
    encrypted_credentials: String,
    engine: DbEngine,
    tls: bool,
    pool_size: Option<i32>,
    pool_overflow: Option<i32>,
    read_only: bool,
    last_ok_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl From<ConnectionRow> for ConnectionMetadata {
    fn from(row: ConnectionRow) -> Self {
        ConnectionMetadata {
            tenant_id: row.tenant_id,
            host: row.host,
            port: row.port as u16,
            database_name: row.database_name,
            encrypted_credentials: row.encrypted_credentials,
            engine: row.engine,
            tls: row.tls,
            pool_size: row.pool_size,
            pool_overflow: row.pool_overflow,
            read_only: row.read_only,
            last_ok_at: row.last_ok_at,
            last_error: row.last_error,
        }
    }
}

/// Map connectivity-class sqlx failures to `StoreUnavailable` so callers can
/// back off; anything else stays a database error.
fn map_store_error(err: sqlx::Error) -> RouterError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Tls(_) => RouterError::StoreUnavailable(err.to_string()),
        _ => RouterError::Database(err),
    }
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_metadata(
        &self,
        tenant: Tenant,
    ) -> Result<ResolvedTenant, RouterError> {
        let metadata = sqlx::query_as::<_, ConnectionRow>(
            r#"
            SELECT tenant_id, host, port, database_name, encrypted_credentials,
                   engine, tls, pool_size, pool_overflow, read_only,
                   last_ok_at, last_error
            FROM tenant_connections
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(tenant_id = %tenant.id, "Failed to fetch connection metadata: {}", e);
            map_store_error(e)
        })?
        .map(ConnectionMetadata::from);

        Ok(ResolvedTenant { tenant, metadata })
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn fetch_by_hint(&self, hint: &str) -> Result<Option<ResolvedTenant>, RouterError> {
        let mut tenants = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT id, code, routing_hint, isolation_mode, status, created_at, updated_at
            FROM tenants
            WHERE routing_hint = $1 AND status != 'cancelled'
            "#,
        )
        .bind(hint)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(hint = %hint, "Failed to fetch tenant by hint: {}", e);
            map_store_error(e)
        })?;

        if tenants.len() > 1 {
            tracing::error!(
                hint = %hint,
                count = tenants.len(),
                "Routing hint maps to multiple live tenants"
            );
            return Err(RouterError::Internal(format!(
                "routing hint '{}' is ambiguous ({} live tenants)",
                hint,
                tenants.len()
            )));
        }
        let Some(tenant) = tenants.pop() else {
            return Ok(None);
        };

        self.load_metadata(tenant).await.map(Some)
    }

    async fn fetch_by_id(&self, tenant_id: Uuid) -> Result<Option<ResolvedTenant>, RouterError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT id, code, routing_hint, isolation_mode, status, created_at, updated_at
            FROM tenants
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(tenant_id = %tenant_id, "Failed to fetch tenant by id: {}", e);
            map_store_error(e)
        })?;

        match tenant {
            Some(tenant) => self.load_metadata(tenant).await.map(Some),
            None => Ok(None),
        }
    }

    async fn record_connection_error(
        &self,
        tenant_id: Uuid,
        detail: &str,
    ) -> Result<(), RouterError> {
        sqlx::query(
            r#"
            UPDATE tenant_connections
            SET last_error = $2, updated_at = NOW()
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::warn!(tenant_id = %tenant_id, "Failed to record connection error: {}", e);
            map_store_error(e)
        })?;

        Ok(())
    }

    async fn record_connection_ok(&self, tenant_id: Uuid) -> Result<(), RouterError> {
        sqlx::query(
            r#"
            UPDATE tenant_connections
            SET last_ok_at = NOW(), last_error = NULL, updated_at = NOW()
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::warn!(tenant_id = %tenant_id, "Failed to record connection ok: {}", e);
            map_store_error(e)
        })?;

        Ok(())
    }
}
