//! Write-side repository for the tenant directory.
//!
//! Consumed by the external tenant-administration collaborator (provisioning,
//! suspension, connection changes). Every metadata mutation here must be
//! followed by a `MetadataCache::invalidate` call for the affected tenant.

use sqlx::PgPool;
use uuid::Uuid;

use tessera_core::models::{ConnectionMetadata, IsolationMode, Tenant, TenantStatus};
use tessera_core::RouterError;

#[derive(Clone)]
pub struct TenantDirectory {
    pool: PgPool,
}

impl TenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new tenant. The routing hint is immutable once assigned.
    pub async fn create_tenant(
        &self,
        code: &str,
        routing_hint: &str,
        isolation_mode: IsolationMode,
    ) -> Result<Tenant, RouterError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (code, routing_hint, isolation_mode, status)
            VALUES ($1, $2, $3, 'trial')
            RETURNING id, code, routing_hint, isolation_mode, status, created_at, updated_at
            "#,
        )
        .bind(code)
        .bind(routing_hint)
        .bind(isolation_mode)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create tenant: {}", e);
            RouterError::Internal("Failed to create tenant".to_string())
        })?;

        tracing::info!(
            tenant_id = %tenant.id,
            routing_hint = %tenant.routing_hint,
            "Created new tenant"
        );
        Ok(tenant)
    }

    /// Update tenant lifecycle status. Tenants are never physically deleted;
    /// cancellation is a status change so the hint can never be re-raced.
    pub async fn update_tenant_status(
        &self,
        tenant_id: Uuid,
        status: TenantStatus,
    ) -> Result<Tenant, RouterError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            UPDATE tenants
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, code, routing_hint, isolation_mode, status, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(tenant_id = %tenant_id, "Failed to update tenant status: {}", e);
            if matches!(e, sqlx::Error::RowNotFound) {
                RouterError::TenantNotResolved(format!("tenant {} not found", tenant_id))
            } else {
                RouterError::Internal("Failed to update tenant status".to_string())
            }
        })?;

        tracing::info!(tenant_id = %tenant_id, status = ?status, "Updated tenant status");
        Ok(tenant)
    }

    /// Insert or replace a tenant's connection metadata. The credential blob
    /// arrives already encrypted by the `CredentialCodec`.
    pub async fn upsert_connection(
        &self,
        metadata: &ConnectionMetadata,
    ) -> Result<(), RouterError> {
        sqlx::query(
            r#"
            INSERT INTO tenant_connections
                (tenant_id, host, port, database_name, encrypted_credentials,
                 engine, tls, pool_size, pool_overflow, read_only)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (tenant_id) DO UPDATE SET
                host = EXCLUDED.host,
                port = EXCLUDED.port,
                database_name = EXCLUDED.database_name,
                encrypted_credentials = EXCLUDED.encrypted_credentials,
                engine = EXCLUDED.engine,
                tls = EXCLUDED.tls,
                pool_size = EXCLUDED.pool_size,
                pool_overflow = EXCLUDED.pool_overflow,
                read_only = EXCLUDED.read_only,
                updated_at = NOW()
            "#,
        )
        .bind(metadata.tenant_id)
        .bind(&metadata.host)
        .bind(metadata.port as i32)
        .bind(&metadata.database_name)
        .bind(&metadata.encrypted_credentials)
        .bind(metadata.engine)
        .bind(metadata.tls)
        .bind(metadata.pool_size)
        .bind(metadata.pool_overflow)
        .bind(metadata.read_only)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(tenant_id = %metadata.tenant_id, "Failed to upsert connection metadata: {}", e);
            RouterError::Internal("Failed to upsert connection metadata".to_string())
        })?;

        tracing::info!(tenant_id = %metadata.tenant_id, "Upserted connection metadata");
        Ok(())
    }
}
