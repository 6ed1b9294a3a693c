//! Physical-connection backend seam.
//!
//! The pool manager builds and drains pools through these traits so the
//! routing logic stays independent of the wire driver. `PgBackend` is the
//! production implementation over sqlx; tests substitute an in-memory fake.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;

use tessera_core::RouterError;

/// Connect parameters for a dedicated tenant database, produced from
/// decrypted `ConnectionMetadata`. The password lives only as long as the
/// build call.
#[derive(Clone)]
pub struct PoolParams {
    /// Display label for logs and errors ("tenant/<uuid>").
    pub label: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub username: String,
    pub password: String,
    pub tls: bool,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl std::fmt::Debug for PoolParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolParams")
            .field("label", &self.label)
            .field("database_name", &self.database_name)
            .field("tls", &self.tls)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// What to build a pool against.
#[derive(Debug, Clone)]
pub enum PoolSpec {
    /// The always-on admin/central database, specified by URL.
    Admin {
        url: String,
        max_connections: u32,
        acquire_timeout: Duration,
    },
    /// A dedicated tenant database.
    Tenant(PoolParams),
}

/// One bounded set of reusable physical connections.
#[async_trait]
pub trait PhysicalPool: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// Check out a connection, waiting up to the pool's configured acquire
    /// timeout. Saturation surfaces as `PoolExhausted`.
    async fn checkout(&self) -> Result<Self::Conn, RouterError>;

    /// Close the pool, releasing idle connections. In-flight connections
    /// observe errors once closed.
    async fn close(&self);
}

/// Builds physical pools from a spec.
#[async_trait]
pub trait ConnectionBackend: Send + Sync + 'static {
    type Pool: PhysicalPool;

    async fn build(&self, spec: &PoolSpec) -> anyhow::Result<Self::Pool>;
}

/// sqlx-backed Postgres pool.
pub struct PgPhysicalPool {
    label: String,
    pool: PgPool,
}

#[async_trait]
impl PhysicalPool for PgPhysicalPool {
    type Conn = sqlx::pool::PoolConnection<sqlx::Postgres>;

    async fn checkout(&self) -> Result<Self::Conn, RouterError> {
        self.pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => RouterError::PoolExhausted {
                key: self.label.clone(),
            },
            other => RouterError::Database(other),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Production backend over sqlx/Postgres.
#[derive(Default)]
pub struct PgBackend;

#[async_trait]
impl ConnectionBackend for PgBackend {
    type Pool = PgPhysicalPool;

    async fn build(&self, spec: &PoolSpec) -> anyhow::Result<Self::Pool> {
        match spec {
            PoolSpec::Admin {
                url,
                max_connections,
                acquire_timeout,
            } => {
                let pool = PgPoolOptions::new()
                    .max_connections(*max_connections)
                    .acquire_timeout(*acquire_timeout)
                    .connect(url)
                    .await?;
                Ok(PgPhysicalPool {
                    label: "admin".to_string(),
                    pool,
                })
            }
            PoolSpec::Tenant(params) => {
                let options = PgConnectOptions::new()
                    .host(&params.host)
                    .port(params.port)
                    .database(&params.database_name)
                    .username(&params.username)
                    .password(&params.password)
                    .ssl_mode(if params.tls {
                        PgSslMode::Require
                    } else {
                        PgSslMode::Prefer
                    });

                // connect (not connect_lazy): an unreachable tenant database
                // must fail the build, not the first query.
                let pool = PgPoolOptions::new()
                    .max_connections(params.max_connections)
                    .acquire_timeout(params.acquire_timeout)
                    .connect_with(options)
                    .await?;

                Ok(PgPhysicalPool {
                    label: params.label.clone(),
                    pool,
                })
            }
        }
    }
}
