pub mod connection;
pub mod tenant;

pub use connection::{ConnectionMetadata, DbCredentials, DbEngine, ResolvedTenant};
pub use tenant::{IsolationMode, Tenant, TenantStatus};
