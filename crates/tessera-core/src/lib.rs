//! Tessera Core Library
//!
//! Domain models, error taxonomy, configuration, and the credential codec
//! shared across the Tessera tenant-routing components. No I/O lives here.

pub mod config;
pub mod credentials;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{IsolationPolicy, RouterConfig};
pub use credentials::CredentialCodec;
pub use error::{ErrorMetadata, LogLevel, RouterError};
pub use models::{
    ConnectionMetadata, DbCredentials, DbEngine, IsolationMode, ResolvedTenant, Tenant,
    TenantStatus,
};
