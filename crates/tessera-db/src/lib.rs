//! Tessera metadata-store access layer.
//!
//! Read side: the `MetadataStore` trait and its Postgres implementation,
//! consumed by the cache and resolver. Write side: `TenantDirectory`, the
//! surface the external tenant-administration collaborator uses.

pub mod directory;
pub mod store;

pub use directory::TenantDirectory;
pub use store::{MetadataStore, PgMetadataStore};
