use std::sync::Arc;

use tessera_core::RouterConfig;
use tessera_db::MetadataStore;
use tessera_router::testing::{test_codec, FakeBackend, InMemoryMetadataStore};
use tessera_router::TenantRouter;

/// Build a router over the in-memory store and fake backend.
pub async fn router_with(
    config: RouterConfig,
    store: Arc<InMemoryMetadataStore>,
    backend: FakeBackend,
) -> TenantRouter<FakeBackend> {
    let store_dyn: Arc<dyn MetadataStore> = store;
    TenantRouter::new(config, store_dyn, test_codec(), backend, None)
        .await
        .expect("router construction")
}
