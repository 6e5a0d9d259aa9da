use std::sync::Arc;

use anyhow::Context;

use docket_infra::config::Settings;
use docket_infra::{
    AccessGate, AuthzStore, InMemoryAuthzStore, PermissionResolver, PostgresAuthzStore, RbacAdmin,
    TenantContextResolver,
};

/// Store type shared by every service; the backend is chosen at startup.
pub type Store = dyn AuthzStore;

/// Services available to handlers, wired over one store.
pub struct AppServices {
    pub store: Arc<Store>,
    pub resolver: PermissionResolver<Store>,
    pub gate: AccessGate<Store>,
    pub tenancy: TenantContextResolver<Store>,
    pub admin: RbacAdmin<Store>,
}

impl AppServices {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            resolver: PermissionResolver::new(Arc::clone(&store)),
            gate: AccessGate::new(Arc::clone(&store)),
            tenancy: TenantContextResolver::new(Arc::clone(&store)),
            admin: RbacAdmin::new(Arc::clone(&store)),
            store,
        }
    }

    /// In-memory backend (tests/dev).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAuthzStore::new()))
    }
}

/// Build services from settings: Postgres when `database.url` is set,
/// in-memory otherwise. The permission catalog is seeded either way.
pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    let services = match &settings.database.url {
        Some(url) => {
            let store = PostgresAuthzStore::connect(url, settings.database.max_connections)
                .await
                .context("failed to connect to postgres")?;
            store.migrate().await.context("failed to apply schema")?;
            tracing::info!("using postgres authorization store");
            AppServices::new(Arc::new(store))
        }
        None => {
            tracing::warn!("database.url not set; using in-memory authorization store");
            AppServices::in_memory()
        }
    };

    services
        .admin
        .seed_catalog()
        .await
        .context("failed to seed permission catalog")?;

    Ok(services)
}
