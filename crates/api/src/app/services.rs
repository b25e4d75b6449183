use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use scopegate_auth::{AuthzService, AuthzStore};
use scopegate_infra::{CachedStore, InMemoryAuthzStore, PostgresAuthzStore};

use crate::config::AppConfig;

/// The service every handler shares; the backing store is chosen at startup.
pub type AppService = AuthzService<dyn AuthzStore>;

/// Wire the store selected by `config` behind the org cache.
pub async fn build_service(config: &AppConfig) -> anyhow::Result<AppService> {
    let store: Arc<dyn AuthzStore> = match &config.database_url {
        Some(url) => {
            let pg = PostgresAuthzStore::connect(url)
                .await
                .context("connecting to postgres")?;
            pg.migrate().await.context("applying schema migrations")?;
            info!("using postgres authorization store");
            Arc::new(CachedStore::new(Arc::new(pg), config.org_cache))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store (data is lost on restart)");
            Arc::new(CachedStore::new(
                Arc::new(InMemoryAuthzStore::new()),
                config.org_cache,
            ))
        }
    };
    Ok(AuthzService::new(store, config.authz.clone()))
}
