//! Construction-time dependency record.
//!
//! Every engine receives an [`AppContext`] instead of reaching for
//! globals: the database, the Catalog client, the AI client, the entity
//! cache, and the read-only settings captured at bootstrap.

use std::sync::Arc;

use crate::ai::AiClient;
use crate::catalog::{CatalogClient, EntityCache};
use crate::config::Settings;
use crate::db::Database;
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct AppContext {
    pub settings: Settings,
    pub database: Database,
    pub catalog: CatalogClient,
    pub ai: AiClient,
    pub cache: Arc<EntityCache>,
}

impl AppContext {
    /// Wire up every shared component from settings. The cache instance
    /// is shared between the Catalog client and the engines.
    pub async fn initialize(settings: Settings) -> Result<Arc<Self>> {
        let cache = Arc::new(EntityCache::default());
        let database = Database::connect(&settings.database).await?;
        let catalog = CatalogClient::new(&settings.catalog, cache.clone())?;
        let ai = AiClient::new(&settings.ai)?;

        Ok(Arc::new(Self {
            settings,
            database,
            catalog,
            ai,
            cache,
        }))
    }

    /// Assemble a context from already-built parts (tests, embedders).
    pub fn from_parts(
        settings: Settings,
        database: Database,
        catalog: CatalogClient,
        ai: AiClient,
        cache: Arc<EntityCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            database,
            catalog,
            ai,
            cache,
        })
    }
}
