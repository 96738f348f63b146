//! Postgres persistence for the mirror and the plan/job/sync tables.
//!
//! One pool, one repository per aggregate. Queries are runtime-bound so
//! the crate builds without a live database; the column set mirrors the
//! data model one to one.

pub mod entities;
pub mod history;
pub mod jobs;
pub mod plans;
pub mod scenes;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::DatabaseSettings;
use crate::error::Result;

pub use entities::EntityRepository;
pub use history::SyncHistoryRepository;
pub use jobs::JobRepository;
pub use plans::PlanRepository;
pub use scenes::{SceneFilter, SceneRepository};

#[derive(Clone, Debug)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.url)
            .await?;
        info!("connected to mirror database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn scenes(&self) -> SceneRepository {
        SceneRepository::new(self.pool.clone())
    }

    pub fn entities(&self) -> EntityRepository {
        EntityRepository::new(self.pool.clone())
    }

    pub fn plans(&self) -> PlanRepository {
        PlanRepository::new(self.pool.clone())
    }

    pub fn jobs(&self) -> JobRepository {
        JobRepository::new(self.pool.clone())
    }

    pub fn sync_history(&self) -> SyncHistoryRepository {
        SyncHistoryRepository::new(self.pool.clone())
    }
}
