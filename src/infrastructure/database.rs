use anyhow::Context;
use async_trait::async_trait;
use sqlx::migrate::Migrator;

use crate::domain::RepositoryError;
use crate::domain::repositories::HealthProbe;

pub type DatabasePool = sqlx::PgPool;
pub type DatabaseRow = sqlx::postgres::PgRow;

pub struct Database {
    pool: DatabasePool,
}

impl Database {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to connect to database: {database_url}"))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn clone_pool(&self) -> DatabasePool {
        self.pool.clone()
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        static MIGRATOR: Migrator = sqlx::migrate!("./migrations");
        MIGRATOR
            .run(&self.pool)
            .await
            .context("database migration failed")
    }
}

#[derive(Clone)]
pub struct SqlHealthProbe {
    pool: DatabasePool,
}

impl SqlHealthProbe {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthProbe for SqlHealthProbe {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|err| RepositoryError::unexpected(err.to_string()))?;
        Ok(())
    }
}
