use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as};
use uuid::Uuid;

use super::unexpected;
use crate::domain::RepositoryError;
use crate::domain::ids::CityId;
use crate::domain::repositories::SourceRepository;
use crate::domain::sources::{NewSource, Source};
use crate::infrastructure::database::DatabasePool;

#[derive(Clone)]
pub struct SqlSourceRepository {
    pool: DatabasePool,
}

impl SqlSourceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceRepository for SqlSourceRepository {
    async fn upsert(&self, source: NewSource) -> Result<(), RepositoryError> {
        query(
            "INSERT INTO sources (name, city_id, is_active) \
             VALUES ($1, $2, TRUE) \
             ON CONFLICT (name) DO UPDATE SET \
                 city_id = EXCLUDED.city_id, \
                 is_active = TRUE",
        )
        .bind(&source.name)
        .bind(Uuid::from(source.city_id))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn active_for_city(&self, city_id: CityId) -> Result<Vec<Source>, RepositoryError> {
        let records = query_as::<_, SourceRecord>(
            "SELECT name, city_id, is_active, last_sync, total_posts \
             FROM sources \
             WHERE city_id = $1 AND is_active \
             ORDER BY name",
        )
        .bind(Uuid::from(city_id))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records
            .into_iter()
            .map(|record| Source {
                name: record.name,
                city_id: CityId::from(record.city_id),
                is_active: record.is_active,
                last_sync: record.last_sync,
                total_posts: record.total_posts,
            })
            .collect())
    }

    async fn mark_synced(&self, name: &str, new_posts: i64) -> Result<(), RepositoryError> {
        query(
            "UPDATE sources SET last_sync = now(), total_posts = total_posts + $2 \
             WHERE name = $1",
        )
        .bind(name)
        .bind(new_posts)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SourceRecord {
    name: String,
    city_id: Uuid,
    is_active: bool,
    last_sync: Option<DateTime<Utc>>,
    total_posts: i64,
}
