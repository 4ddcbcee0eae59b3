use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, query_scalar};
use uuid::Uuid;

use super::unexpected;
use crate::domain::RepositoryError;
use crate::domain::aggregations::TopSnippet;
use crate::domain::ids::{CityId, PlaceId};
use crate::domain::projections::{
    CuisineFacet, PROJECTION_VIEWS, ProjectionVersion, RankedRow, RankingKind,
};
use crate::domain::repositories::ProjectionRepository;
use crate::infrastructure::database::DatabasePool;

#[derive(Clone)]
pub struct SqlProjectionRepository {
    pool: DatabasePool,
}

impl SqlProjectionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// View names are interpolated into SQL and must come from the closed
    /// whitelist, never from input.
    fn checked_view(view_name: &str) -> Result<&'static str, RepositoryError> {
        PROJECTION_VIEWS
            .iter()
            .find(|known| **known == view_name)
            .copied()
            .ok_or_else(|| {
                RepositoryError::unexpected(format!("unknown projection view: {view_name}"))
            })
    }
}

#[async_trait]
impl ProjectionRepository for SqlProjectionRepository {
    async fn refresh(&self, view_name: &str) -> Result<(), RepositoryError> {
        let view = Self::checked_view(view_name)?;

        // Session-scoped advisory lock: CONCURRENTLY cannot run inside a
        // transaction, so the lock is taken and released on one connection.
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;

        query("SELECT pg_advisory_lock(hashtext($1))")
            .bind(view)
            .execute(&mut *conn)
            .await
            .map_err(unexpected)?;

        let refresh_result = query(&format!("REFRESH MATERIALIZED VIEW CONCURRENTLY {view}"))
            .execute(&mut *conn)
            .await;

        let unlock_result = query("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(view)
            .execute(&mut *conn)
            .await;

        refresh_result.map_err(unexpected)?;
        unlock_result.map_err(unexpected)?;
        Ok(())
    }

    async fn bump_version(
        &self,
        view_name: &str,
        version_hash: &str,
    ) -> Result<ProjectionVersion, RepositoryError> {
        let view = Self::checked_view(view_name)?;

        let row_count: i64 = query_scalar(&format!("SELECT COUNT(*) FROM {view}"))
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

        let record = query_as::<_, VersionRecord>(
            "INSERT INTO projection_versions (view_name, version_hash, refreshed_at, row_count) \
             VALUES ($1, $2, now(), $3) \
             ON CONFLICT (view_name) DO UPDATE SET \
                 version_hash = EXCLUDED.version_hash, \
                 refreshed_at = EXCLUDED.refreshed_at, \
                 row_count = EXCLUDED.row_count \
             RETURNING view_name, version_hash, refreshed_at, row_count",
        )
        .bind(view)
        .bind(version_hash)
        .bind(row_count)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.into_domain())
    }

    async fn version(
        &self,
        view_name: &str,
    ) -> Result<Option<ProjectionVersion>, RepositoryError> {
        let record = query_as::<_, VersionRecord>(
            "SELECT view_name, version_hash, refreshed_at, row_count \
             FROM projection_versions WHERE view_name = $1",
        )
        .bind(view_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.map(VersionRecord::into_domain))
    }

    async fn versions(&self) -> Result<Vec<ProjectionVersion>, RepositoryError> {
        let records = query_as::<_, VersionRecord>(
            "SELECT view_name, version_hash, refreshed_at, row_count \
             FROM projection_versions ORDER BY view_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(VersionRecord::into_domain).collect())
    }

    async fn ranked_page(
        &self,
        city_id: CityId,
        kind: RankingKind,
        cuisine: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RankedRow>, i64), RepositoryError> {
        match kind {
            RankingKind::Cuisine => {
                let cuisine = cuisine.ok_or_else(|| {
                    RepositoryError::unexpected("cuisine ranking requires a cuisine filter")
                })?;
                self.cuisine_page(city_id, cuisine, limit, offset).await
            }
            RankingKind::Iconic | RankingKind::Trending => {
                self.array_page(city_id, kind, cuisine, limit, offset).await
            }
        }
    }

    async fn cuisine_facets(
        &self,
        city_id: CityId,
        limit: i64,
    ) -> Result<Vec<CuisineFacet>, RepositoryError> {
        let records = query_as::<_, (String, i64)>(
            "SELECT cuisine, COUNT(*) FROM mv_cuisine_places \
             WHERE city_id = $1 \
             GROUP BY cuisine \
             ORDER BY COUNT(*) DESC, cuisine ASC \
             LIMIT $2",
        )
        .bind(Uuid::from(city_id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records
            .into_iter()
            .map(|(cuisine, places)| CuisineFacet { cuisine, places })
            .collect())
    }
}

impl SqlProjectionRepository {
    /// Iconic/trending pages. The cuisine filter is a second parameterized
    /// statement, not a runtime-concatenated clause.
    async fn array_page(
        &self,
        city_id: CityId,
        kind: RankingKind,
        cuisine: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RankedRow>, i64), RepositoryError> {
        let view = Self::checked_view(kind.view_name())?;

        let (total, records) = if let Some(cuisine) = cuisine {
            let total: i64 = query_scalar(&format!(
                "SELECT COUNT(*) FROM {view} WHERE city_id = $1 AND cuisine @> ARRAY[$2]"
            ))
            .bind(Uuid::from(city_id))
            .bind(cuisine)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

            let records = query_as::<_, ArrayRankedRecord>(&format!(
                "SELECT place_id, city_id, name, cuisine, address, lat, lon, score, rank, \
                        unique_threads, total_mentions, last_seen, top_snippets \
                 FROM {view} \
                 WHERE city_id = $1 AND cuisine @> ARRAY[$2] \
                 ORDER BY rank ASC LIMIT $3 OFFSET $4"
            ))
            .bind(Uuid::from(city_id))
            .bind(cuisine)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

            (total, records)
        } else {
            let total: i64 =
                query_scalar(&format!("SELECT COUNT(*) FROM {view} WHERE city_id = $1"))
                    .bind(Uuid::from(city_id))
                    .fetch_one(&self.pool)
                    .await
                    .map_err(unexpected)?;

            let records = query_as::<_, ArrayRankedRecord>(&format!(
                "SELECT place_id, city_id, name, cuisine, address, lat, lon, score, rank, \
                        unique_threads, total_mentions, last_seen, top_snippets \
                 FROM {view} \
                 WHERE city_id = $1 \
                 ORDER BY rank ASC LIMIT $2 OFFSET $3"
            ))
            .bind(Uuid::from(city_id))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

            (total, records)
        };

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            rows.push(record.into_domain()?);
        }
        Ok((rows, total))
    }

    async fn cuisine_page(
        &self,
        city_id: CityId,
        cuisine: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RankedRow>, i64), RepositoryError> {
        let total: i64 = query_scalar(
            "SELECT COUNT(*) FROM mv_cuisine_places WHERE city_id = $1 AND cuisine = $2",
        )
        .bind(Uuid::from(city_id))
        .bind(cuisine)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        let records = query_as::<_, CuisineRankedRecord>(
            "SELECT place_id, city_id, cuisine, name, address, lat, lon, score, rank, \
                    unique_threads, total_mentions, last_seen, top_snippets \
             FROM mv_cuisine_places \
             WHERE city_id = $1 AND cuisine = $2 \
             ORDER BY rank ASC LIMIT $3 OFFSET $4",
        )
        .bind(Uuid::from(city_id))
        .bind(cuisine)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            rows.push(record.into_domain()?);
        }
        Ok((rows, total))
    }
}

fn decode_snippets(value: serde_json::Value) -> Result<Vec<TopSnippet>, RepositoryError> {
    serde_json::from_value(value)
        .map_err(|err| RepositoryError::unexpected(format!("failed to decode top snippets: {err}")))
}

#[derive(Debug, sqlx::FromRow)]
struct VersionRecord {
    view_name: String,
    version_hash: String,
    refreshed_at: DateTime<Utc>,
    row_count: i64,
}

impl VersionRecord {
    fn into_domain(self) -> ProjectionVersion {
        ProjectionVersion {
            view_name: self.view_name,
            version_hash: self.version_hash,
            refreshed_at: self.refreshed_at,
            row_count: self.row_count,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ArrayRankedRecord {
    place_id: Uuid,
    city_id: Uuid,
    name: String,
    cuisine: Vec<String>,
    address: Option<String>,
    lat: f64,
    lon: f64,
    score: f64,
    rank: i64,
    unique_threads: i64,
    total_mentions: i64,
    last_seen: Option<DateTime<Utc>>,
    top_snippets: serde_json::Value,
}

impl ArrayRankedRecord {
    fn into_domain(self) -> Result<RankedRow, RepositoryError> {
        Ok(RankedRow {
            place_id: PlaceId::from(self.place_id),
            city_id: CityId::from(self.city_id),
            name: self.name,
            cuisine: self.cuisine,
            address: self.address,
            lat: self.lat,
            lon: self.lon,
            score: self.score,
            rank: self.rank,
            unique_threads: self.unique_threads,
            total_mentions: self.total_mentions,
            last_seen: self.last_seen,
            top_snippets: decode_snippets(self.top_snippets)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CuisineRankedRecord {
    place_id: Uuid,
    city_id: Uuid,
    cuisine: String,
    name: String,
    address: Option<String>,
    lat: f64,
    lon: f64,
    score: f64,
    rank: i64,
    unique_threads: i64,
    total_mentions: i64,
    last_seen: Option<DateTime<Utc>>,
    top_snippets: serde_json::Value,
}

impl CuisineRankedRecord {
    fn into_domain(self) -> Result<RankedRow, RepositoryError> {
        Ok(RankedRow {
            place_id: PlaceId::from(self.place_id),
            city_id: CityId::from(self.city_id),
            name: self.name,
            cuisine: vec![self.cuisine],
            address: self.address,
            lat: self.lat,
            lon: self.lon,
            score: self.score,
            rank: self.rank,
            unique_threads: self.unique_threads,
            total_mentions: self.total_mentions,
            last_seen: self.last_seen,
            top_snippets: decode_snippets(self.top_snippets)?,
        })
    }
}
