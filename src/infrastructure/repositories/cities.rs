use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as};
use uuid::Uuid;

use super::unexpected;
use crate::domain::RepositoryError;
use crate::domain::cities::{
    BoundingBox, City, CityCounts, CityStats, CityWithStats, NewCity, NewCityAlias,
};
use crate::domain::ids::CityId;
use crate::domain::repositories::CityRepository;
use crate::infrastructure::database::DatabasePool;

const CITY_COLUMNS: &str = "id, name, country, \
     ST_Y(centroid::geometry) AS lat, ST_X(centroid::geometry) AS lon, \
     ST_YMin(bbox) AS south, ST_XMin(bbox) AS west, \
     ST_YMax(bbox) AS north, ST_XMax(bbox) AS east, \
     ranked, last_refreshed_at, created_at, updated_at";

#[derive(Clone)]
pub struct SqlCityRepository {
    pool: DatabasePool,
}

impl SqlCityRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn into_domain(record: CityRecord) -> City {
        City {
            id: CityId::from(record.id),
            name: record.name,
            country: record.country,
            lat: record.lat,
            lon: record.lon,
            bbox: BoundingBox {
                south: record.south,
                west: record.west,
                north: record.north,
                east: record.east,
            },
            ranked: record.ranked,
            last_refreshed_at: record.last_refreshed_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[async_trait]
impl CityRepository for SqlCityRepository {
    async fn upsert(&self, city: NewCity) -> Result<City, RepositoryError> {
        let city = city.normalize();
        let sql = format!(
            "INSERT INTO cities (name, country, centroid, bbox) \
             VALUES ($1, $2, ST_SetSRID(ST_MakePoint($3, $4), 4326)::geography, \
                     ST_MakeEnvelope($5, $6, $7, $8, 4326)) \
             ON CONFLICT (name, country) DO UPDATE SET \
                 centroid = EXCLUDED.centroid, \
                 bbox = EXCLUDED.bbox, \
                 updated_at = now() \
             RETURNING {CITY_COLUMNS}"
        );

        let record = query_as::<_, CityRecord>(&sql)
            .bind(&city.name)
            .bind(&city.country)
            .bind(city.lon)
            .bind(city.lat)
            .bind(city.bbox.west)
            .bind(city.bbox.south)
            .bind(city.bbox.east)
            .bind(city.bbox.north)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(Self::into_domain(record))
    }

    async fn get(&self, id: CityId) -> Result<City, RepositoryError> {
        let sql = format!("SELECT {CITY_COLUMNS} FROM cities WHERE id = $1");
        let record = query_as::<_, CityRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;

        record.map(Self::into_domain).ok_or(RepositoryError::NotFound)
    }

    async fn resolve(&self, query_text: &str) -> Result<Option<City>, RepositoryError> {
        let needle = query_text.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }

        let sql = format!("SELECT {CITY_COLUMNS} FROM cities WHERE LOWER(name) = $1");
        let direct = query_as::<_, CityRecord>(&sql)
            .bind(&needle)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        if let Some(record) = direct {
            return Ok(Some(Self::into_domain(record)));
        }

        let sql = format!(
            "SELECT {CITY_COLUMNS} FROM cities \
             WHERE id = (SELECT city_id FROM city_aliases WHERE LOWER(alias) = $1)"
        );
        let aliased = query_as::<_, CityRecord>(&sql)
            .bind(&needle)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(aliased.map(Self::into_domain))
    }

    async fn upsert_aliases(
        &self,
        city_id: CityId,
        aliases: &[NewCityAlias],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        for alias in aliases {
            if alias.alias.is_empty() {
                continue;
            }
            query(
                "INSERT INTO city_aliases (city_id, alias, is_borough) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT ((LOWER(alias))) DO NOTHING",
            )
            .bind(Uuid::from(city_id))
            .bind(&alias.alias)
            .bind(alias.is_borough)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)
    }

    async fn set_ranked(&self, city_id: CityId, ranked: bool) -> Result<(), RepositoryError> {
        let result = query("UPDATE cities SET ranked = $2, updated_at = now() WHERE id = $1")
            .bind(Uuid::from(city_id))
            .bind(ranked)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn touch_refreshed(&self, city_id: CityId) -> Result<(), RepositoryError> {
        query("UPDATE cities SET last_refreshed_at = now(), updated_at = now() WHERE id = $1")
            .bind(Uuid::from(city_id))
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn list_with_stats(&self) -> Result<Vec<CityWithStats>, RepositoryError> {
        let sql = format!(
            "SELECT {CITY_COLUMNS}, \
                 (SELECT COUNT(*) FROM places p WHERE p.city_id = cities.id) AS places, \
                 (SELECT COUNT(*) FROM mentions m \
                      JOIN places p ON p.id = m.place_id \
                      WHERE p.city_id = cities.id) AS mentions \
             FROM cities ORDER BY name ASC"
        );

        let records = query_as::<_, CityStatsRecord>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(records
            .into_iter()
            .map(|record| {
                let stats = CityStats {
                    places: record.places,
                    mentions: record.mentions,
                    last_refreshed: record.city.last_refreshed_at,
                };
                CityWithStats {
                    city: Self::into_domain(record.city),
                    stats,
                }
            })
            .collect())
    }

    async fn counts(&self) -> Result<CityCounts, RepositoryError> {
        let record = query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE ranked) FROM cities",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(CityCounts {
            total: record.0,
            ranked: record.1,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CityRecord {
    id: Uuid,
    name: String,
    country: String,
    lat: f64,
    lon: f64,
    south: f64,
    west: f64,
    north: f64,
    east: f64,
    ranked: bool,
    last_refreshed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct CityStatsRecord {
    #[sqlx(flatten)]
    city: CityRecord,
    places: i64,
    mentions: i64,
}
