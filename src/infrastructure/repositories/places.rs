use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query_as, query_scalar};
use uuid::Uuid;

use super::unexpected;
use crate::domain::RepositoryError;
use crate::domain::ids::{CityId, PlaceId};
use crate::domain::matching::{MatchCandidate, MatchStore};
use crate::domain::places::{NewPlace, Place, PlaceSource, PlaceStatus};
use crate::domain::repositories::{FuzzyHit, PlaceRepository};
use crate::infrastructure::database::DatabasePool;

const PLACE_COLUMNS: &str = "p.id, p.city_id, p.osm_id, p.overture_id, p.name, p.name_norm, \
     ST_Y(p.geog::geometry) AS lat, ST_X(p.geog::geometry) AS lon, \
     p.address, p.cuisine, p.status, p.brand, p.source, p.aliases, \
     p.created_at, p.updated_at";

const UPSERT_SQL: &str = "INSERT INTO places \
         (city_id, osm_id, overture_id, name, name_norm, geog, address, cuisine, \
          status, brand, source, aliases) \
     VALUES ($1, $2, $3, $4, $5, \
             ST_SetSRID(ST_MakePoint($6, $7), 4326)::geography, \
             $8, $9, $10, $11, $12, $13) \
     ON CONFLICT (city_id, name_norm) DO UPDATE SET \
         name = EXCLUDED.name, \
         geog = EXCLUDED.geog, \
         osm_id = COALESCE(EXCLUDED.osm_id, places.osm_id), \
         overture_id = COALESCE(EXCLUDED.overture_id, places.overture_id), \
         address = COALESCE(EXCLUDED.address, places.address), \
         brand = COALESCE(EXCLUDED.brand, places.brand), \
         cuisine = EXCLUDED.cuisine, \
         status = EXCLUDED.status, \
         source = EXCLUDED.source, \
         aliases = EXCLUDED.aliases, \
         updated_at = now() \
     RETURNING id";

#[derive(Clone)]
pub struct SqlPlaceRepository {
    pool: DatabasePool,
}

impl SqlPlaceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn into_domain(record: PlaceRecord) -> Result<Place, RepositoryError> {
        let status = PlaceStatus::parse(&record.status).ok_or_else(|| {
            RepositoryError::unexpected(format!("unknown place status: {}", record.status))
        })?;
        let source = PlaceSource::parse(&record.source).ok_or_else(|| {
            RepositoryError::unexpected(format!("unknown place source: {}", record.source))
        })?;

        Ok(Place {
            id: PlaceId::from(record.id),
            city_id: CityId::from(record.city_id),
            osm_id: record.osm_id,
            overture_id: record.overture_id,
            name: record.name,
            name_norm: record.name_norm,
            lat: record.lat,
            lon: record.lon,
            address: record.address,
            cuisine: record.cuisine,
            status,
            brand: record.brand,
            source,
            aliases: record.aliases,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

#[async_trait]
impl PlaceRepository for SqlPlaceRepository {
    async fn upsert(&self, place: NewPlace) -> Result<PlaceId, RepositoryError> {
        let place = place.normalize();
        let name_norm = place.name_norm();

        let id: Uuid = query_scalar(UPSERT_SQL)
            .bind(Uuid::from(place.city_id))
            .bind(place.osm_id.as_deref())
            .bind(place.overture_id.as_deref())
            .bind(&place.name)
            .bind(&name_norm)
            .bind(place.lon)
            .bind(place.lat)
            .bind(place.address.as_deref())
            .bind(&place.cuisine)
            .bind(place.status.as_str())
            .bind(place.brand.as_deref())
            .bind(place.source.as_str())
            .bind(&place.aliases)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(PlaceId::from(id))
    }

    async fn upsert_batch(&self, places: Vec<NewPlace>) -> Result<u64, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let mut written = 0_u64;

        for place in places {
            let place = place.normalize();
            let name_norm = place.name_norm();
            if name_norm.is_empty() {
                continue;
            }

            query_scalar::<_, Uuid>(UPSERT_SQL)
                .bind(Uuid::from(place.city_id))
                .bind(place.osm_id.as_deref())
                .bind(place.overture_id.as_deref())
                .bind(&place.name)
                .bind(&name_norm)
                .bind(place.lon)
                .bind(place.lat)
                .bind(place.address.as_deref())
                .bind(&place.cuisine)
                .bind(place.status.as_str())
                .bind(place.brand.as_deref())
                .bind(place.source.as_str())
                .bind(&place.aliases)
                .fetch_one(&mut *tx)
                .await
                .map_err(unexpected)?;
            written += 1;
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(written)
    }

    async fn get(&self, id: PlaceId) -> Result<Place, RepositoryError> {
        let sql = format!("SELECT {PLACE_COLUMNS} FROM places p WHERE p.id = $1");
        let record = query_as::<_, PlaceRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;

        record
            .map(Self::into_domain)
            .transpose()?
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_open_by_name(
        &self,
        city_id: CityId,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Place>, i64), RepositoryError> {
        let total: i64 = query_scalar(
            "SELECT COUNT(*) FROM places WHERE city_id = $1 AND status = 'open'",
        )
        .bind(Uuid::from(city_id))
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        let sql = format!(
            "SELECT {PLACE_COLUMNS} FROM places p \
             WHERE p.city_id = $1 AND p.status = 'open' \
             ORDER BY p.name ASC LIMIT $2 OFFSET $3"
        );
        let records = query_as::<_, PlaceRecord>(&sql)
            .bind(Uuid::from(city_id))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        let mut places = Vec::with_capacity(records.len());
        for record in records {
            places.push(Self::into_domain(record)?);
        }
        Ok((places, total))
    }

    async fn fuzzy_search(
        &self,
        query_norm: &str,
        city_id: Option<CityId>,
        threshold: f64,
        limit: i64,
    ) -> Result<Vec<FuzzyHit>, RepositoryError> {
        // word_similarity makes short queries match long names: a query
        // covering one word of the name still scores near 1.0
        let sql = format!(
            "SELECT {PLACE_COLUMNS}, \
                 word_similarity($1, p.name_norm)::float8 AS sim, \
                 COALESCE(a.iconic_score, 0) AS iconic_score, \
                 c.name AS city_name \
             FROM places p \
             JOIN cities c ON c.id = p.city_id \
             LEFT JOIN place_aggregations a ON a.place_id = p.id \
             WHERE p.status = 'open' \
               AND ($2::uuid IS NULL OR p.city_id = $2) \
               AND word_similarity($1, p.name_norm) >= $3 \
             ORDER BY sim DESC, COALESCE(a.iconic_score, 0) DESC \
             LIMIT $4"
        );

        let records = query_as::<_, FuzzyRecord>(&sql)
            .bind(query_norm)
            .bind(city_id.map(Uuid::from))
            .bind(threshold as f32)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        let mut hits = Vec::with_capacity(records.len());
        for record in records {
            hits.push(FuzzyHit {
                place: Self::into_domain(record.place)?,
                similarity: record.sim,
                iconic_score: record.iconic_score,
                city_name: record.city_name,
            });
        }
        Ok(hits)
    }
}

#[async_trait]
impl MatchStore for SqlPlaceRepository {
    async fn alias_exact(
        &self,
        city_id: CityId,
        query_norm: &str,
    ) -> Result<Option<MatchCandidate>, RepositoryError> {
        let record = query_as::<_, CandidateRecord>(
            "SELECT id, name_norm, brand, address, 1.0::float8 AS sim, \
                    NULL::float8 AS distance_m \
             FROM places \
             WHERE city_id = $1 AND status = 'open' \
               AND (name_norm = $2 OR $2 = ANY(aliases)) \
             LIMIT 1",
        )
        .bind(Uuid::from(city_id))
        .bind(query_norm)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.map(CandidateRecord::into_domain))
    }

    async fn trigram_candidates(
        &self,
        city_id: CityId,
        query_norm: &str,
        threshold: f64,
        cap: i64,
    ) -> Result<Vec<MatchCandidate>, RepositoryError> {
        let records = query_as::<_, CandidateRecord>(
            "SELECT id, name_norm, brand, address, \
                    similarity(name_norm, $2)::float8 AS sim, \
                    NULL::float8 AS distance_m \
             FROM places \
             WHERE city_id = $1 AND status = 'open' \
               AND similarity(name_norm, $2) >= $3 \
             ORDER BY sim DESC \
             LIMIT $4",
        )
        .bind(Uuid::from(city_id))
        .bind(query_norm)
        .bind(threshold as f32)
        .bind(cap)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(CandidateRecord::into_domain).collect())
    }

    async fn geo_candidates(
        &self,
        city_id: CityId,
        query_norm: &str,
        lat: f64,
        lon: f64,
        radius_m: f64,
        threshold: f64,
        cap: i64,
    ) -> Result<Vec<MatchCandidate>, RepositoryError> {
        let records = query_as::<_, CandidateRecord>(
            "SELECT id, name_norm, brand, address, \
                    similarity(name_norm, $2)::float8 AS sim, \
                    ST_Distance(geog, ST_SetSRID(ST_MakePoint($4, $3), 4326)::geography) \
                        AS distance_m \
             FROM places \
             WHERE city_id = $1 AND status = 'open' \
               AND ST_DWithin(geog, ST_SetSRID(ST_MakePoint($4, $3), 4326)::geography, $5) \
               AND similarity(name_norm, $2) >= $6 \
             ORDER BY sim DESC, distance_m ASC \
             LIMIT $7",
        )
        .bind(Uuid::from(city_id))
        .bind(query_norm)
        .bind(lat)
        .bind(lon)
        .bind(radius_m)
        .bind(threshold as f32)
        .bind(cap)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(CandidateRecord::into_domain).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlaceRecord {
    id: Uuid,
    city_id: Uuid,
    osm_id: Option<String>,
    overture_id: Option<String>,
    name: String,
    name_norm: String,
    lat: f64,
    lon: f64,
    address: Option<String>,
    cuisine: Vec<String>,
    status: String,
    brand: Option<String>,
    source: String,
    aliases: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct FuzzyRecord {
    #[sqlx(flatten)]
    place: PlaceRecord,
    sim: f64,
    iconic_score: f64,
    city_name: String,
}

#[derive(Debug, sqlx::FromRow)]
struct CandidateRecord {
    id: Uuid,
    name_norm: String,
    brand: Option<String>,
    address: Option<String>,
    sim: f64,
    distance_m: Option<f64>,
}

impl CandidateRecord {
    fn into_domain(self) -> MatchCandidate {
        MatchCandidate {
            place_id: PlaceId::from(self.id),
            name_norm: self.name_norm,
            brand: self.brand,
            address: self.address,
            similarity: self.sim,
            distance_m: self.distance_m,
        }
    }
}
