use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as};
use uuid::Uuid;

use super::unexpected;
use crate::domain::RepositoryError;
use crate::domain::aggregations::{PlaceAggregation, TopSnippet};
use crate::domain::ids::PlaceId;
use crate::domain::repositories::AggregationRepository;
use crate::infrastructure::database::DatabasePool;

#[derive(Clone)]
pub struct SqlAggregationRepository {
    pool: DatabasePool,
}

impl SqlAggregationRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AggregationRepository for SqlAggregationRepository {
    async fn upsert_batch(
        &self,
        aggregations: Vec<PlaceAggregation>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        for agg in aggregations {
            let snippets = serde_json::to_value(&agg.top_snippets).map_err(|err| {
                RepositoryError::unexpected(format!("failed to encode top snippets: {err}"))
            })?;

            query(
                "INSERT INTO place_aggregations \
                     (place_id, iconic_score, trending_score, unique_threads, \
                      total_mentions, total_upvotes, mentions_90d, last_seen, \
                      top_snippets, computed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now()) \
                 ON CONFLICT (place_id) DO UPDATE SET \
                     iconic_score = EXCLUDED.iconic_score, \
                     trending_score = EXCLUDED.trending_score, \
                     unique_threads = EXCLUDED.unique_threads, \
                     total_mentions = EXCLUDED.total_mentions, \
                     total_upvotes = EXCLUDED.total_upvotes, \
                     mentions_90d = EXCLUDED.mentions_90d, \
                     last_seen = EXCLUDED.last_seen, \
                     top_snippets = EXCLUDED.top_snippets, \
                     computed_at = now()",
            )
            .bind(Uuid::from(agg.place_id))
            .bind(agg.iconic_score)
            .bind(agg.trending_score)
            .bind(agg.unique_threads)
            .bind(agg.total_mentions)
            .bind(agg.total_upvotes)
            .bind(agg.mentions_90d)
            .bind(agg.last_seen)
            .bind(snippets)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)
    }

    async fn get(&self, place_id: PlaceId) -> Result<Option<PlaceAggregation>, RepositoryError> {
        let record = query_as::<_, AggregationRecord>(
            "SELECT place_id, iconic_score, trending_score, unique_threads, \
                    total_mentions, total_upvotes, mentions_90d, last_seen, \
                    top_snippets, computed_at \
             FROM place_aggregations WHERE place_id = $1",
        )
        .bind(Uuid::from(place_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        record.map(AggregationRecord::into_domain).transpose()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AggregationRecord {
    place_id: Uuid,
    iconic_score: f64,
    trending_score: f64,
    unique_threads: i64,
    total_mentions: i64,
    total_upvotes: i64,
    mentions_90d: i64,
    last_seen: Option<DateTime<Utc>>,
    top_snippets: serde_json::Value,
    computed_at: DateTime<Utc>,
}

impl AggregationRecord {
    fn into_domain(self) -> Result<PlaceAggregation, RepositoryError> {
        let top_snippets: Vec<TopSnippet> =
            serde_json::from_value(self.top_snippets).map_err(|err| {
                RepositoryError::unexpected(format!("failed to decode top snippets: {err}"))
            })?;

        Ok(PlaceAggregation {
            place_id: PlaceId::from(self.place_id),
            iconic_score: self.iconic_score,
            trending_score: self.trending_score,
            unique_threads: self.unique_threads,
            total_mentions: self.total_mentions,
            total_upvotes: self.total_upvotes,
            mentions_90d: self.mentions_90d,
            last_seen: self.last_seen,
            top_snippets,
            computed_at: self.computed_at,
        })
    }
}
