use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as};
use uuid::Uuid;

use super::unexpected;
use crate::domain::RepositoryError;
use crate::domain::ids::{CityId, MentionId, PlaceId};
use crate::domain::mentions::{Mention, NewMention};
use crate::domain::repositories::MentionRepository;
use crate::domain::scoring::{MentionSignal, PlaceSignals};
use crate::infrastructure::database::DatabasePool;

#[derive(Clone)]
pub struct SqlMentionRepository {
    pool: DatabasePool,
}

impl SqlMentionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn into_domain(record: MentionRecord) -> Mention {
        Mention {
            id: MentionId::from(record.id),
            place_id: record.place_id.map(PlaceId::from),
            subreddit: record.subreddit,
            post_id: record.post_id,
            comment_id: record.comment_id,
            score: record.score,
            posted_at: record.posted_at,
            permalink: record.permalink,
            content_hash: record.content_hash,
            content_length: record.content_length,
            created_at: record.created_at,
        }
    }
}

#[async_trait]
impl MentionRepository for SqlMentionRepository {
    async fn insert_batch(&self, mentions: Vec<NewMention>) -> Result<u64, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let mut inserted = 0_u64;

        for mention in mentions {
            let result = query(
                "INSERT INTO mentions \
                     (place_id, subreddit, post_id, comment_id, score, posted_at, \
                      permalink, content_hash, content_length) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (post_id, (COALESCE(comment_id, '')), place_id) \
                     WHERE place_id IS NOT NULL \
                 DO NOTHING",
            )
            .bind(mention.place_id.map(Uuid::from))
            .bind(&mention.subreddit)
            .bind(&mention.post_id)
            .bind(mention.comment_id.as_deref())
            .bind(mention.score)
            .bind(mention.posted_at)
            .bind(&mention.permalink)
            .bind(&mention.content_hash)
            .bind(mention.content_length)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(inserted)
    }

    async fn recent_for_place(
        &self,
        place_id: PlaceId,
        limit: i64,
    ) -> Result<Vec<Mention>, RepositoryError> {
        let records = query_as::<_, MentionRecord>(
            "SELECT id, place_id, subreddit, post_id, comment_id, score, posted_at, \
                    permalink, content_hash, content_length, created_at \
             FROM mentions \
             WHERE place_id = $1 \
             ORDER BY posted_at DESC \
             LIMIT $2",
        )
        .bind(Uuid::from(place_id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(Self::into_domain).collect())
    }

    async fn matched_for_city(&self, city_id: CityId) -> Result<Vec<Mention>, RepositoryError> {
        let records = query_as::<_, MentionRecord>(
            "SELECT m.id, m.place_id, m.subreddit, m.post_id, m.comment_id, m.score, \
                    m.posted_at, m.permalink, m.content_hash, m.content_length, m.created_at \
             FROM mentions m \
             JOIN places p ON p.id = m.place_id \
             WHERE p.city_id = $1",
        )
        .bind(Uuid::from(city_id))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(Self::into_domain).collect())
    }

    async fn signals_for_city(
        &self,
        city_id: CityId,
        window_days: i64,
    ) -> Result<Vec<PlaceSignals>, RepositoryError> {
        let totals = query_as::<_, TotalsRecord>(
            "SELECT m.place_id AS place_id, \
                    COUNT(DISTINCT m.post_id) AS unique_threads, \
                    COUNT(*) AS total_mentions, \
                    COALESCE(SUM(GREATEST(m.score, 0)), 0)::bigint AS total_upvotes, \
                    COUNT(*) FILTER \
                        (WHERE m.posted_at >= now() - make_interval(days => $2)) \
                        AS mentions_90d, \
                    MAX(m.posted_at) AS last_seen \
             FROM mentions m \
             JOIN places p ON p.id = m.place_id \
             WHERE p.city_id = $1 \
             GROUP BY m.place_id",
        )
        .bind(Uuid::from(city_id))
        .bind(i32::try_from(window_days).unwrap_or(90))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let recent = query_as::<_, RecentRecord>(
            "SELECT m.place_id AS place_id, m.score, m.posted_at \
             FROM mentions m \
             JOIN places p ON p.id = m.place_id \
             WHERE p.city_id = $1 \
               AND m.posted_at >= now() - make_interval(days => $2)",
        )
        .bind(Uuid::from(city_id))
        .bind(i32::try_from(window_days).unwrap_or(90))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let mut recent_by_place: HashMap<Uuid, Vec<MentionSignal>> = HashMap::new();
        for record in recent {
            recent_by_place
                .entry(record.place_id)
                .or_default()
                .push(MentionSignal {
                    score: record.score,
                    posted_at: record.posted_at,
                });
        }

        Ok(totals
            .into_iter()
            .map(|record| PlaceSignals {
                place_id: PlaceId::from(record.place_id),
                unique_threads: record.unique_threads,
                total_mentions: record.total_mentions,
                total_upvotes: record.total_upvotes,
                mentions_90d: record.mentions_90d,
                last_seen: record.last_seen,
                recent: recent_by_place.remove(&record.place_id).unwrap_or_default(),
            })
            .collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MentionRecord {
    id: Uuid,
    place_id: Option<Uuid>,
    subreddit: String,
    post_id: String,
    comment_id: Option<String>,
    score: i32,
    posted_at: DateTime<Utc>,
    permalink: String,
    content_hash: String,
    content_length: i32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct TotalsRecord {
    place_id: Uuid,
    unique_threads: i64,
    total_mentions: i64,
    total_upvotes: i64,
    mentions_90d: i64,
    last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct RecentRecord {
    place_id: Uuid,
    score: i32,
    posted_at: DateTime<Utc>,
}
