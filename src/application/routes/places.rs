use std::time::Instant;

use axum::extract::{Path, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::application::errors::{ApiError, AppError};
use crate::application::routes::support::{CachePolicy, respond};
use crate::application::state::AppState;
use crate::domain::RepositoryError;
use crate::domain::aggregations::TopSnippet;
use crate::domain::ids::{CityId, PlaceId};
use crate::domain::mentions::Mention;
use crate::domain::places::Place;

#[derive(Debug, Serialize)]
pub struct PlaceDetailPayload {
    pub place: Place,
    pub city: CitySummary,
    pub coordinates: Coordinates,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationSummary>,
    pub top_snippets: Vec<TopSnippet>,
    pub recent_mentions: Vec<MentionSummary>,
}

#[derive(Debug, Serialize)]
pub struct CitySummary {
    pub id: CityId,
    pub name: String,
    pub country: String,
}

#[derive(Debug, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Serialize)]
pub struct AggregationSummary {
    pub iconic_score: f64,
    pub trending_score: f64,
    pub unique_threads: i64,
    pub total_mentions: i64,
    pub total_upvotes: i64,
    pub mentions_90d: i64,
    pub last_seen: Option<DateTime<Utc>>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MentionSummary {
    pub subreddit: String,
    pub permalink: String,
    pub score: i32,
    pub posted_at: DateTime<Utc>,
    pub content_hash: String,
    pub content_length: i32,
}

impl From<Mention> for MentionSummary {
    fn from(mention: Mention) -> Self {
        Self {
            subreddit: mention.subreddit,
            permalink: mention.permalink,
            score: mention.score,
            posted_at: mention.posted_at,
            content_hash: mention.content_hash,
            content_length: mention.content_length,
        }
    }
}

const RECENT_MENTIONS: i64 = 10;

/// Place detail: the POI row, its city, aggregates, and the latest mentions
/// as attribution pointers.
#[tracing::instrument(skip(state))]
pub async fn get_place(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let started = Instant::now();

    let place_id = id
        .parse::<Uuid>()
        .map(PlaceId::from)
        .map_err(|_| AppError::place_not_found())?;

    let place = state.place_repo.get(place_id).await.map_err(|err| match err {
        RepositoryError::NotFound => AppError::place_not_found(),
        other => AppError::from(other),
    })?;
    let city = state
        .city_repo
        .get(place.city_id)
        .await
        .map_err(AppError::from)?;
    let aggregation = state
        .aggregation_repo
        .get(place_id)
        .await
        .map_err(AppError::from)?;
    let recent = state
        .mention_repo
        .recent_for_place(place_id, RECENT_MENTIONS)
        .await
        .map_err(AppError::from)?;

    let top_snippets = aggregation
        .as_ref()
        .map(|agg| agg.top_snippets.clone())
        .unwrap_or_default();

    let payload = PlaceDetailPayload {
        coordinates: Coordinates {
            lat: place.lat,
            lon: place.lon,
        },
        city: CitySummary {
            id: city.id,
            name: city.name,
            country: city.country,
        },
        aggregation: aggregation.map(|agg| AggregationSummary {
            iconic_score: agg.iconic_score,
            trending_score: agg.trending_score,
            unique_threads: agg.unique_threads,
            total_mentions: agg.total_mentions,
            total_upvotes: agg.total_upvotes,
            mentions_90d: agg.mentions_90d,
            last_seen: agg.last_seen,
            computed_at: agg.computed_at,
        }),
        top_snippets,
        recent_mentions: recent.into_iter().map(MentionSummary::from).collect(),
        place,
    };

    Ok(respond(payload, started, Some(CachePolicy::DETAIL), None))
}
