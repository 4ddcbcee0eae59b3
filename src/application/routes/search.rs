use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::errors::{ApiError, AppError};
use crate::application::routes::support::{
    CachePolicy, Pagination, clamp_limit, clamp_offset, if_none_match_matches, not_modified,
    ranked_etag, respond,
};
use crate::application::state::AppState;
use crate::domain::aggregations::TopSnippet;
use crate::domain::ids::PlaceId;
use crate::domain::places::Place;
use crate::domain::projections::{RankedRow, RankingKind};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    city: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    cuisine: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SearchPayload {
    pub ranked: bool,
    pub rank_source: String,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub results: Vec<SearchResultItem>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct SearchResultItem {
    pub place_id: PlaceId,
    pub name: String,
    pub cuisine: Vec<String>,
    pub address: Option<String>,
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_threads: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_mentions: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub top_snippets: Vec<TopSnippet>,
}

impl From<RankedRow> for SearchResultItem {
    fn from(row: RankedRow) -> Self {
        Self {
            place_id: row.place_id,
            name: row.name,
            cuisine: row.cuisine,
            address: row.address,
            lat: row.lat,
            lon: row.lon,
            score: Some(row.score),
            rank: Some(row.rank),
            unique_threads: Some(row.unique_threads),
            total_mentions: Some(row.total_mentions),
            last_seen: row.last_seen,
            top_snippets: row.top_snippets,
        }
    }
}

impl From<Place> for SearchResultItem {
    fn from(place: Place) -> Self {
        Self {
            place_id: place.id,
            name: place.name,
            cuisine: place.cuisine,
            address: place.address,
            lat: place.lat,
            lon: place.lon,
            score: None,
            rank: None,
            unique_threads: None,
            total_mentions: None,
            last_seen: None,
            top_snippets: vec![],
        }
    }
}

/// Ranked search. Ranked cities serve the pre-ranked projection with an ETag
/// keyed to its version; unranked cities fall back to the name-ordered POI
/// listing that bootstrap made instantly available.
#[tracing::instrument(skip(state, headers, query))]
pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    let started = Instant::now();

    let city_query = query
        .city
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::missing_param("city"))?;
    let kind_raw = query
        .kind
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::missing_param("type"))?;
    let kind = RankingKind::from_query(kind_raw)
        .ok_or_else(|| AppError::invalid_type(format!("invalid type: {kind_raw}")))?;

    let cuisine = query
        .cuisine
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_lowercase);
    if kind == RankingKind::Cuisine && cuisine.is_none() {
        return Err(AppError::missing_param("cuisine").into());
    }

    let pagination_config = &state.config.pagination;
    let limit = clamp_limit(
        query.limit,
        pagination_config.default_limit,
        pagination_config.max_limit,
    );
    let offset = clamp_offset(query.offset);

    let city = state
        .city_repo
        .resolve(city_query)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::city_not_found(city_query))?;

    if !city.ranked {
        let (places, total) = state
            .place_repo
            .list_open_by_name(city.id, limit, offset)
            .await
            .map_err(AppError::from)?;

        let payload = SearchPayload {
            ranked: false,
            rank_source: "unranked_osm".to_string(),
            last_refreshed_at: city.last_refreshed_at,
            results: places.into_iter().map(SearchResultItem::from).collect(),
            pagination: Pagination::new(offset, limit, total),
        };
        return Ok(respond(
            payload,
            started,
            Some(CachePolicy::UNRANKED),
            None,
        ));
    }

    let version_hash = state
        .projection_repo
        .version(kind.view_name())
        .await
        .map_err(AppError::from)?
        .map_or_else(|| "initial".to_string(), |v| v.version_hash);

    let etag = ranked_etag(
        &version_hash,
        city.id,
        kind.as_str(),
        cuisine.as_deref(),
        offset,
        limit,
    );
    if if_none_match_matches(&headers, &etag) {
        return Ok(not_modified(Some(CachePolicy::RANKED), &etag));
    }

    let (rows, total) = state
        .projection_repo
        .ranked_page(city.id, kind, cuisine.as_deref(), limit, offset)
        .await
        .map_err(AppError::from)?;

    let payload = SearchPayload {
        ranked: true,
        rank_source: kind.rank_source().to_string(),
        last_refreshed_at: city.last_refreshed_at,
        results: rows.into_iter().map(SearchResultItem::from).collect(),
        pagination: Pagination::new(offset, limit, total),
    };

    Ok(respond(
        payload,
        started,
        Some(CachePolicy::RANKED),
        Some(&etag),
    ))
}
