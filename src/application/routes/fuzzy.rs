use std::time::Instant;

use axum::extract::{Query, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::application::errors::{ApiError, AppError};
use crate::application::routes::support::{CachePolicy, clamp_limit, respond};
use crate::application::state::AppState;
use crate::domain::ids::PlaceId;
use crate::domain::places::normalize_name;

#[derive(Debug, Deserialize)]
pub struct FuzzyQuery {
    q: Option<String>,
    city: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct FuzzyPayload {
    pub query: String,
    pub results: Vec<FuzzyResultItem>,
}

#[derive(Debug, Serialize)]
pub struct FuzzyResultItem {
    pub place_id: PlaceId,
    pub name: String,
    pub city: String,
    pub cuisine: Vec<String>,
    pub address: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub similarity: f64,
    pub iconic_score: f64,
}

/// Typo-tolerant name search over open places.
#[tracing::instrument(skip(state, query))]
pub async fn fuzzy_search(
    State(state): State<AppState>,
    Query(query): Query<FuzzyQuery>,
) -> Result<Response, ApiError> {
    let started = Instant::now();

    let q = query
        .q
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if q.chars().count() < 2 {
        return Err(AppError::invalid_query("q must be at least 2 characters").into());
    }

    let city_id = match query.city.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(city_query) => Some(
            state
                .city_repo
                .resolve(city_query)
                .await
                .map_err(AppError::from)?
                .ok_or_else(|| AppError::city_not_found(city_query))?
                .id,
        ),
        None => None,
    };

    let limit = clamp_limit(query.limit, 10, state.config.pagination.fuzzy_max_limit);
    let q_norm = normalize_name(&q);

    let hits = state
        .place_repo
        .fuzzy_search(
            &q_norm,
            city_id,
            state.config.matching.trigram_threshold,
            limit,
        )
        .await
        .map_err(AppError::from)?;

    let payload = FuzzyPayload {
        query: q,
        results: hits
            .into_iter()
            .map(|hit| FuzzyResultItem {
                place_id: hit.place.id,
                name: hit.place.name,
                city: hit.city_name,
                cuisine: hit.place.cuisine,
                address: hit.place.address,
                lat: hit.place.lat,
                lon: hit.place.lon,
                similarity: hit.similarity,
                iconic_score: hit.iconic_score,
            })
            .collect(),
    };

    Ok(respond(payload, started, Some(CachePolicy::SHORT), None))
}
