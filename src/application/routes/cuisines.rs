use std::time::Instant;

use axum::extract::{Query, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::application::errors::{ApiError, AppError};
use crate::application::routes::support::{CachePolicy, clamp_limit, respond};
use crate::application::state::AppState;
use crate::domain::projections::CuisineFacet;

#[derive(Debug, Deserialize)]
pub struct CuisinesQuery {
    city: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CuisinesPayload {
    pub city: String,
    pub cuisines: Vec<CuisineFacet>,
}

/// Cuisine facets for a city, with ranked-place counts from the per-cuisine
/// projection.
#[tracing::instrument(skip(state, query))]
pub async fn list_cuisines(
    State(state): State<AppState>,
    Query(query): Query<CuisinesQuery>,
) -> Result<Response, ApiError> {
    let started = Instant::now();

    let city_query = query
        .city
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::missing_param("city"))?;

    let city = state
        .city_repo
        .resolve(city_query)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::city_not_found(city_query))?;

    let limit = clamp_limit(query.limit, 50, 100);
    let cuisines = state
        .projection_repo
        .cuisine_facets(city.id, limit)
        .await
        .map_err(AppError::from)?;

    let payload = CuisinesPayload {
        city: city.name,
        cuisines,
    };

    Ok(respond(payload, started, Some(CachePolicy::SHORT), None))
}
