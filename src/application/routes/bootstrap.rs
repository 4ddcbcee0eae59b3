use std::time::Instant;

use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::application::errors::{ApiError, AppError};
use crate::application::routes::support::respond;
use crate::application::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BootstrapQuery {
    city: Option<String>,
}

/// On-demand city bootstrap. Runs the resolve-and-load pipeline inline so the
/// city is immediately servable in unranked mode, with the ranking chain left
/// to the background worker.
#[tracing::instrument(skip(state, query))]
pub async fn bootstrap_city(
    State(state): State<AppState>,
    Query(query): Query<BootstrapQuery>,
) -> Result<Response, ApiError> {
    let started = Instant::now();

    let city_query = query
        .city
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::missing_param("city"))?;

    let outcome = state.bootstrap_service.run(city_query).await?;

    Ok(respond(outcome, started, None, None))
}
