use std::time::Instant;

use axum::extract::State;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::errors::{ApiError, AppError};
use crate::application::routes::support::{CachePolicy, respond};
use crate::application::state::AppState;
use crate::domain::cities::CityWithStats;
use crate::domain::ids::CityId;

#[derive(Debug, Serialize)]
pub struct CitiesPayload {
    pub cities: Vec<CityListItem>,
    pub total: i64,
    pub ranked_count: i64,
}

#[derive(Debug, Serialize)]
pub struct CityListItem {
    pub id: CityId,
    pub name: String,
    pub country: String,
    pub ranked: bool,
    pub coordinates: [f64; 2],
    pub stats: CityListStats,
}

#[derive(Debug, Serialize)]
pub struct CityListStats {
    pub places: i64,
    pub mentions: i64,
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl From<CityWithStats> for CityListItem {
    fn from(entry: CityWithStats) -> Self {
        Self {
            id: entry.city.id,
            name: entry.city.name,
            country: entry.city.country,
            ranked: entry.city.ranked,
            coordinates: [entry.city.lat, entry.city.lon],
            stats: CityListStats {
                places: entry.stats.places,
                mentions: entry.stats.mentions,
                last_refreshed: entry.stats.last_refreshed,
            },
        }
    }
}

/// Covered cities with their counters.
#[tracing::instrument(skip(state))]
pub async fn list_cities(State(state): State<AppState>) -> Result<Response, ApiError> {
    let started = Instant::now();

    let entries = state
        .city_repo
        .list_with_stats()
        .await
        .map_err(AppError::from)?;

    let total = entries.len() as i64;
    let ranked_count = entries.iter().filter(|e| e.city.ranked).count() as i64;

    let payload = CitiesPayload {
        cities: entries.into_iter().map(CityListItem::from).collect(),
        total,
        ranked_count,
    };

    Ok(respond(payload, started, Some(CachePolicy::SHORT), None))
}
