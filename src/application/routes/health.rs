use axum::Json;
use axum::extract::State;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::application::state::AppState;
use crate::domain::repositories::JobCounts;

/// A materialized view older than this marks the service degraded.
const STALE_VIEW_HOURS: i64 = 48;

#[derive(Debug, Serialize)]
pub struct HealthPayload {
    pub status: &'static str,
    pub checks: HealthChecks,
    pub uptime_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub database: &'static str,
    pub materialized_views: Vec<ViewHealth>,
    pub job_queue: JobQueueHealth,
    pub cities: CityHealth,
}

#[derive(Debug, Serialize)]
pub struct ViewHealth {
    pub view: String,
    pub age_hours: f64,
    pub row_count: i64,
    pub last_refresh: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct JobQueueHealth {
    pub last_24h_counts: JobCounts,
}

#[derive(Debug, Default, Serialize)]
pub struct CityHealth {
    pub total: i64,
    pub ranked: i64,
    pub unranked: i64,
}

/// Operational snapshot. Never cached; always 200 — `status` carries the
/// verdict so probes can alert without special-casing status codes.
#[tracing::instrument(skip(state))]
pub async fn health(State(state): State<AppState>) -> Response {
    let now = Utc::now();
    let db_ok = state.health_probe.ping().await.is_ok();

    let mut views = Vec::new();
    let mut job_counts = JobCounts::default();
    let mut cities = CityHealth::default();

    if db_ok {
        if let Ok(versions) = state.projection_repo.versions().await {
            views = versions
                .into_iter()
                .map(|v| ViewHealth {
                    view: v.view_name,
                    age_hours: (now - v.refreshed_at).num_minutes() as f64 / 60.0,
                    row_count: v.row_count,
                    last_refresh: v.refreshed_at,
                })
                .collect();
        }
        if let Ok(counts) = state.job_repo.counts_since(now - Duration::hours(24)).await {
            job_counts = counts;
        }
        if let Ok(counts) = state.city_repo.counts().await {
            cities = CityHealth {
                total: counts.total,
                ranked: counts.ranked,
                unranked: counts.total - counts.ranked,
            };
        }
    }

    let stale_views = views
        .iter()
        .any(|v| v.age_hours > STALE_VIEW_HOURS as f64 && v.row_count > 0);
    let status = if !db_ok {
        "unhealthy"
    } else if stale_views || job_counts.error > 0 {
        "degraded"
    } else {
        "ok"
    };

    let payload = HealthPayload {
        status,
        checks: HealthChecks {
            database: if db_ok { "ok" } else { "error" },
            materialized_views: views,
            job_queue: JobQueueHealth {
                last_24h_counts: job_counts,
            },
            cities,
        },
        uptime_ms: state.started_at.elapsed().as_millis() as u64,
    };

    let mut response = Json(payload).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
