use std::time::Instant;

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Canonical success envelope: `{data, meta:{timestamp, response_time_ms}}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: T,
    pub meta: Meta,
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: u64,
}

impl Meta {
    fn since(started: Instant) -> Self {
        Self {
            timestamp: Utc::now(),
            response_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub max_age_secs: u64,
    pub stale_while_revalidate_secs: u64,
}

impl CachePolicy {
    pub const RANKED: Self = Self {
        max_age_secs: 3600,
        stale_while_revalidate_secs: 86_400,
    };
    pub const UNRANKED: Self = Self {
        max_age_secs: 300,
        stale_while_revalidate_secs: 3600,
    };
    pub const SHORT: Self = Self {
        max_age_secs: 300,
        stale_while_revalidate_secs: 3600,
    };
    pub const DETAIL: Self = Self {
        max_age_secs: 600,
        stale_while_revalidate_secs: 3600,
    };

    fn header_value(self) -> HeaderValue {
        let raw = format!(
            "public, max-age={}, stale-while-revalidate={}",
            self.max_age_secs, self.stale_while_revalidate_secs
        );
        HeaderValue::from_str(&raw).unwrap_or(HeaderValue::from_static("public, max-age=60"))
    }
}

/// Wraps data in the envelope with optional cache headers and ETag.
pub fn respond<T: Serialize>(
    data: T,
    started: Instant,
    cache: Option<CachePolicy>,
    etag: Option<&str>,
) -> Response {
    let mut response = Json(Envelope {
        data,
        meta: Meta::since(started),
    })
    .into_response();

    apply_cache_headers(&mut response, cache, etag);
    response
}

/// Conditional-read hit: 304, no body, identical cache headers.
pub fn not_modified(cache: Option<CachePolicy>, etag: &str) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    apply_cache_headers(&mut response, cache, Some(etag));
    response
}

fn apply_cache_headers(response: &mut Response, cache: Option<CachePolicy>, etag: Option<&str>) {
    if let Some(policy) = cache {
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, policy.header_value());
    }
    if let Some(etag) = etag
        && let Ok(value) = HeaderValue::from_str(etag)
    {
        response.headers_mut().insert(header::ETAG, value);
    }
}

/// ETag identity for ranked reads. Deterministic in exactly
/// (version hash, city, type, cuisine-or-all, offset, limit).
pub fn ranked_etag(
    version_hash: &str,
    city_id: crate::domain::ids::CityId,
    kind: &str,
    cuisine: Option<&str>,
    offset: i64,
    limit: i64,
) -> String {
    format!(
        "\"{version_hash}-{city_id}-{kind}-{}-{offset}-{limit}\"",
        cuisine.unwrap_or("all")
    )
}

pub fn if_none_match_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|raw| {
            raw.split(',')
                .map(str::trim)
                .any(|candidate| candidate == etag || candidate == "*")
        })
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub offset: i64,
    pub limit: i64,
    pub total: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(offset: i64, limit: i64, total: i64) -> Self {
        Self {
            offset,
            limit,
            total,
            has_more: offset + limit < total,
        }
    }
}

pub fn clamp_limit(requested: Option<i64>, default: i64, max: i64) -> i64 {
    requested.unwrap_or(default).clamp(1, max)
}

pub fn clamp_offset(requested: Option<i64>) -> i64 {
    requested.unwrap_or(0).max(0)
}
