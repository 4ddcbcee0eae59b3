pub mod bootstrap;
pub mod cities;
pub mod cuisines;
pub mod fuzzy;
pub mod health;
pub mod places;
pub mod search;
pub mod support;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower::{BoxError, ServiceBuilder};
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::application::errors::{ApiError, AppError};
use crate::application::rate_limit::{RouteClass, client_key};
use crate::application::state::AppState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_LIMIT_BYTES: usize = 64 * 1024;

pub fn app_router(state: AppState) -> Router {
    let standard = Router::new()
        .route("/search", get(search::search))
        .route("/fuzzy", get(fuzzy::fuzzy_search))
        .route("/cuisines", get(cuisines::list_cuisines))
        .layer(middleware::from_fn_with_state(
            (state.clone(), RouteClass::Standard),
            enforce_rate_limit,
        ));

    let generous = Router::new()
        .route("/places/{id}", get(places::get_place))
        .route("/cities", get(cities::list_cities))
        .layer(middleware::from_fn_with_state(
            (state.clone(), RouteClass::Generous),
            enforce_rate_limit,
        ));

    let strict = Router::new()
        .route("/bootstrap", post(bootstrap::bootstrap_city))
        .layer(middleware::from_fn_with_state(
            (state.clone(), RouteClass::Strict),
            enforce_rate_limit,
        ));

    // Health is for probes: never rate limited, never cached
    let api = standard
        .merge(generous)
        .merge(strict)
        .route("/health", get(health::health));

    Router::new()
        .nest("/api/v2", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(handle_timeout))
                .layer(tower::timeout::TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(CompressionLayer::new())
                .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES)),
        )
        .with_state(state)
}

/// A request that outlives its deadline is cut off as a 503, per the
/// cancellation contract: the caller retries, the database query is dropped.
async fn handle_timeout(err: BoxError) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::from(AppError::upstream("request deadline exceeded")).into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

/// Sliding-window rate limiting per route class. Emits the standard headers
/// on success and 429 alike; the 429 body uses the canonical error envelope.
async fn enforce_rate_limit(
    State((state, class)): State<(AppState, RouteClass)>,
    request: Request,
    next: Next,
) -> Response {
    let socket_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let client = client_key(request.headers(), socket_ip);

    let decision = state.limiter.check(class, &client);

    if !decision.allowed {
        let mut response = ApiError::from(AppError::RateLimited {
            retry_after_secs: decision.reset_secs,
        })
        .into_response();
        apply_rate_headers(&mut response, decision.limit, 0, decision.reset_secs);
        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_headers(
        &mut response,
        decision.limit,
        decision.remaining,
        decision.reset_secs,
    );
    response
}

fn apply_rate_headers(response: &mut Response, limit: u32, remaining: u32, reset_secs: u64) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&reset_secs.to_string()) {
        headers.insert("x-ratelimit-reset", value);
    }
}
