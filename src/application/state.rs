use std::sync::Arc;
use std::time::Instant;

use crate::application::config::AppConfig;
use crate::application::rate_limit::SlidingWindowLimiter;
use crate::application::services::BootstrapService;
use crate::domain::repositories::{
    AggregationRepository, CityRepository, HealthProbe, JobRepository, MentionRepository,
    PlaceRepository, ProjectionRepository, SourceRepository,
};
use crate::infrastructure::database::{Database, SqlHealthProbe};
use crate::infrastructure::repositories::aggregations::SqlAggregationRepository;
use crate::infrastructure::repositories::cities::SqlCityRepository;
use crate::infrastructure::repositories::jobs::SqlJobRepository;
use crate::infrastructure::repositories::mentions::SqlMentionRepository;
use crate::infrastructure::repositories::places::SqlPlaceRepository;
use crate::infrastructure::repositories::projections::SqlProjectionRepository;
use crate::infrastructure::repositories::sources::SqlSourceRepository;

/// External endpoints that vary between production and tests.
pub struct AppStateConfig {
    pub config: Arc<AppConfig>,
    pub geocoder_url: String,
    pub overpass_url: String,
}

/// Everything the read API needs, passed explicitly. Repositories are trait
/// objects so tests can substitute in-memory fakes.
#[derive(Clone)]
pub struct AppState {
    pub city_repo: Arc<dyn CityRepository>,
    pub place_repo: Arc<dyn PlaceRepository>,
    pub mention_repo: Arc<dyn MentionRepository>,
    pub aggregation_repo: Arc<dyn AggregationRepository>,
    pub projection_repo: Arc<dyn ProjectionRepository>,
    pub job_repo: Arc<dyn JobRepository>,
    pub source_repo: Arc<dyn SourceRepository>,
    pub health_probe: Arc<dyn HealthProbe>,
    pub config: Arc<AppConfig>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub bootstrap_service: Arc<BootstrapService>,
    pub started_at: Instant,
}

impl AppState {
    /// Build the full application state from a database connection and
    /// config. Repositories and services are created internally.
    pub fn from_database(database: &Database, config: AppStateConfig) -> Self {
        let pool = database.clone_pool();

        let city_repo: Arc<dyn CityRepository> = Arc::new(SqlCityRepository::new(pool.clone()));
        let place_repo: Arc<dyn PlaceRepository> = Arc::new(SqlPlaceRepository::new(pool.clone()));
        let mention_repo: Arc<dyn MentionRepository> =
            Arc::new(SqlMentionRepository::new(pool.clone()));
        let aggregation_repo: Arc<dyn AggregationRepository> =
            Arc::new(SqlAggregationRepository::new(pool.clone()));
        let projection_repo: Arc<dyn ProjectionRepository> =
            Arc::new(SqlProjectionRepository::new(pool.clone()));
        let job_repo: Arc<dyn JobRepository> = Arc::new(SqlJobRepository::new(pool.clone()));
        let source_repo: Arc<dyn SourceRepository> =
            Arc::new(SqlSourceRepository::new(pool.clone()));
        let health_probe: Arc<dyn HealthProbe> = Arc::new(SqlHealthProbe::new(pool));

        #[allow(clippy::expect_used)]
        let http_client = reqwest::ClientBuilder::new()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        let bootstrap_service = Arc::new(BootstrapService::new(
            Arc::clone(&config.config),
            http_client,
            config.geocoder_url,
            config.overpass_url,
            Arc::clone(&city_repo),
            Arc::clone(&place_repo),
            Arc::clone(&source_repo),
            Arc::clone(&job_repo),
        ));

        let limiter = Arc::new(SlidingWindowLimiter::new(config.config.rate_limits.clone()));

        Self {
            city_repo,
            place_repo,
            mention_repo,
            aggregation_repo,
            projection_repo,
            job_repo,
            source_repo,
            health_probe,
            config: config.config,
            limiter,
            bootstrap_service,
            started_at: Instant::now(),
        }
    }
}
