pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::application::config::{AppConfig, Secrets};
use crate::application::services::{
    AggregateService, BootstrapService, IngestService, RefreshService,
};
use crate::domain::jobs::{Job, JobType};
use crate::domain::repositories::JobRepository;
use crate::infrastructure::database::Database;
use crate::infrastructure::repositories::aggregations::SqlAggregationRepository;
use crate::infrastructure::repositories::cities::SqlCityRepository;
use crate::infrastructure::repositories::jobs::SqlJobRepository;
use crate::infrastructure::repositories::mentions::SqlMentionRepository;
use crate::infrastructure::repositories::places::SqlPlaceRepository;
use crate::infrastructure::repositories::projections::SqlProjectionRepository;
use crate::infrastructure::repositories::sources::SqlSourceRepository;
use crate::infrastructure::reddit::RedditClient;
use crate::infrastructure::{geocoder, overpass, reddit};

use self::handlers::Handlers;

pub struct WorkerConfig {
    pub database_url: String,
    pub config: AppConfig,
}

/// One worker loop: claim, dispatch, report. Jobs execute sequentially
/// within a worker; claiming uses SKIP LOCKED so additional worker processes
/// scale out without contention.
pub struct Worker {
    job_repo: Arc<dyn JobRepository>,
    handlers: Handlers,
    config: Arc<AppConfig>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        handlers: Handlers,
        config: Arc<AppConfig>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job_repo,
            handlers,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        // Recover jobs a killed worker left in `running`, and trim old rows
        let swept = self
            .job_repo
            .sweep_stalled(Duration::from_secs(self.config.jobs.stalled_secs))
            .await
            .context("failed to sweep stalled jobs")?;
        if swept > 0 {
            warn!(swept, "requeued stalled running jobs");
        }
        let purged = self
            .job_repo
            .purge_terminal(Duration::from_secs(self.config.jobs.retention_days * 86_400))
            .await
            .context("failed to purge terminal jobs")?;
        if purged > 0 {
            info!(purged, "purged old terminal jobs");
        }

        info!("worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.job_repo.claim(&JobType::ALL).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => self.idle().await,
                Err(err) => {
                    warn!(error = %err, "failed to claim job");
                    self.idle().await;
                }
            }
        }

        info!("worker shutdown complete");
        Ok(())
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, job_type = job.job_type.as_str()))]
    async fn process(&mut self, job: Job) {
        let mut shutdown = self.shutdown.clone();
        let drain = Duration::from_secs(self.config.jobs.drain_secs);

        let fut = self.handlers.dispatch(&job);
        tokio::pin!(fut);

        let result = tokio::select! {
            result = &mut fut => result,
            _ = shutdown.changed() => {
                info!("shutdown requested, draining in-flight job");
                match tokio::time::timeout(drain, &mut fut).await {
                    Ok(result) => result,
                    Err(_) => Err(crate::application::errors::AppError::upstream(
                        "job abandoned: shutdown drain window elapsed",
                    )),
                }
            }
        };

        match result {
            Ok(outcome) => {
                if let Err(err) = self.job_repo.complete(job.id).await {
                    warn!(error = %err, "failed to mark job done");
                } else {
                    info!(outcome = %outcome, "job done");
                }
            }
            Err(err) => {
                let message = err.to_string();
                warn!(error = %message, attempts = job.attempts + 1, "job failed");
                if let Err(report_err) = self
                    .job_repo
                    .fail(
                        job.id,
                        &message,
                        self.config.jobs.max_attempts,
                        &self.config.jobs.backoff_secs,
                    )
                    .await
                {
                    warn!(error = %report_err, "failed to record job failure");
                }
            }
        }
    }

    async fn idle(&mut self) {
        // Jitter keeps a fleet of workers from polling in lockstep
        let jitter = rand::thread_rng().gen_range(0..1000);
        let wait = Duration::from_secs(self.config.jobs.poll_interval_secs)
            + Duration::from_millis(jitter);

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {}
        }
    }
}

/// Builds the worker wired to real repositories and clients, and runs it
/// until a shutdown signal lands.
pub async fn run(config: WorkerConfig, secrets: &Secrets) -> anyhow::Result<()> {
    let database = Database::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    let pool = database.clone_pool();
    let app_config = Arc::new(config.config);

    let city_repo = Arc::new(SqlCityRepository::new(pool.clone()));
    let place_repo = Arc::new(SqlPlaceRepository::new(pool.clone()));
    let mention_repo = Arc::new(SqlMentionRepository::new(pool.clone()));
    let aggregation_repo = Arc::new(SqlAggregationRepository::new(pool.clone()));
    let projection_repo = Arc::new(SqlProjectionRepository::new(pool.clone()));
    let source_repo = Arc::new(SqlSourceRepository::new(pool.clone()));
    let job_repo: Arc<dyn JobRepository> = Arc::new(SqlJobRepository::new(pool));

    #[allow(clippy::expect_used)]
    let http_client = reqwest::ClientBuilder::new()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client");

    let reddit_client = Arc::new(RedditClient::new(
        http_client.clone(),
        reddit::REDDIT_TOKEN_URL,
        reddit::REDDIT_API_URL,
        secrets.reddit_client_id.as_deref().unwrap_or_default(),
        secrets.reddit_client_secret.as_deref().unwrap_or_default(),
    ));

    let handlers = Handlers {
        bootstrap: BootstrapService::new(
            Arc::clone(&app_config),
            http_client,
            geocoder::NOMINATIM_SEARCH_URL.to_string(),
            overpass::OVERPASS_API_URL.to_string(),
            city_repo.clone(),
            place_repo.clone(),
            source_repo.clone(),
            Arc::clone(&job_repo),
        ),
        ingest: IngestService::new(
            Arc::clone(&app_config),
            reddit_client,
            city_repo.clone(),
            place_repo.clone(),
            mention_repo.clone(),
            source_repo,
        ),
        aggregate: AggregateService::new(
            Arc::clone(&app_config),
            city_repo,
            mention_repo,
            aggregation_repo,
        ),
        refresh: RefreshService::new(projection_repo),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        crate::application::server::shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let worker = Worker::new(job_repo, handlers, app_config, shutdown_rx);
    worker.run().await
}
