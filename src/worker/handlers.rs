use serde_json::json;

use crate::application::errors::{AppError, AppResult};
use crate::application::services::{
    AggregateService, BootstrapService, IngestService, RefreshService,
};
use crate::domain::jobs::{BootstrapCityPayload, CityPayload, Job, JobType};

/// The registered job handlers: one service per job type. Dispatch parses
/// the payload and returns the handler's outcome for the job log.
pub struct Handlers {
    pub bootstrap: BootstrapService,
    pub ingest: IngestService,
    pub aggregate: AggregateService,
    pub refresh: RefreshService,
}

impl Handlers {
    pub async fn dispatch(&self, job: &Job) -> AppResult<serde_json::Value> {
        match job.job_type {
            JobType::BootstrapCity => {
                let payload: BootstrapCityPayload = parse_payload(job)?;
                let outcome = self.bootstrap.run(&payload.city_query).await?;
                Ok(json!({
                    "city_id": outcome.city.id,
                    "places_loaded": outcome.places_loaded,
                    "jobs_enqueued": outcome.jobs_enqueued,
                }))
            }
            JobType::IngestReddit => {
                let payload: CityPayload = parse_payload(job)?;
                let outcome = self.ingest.run(payload.city_id).await?;
                serialize_outcome(outcome)
            }
            JobType::ComputeAggregations => {
                let payload: CityPayload = parse_payload(job)?;
                let outcome = self.aggregate.run(payload.city_id).await?;
                serialize_outcome(outcome)
            }
            JobType::RefreshMvs => {
                let outcome = self.refresh.run().await?;
                Ok(json!({
                    "views_refreshed": outcome.versions.len(),
                }))
            }
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(job: &Job) -> AppResult<T> {
    serde_json::from_value(job.payload.clone()).map_err(|err| {
        AppError::storage(format!(
            "malformed payload for {} job {}: {err}",
            job.job_type.as_str(),
            job.id
        ))
    })
}

fn serialize_outcome<T: serde::Serialize>(outcome: T) -> AppResult<serde_json::Value> {
    serde_json::to_value(outcome)
        .map_err(|err| AppError::storage(format!("failed to serialize job outcome: {err}")))
}
