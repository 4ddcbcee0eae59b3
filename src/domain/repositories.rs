use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::RepositoryError;
use crate::domain::aggregations::PlaceAggregation;
use crate::domain::cities::{City, CityCounts, CityWithStats, NewCity, NewCityAlias};
use crate::domain::ids::{CityId, JobId, PlaceId};
use crate::domain::jobs::{Job, JobType, NewJob};
use crate::domain::matching::MatchStore;
use crate::domain::mentions::{Mention, NewMention};
use crate::domain::places::Place;
use crate::domain::places::NewPlace;
use crate::domain::projections::{CuisineFacet, ProjectionVersion, RankedRow, RankingKind};
use crate::domain::scoring::PlaceSignals;
use crate::domain::sources::{NewSource, Source};

#[async_trait]
pub trait CityRepository: Send + Sync {
    /// Idempotent on (name, country); re-running bootstrap updates the
    /// geometry in place.
    async fn upsert(&self, city: NewCity) -> Result<City, RepositoryError>;
    async fn get(&self, id: CityId) -> Result<City, RepositoryError>;
    /// Case-folded lookup over canonical names, then aliases.
    async fn resolve(&self, query: &str) -> Result<Option<City>, RepositoryError>;
    async fn upsert_aliases(
        &self,
        city_id: CityId,
        aliases: &[NewCityAlias],
    ) -> Result<(), RepositoryError>;
    async fn set_ranked(&self, city_id: CityId, ranked: bool) -> Result<(), RepositoryError>;
    async fn touch_refreshed(&self, city_id: CityId) -> Result<(), RepositoryError>;
    async fn list_with_stats(&self) -> Result<Vec<CityWithStats>, RepositoryError>;
    async fn counts(&self) -> Result<CityCounts, RepositoryError>;
}

/// A place row joined with its fuzzy-search ranking inputs.
#[derive(Debug, Clone)]
pub struct FuzzyHit {
    pub place: Place,
    pub similarity: f64,
    pub iconic_score: f64,
    pub city_name: String,
}

#[async_trait]
pub trait PlaceRepository: MatchStore + Send + Sync {
    /// Conflict target (city_id, name_norm). Existing address/brand survive a
    /// null incoming value; everything else is overwritten.
    async fn upsert(&self, place: NewPlace) -> Result<PlaceId, RepositoryError>;
    async fn upsert_batch(&self, places: Vec<NewPlace>) -> Result<u64, RepositoryError>;
    async fn get(&self, id: PlaceId) -> Result<Place, RepositoryError>;
    /// Open places for a city ordered by name; the unranked serving mode.
    async fn list_open_by_name(
        &self,
        city_id: CityId,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Place>, i64), RepositoryError>;
    /// Trigram search over open places, ordered similarity desc then iconic
    /// score desc.
    async fn fuzzy_search(
        &self,
        query_norm: &str,
        city_id: Option<CityId>,
        threshold: f64,
        limit: i64,
    ) -> Result<Vec<FuzzyHit>, RepositoryError>;
}

#[async_trait]
pub trait MentionRepository: Send + Sync {
    /// Conflict-ignored batch insert; returns the number of new rows.
    async fn insert_batch(&self, mentions: Vec<NewMention>) -> Result<u64, RepositoryError>;
    async fn recent_for_place(
        &self,
        place_id: PlaceId,
        limit: i64,
    ) -> Result<Vec<Mention>, RepositoryError>;
    /// Every matched mention for a city; snippet selection happens in the
    /// aggregation handler.
    async fn matched_for_city(&self, city_id: CityId) -> Result<Vec<Mention>, RepositoryError>;
    /// Aggregated scoring inputs for every mentioned place in a city, with
    /// per-mention signals inside the trailing window.
    async fn signals_for_city(
        &self,
        city_id: CityId,
        window_days: i64,
    ) -> Result<Vec<PlaceSignals>, RepositoryError>;
}

#[async_trait]
pub trait AggregationRepository: Send + Sync {
    async fn upsert_batch(
        &self,
        aggregations: Vec<PlaceAggregation>,
    ) -> Result<(), RepositoryError>;
    async fn get(&self, place_id: PlaceId) -> Result<Option<PlaceAggregation>, RepositoryError>;
}

#[async_trait]
pub trait ProjectionRepository: Send + Sync {
    /// CONCURRENT refresh of one whitelisted view, serialized by an advisory
    /// lock on the view name. Readers keep seeing the previous rows.
    async fn refresh(&self, view_name: &str) -> Result<(), RepositoryError>;
    /// Records a fresh version after a successful refresh so ETags never get
    /// ahead of the projection contents.
    async fn bump_version(
        &self,
        view_name: &str,
        version_hash: &str,
    ) -> Result<ProjectionVersion, RepositoryError>;
    async fn version(&self, view_name: &str)
    -> Result<Option<ProjectionVersion>, RepositoryError>;
    async fn versions(&self) -> Result<Vec<ProjectionVersion>, RepositoryError>;
    /// One page of a ranked projection plus the total for the selection.
    async fn ranked_page(
        &self,
        city_id: CityId,
        kind: RankingKind,
        cuisine: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RankedRow>, i64), RepositoryError>;
    async fn cuisine_facets(
        &self,
        city_id: CityId,
        limit: i64,
    ) -> Result<Vec<CuisineFacet>, RepositoryError>;
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct JobCounts {
    pub queued: i64,
    pub running: i64,
    pub done: i64,
    pub error: i64,
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Idempotent per (type, payload hash) while a matching row is queued or
    /// running; returns the surviving row either way.
    async fn enqueue(&self, job: NewJob) -> Result<Job, RepositoryError>;
    /// Atomically claims the oldest due queued job of one of the given types.
    async fn claim(&self, types: &[JobType]) -> Result<Option<Job>, RepositoryError>;
    async fn complete(&self, id: JobId) -> Result<(), RepositoryError>;
    /// Records the failure; requeues with backoff below the attempt cap,
    /// otherwise parks the job in terminal error.
    async fn fail(
        &self,
        id: JobId,
        error: &str,
        max_attempts: i32,
        backoff_secs: &[u64],
    ) -> Result<(), RepositoryError>;
    /// Returns `running` jobs older than the timeout to `queued`, attempts
    /// preserved. Run at worker startup to recover from kills.
    async fn sweep_stalled(&self, older_than: Duration) -> Result<u64, RepositoryError>;
    async fn counts_since(&self, since: DateTime<Utc>) -> Result<JobCounts, RepositoryError>;
    async fn purge_terminal(&self, older_than: Duration) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn upsert(&self, source: NewSource) -> Result<(), RepositoryError>;
    async fn active_for_city(&self, city_id: CityId) -> Result<Vec<Source>, RepositoryError>;
    async fn mark_synced(&self, name: &str, new_posts: i64) -> Result<(), RepositoryError>;
}

/// Liveness probe for the health endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn ping(&self) -> Result<(), RepositoryError>;
}
