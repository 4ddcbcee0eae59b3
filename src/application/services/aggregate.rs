use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::application::config::AppConfig;
use crate::application::errors::AppResult;
use crate::domain::aggregations::{PlaceAggregation, select_top_snippets};
use crate::domain::ids::{CityId, PlaceId};
use crate::domain::mentions::Mention;
use crate::domain::repositories::{AggregationRepository, CityRepository, MentionRepository};
use crate::domain::scoring::score_batch;

#[derive(Debug, Default, Serialize)]
pub struct AggregateOutcome {
    pub places_scored: usize,
}

/// Recomputes the per-place aggregation batch for one city. Zero mentions is
/// a graceful no-op: the chain may run before ingest has produced anything.
pub struct AggregateService {
    config: Arc<AppConfig>,
    city_repo: Arc<dyn CityRepository>,
    mention_repo: Arc<dyn MentionRepository>,
    aggregation_repo: Arc<dyn AggregationRepository>,
}

impl AggregateService {
    pub fn new(
        config: Arc<AppConfig>,
        city_repo: Arc<dyn CityRepository>,
        mention_repo: Arc<dyn MentionRepository>,
        aggregation_repo: Arc<dyn AggregationRepository>,
    ) -> Self {
        Self {
            config,
            city_repo,
            mention_repo,
            aggregation_repo,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self, city_id: CityId) -> AppResult<AggregateOutcome> {
        let params = &self.config.scoring;
        let signals = self
            .mention_repo
            .signals_for_city(city_id, params.window_days)
            .await?;
        if signals.is_empty() {
            info!(%city_id, "no mentions to aggregate");
            return Ok(AggregateOutcome::default());
        }

        let now = Utc::now();
        let scores = score_batch(params, now, &signals);

        let mentions = self.mention_repo.matched_for_city(city_id).await?;
        let mut by_place: HashMap<PlaceId, Vec<Mention>> = HashMap::new();
        for mention in mentions {
            if let Some(place_id) = mention.place_id {
                by_place.entry(place_id).or_default().push(mention);
            }
        }

        let aggregations: Vec<PlaceAggregation> = signals
            .iter()
            .zip(scores.iter())
            .map(|(signal, score)| {
                let top_snippets = by_place
                    .get(&signal.place_id)
                    .map(|mentions| select_top_snippets(mentions))
                    .unwrap_or_default();

                PlaceAggregation {
                    place_id: signal.place_id,
                    iconic_score: score.iconic,
                    trending_score: score.trending,
                    unique_threads: signal.unique_threads,
                    total_mentions: signal.total_mentions,
                    total_upvotes: signal.total_upvotes,
                    mentions_90d: signal.mentions_90d,
                    last_seen: signal.last_seen,
                    top_snippets,
                    computed_at: now,
                }
            })
            .collect();

        let places_scored = aggregations.len();
        self.aggregation_repo.upsert_batch(aggregations).await?;
        self.city_repo.touch_refreshed(city_id).await?;

        info!(%city_id, places_scored, "aggregation batch written");
        Ok(AggregateOutcome { places_scored })
    }
}
