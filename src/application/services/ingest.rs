use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::application::config::AppConfig;
use crate::application::errors::{AppError, AppResult};
use crate::domain::extraction::extract_candidates;
use crate::domain::ids::{CityId, PlaceId};
use crate::domain::matching::{MatchEngine, MatchQuery};
use crate::domain::mentions::NewMention;
use crate::domain::repositories::{
    CityRepository, MentionRepository, PlaceRepository, SourceRepository,
};
use crate::domain::sources::Source;
use crate::infrastructure::reddit::RedditClient;

#[derive(Debug, Default, Serialize)]
pub struct IngestOutcome {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub posts_fetched: u64,
    pub mentions_inserted: u64,
}

/// Discussion ingest for one city: fetch posts and comments per active
/// source, extract candidate names, match them, and persist compliance-safe
/// mention metadata. Per-source failures are logged and skipped; the run
/// fails only when every source does.
pub struct IngestService {
    config: Arc<AppConfig>,
    reddit: Arc<RedditClient>,
    matcher: MatchEngine,
    city_repo: Arc<dyn CityRepository>,
    place_repo: Arc<dyn PlaceRepository>,
    mention_repo: Arc<dyn MentionRepository>,
    source_repo: Arc<dyn SourceRepository>,
}

impl IngestService {
    pub fn new(
        config: Arc<AppConfig>,
        reddit: Arc<RedditClient>,
        city_repo: Arc<dyn CityRepository>,
        place_repo: Arc<dyn PlaceRepository>,
        mention_repo: Arc<dyn MentionRepository>,
        source_repo: Arc<dyn SourceRepository>,
    ) -> Self {
        let matcher = MatchEngine::new(config.matching);
        Self {
            config,
            reddit,
            matcher,
            city_repo,
            place_repo,
            mention_repo,
            source_repo,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self, city_id: CityId) -> AppResult<IngestOutcome> {
        let sources = self.source_repo.active_for_city(city_id).await?;
        if sources.is_empty() {
            info!(%city_id, "no active sources, nothing to ingest");
            return Ok(IngestOutcome::default());
        }

        let mut outcome = IngestOutcome::default();
        for source in sources {
            match self.ingest_source(city_id, &source).await {
                Ok((posts, inserted)) => {
                    outcome.sources_ok += 1;
                    outcome.posts_fetched += posts;
                    outcome.mentions_inserted += inserted;
                    self.source_repo
                        .mark_synced(&source.name, posts as i64)
                        .await?;
                }
                Err(err) => {
                    warn!(source = %source.name, error = %err, "source ingest failed, skipping");
                    outcome.sources_failed += 1;
                }
            }
        }

        if outcome.sources_ok == 0 {
            return Err(AppError::upstream("every source failed to ingest"));
        }

        // First successful ingest is what makes a city servable as ranked
        self.city_repo.set_ranked(city_id, true).await?;

        info!(
            %city_id,
            sources_ok = outcome.sources_ok,
            sources_failed = outcome.sources_failed,
            mentions = outcome.mentions_inserted,
            "ingest complete"
        );
        Ok(outcome)
    }

    async fn ingest_source(
        &self,
        city_id: CityId,
        source: &Source,
    ) -> AppResult<(u64, u64)> {
        let posts = self
            .reddit
            .top_posts(&source.name, self.config.ingest.posts_per_source)
            .await?;

        let mut mentions: Vec<NewMention> = Vec::new();
        let mut seen: HashSet<(String, Option<String>, PlaceId)> = HashSet::new();

        for post in &posts {
            let text = format!("{}\n{}", post.title, post.selftext);
            for place_id in self.match_candidates(city_id, &text).await? {
                if seen.insert((post.id.clone(), None, place_id)) {
                    mentions.push(NewMention::from_text(
                        Some(place_id),
                        &source.name,
                        &post.id,
                        None,
                        post.score,
                        post.posted_at,
                        &post.permalink,
                        &text,
                    ));
                }
            }

            let comments = self
                .reddit
                .comments(&source.name, &post.id, self.config.ingest.comments_per_post)
                .await?;
            for comment in comments {
                let matched = self.match_candidates(city_id, &comment.body).await?;
                if matched.is_empty() && self.config.ingest.keep_unmatched {
                    mentions.push(NewMention::from_text(
                        None,
                        &source.name,
                        &post.id,
                        Some(&comment.id),
                        comment.score,
                        comment.posted_at,
                        &comment.permalink,
                        &comment.body,
                    ));
                    continue;
                }
                for place_id in matched {
                    if seen.insert((post.id.clone(), Some(comment.id.clone()), place_id)) {
                        mentions.push(NewMention::from_text(
                            Some(place_id),
                            &source.name,
                            &post.id,
                            Some(&comment.id),
                            comment.score,
                            comment.posted_at,
                            &comment.permalink,
                            &comment.body,
                        ));
                    }
                }
            }
        }

        let inserted = self.mention_repo.insert_batch(mentions).await?;
        Ok((posts.len() as u64, inserted))
    }

    async fn match_candidates(
        &self,
        city_id: CityId,
        text: &str,
    ) -> AppResult<Vec<PlaceId>> {
        let mut matched = Vec::new();

        for candidate in extract_candidates(text) {
            let query = MatchQuery::for_text(city_id, &candidate);
            if let Some(outcome) = self.matcher.resolve(self.place_repo.as_ref(), &query).await? {
                tracing::debug!(
                    candidate = %candidate,
                    place_id = %outcome.place_id,
                    stage = outcome.stage.as_str(),
                    "candidate matched"
                );
                if !matched.contains(&outcome.place_id) {
                    matched.push(outcome.place_id);
                }
            }
        }

        Ok(matched)
    }
}
