#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::net::TcpListener;
use tokio::task::AbortHandle;
use uuid::Uuid;

use chowrank::application::config::AppConfig;
use chowrank::application::rate_limit::SlidingWindowLimiter;
use chowrank::application::routes::app_router;
use chowrank::application::services::BootstrapService;
use chowrank::application::state::AppState;
use chowrank::domain::RepositoryError;
use chowrank::domain::aggregations::PlaceAggregation;
use chowrank::domain::cities::{
    BoundingBox, City, CityCounts, CityStats, CityWithStats, NewCity, NewCityAlias,
};
use chowrank::domain::ids::{CityId, JobId, MentionId, PlaceId};
use chowrank::domain::jobs::{Job, JobStatus, JobType, NewJob, backoff_delay};
use chowrank::domain::matching::{MatchCandidate, MatchStore, word_trigram_similarity};
use chowrank::domain::matching::trigram_similarity;
use chowrank::domain::mentions::{Mention, NewMention};
use chowrank::domain::places::{NewPlace, Place, PlaceStatus};
use chowrank::domain::projections::{
    CuisineFacet, PROJECTION_VIEWS, ProjectionVersion, RankedRow, RankingKind,
};
use chowrank::domain::repositories::{
    AggregationRepository, CityRepository, FuzzyHit, HealthProbe, JobCounts, JobRepository,
    MentionRepository, PlaceRepository, ProjectionRepository, SourceRepository,
};
use chowrank::domain::scoring::{MentionSignal, PlaceSignals};
use chowrank::domain::sources::{NewSource, Source};

/// Backing store for the in-memory repository fakes. The read API only sees
/// the repository traits, so tests swap the whole storage layer for this.
#[derive(Default)]
pub struct InMemoryStore {
    pub cities: Vec<City>,
    pub aliases: Vec<(CityId, String, bool)>,
    pub places: Vec<Place>,
    pub mentions: Vec<Mention>,
    pub aggregations: HashMap<PlaceId, PlaceAggregation>,
    pub ranked: HashMap<&'static str, Vec<RankedRow>>,
    pub versions: HashMap<String, ProjectionVersion>,
    pub jobs: Vec<Job>,
    pub sources: Vec<Source>,
    pub db_healthy: bool,
}

pub type SharedStore = Arc<Mutex<InMemoryStore>>;

pub fn new_store() -> SharedStore {
    Arc::new(Mutex::new(InMemoryStore {
        db_healthy: true,
        ..InMemoryStore::default()
    }))
}

#[derive(Clone)]
pub struct FakeRepos {
    pub store: SharedStore,
}

// --- CityRepository ---

#[async_trait]
impl CityRepository for FakeRepos {
    async fn upsert(&self, city: NewCity) -> Result<City, RepositoryError> {
        let city = city.normalize();
        let mut store = self.store.lock().unwrap();
        if let Some(existing) = store
            .cities
            .iter_mut()
            .find(|c| c.name == city.name && c.country == city.country)
        {
            existing.lat = city.lat;
            existing.lon = city.lon;
            existing.bbox = city.bbox;
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let created = City {
            id: CityId::new(),
            name: city.name,
            country: city.country,
            lat: city.lat,
            lon: city.lon,
            bbox: city.bbox,
            ranked: false,
            last_refreshed_at: None,
            created_at: now,
            updated_at: now,
        };
        store.cities.push(created.clone());
        Ok(created)
    }

    async fn get(&self, id: CityId) -> Result<City, RepositoryError> {
        self.store
            .lock()
            .unwrap()
            .cities
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn resolve(&self, query: &str) -> Result<Option<City>, RepositoryError> {
        let needle = query.trim().to_lowercase();
        let store = self.store.lock().unwrap();
        if let Some(city) = store
            .cities
            .iter()
            .find(|c| c.name.to_lowercase() == needle)
        {
            return Ok(Some(city.clone()));
        }
        let by_alias = store
            .aliases
            .iter()
            .find(|(_, alias, _)| alias.to_lowercase() == needle)
            .and_then(|(city_id, _, _)| store.cities.iter().find(|c| c.id == *city_id));
        Ok(by_alias.cloned())
    }

    async fn upsert_aliases(
        &self,
        city_id: CityId,
        aliases: &[NewCityAlias],
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        for alias in aliases {
            let exists = store
                .aliases
                .iter()
                .any(|(_, a, _)| a.eq_ignore_ascii_case(&alias.alias));
            if !exists {
                store
                    .aliases
                    .push((city_id, alias.alias.clone(), alias.is_borough));
            }
        }
        Ok(())
    }

    async fn set_ranked(&self, city_id: CityId, ranked: bool) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        let city = store
            .cities
            .iter_mut()
            .find(|c| c.id == city_id)
            .ok_or(RepositoryError::NotFound)?;
        city.ranked = ranked;
        Ok(())
    }

    async fn touch_refreshed(&self, city_id: CityId) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        if let Some(city) = store.cities.iter_mut().find(|c| c.id == city_id) {
            city.last_refreshed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_with_stats(&self) -> Result<Vec<CityWithStats>, RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut entries: Vec<CityWithStats> = store
            .cities
            .iter()
            .map(|city| {
                let places = store.places.iter().filter(|p| p.city_id == city.id).count() as i64;
                let place_ids: Vec<PlaceId> = store
                    .places
                    .iter()
                    .filter(|p| p.city_id == city.id)
                    .map(|p| p.id)
                    .collect();
                let mentions = store
                    .mentions
                    .iter()
                    .filter(|m| m.place_id.is_some_and(|id| place_ids.contains(&id)))
                    .count() as i64;
                CityWithStats {
                    city: city.clone(),
                    stats: CityStats {
                        places,
                        mentions,
                        last_refreshed: city.last_refreshed_at,
                    },
                }
            })
            .collect();
        entries.sort_by(|a, b| a.city.name.cmp(&b.city.name));
        Ok(entries)
    }

    async fn counts(&self) -> Result<CityCounts, RepositoryError> {
        let store = self.store.lock().unwrap();
        Ok(CityCounts {
            total: store.cities.len() as i64,
            ranked: store.cities.iter().filter(|c| c.ranked).count() as i64,
        })
    }
}

// --- PlaceRepository + MatchStore ---

#[async_trait]
impl MatchStore for FakeRepos {
    async fn alias_exact(
        &self,
        city_id: CityId,
        query_norm: &str,
    ) -> Result<Option<MatchCandidate>, RepositoryError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .places
            .iter()
            .find(|p| {
                p.city_id == city_id
                    && p.status == PlaceStatus::Open
                    && (p.name_norm == query_norm || p.aliases.iter().any(|a| a == query_norm))
            })
            .map(|p| candidate_from_place(p, 1.0, None)))
    }

    async fn trigram_candidates(
        &self,
        city_id: CityId,
        query_norm: &str,
        threshold: f64,
        cap: i64,
    ) -> Result<Vec<MatchCandidate>, RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut hits: Vec<MatchCandidate> = store
            .places
            .iter()
            .filter(|p| p.city_id == city_id && p.status == PlaceStatus::Open)
            .filter_map(|p| {
                let sim = trigram_similarity(query_norm, &p.name_norm);
                (sim >= threshold).then(|| candidate_from_place(p, sim, None))
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(cap as usize);
        Ok(hits)
    }

    async fn geo_candidates(
        &self,
        city_id: CityId,
        query_norm: &str,
        lat: f64,
        lon: f64,
        radius_m: f64,
        threshold: f64,
        cap: i64,
    ) -> Result<Vec<MatchCandidate>, RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut hits: Vec<MatchCandidate> = store
            .places
            .iter()
            .filter(|p| p.city_id == city_id && p.status == PlaceStatus::Open)
            .filter_map(|p| {
                let sim = trigram_similarity(query_norm, &p.name_norm);
                let distance = haversine_m(lat, lon, p.lat, p.lon);
                (sim >= threshold && distance <= radius_m)
                    .then(|| candidate_from_place(p, sim, Some(distance)))
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity.total_cmp(&a.similarity).then_with(|| {
                a.distance_m
                    .unwrap_or(f64::MAX)
                    .total_cmp(&b.distance_m.unwrap_or(f64::MAX))
            })
        });
        hits.truncate(cap as usize);
        Ok(hits)
    }
}

#[async_trait]
impl PlaceRepository for FakeRepos {
    async fn upsert(&self, place: NewPlace) -> Result<PlaceId, RepositoryError> {
        let place = place.normalize();
        let name_norm = place.name_norm();
        let mut store = self.store.lock().unwrap();

        if let Some(existing) = store
            .places
            .iter_mut()
            .find(|p| p.city_id == place.city_id && p.name_norm == name_norm)
        {
            existing.name = place.name;
            existing.lat = place.lat;
            existing.lon = place.lon;
            if place.address.is_some() {
                existing.address = place.address;
            }
            if place.brand.is_some() {
                existing.brand = place.brand;
            }
            existing.cuisine = place.cuisine;
            existing.status = place.status;
            existing.source = place.source;
            existing.updated_at = Utc::now();
            return Ok(existing.id);
        }

        let now = Utc::now();
        let id = PlaceId::new();
        store.places.push(Place {
            id,
            city_id: place.city_id,
            osm_id: place.osm_id,
            overture_id: place.overture_id,
            name: place.name,
            name_norm,
            lat: place.lat,
            lon: place.lon,
            address: place.address,
            cuisine: place.cuisine,
            status: place.status,
            brand: place.brand,
            source: place.source,
            aliases: place.aliases,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn upsert_batch(&self, places: Vec<NewPlace>) -> Result<u64, RepositoryError> {
        let mut written = 0;
        for place in places {
            PlaceRepository::upsert(self, place).await?;
            written += 1;
        }
        Ok(written)
    }

    async fn get(&self, id: PlaceId) -> Result<Place, RepositoryError> {
        self.store
            .lock()
            .unwrap()
            .places
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_open_by_name(
        &self,
        city_id: CityId,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Place>, i64), RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut open: Vec<Place> = store
            .places
            .iter()
            .filter(|p| p.city_id == city_id && p.status == PlaceStatus::Open)
            .cloned()
            .collect();
        open.sort_by(|a, b| a.name.cmp(&b.name));
        let total = open.len() as i64;
        let page = open
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn fuzzy_search(
        &self,
        query_norm: &str,
        city_id: Option<CityId>,
        threshold: f64,
        limit: i64,
    ) -> Result<Vec<FuzzyHit>, RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut hits: Vec<FuzzyHit> = store
            .places
            .iter()
            .filter(|p| p.status == PlaceStatus::Open)
            .filter(|p| city_id.is_none_or(|id| p.city_id == id))
            .filter_map(|p| {
                let sim = word_trigram_similarity(query_norm, &p.name_norm);
                if sim < threshold {
                    return None;
                }
                let iconic = store
                    .aggregations
                    .get(&p.id)
                    .map_or(0.0, |a| a.iconic_score);
                let city_name = store
                    .cities
                    .iter()
                    .find(|c| c.id == p.city_id)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                Some(FuzzyHit {
                    place: p.clone(),
                    similarity: sim,
                    iconic_score: iconic,
                    city_name,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.iconic_score.total_cmp(&a.iconic_score))
        });
        hits.truncate(limit as usize);
        Ok(hits)
    }
}

// --- MentionRepository ---

#[async_trait]
impl MentionRepository for FakeRepos {
    async fn insert_batch(&self, mentions: Vec<NewMention>) -> Result<u64, RepositoryError> {
        let mut store = self.store.lock().unwrap();
        let mut inserted = 0;
        for mention in mentions {
            if let Some(place_id) = mention.place_id {
                let duplicate = store.mentions.iter().any(|m| {
                    m.post_id == mention.post_id
                        && m.comment_id == mention.comment_id
                        && m.place_id == Some(place_id)
                });
                if duplicate {
                    continue;
                }
            }
            store.mentions.push(Mention {
                id: MentionId::new(),
                place_id: mention.place_id,
                subreddit: mention.subreddit,
                post_id: mention.post_id,
                comment_id: mention.comment_id,
                score: mention.score,
                posted_at: mention.posted_at,
                permalink: mention.permalink,
                content_hash: mention.content_hash,
                content_length: mention.content_length,
                created_at: Utc::now(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn recent_for_place(
        &self,
        place_id: PlaceId,
        limit: i64,
    ) -> Result<Vec<Mention>, RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut mentions: Vec<Mention> = store
            .mentions
            .iter()
            .filter(|m| m.place_id == Some(place_id))
            .cloned()
            .collect();
        mentions.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        mentions.truncate(limit as usize);
        Ok(mentions)
    }

    async fn matched_for_city(&self, city_id: CityId) -> Result<Vec<Mention>, RepositoryError> {
        let store = self.store.lock().unwrap();
        let place_ids: Vec<PlaceId> = store
            .places
            .iter()
            .filter(|p| p.city_id == city_id)
            .map(|p| p.id)
            .collect();
        Ok(store
            .mentions
            .iter()
            .filter(|m| m.place_id.is_some_and(|id| place_ids.contains(&id)))
            .cloned()
            .collect())
    }

    async fn signals_for_city(
        &self,
        city_id: CityId,
        window_days: i64,
    ) -> Result<Vec<PlaceSignals>, RepositoryError> {
        let mentions = self.matched_for_city(city_id).await?;
        let cutoff = Utc::now() - ChronoDuration::days(window_days);

        let mut by_place: HashMap<PlaceId, Vec<&Mention>> = HashMap::new();
        for mention in &mentions {
            if let Some(place_id) = mention.place_id {
                by_place.entry(place_id).or_default().push(mention);
            }
        }

        let mut signals: Vec<PlaceSignals> = by_place
            .into_iter()
            .map(|(place_id, mentions)| {
                let mut threads: Vec<&str> =
                    mentions.iter().map(|m| m.post_id.as_str()).collect();
                threads.sort_unstable();
                threads.dedup();
                PlaceSignals {
                    place_id,
                    unique_threads: threads.len() as i64,
                    total_mentions: mentions.len() as i64,
                    total_upvotes: mentions.iter().map(|m| i64::from(m.score.max(0))).sum(),
                    mentions_90d: mentions.iter().filter(|m| m.posted_at >= cutoff).count()
                        as i64,
                    last_seen: mentions.iter().map(|m| m.posted_at).max(),
                    recent: mentions
                        .iter()
                        .filter(|m| m.posted_at >= cutoff)
                        .map(|m| MentionSignal {
                            score: m.score,
                            posted_at: m.posted_at,
                        })
                        .collect(),
                }
            })
            .collect();
        signals.sort_by_key(|s| s.place_id);
        Ok(signals)
    }
}

// --- AggregationRepository ---

#[async_trait]
impl AggregationRepository for FakeRepos {
    async fn upsert_batch(
        &self,
        aggregations: Vec<PlaceAggregation>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        for agg in aggregations {
            store.aggregations.insert(agg.place_id, agg);
        }
        Ok(())
    }

    async fn get(&self, place_id: PlaceId) -> Result<Option<PlaceAggregation>, RepositoryError> {
        Ok(self.store.lock().unwrap().aggregations.get(&place_id).cloned())
    }
}

// --- ProjectionRepository ---

#[async_trait]
impl ProjectionRepository for FakeRepos {
    /// Mirrors the real projection definitions: open places joined to their
    /// aggregations, dense rank per city partition, score desc / name asc.
    async fn refresh(&self, view_name: &str) -> Result<(), RepositoryError> {
        let view = PROJECTION_VIEWS
            .iter()
            .find(|known| **known == view_name)
            .copied()
            .ok_or_else(|| RepositoryError::unexpected("unknown view"))?;

        let mut store = self.store.lock().unwrap();

        let mut rows: Vec<RankedRow> = Vec::new();
        let city_ids: Vec<CityId> = store.cities.iter().map(|c| c.id).collect();
        for city_id in city_ids {
            if view == "mv_cuisine_places" {
                let mut per_cuisine: HashMap<String, Vec<RankedRow>> = HashMap::new();
                for place in store
                    .places
                    .iter()
                    .filter(|p| p.city_id == city_id && p.status == PlaceStatus::Open)
                {
                    let Some(agg) = store.aggregations.get(&place.id) else {
                        continue;
                    };
                    if agg.iconic_score <= 0.0 {
                        continue;
                    }
                    for cuisine in &place.cuisine {
                        per_cuisine.entry(cuisine.clone()).or_default().push(
                            ranked_row_from(place, cuisine, agg.iconic_score, agg, 0),
                        );
                    }
                }
                for (_, mut cuisine_rows) in per_cuisine {
                    sort_and_rank(&mut cuisine_rows);
                    rows.append(&mut cuisine_rows);
                }
            } else {
                let mut city_rows: Vec<RankedRow> = store
                    .places
                    .iter()
                    .filter(|p| p.city_id == city_id && p.status == PlaceStatus::Open)
                    .filter_map(|place| {
                        let agg = store.aggregations.get(&place.id)?;
                        let score = if view == "mv_trending_places" {
                            agg.trending_score
                        } else {
                            agg.iconic_score
                        };
                        (score > 0.0).then(|| {
                            let mut row = ranked_row_from(place, "", score, agg, 0);
                            row.cuisine = place.cuisine.clone();
                            row
                        })
                    })
                    .collect();
                sort_and_rank(&mut city_rows);
                rows.append(&mut city_rows);
            }
        }

        store.ranked.insert(view, rows);
        Ok(())
    }

    async fn bump_version(
        &self,
        view_name: &str,
        version_hash: &str,
    ) -> Result<ProjectionVersion, RepositoryError> {
        let mut store = self.store.lock().unwrap();
        let row_count = store
            .ranked
            .get(view_name)
            .map_or(0, |rows| rows.len() as i64);
        let version = ProjectionVersion {
            view_name: view_name.to_string(),
            version_hash: version_hash.to_string(),
            refreshed_at: Utc::now(),
            row_count,
        };
        store
            .versions
            .insert(view_name.to_string(), version.clone());
        Ok(version)
    }

    async fn version(
        &self,
        view_name: &str,
    ) -> Result<Option<ProjectionVersion>, RepositoryError> {
        Ok(self.store.lock().unwrap().versions.get(view_name).cloned())
    }

    async fn versions(&self) -> Result<Vec<ProjectionVersion>, RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut versions: Vec<ProjectionVersion> = store.versions.values().cloned().collect();
        versions.sort_by(|a, b| a.view_name.cmp(&b.view_name));
        Ok(versions)
    }

    async fn ranked_page(
        &self,
        city_id: CityId,
        kind: RankingKind,
        cuisine: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RankedRow>, i64), RepositoryError> {
        let store = self.store.lock().unwrap();
        let rows = store
            .ranked
            .get(kind.view_name())
            .cloned()
            .unwrap_or_default();

        let mut selected: Vec<RankedRow> = rows
            .into_iter()
            .filter(|row| row.city_id == city_id)
            .filter(|row| match (kind, cuisine) {
                (RankingKind::Cuisine, Some(wanted)) => {
                    row.cuisine.first().map(String::as_str) == Some(wanted)
                }
                (_, Some(wanted)) => row.cuisine.iter().any(|c| c == wanted),
                (_, None) => true,
            })
            .collect();
        selected.sort_by_key(|row| row.rank);
        let total = selected.len() as i64;
        let page = selected
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn cuisine_facets(
        &self,
        city_id: CityId,
        limit: i64,
    ) -> Result<Vec<CuisineFacet>, RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut counts: HashMap<String, i64> = HashMap::new();
        if let Some(rows) = store.ranked.get("mv_cuisine_places") {
            for row in rows.iter().filter(|r| r.city_id == city_id) {
                if let Some(cuisine) = row.cuisine.first() {
                    *counts.entry(cuisine.clone()).or_default() += 1;
                }
            }
        }
        let mut facets: Vec<CuisineFacet> = counts
            .into_iter()
            .map(|(cuisine, places)| CuisineFacet { cuisine, places })
            .collect();
        facets.sort_by(|a, b| b.places.cmp(&a.places).then_with(|| a.cuisine.cmp(&b.cuisine)));
        facets.truncate(limit as usize);
        Ok(facets)
    }
}

// --- JobRepository ---

#[async_trait]
impl JobRepository for FakeRepos {
    async fn enqueue(&self, job: NewJob) -> Result<Job, RepositoryError> {
        let payload_hash = job.payload_hash();
        let mut store = self.store.lock().unwrap();

        if let Some(existing) = store.jobs.iter().find(|j| {
            j.job_type == job.job_type
                && NewJob::new(j.job_type, j.payload.clone()).payload_hash() == payload_hash
                && matches!(j.status, JobStatus::Queued | JobStatus::Running)
        }) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let created = Job {
            id: JobId::new(),
            job_type: job.job_type,
            payload: job.payload,
            status: JobStatus::Queued,
            attempts: 0,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        store.jobs.push(created.clone());
        Ok(created)
    }

    async fn claim(&self, types: &[JobType]) -> Result<Option<Job>, RepositoryError> {
        let now = Utc::now();
        let mut store = self.store.lock().unwrap();
        let candidate = store
            .jobs
            .iter_mut()
            .filter(|j| {
                j.status == JobStatus::Queued
                    && j.updated_at <= now
                    && types.contains(&j.job_type)
            })
            .min_by_key(|j| j.created_at);

        Ok(candidate.map(|job| {
            job.status = JobStatus::Running;
            job.started_at = Some(now);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn complete(&self, id: JobId) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        let job = store
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(RepositoryError::NotFound)?;
        job.status = JobStatus::Done;
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn fail(
        &self,
        id: JobId,
        error: &str,
        max_attempts: i32,
        backoff_secs: &[u64],
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        let job = store
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(RepositoryError::NotFound)?;
        job.attempts += 1;
        job.error = Some(error.to_string());
        if job.attempts >= max_attempts {
            job.status = JobStatus::Error;
            job.completed_at = Some(Utc::now());
            job.updated_at = Utc::now();
        } else {
            job.status = JobStatus::Queued;
            job.started_at = None;
            let delay = backoff_delay(job.attempts, backoff_secs);
            job.updated_at = Utc::now()
                + ChronoDuration::seconds(i64::try_from(delay.as_secs()).unwrap_or(60));
        }
        Ok(())
    }

    async fn sweep_stalled(&self, older_than: std::time::Duration) -> Result<u64, RepositoryError> {
        let cutoff =
            Utc::now() - ChronoDuration::seconds(i64::try_from(older_than.as_secs()).unwrap_or(0));
        let mut store = self.store.lock().unwrap();
        let mut swept = 0;
        for job in store.jobs.iter_mut() {
            if job.status == JobStatus::Running && job.started_at.is_some_and(|s| s < cutoff) {
                job.status = JobStatus::Queued;
                job.started_at = None;
                job.updated_at = Utc::now();
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn counts_since(&self, since: DateTime<Utc>) -> Result<JobCounts, RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut counts = JobCounts::default();
        for job in store.jobs.iter().filter(|j| j.updated_at >= since) {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Done => counts.done += 1,
                JobStatus::Error => counts.error += 1,
            }
        }
        Ok(counts)
    }

    async fn purge_terminal(
        &self,
        older_than: std::time::Duration,
    ) -> Result<u64, RepositoryError> {
        let cutoff =
            Utc::now() - ChronoDuration::seconds(i64::try_from(older_than.as_secs()).unwrap_or(0));
        let mut store = self.store.lock().unwrap();
        let before = store.jobs.len();
        store.jobs.retain(|j| {
            !(matches!(j.status, JobStatus::Done | JobStatus::Error) && j.updated_at < cutoff)
        });
        Ok((before - store.jobs.len()) as u64)
    }
}

// --- SourceRepository ---

#[async_trait]
impl SourceRepository for FakeRepos {
    async fn upsert(&self, source: NewSource) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        if let Some(existing) = store.sources.iter_mut().find(|s| s.name == source.name) {
            existing.city_id = source.city_id;
            existing.is_active = true;
        } else {
            store.sources.push(Source {
                name: source.name,
                city_id: source.city_id,
                is_active: true,
                last_sync: None,
                total_posts: 0,
            });
        }
        Ok(())
    }

    async fn active_for_city(&self, city_id: CityId) -> Result<Vec<Source>, RepositoryError> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .sources
            .iter()
            .filter(|s| s.city_id == city_id && s.is_active)
            .cloned()
            .collect())
    }

    async fn mark_synced(&self, name: &str, new_posts: i64) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        if let Some(source) = store.sources.iter_mut().find(|s| s.name == name) {
            source.last_sync = Some(Utc::now());
            source.total_posts += new_posts;
        }
        Ok(())
    }
}

#[async_trait]
impl HealthProbe for FakeRepos {
    async fn ping(&self) -> Result<(), RepositoryError> {
        if self.store.lock().unwrap().db_healthy {
            Ok(())
        } else {
            Err(RepositoryError::unexpected("database unreachable"))
        }
    }
}

fn candidate_from_place(place: &Place, sim: f64, distance_m: Option<f64>) -> MatchCandidate {
    MatchCandidate {
        place_id: place.id,
        name_norm: place.name_norm.clone(),
        brand: place.brand.clone(),
        address: place.address.clone(),
        similarity: sim,
        distance_m,
    }
}

fn ranked_row_from(
    place: &Place,
    cuisine: &str,
    score: f64,
    agg: &PlaceAggregation,
    rank: i64,
) -> RankedRow {
    RankedRow {
        place_id: place.id,
        city_id: place.city_id,
        name: place.name.clone(),
        cuisine: if cuisine.is_empty() {
            vec![]
        } else {
            vec![cuisine.to_string()]
        },
        address: place.address.clone(),
        lat: place.lat,
        lon: place.lon,
        score,
        rank,
        unique_threads: agg.unique_threads,
        total_mentions: agg.total_mentions,
        last_seen: agg.last_seen,
        top_snippets: agg.top_snippets.clone(),
    }
}

fn sort_and_rank(rows: &mut [RankedRow]) {
    rows.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.name.cmp(&b.name))
    });
    for (index, row) in rows.iter_mut().enumerate() {
        row.rank = (index + 1) as i64;
    }
}

fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const R: f64 = 6_371_000.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    R * 2.0 * a.sqrt().asin()
}

// --- Test app ---

pub struct TestApp {
    pub address: String,
    pub store: SharedStore,
    pub repos: FakeRepos,
    pub mock_server: Option<wiremock::MockServer>,
    server_handle: AbortHandle,
}

impl TestApp {
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/v2{}", self.address, path)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(AppConfig::default(), None).await
}

pub async fn spawn_app_with_config(config: AppConfig) -> TestApp {
    spawn_app_with(config, None).await
}

/// Spawns the app with the geocoder and POI provider pointed at a wiremock
/// server, for bootstrap tests.
pub async fn spawn_app_with_upstream_mocks(config: AppConfig) -> TestApp {
    let mock_server = wiremock::MockServer::start().await;
    spawn_app_with(config, Some(mock_server)).await
}

async fn spawn_app_with(config: AppConfig, mock_server: Option<wiremock::MockServer>) -> TestApp {
    let store = new_store();
    let repos = FakeRepos {
        store: Arc::clone(&store),
    };

    let config = Arc::new(config);
    let (geocoder_url, overpass_url) = match &mock_server {
        Some(server) => (
            format!("{}/geocode", server.uri()),
            format!("{}/overpass", server.uri()),
        ),
        None => (
            "http://127.0.0.1:9/geocode".to_string(),
            "http://127.0.0.1:9/overpass".to_string(),
        ),
    };

    let bootstrap_service = Arc::new(BootstrapService::new(
        Arc::clone(&config),
        reqwest::Client::new(),
        geocoder_url,
        overpass_url,
        Arc::new(repos.clone()),
        Arc::new(repos.clone()),
        Arc::new(repos.clone()),
        Arc::new(repos.clone()),
    ));

    let state = AppState {
        city_repo: Arc::new(repos.clone()),
        place_repo: Arc::new(repos.clone()),
        mention_repo: Arc::new(repos.clone()),
        aggregation_repo: Arc::new(repos.clone()),
        projection_repo: Arc::new(repos.clone()),
        job_repo: Arc::new(repos.clone()),
        source_repo: Arc::new(repos.clone()),
        health_probe: Arc::new(repos.clone()),
        config: Arc::clone(&config),
        limiter: Arc::new(SlidingWindowLimiter::new(config.rate_limits.clone())),
        bootstrap_service,
        started_at: Instant::now(),
    };

    let app = app_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let local_addr = listener.local_addr().expect("Failed to get local address");
    let address = format!("http://{local_addr}");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("Server failed to start");
    })
    .abort_handle();

    TestApp {
        address,
        store,
        repos,
        mock_server,
        server_handle,
    }
}

// --- Fixtures ---

pub fn nyc_bbox() -> BoundingBox {
    BoundingBox {
        south: 40.4774,
        west: -74.2591,
        north: 40.9176,
        east: -73.7004,
    }
}

pub async fn seed_city(app: &TestApp, name: &str, country: &str, aliases: &[&str]) -> City {
    let city = CityRepository::upsert(
        &app.repos,
        NewCity {
            name: name.to_string(),
            country: country.to_string(),
            lat: 40.7128,
            lon: -74.006,
            bbox: nyc_bbox(),
        },
    )
    .await
    .expect("seed city");

    let aliases: Vec<NewCityAlias> = aliases.iter().map(|a| NewCityAlias::city_level(a)).collect();
    CityRepository::upsert_aliases(&app.repos, city.id, &aliases)
        .await
        .expect("seed aliases");
    city
}

pub async fn seed_place(
    app: &TestApp,
    city_id: CityId,
    name: &str,
    cuisine: &[&str],
) -> PlaceId {
    PlaceRepository::upsert(
        &app.repos,
        NewPlace {
            city_id,
            osm_id: Some(format!("node/{}", Uuid::new_v4().as_u128() % 1_000_000)),
            overture_id: None,
            name: name.to_string(),
            lat: 40.72,
            lon: -73.99,
            address: None,
            cuisine: cuisine.iter().map(|c| (*c).to_string()).collect(),
            status: PlaceStatus::Open,
            brand: None,
            source: chowrank::domain::places::PlaceSource::Osm,
            aliases: vec![],
        },
    )
    .await
    .expect("seed place")
}

/// Stamps an aggregation directly so ranked reads have data without running
/// the whole pipeline.
pub async fn seed_aggregation(app: &TestApp, place_id: PlaceId, iconic: f64, trending: f64) {
    AggregationRepository::upsert_batch(
        &app.repos,
        vec![PlaceAggregation {
            place_id,
            iconic_score: iconic,
            trending_score: trending,
            unique_threads: 5,
            total_mentions: 12,
            total_upvotes: 340,
            mentions_90d: 6,
            last_seen: Some(Utc::now()),
            top_snippets: vec![],
            computed_at: Utc::now(),
        }],
    )
    .await
    .expect("seed aggregation");
}

/// Refreshes all projections and marks the city ranked, mirroring what the
/// ingest/aggregate/refresh chain does in production.
pub async fn mark_ranked_and_refresh(app: &TestApp, city_id: CityId) {
    CityRepository::set_ranked(&app.repos, city_id, true)
        .await
        .expect("set ranked");
    CityRepository::touch_refreshed(&app.repos, city_id)
        .await
        .expect("touch refreshed");
    for view in PROJECTION_VIEWS {
        ProjectionRepository::refresh(&app.repos, view)
            .await
            .expect("refresh");
        ProjectionRepository::bump_version(&app.repos, view, &format!("v-test-{view}"))
            .await
            .expect("bump version");
    }
}
