use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::application::config::{AppConfig, CityEntry};
use crate::application::errors::{AppError, AppResult};
use crate::domain::cities::{BoundingBox, City, NewCity, NewCityAlias};
use crate::domain::jobs::{JobType, NewJob};
use crate::domain::places::{NewPlace, PlaceSource, PlaceStatus};
use crate::domain::repositories::{CityRepository, JobRepository, PlaceRepository, SourceRepository};
use crate::domain::sources::NewSource;
use crate::infrastructure::{geocoder, overpass};

#[derive(Debug, Serialize)]
pub struct BootstrapOutcome {
    pub city: City,
    pub places_loaded: u64,
    pub jobs_enqueued: usize,
}

/// City bootstrap: resolve, fetch POIs, upsert everything, seed sources,
/// enqueue the ingest chain. Safe to re-run — every write is an upsert and
/// enqueueing is idempotent per payload.
pub struct BootstrapService {
    config: Arc<AppConfig>,
    http_client: reqwest::Client,
    geocoder_url: String,
    overpass_url: String,
    city_repo: Arc<dyn CityRepository>,
    place_repo: Arc<dyn PlaceRepository>,
    source_repo: Arc<dyn SourceRepository>,
    job_repo: Arc<dyn JobRepository>,
}

impl BootstrapService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AppConfig>,
        http_client: reqwest::Client,
        geocoder_url: String,
        overpass_url: String,
        city_repo: Arc<dyn CityRepository>,
        place_repo: Arc<dyn PlaceRepository>,
        source_repo: Arc<dyn SourceRepository>,
        job_repo: Arc<dyn JobRepository>,
    ) -> Self {
        Self {
            config,
            http_client,
            geocoder_url,
            overpass_url,
            city_repo,
            place_repo,
            source_repo,
            job_repo,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self, city_query: &str) -> AppResult<BootstrapOutcome> {
        let catalog_entry = self.config.find_city(city_query);
        let (new_city, entry) = match catalog_entry {
            Some(entry) => (Self::city_from_entry(entry), Some(entry)),
            None => {
                let geocoded =
                    geocoder::resolve_city(&self.http_client, &self.geocoder_url, city_query)
                        .await?
                        .ok_or_else(|| AppError::city_not_found(city_query))?;
                (
                    NewCity {
                        name: geocoded.name,
                        country: geocoded.country,
                        lat: geocoded.lat,
                        lon: geocoded.lon,
                        bbox: geocoded.bbox,
                    },
                    None,
                )
            }
        };

        let pois = overpass::fetch_pois(
            &self.http_client,
            &self.overpass_url,
            &new_city.bbox,
            self.config.bootstrap.max_pois,
        )
        .await?;

        let city = self.city_repo.upsert(new_city).await?;

        let aliases = Self::aliases_for(&city, entry, city_query);
        self.city_repo.upsert_aliases(city.id, &aliases).await?;

        let places: Vec<NewPlace> = pois
            .into_iter()
            .map(|poi| NewPlace {
                city_id: city.id,
                osm_id: Some(poi.osm_id),
                overture_id: None,
                name: poi.name,
                lat: poi.lat,
                lon: poi.lon,
                address: poi.address,
                cuisine: poi.cuisine,
                status: PlaceStatus::Open,
                brand: poi.brand,
                source: PlaceSource::Osm,
                aliases: vec![],
            })
            .collect();
        let places_loaded = self.place_repo.upsert_batch(places).await?;

        if let Some(entry) = entry {
            for subreddit in &entry.subreddits {
                self.source_repo
                    .upsert(NewSource::new(subreddit, city.id))
                    .await?;
            }
        }

        let chain = [
            NewJob::new(JobType::IngestReddit, json!({ "city_id": city.id })),
            NewJob::new(JobType::ComputeAggregations, json!({ "city_id": city.id })),
            NewJob::new(JobType::RefreshMvs, json!({})),
        ];
        let jobs_enqueued = chain.len();
        for job in chain {
            self.job_repo.enqueue(job).await?;
        }

        info!(
            city_id = %city.id,
            name = %city.name,
            places_loaded,
            "city bootstrap complete"
        );

        Ok(BootstrapOutcome {
            city,
            places_loaded,
            jobs_enqueued,
        })
    }

    fn city_from_entry(entry: &CityEntry) -> NewCity {
        NewCity {
            name: entry.name.clone(),
            country: entry.country.clone(),
            lat: entry.lat,
            lon: entry.lon,
            bbox: BoundingBox {
                south: entry.bbox[0],
                west: entry.bbox[1],
                north: entry.bbox[2],
                east: entry.bbox[3],
            },
        }
    }

    fn aliases_for(city: &City, entry: Option<&CityEntry>, query: &str) -> Vec<NewCityAlias> {
        let mut aliases = Vec::new();

        let query_norm = query.trim().to_lowercase();
        if !query_norm.is_empty() && query_norm != city.name.to_lowercase() {
            aliases.push(NewCityAlias::city_level(&query_norm));
        }

        if let Some(entry) = entry {
            for alias in &entry.aliases {
                aliases.push(NewCityAlias::city_level(alias));
            }
            for borough in &entry.boroughs {
                aliases.push(NewCityAlias::borough(&borough.name));
                for alias in &borough.aliases {
                    aliases.push(NewCityAlias::borough(alias));
                }
            }
        }

        aliases
    }
}
