use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::RepositoryError;
use crate::domain::ids::{CityId, PlaceId};
use crate::domain::places::normalize_name;

/// Matcher thresholds; overridden from the config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Minimum trigram similarity for a direct match.
    pub trigram_threshold: f64,
    /// Relaxed similarity floor when a query point restricts the radius.
    pub geo_threshold: f64,
    /// Geo-assist search radius, in meters.
    pub geo_radius_m: f64,
    /// Candidate list cap per stage.
    pub candidate_cap: i64,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            trigram_threshold: 0.55,
            geo_threshold: 0.50,
            geo_radius_m: 2000.0,
            candidate_cap: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchQuery {
    pub city_id: CityId,
    pub text: String,
    pub point: Option<(f64, f64)>,
    pub address_hint: Option<String>,
}

impl MatchQuery {
    pub fn for_text(city_id: CityId, text: &str) -> Self {
        Self {
            city_id,
            text: text.to_string(),
            point: None,
            address_hint: None,
        }
    }
}

/// One row surfaced by a candidate query, with enough context for the
/// disambiguation stages.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub place_id: PlaceId,
    pub name_norm: String,
    pub brand: Option<String>,
    pub address: Option<String>,
    pub similarity: f64,
    pub distance_m: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStage {
    AliasExact,
    Trigram,
    GeoAssist,
}

impl MatchStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            MatchStage::AliasExact => "alias_exact",
            MatchStage::Trigram => "trigram",
            MatchStage::GeoAssist => "geo_assist",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub place_id: PlaceId,
    pub stage: MatchStage,
    pub similarity: f64,
}

/// Read-only candidate queries the matcher runs against storage. Implemented
/// by the place repository; stubbed in tests.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Exact match on `name_norm` or any stored alias, open places only.
    async fn alias_exact(
        &self,
        city_id: CityId,
        query_norm: &str,
    ) -> Result<Option<MatchCandidate>, RepositoryError>;

    /// Candidates above the similarity threshold, ordered similarity desc.
    async fn trigram_candidates(
        &self,
        city_id: CityId,
        query_norm: &str,
        threshold: f64,
        cap: i64,
    ) -> Result<Vec<MatchCandidate>, RepositoryError>;

    /// Candidates within `radius_m` of the point and above the relaxed
    /// threshold, ordered similarity desc then distance asc.
    #[allow(clippy::too_many_arguments)]
    async fn geo_candidates(
        &self,
        city_id: CityId,
        query_norm: &str,
        lat: f64,
        lon: f64,
        radius_m: f64,
        threshold: f64,
        cap: i64,
    ) -> Result<Vec<MatchCandidate>, RepositoryError>;
}

pub struct MatchEngine {
    params: MatchParams,
}

impl MatchEngine {
    pub fn new(params: MatchParams) -> Self {
        Self { params }
    }

    /// Resolves a candidate mention to at most one place. Stages run in
    /// order; the first stage that yields candidates settles the outcome —
    /// the address check reorders within a stage but never reopens the next.
    pub async fn resolve<S>(
        &self,
        store: &S,
        query: &MatchQuery,
    ) -> Result<Option<MatchOutcome>, RepositoryError>
    where
        S: MatchStore + ?Sized,
    {
        let q = normalize_name(&query.text);
        if q.len() <= 2 {
            return Ok(None);
        }

        if let Some(hit) = store.alias_exact(query.city_id, &q).await? {
            return Ok(Some(MatchOutcome {
                place_id: hit.place_id,
                stage: MatchStage::AliasExact,
                similarity: 1.0,
            }));
        }

        let candidates = store
            .trigram_candidates(
                query.city_id,
                &q,
                self.params.trigram_threshold,
                self.params.candidate_cap,
            )
            .await?;
        if !candidates.is_empty() {
            return Ok(Self::settle(candidates, query, MatchStage::Trigram));
        }

        if let Some((lat, lon)) = query.point {
            let candidates = store
                .geo_candidates(
                    query.city_id,
                    &q,
                    lat,
                    lon,
                    self.params.geo_radius_m,
                    self.params.geo_threshold,
                    self.params.candidate_cap,
                )
                .await?;
            if !candidates.is_empty() {
                return Ok(Self::settle(candidates, query, MatchStage::GeoAssist));
            }
        }

        Ok(None)
    }

    fn settle(
        candidates: Vec<MatchCandidate>,
        query: &MatchQuery,
        stage: MatchStage,
    ) -> Option<MatchOutcome> {
        let ordered = disambiguate(candidates, query.point.is_some());
        let chosen = pick_with_address(&ordered, query.address_hint.as_deref())?;
        Some(MatchOutcome {
            place_id: chosen.place_id,
            stage,
            similarity: chosen.similarity,
        })
    }
}

/// Brand disambiguation over a multi-candidate list. With a query point and
/// at least one branded candidate, the nearest wins; otherwise similarity
/// decides, preferring single-location (null-brand) entries on ties.
fn disambiguate(mut candidates: Vec<MatchCandidate>, has_point: bool) -> Vec<MatchCandidate> {
    if candidates.len() < 2 {
        return candidates;
    }

    let any_branded = candidates.iter().any(|c| c.brand.is_some());
    if any_branded && has_point {
        candidates.sort_by(|a, b| {
            let da = a.distance_m.unwrap_or(f64::MAX);
            let db = b.distance_m.unwrap_or(f64::MAX);
            da.total_cmp(&db)
        });
    } else {
        candidates.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.brand.is_some().cmp(&b.brand.is_some()))
        });
    }
    candidates
}

/// Address consistency is a tie-breaker, never a hard filter: a candidate
/// whose address contradicts the hint is skipped in favor of the next one in
/// this stage's list. If every candidate is vetoed the stage yields nothing.
fn pick_with_address<'a>(
    ordered: &'a [MatchCandidate],
    hint: Option<&str>,
) -> Option<&'a MatchCandidate> {
    let Some(hint) = hint.map(normalize_name).filter(|h| !h.is_empty()) else {
        return ordered.first();
    };

    ordered.iter().find(|candidate| {
        candidate
            .address
            .as_deref()
            .map(normalize_name)
            .is_none_or(|addr| addr.contains(&hint) || hint.contains(&addr))
    })
}

/// Set-based trigram similarity over space-padded words, matching the shape
/// of the index-backed SQL path closely enough for fakes and tests.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() && tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    shared as f64 / union as f64
}

/// Greatest similarity between the query and the whole target or any of its
/// words, mirroring pg_trgm's `word_similarity` closely enough for fakes. A
/// one-word query scoring against a long name keeps its word-level hit.
pub fn word_trigram_similarity(query: &str, target: &str) -> f64 {
    let whole = trigram_similarity(query, target);
    normalize_name(target)
        .split_whitespace()
        .map(|word| trigram_similarity(query, word))
        .fold(whole, f64::max)
}

fn trigrams(raw: &str) -> BTreeSet<String> {
    let norm = normalize_name(raw);
    let mut set = BTreeSet::new();
    for word in norm.split_whitespace() {
        let padded: Vec<char> = format!("  {word} ").chars().collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }
    set
}
