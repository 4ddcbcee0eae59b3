use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::PlaceId;

/// Tunable scoring knobs. Defaults mirror the served rankings; overrides come
/// from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    /// Weight per unique thread in the iconic raw score.
    pub alpha: f64,
    /// Weight per mention in the iconic raw score.
    pub beta: f64,
    /// Bayesian prior sample size added to unique_threads.
    pub prior_n: f64,
    /// Trending half-life, in days.
    pub half_life_days: f64,
    /// Recency multiplier for mentions younger than a day.
    pub day_multiplier: f64,
    /// Recency multiplier for mentions younger than a week.
    pub week_multiplier: f64,
    /// Additive boost per upvote (negative scores contribute nothing).
    pub upvote_boost: f64,
    /// Iconic score is gated to 0 below this many total mentions.
    pub min_mentions_iconic: i64,
    /// Trending score is gated to 0 below this many 90-day mentions.
    pub min_mentions_trending: i64,
    /// Wilson confidence parameter.
    pub z: f64,
    /// Trending window, in days.
    pub window_days: i64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            alpha: 8.0,
            beta: 2.0,
            prior_n: 10.0,
            half_life_days: 14.0,
            day_multiplier: 2.0,
            week_multiplier: 1.5,
            upvote_boost: 0.02,
            min_mentions_iconic: 3,
            min_mentions_trending: 2,
            z: 1.96,
            window_days: 90,
        }
    }
}

/// Per-mention inputs for the trending window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MentionSignal {
    pub score: i32,
    pub posted_at: DateTime<Utc>,
}

/// Everything the scorer needs for one place, aggregated from its mentions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceSignals {
    pub place_id: PlaceId,
    pub unique_threads: i64,
    pub total_mentions: i64,
    pub total_upvotes: i64,
    pub mentions_90d: i64,
    pub last_seen: Option<DateTime<Utc>>,
    pub recent: Vec<MentionSignal>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaceScores {
    pub place_id: PlaceId,
    pub iconic: f64,
    pub trending: f64,
}

/// All-time consensus signal before normalization.
pub fn iconic_raw(params: &ScoringParams, signals: &PlaceSignals) -> f64 {
    let numerator = signals.unique_threads as f64 * params.alpha
        + signals.total_mentions as f64 * params.beta
        + signals.total_upvotes as f64;
    let denominator = (signals.unique_threads as f64 + params.prior_n).max(1.0);
    numerator / denominator
}

/// Momentum signal: decay-weighted sum over the trailing window.
pub fn trending_raw(params: &ScoringParams, now: DateTime<Utc>, signals: &PlaceSignals) -> f64 {
    let ln2 = std::f64::consts::LN_2;
    signals
        .recent
        .iter()
        .filter(|m| m.posted_at <= now)
        .map(|m| {
            let age_days = (now - m.posted_at).num_seconds() as f64 / 86_400.0;
            if age_days > params.window_days as f64 {
                return 0.0;
            }
            let decay = (-ln2 * age_days / params.half_life_days).exp();
            let recency_mult = if age_days < 1.0 {
                params.day_multiplier
            } else if age_days < 7.0 {
                params.week_multiplier
            } else {
                1.0
            };
            let upvote = 1.0 + f64::from(m.score.max(0)) * params.upvote_boost;
            decay * recency_mult * upvote
        })
        .sum()
}

/// Lower endpoint of the Wilson score interval, clamped to [0, 1]. A more
/// conservative ranking signal than the raw proportion: low-sample places are
/// pulled towards zero.
pub fn wilson_lower_bound(p: f64, n: f64, z: f64) -> f64 {
    if n <= 0.0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    let z2 = z * z;
    let center = p + z2 / (2.0 * n);
    let spread = z * ((p * (1.0 - p) + z2 / (4.0 * n)) / n).sqrt();
    ((center - spread) / (1.0 + z2 / n)).clamp(0.0, 1.0)
}

/// Scores one city batch. Normalization divides by the batch maximum, so both
/// scores are deterministic for a fixed mention set and batch boundary.
pub fn score_batch(
    params: &ScoringParams,
    now: DateTime<Utc>,
    batch: &[PlaceSignals],
) -> Vec<PlaceScores> {
    let iconic_raws: Vec<f64> = batch.iter().map(|s| iconic_raw(params, s)).collect();
    let trending_raws: Vec<f64> = batch
        .iter()
        .map(|s| trending_raw(params, now, s))
        .collect();

    let iconic_max = iconic_raws.iter().copied().fold(0.0_f64, f64::max);
    let trending_max = trending_raws.iter().copied().fold(0.0_f64, f64::max);

    batch
        .iter()
        .enumerate()
        .map(|(i, signals)| {
            let iconic = if signals.total_mentions < params.min_mentions_iconic
                || iconic_max <= 0.0
            {
                0.0
            } else {
                let p = iconic_raws[i] / iconic_max;
                let n = signals.unique_threads as f64 + params.prior_n;
                wilson_lower_bound(p, n, params.z) * 100.0
            };

            let trending = if signals.mentions_90d < params.min_mentions_trending
                || trending_max <= 0.0
            {
                0.0
            } else {
                let p = trending_raws[i] / trending_max;
                let n = signals.mentions_90d as f64;
                wilson_lower_bound(p, n, params.z) * 100.0
            };

            PlaceScores {
                place_id: signals.place_id,
                iconic,
                trending,
            }
        })
        .collect()
}
