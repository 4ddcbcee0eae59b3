use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::domain::matching::MatchParams;
use crate::domain::scoring::ScoringParams;

/// Everything tunable in one structured file. Every section has defaults so a
/// missing file still boots a working (if city-less) service; a malformed
/// file fails startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(rename = "match")]
    pub matching: MatchParams,
    pub scoring: ScoringParams,
    pub pagination: PaginationConfig,
    pub jobs: JobsConfig,
    pub ingest: IngestConfig,
    pub bootstrap: BootstrapConfig,
    pub rate_limits: RateLimitsConfig,
    pub cities: Vec<CityEntry>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Loads the file when present, otherwise falls back to defaults. Parse
    /// errors are never swallowed.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Case-folded lookup in the city catalog over names and aliases,
    /// boroughs included.
    pub fn find_city(&self, query: &str) -> Option<&CityEntry> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.cities.iter().find(|entry| {
            entry.name.to_lowercase() == needle
                || entry.aliases.iter().any(|a| a.to_lowercase() == needle)
                || entry.boroughs.iter().any(|b| {
                    b.name.to_lowercase() == needle
                        || b.aliases.iter().any(|a| a.to_lowercase() == needle)
                })
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_limit: i64,
    pub max_limit: i64,
    pub fuzzy_max_limit: i64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 100,
            fuzzy_max_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub max_attempts: i32,
    pub backoff_secs: Vec<u64>,
    pub poll_interval_secs: u64,
    pub drain_secs: u64,
    /// `running` jobs older than this are swept back to `queued`.
    pub stalled_secs: u64,
    /// Terminal rows older than this are purged.
    pub retention_days: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::domain::jobs::DEFAULT_MAX_ATTEMPTS,
            backoff_secs: crate::domain::jobs::DEFAULT_BACKOFF_SECS.to_vec(),
            poll_interval_secs: 5,
            drain_secs: 30,
            stalled_secs: 900,
            retention_days: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub posts_per_source: u32,
    pub comments_per_post: u32,
    /// Persist mentions the matcher could not place (place_id null) for
    /// audit. Off by default.
    pub keep_unmatched: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            posts_per_source: 25,
            comments_per_post: 100,
            keep_unmatched: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub max_pois: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self { max_pois: 10_000 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitPreset {
    pub limit: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub strict: RateLimitPreset,
    pub standard: RateLimitPreset,
    pub generous: RateLimitPreset,
    pub burst: RateLimitPreset,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            strict: RateLimitPreset {
                limit: 10,
                window_secs: 60,
            },
            standard: RateLimitPreset {
                limit: 100,
                window_secs: 60,
            },
            generous: RateLimitPreset {
                limit: 300,
                window_secs: 60,
            },
            burst: RateLimitPreset {
                limit: 30,
                window_secs: 10,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CityEntry {
    pub id: String,
    pub name: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    /// [south, west, north, east]
    pub bbox: [f64; 4],
    pub aliases: Vec<String>,
    pub boroughs: Vec<BoroughEntry>,
    pub subreddits: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoroughEntry {
    pub name: String,
    pub aliases: Vec<String>,
}

// --- Secrets ---

/// Secrets come from the process environment. Validation accumulates every
/// problem so a misconfigured deploy reports the full list at once.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub database_url: String,
    pub reddit_client_id: Option<String>,
    pub reddit_client_secret: Option<String>,
}

impl Secrets {
    /// Read API: only the database is required.
    pub fn for_server() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok(), false)
    }

    /// Worker: the discussion API credentials are required too.
    pub fn for_worker() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok(), true)
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        require_reddit: bool,
    ) -> anyhow::Result<Self> {
        let mut problems: Vec<String> = Vec::new();

        let database_url = match lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            Some(value) if value.starts_with("postgres://") || value.starts_with("postgresql://") => {
                Some(value)
            }
            Some(_) => {
                problems.push(
                    "DATABASE_URL must be a postgres:// or postgresql:// URL".to_string(),
                );
                None
            }
            None => {
                problems.push("DATABASE_URL is required".to_string());
                None
            }
        };

        let reddit_client_id =
            lookup("CHOWRANK_REDDIT_CLIENT_ID").filter(|v| !v.trim().is_empty());
        let reddit_client_secret =
            lookup("CHOWRANK_REDDIT_CLIENT_SECRET").filter(|v| !v.trim().is_empty());

        if require_reddit {
            if reddit_client_id.is_none() {
                problems.push("CHOWRANK_REDDIT_CLIENT_ID is required for the worker".to_string());
            }
            if reddit_client_secret.is_none() {
                problems
                    .push("CHOWRANK_REDDIT_CLIENT_SECRET is required for the worker".to_string());
            }
        }

        match database_url {
            Some(database_url) if problems.is_empty() => Ok(Self {
                database_url,
                reddit_client_id,
                reddit_client_secret,
            }),
            _ => anyhow::bail!("invalid environment: {}", problems.join("; ")),
        }
    }
}
