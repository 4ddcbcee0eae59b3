use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::aggregations::TopSnippet;
use crate::domain::ids::{CityId, PlaceId};

/// The three served rankings. View names are a closed whitelist: they are
/// interpolated into refresh statements and must never come from input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingKind {
    Iconic,
    Trending,
    Cuisine,
}

impl RankingKind {
    pub fn from_query(value: &str) -> Option<Self> {
        match value {
            "iconic" => Some(RankingKind::Iconic),
            "trending" => Some(RankingKind::Trending),
            "cuisine" => Some(RankingKind::Cuisine),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RankingKind::Iconic => "iconic",
            RankingKind::Trending => "trending",
            RankingKind::Cuisine => "cuisine",
        }
    }

    pub const fn view_name(self) -> &'static str {
        match self {
            RankingKind::Iconic => "mv_iconic_places",
            RankingKind::Trending => "mv_trending_places",
            RankingKind::Cuisine => "mv_cuisine_places",
        }
    }

    pub const fn rank_source(self) -> &'static str {
        match self {
            RankingKind::Iconic => "mv_iconic",
            RankingKind::Trending => "mv_trending",
            RankingKind::Cuisine => "mv_cuisine",
        }
    }
}

pub const PROJECTION_VIEWS: [&str; 3] =
    ["mv_iconic_places", "mv_trending_places", "mv_cuisine_places"];

/// One pre-ranked row as read from a projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedRow {
    pub place_id: PlaceId,
    pub city_id: CityId,
    pub name: String,
    pub cuisine: Vec<String>,
    pub address: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub score: f64,
    pub rank: i64,
    pub unique_threads: i64,
    pub total_mentions: i64,
    pub last_seen: Option<DateTime<Utc>>,
    pub top_snippets: Vec<TopSnippet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionVersion {
    pub view_name: String,
    pub version_hash: String,
    pub refreshed_at: DateTime<Utc>,
    pub row_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuisineFacet {
    pub cuisine: String,
    pub places: i64,
}
