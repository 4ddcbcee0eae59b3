use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::{CityId, PlaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceStatus {
    Open,
    Closed,
    Unverified,
}

impl PlaceStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            PlaceStatus::Open => "open",
            PlaceStatus::Closed => "closed",
            PlaceStatus::Unverified => "unverified",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(PlaceStatus::Open),
            "closed" => Some(PlaceStatus::Closed),
            "unverified" => Some(PlaceStatus::Unverified),
            _ => None,
        }
    }
}

/// Where a place row originally came from. Source-specific native ids are
/// nullable columns; the storage layer treats all three uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceSource {
    Overture,
    Osm,
    Bootstrap,
}

impl PlaceSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            PlaceSource::Overture => "overture",
            PlaceSource::Osm => "osm",
            PlaceSource::Bootstrap => "bootstrap",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "overture" => Some(PlaceSource::Overture),
            "osm" => Some(PlaceSource::Osm),
            "bootstrap" => Some(PlaceSource::Bootstrap),
            _ => None,
        }
    }
}

/// Canonical name form shared by storage and the matcher: lowercase, every
/// non-alphanumeric run becomes a single space, trimmed. Idempotent.
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            pending_space = true;
        }
    }

    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Place {
    pub id: PlaceId,
    pub city_id: CityId,
    pub osm_id: Option<String>,
    pub overture_id: Option<String>,
    pub name: String,
    pub name_norm: String,
    pub lat: f64,
    pub lon: f64,
    pub address: Option<String>,
    pub cuisine: Vec<String>,
    pub status: PlaceStatus,
    pub brand: Option<String>,
    pub source: PlaceSource,
    pub aliases: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlace {
    pub city_id: CityId,
    pub osm_id: Option<String>,
    pub overture_id: Option<String>,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub address: Option<String>,
    pub cuisine: Vec<String>,
    pub status: PlaceStatus,
    pub brand: Option<String>,
    pub source: PlaceSource,
    pub aliases: Vec<String>,
}

impl NewPlace {
    pub fn name_norm(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn normalize(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.address = self
            .address
            .and_then(|a| {
                let trimmed = a.trim().to_string();
                if trimmed.is_empty() { None } else { Some(trimmed) }
            });
        self.cuisine = self
            .cuisine
            .into_iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        self.cuisine.sort();
        self.cuisine.dedup();
        self
    }
}
