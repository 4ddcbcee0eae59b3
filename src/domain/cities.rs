use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::CityId;

/// Axis-aligned bounding box in WGS84 degrees. The storage layer expands it
/// into a polygon; everything above the repository works with the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.south..=self.north).contains(&lat) && (self.west..=self.east).contains(&lon)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub id: CityId,
    pub name: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub bbox: BoundingBox,
    pub ranked: bool,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCity {
    pub name: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub bbox: BoundingBox,
}

impl NewCity {
    pub fn normalize(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.country = self.country.trim().to_string();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCityAlias {
    pub alias: String,
    pub is_borough: bool,
}

impl NewCityAlias {
    pub fn city_level(alias: &str) -> Self {
        Self {
            alias: alias.trim().to_lowercase(),
            is_borough: false,
        }
    }

    pub fn borough(alias: &str) -> Self {
        Self {
            alias: alias.trim().to_lowercase(),
            is_borough: true,
        }
    }
}

/// Per-city counters surfaced by the cities listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityStats {
    pub places: i64,
    pub mentions: i64,
    pub last_refreshed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityWithStats {
    pub city: City,
    pub stats: CityStats,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CityCounts {
    pub total: i64,
    pub ranked: i64,
}
