use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::CityId;

/// A discussion board mined for one city. Seeded at bootstrap from the city
/// catalog; `last_sync` and `total_posts` advance with each ingest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub city_id: CityId,
    pub is_active: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub total_posts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub name: String,
    pub city_id: CityId,
}

impl NewSource {
    pub fn new(name: &str, city_id: CityId) -> Self {
        Self {
            name: name.trim().to_string(),
            city_id,
        }
    }
}
