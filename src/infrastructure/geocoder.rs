use std::time::Duration;

use serde::Deserialize;

use crate::application::errors::AppError;
use crate::domain::cities::BoundingBox;

pub const NOMINATIM_SEARCH_URL: &str = "https://nominatim.openstreetmap.org/search";
const USER_AGENT: &str = "Chowrank/1.0 (city bootstrap)";
const MAX_RESULTS: &str = "5";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Result kinds accepted as a city. Everything else (POIs, countries,
/// suburbs) is rejected so bootstrap cannot seed a bogus coverage area.
const CITY_ADDRESS_TYPES: [&str; 4] = ["city", "town", "village", "municipality"];

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedCity {
    pub name: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub bbox: BoundingBox,
    pub confidence: f64,
}

/// Resolves a free-text query to a city-level result, or None when nothing
/// city-shaped comes back.
pub async fn resolve_city(
    client: &reqwest::Client,
    base_url: &str,
    query: &str,
) -> Result<Option<GeocodedCity>, AppError> {
    let response = client
        .get(base_url)
        .header("User-Agent", USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .query(&[
            ("q", query),
            ("format", "json"),
            ("limit", MAX_RESULTS),
            ("addressdetails", "1"),
        ])
        .send()
        .await
        .map_err(|e| AppError::upstream(format!("geocoder search failed: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::upstream(format!(
            "geocoder returned status {}",
            response.status()
        )));
    }

    let results: Vec<NominatimResult> = response
        .json()
        .await
        .map_err(|e| AppError::upstream(format!("failed to parse geocoder response: {e}")))?;

    Ok(results.into_iter().find_map(into_city))
}

fn into_city(result: NominatimResult) -> Option<GeocodedCity> {
    let addresstype = result.addresstype.as_deref()?;
    if !CITY_ADDRESS_TYPES.contains(&addresstype) {
        return None;
    }

    let lat: f64 = result.lat.parse().ok()?;
    let lon: f64 = result.lon.parse().ok()?;

    let bbox = parse_bbox(&result.boundingbox)?;
    let address = result.address.unwrap_or_default();
    let name = result
        .name
        .filter(|n| !n.is_empty())
        .or_else(|| result.display_name.split(',').next().map(|s| s.trim().to_string()))?;

    Some(GeocodedCity {
        name,
        country: address.country.unwrap_or_default(),
        lat,
        lon,
        bbox,
        confidence: result.importance.unwrap_or(0.0).clamp(0.0, 1.0),
    })
}

/// Nominatim bounding boxes are [south, north, west, east] strings.
fn parse_bbox(raw: &[String]) -> Option<BoundingBox> {
    if raw.len() != 4 {
        return None;
    }
    let south: f64 = raw[0].parse().ok()?;
    let north: f64 = raw[1].parse().ok()?;
    let west: f64 = raw[2].parse().ok()?;
    let east: f64 = raw[3].parse().ok()?;
    Some(BoundingBox {
        south,
        west,
        north,
        east,
    })
}

// --- Nominatim types ---

#[derive(Debug, Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
    display_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    addresstype: Option<String>,
    #[serde(default)]
    boundingbox: Vec<String>,
    #[serde(default)]
    importance: Option<f64>,
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    country: Option<String>,
}
