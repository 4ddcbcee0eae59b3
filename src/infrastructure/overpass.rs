use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::application::errors::AppError;
use crate::domain::cities::BoundingBox;
use crate::domain::places::normalize_name;

pub const OVERPASS_API_URL: &str = "https://overpass-api.de/api/interpreter";
const USER_AGENT: &str = "Chowrank/1.0 (POI bootstrap)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const AMENITIES: &str = "restaurant|cafe|bar|fast_food";

/// One POI as fetched from the open-map provider.
#[derive(Debug, Clone)]
pub struct PoiRecord {
    pub osm_id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub cuisine: Vec<String>,
    pub address: Option<String>,
    pub brand: Option<String>,
    pub website: Option<String>,
}

/// Fetches food-and-drink POIs inside the bounding box, deduplicated and
/// capped. Node/way duplicates of the same venue collapse on
/// (normalized name, coordinates rounded to 4 decimals).
pub async fn fetch_pois(
    client: &reqwest::Client,
    base_url: &str,
    bbox: &BoundingBox,
    max_results: usize,
) -> Result<Vec<PoiRecord>, AppError> {
    let query = overpass_query(bbox);

    let response = client
        .post(base_url)
        .header("User-Agent", USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .form(&[("data", query.as_str())])
        .send()
        .await
        .map_err(|e| AppError::upstream(format!("overpass request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::upstream(format!(
            "overpass returned status {}",
            response.status()
        )));
    }

    let body: OverpassResponse = response
        .json()
        .await
        .map_err(|e| AppError::upstream(format!("failed to parse overpass response: {e}")))?;

    Ok(collect_pois(body, max_results))
}

fn overpass_query(bbox: &BoundingBox) -> String {
    let BoundingBox {
        south,
        west,
        north,
        east,
    } = bbox;
    format!(
        "[out:json][timeout:90];\
         (node[\"amenity\"~\"^({AMENITIES})$\"]({south},{west},{north},{east});\
          way[\"amenity\"~\"^({AMENITIES})$\"]({south},{west},{north},{east}););\
         out center tags;"
    )
}

fn collect_pois(body: OverpassResponse, max_results: usize) -> Vec<PoiRecord> {
    let mut seen: HashSet<(String, i64, i64)> = HashSet::new();
    let mut out = Vec::new();

    for element in body.elements {
        if out.len() >= max_results {
            break;
        }
        let Some(poi) = into_poi(element) else {
            continue;
        };

        // 4 decimals ≈ 11 m: collapses node/way twins of one venue
        let key = (
            normalize_name(&poi.name),
            (poi.lat * 10_000.0).round() as i64,
            (poi.lon * 10_000.0).round() as i64,
        );
        if seen.insert(key) {
            out.push(poi);
        }
    }

    out
}

fn into_poi(element: OverpassElement) -> Option<PoiRecord> {
    let (lat, lon) = match (element.lat, element.lon, &element.center) {
        (Some(lat), Some(lon), _) => (lat, lon),
        (_, _, Some(center)) => (center.lat, center.lon),
        _ => return None,
    };

    let tags = element.tags?;
    let name = tags.name.filter(|n| !n.trim().is_empty())?;

    let cuisine = tags
        .cuisine
        .map(|raw| {
            raw.split(';')
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let address = match (tags.addr_housenumber, tags.addr_street) {
        (Some(number), Some(street)) => Some(format!("{number} {street}")),
        (None, Some(street)) => Some(street),
        _ => None,
    };

    Some(PoiRecord {
        osm_id: format!("{}/{}", element.element_type, element.id),
        name,
        lat,
        lon,
        cuisine,
        address,
        brand: tags.brand.filter(|b| !b.trim().is_empty()),
        website: tags.website.filter(|w| !w.trim().is_empty()),
    })
}

// --- Overpass API types ---

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    element_type: String,
    id: i64,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    center: Option<OverpassCenter>,
    #[serde(default)]
    tags: Option<OverpassTags>,
}

#[derive(Debug, Deserialize)]
struct OverpassCenter {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct OverpassTags {
    name: Option<String>,
    cuisine: Option<String>,
    brand: Option<String>,
    website: Option<String>,
    #[serde(rename = "addr:street")]
    addr_street: Option<String>,
    #[serde(rename = "addr:housenumber")]
    addr_housenumber: Option<String>,
}
