use super::with_retry;
use crate::error::Result;
use crate::grid::binning::Sample;
use crate::grid::BoundingBox;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
const TIMEOUT: Duration = Duration::from_secs(120);

pub type Tags = HashMap<String, String>;

/// An OSM tag filter, `None` matches any value of the key.
pub type Selector = (&'static str, Option<&'static str>);

pub const ACCESSIBILITY: &[Selector] = &[("wheelchair", Some("yes"))];

pub const EDUCATION: &[Selector] = &[
    ("amenity", Some("school")),
    ("amenity", Some("college")),
    ("amenity", Some("university")),
    ("amenity", Some("kindergarten")),
    ("amenity", Some("library")),
];

pub const MOBILITY: &[Selector] = &[
    ("highway", Some("bus_stop")),
    ("public_transport", Some("platform")),
    ("public_transport", Some("station")),
    ("railway", Some("station")),
    ("railway", Some("tram_stop")),
    ("amenity", Some("bicycle_rental")),
];

pub const WELLBEING: &[Selector] = &[
    // nature
    ("leisure", Some("park")),
    ("leisure", Some("garden")),
    ("leisure", Some("nature_reserve")),
    ("natural", Some("beach")),
    ("natural", Some("wood")),
    ("landuse", Some("forest")),
    ("natural", Some("water")),
    // active living
    ("leisure", Some("playground")),
    ("leisure", Some("pitch")),
    ("leisure", Some("fitness_station")),
    ("leisure", Some("track")),
    ("sport", Some("swimming")),
    // community
    ("amenity", Some("library")),
    ("amenity", Some("community_centre")),
    ("amenity", Some("drinking_water")),
    ("place", Some("square")),
];

pub const WALKABILITY_KEYS: &[Selector] = &[("amenity", None), ("shop", None), ("leisure", None)];

const WALKABILITY_WEIGHTS: &[(&str, &str, f64)] = &[
    ("amenity", "restaurant", 1.0),
    ("amenity", "cafe", 1.0),
    ("amenity", "bar", 1.0),
    ("amenity", "pharmacy", 3.0),
    ("amenity", "clinic", 4.0),
    ("amenity", "school", 3.0),
    ("amenity", "kindergarten", 3.0),
    ("amenity", "library", 2.0),
    ("amenity", "cinema", 2.0),
    ("amenity", "place_of_worship", 1.0),
    ("shop", "supermarket", 4.0),
    ("shop", "convenience", 2.0),
    ("shop", "bakery", 1.0),
    ("shop", "greengrocer", 2.0),
    ("leisure", "park", 3.0),
    ("leisure", "fitness_centre", 2.0),
];

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Center {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Element {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub center: Option<Center>,
    #[serde(default)]
    pub tags: Tags,
}

impl Element {
    /// Node position, or the computed center of a way or relation.
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon, self.center) {
            (Some(lat), Some(lon), _) => Some((lat, lon)),
            (_, _, Some(c)) => Some((c.lat, c.lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<Element>,
}

pub fn build_query(bounds: &BoundingBox, selectors: &[Selector]) -> String {
    let bbox = format!(
        "({},{},{},{})",
        bounds.south, bounds.west, bounds.north, bounds.east
    );
    let clauses = selectors
        .iter()
        .map(|(key, value)| match value {
            Some(value) => format!("  nwr[\"{}\"=\"{}\"]{};", key, value, bbox),
            None => format!("  nwr[\"{}\"]{};", key, bbox),
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "[out:json][timeout:{}];\n(\n{}\n);\nout center;",
        TIMEOUT.as_secs(),
        clauses
    )
}

/// `Some(1.0)` when any selector matches the tags.
pub fn matches_any(tags: &Tags, selectors: &[Selector]) -> Option<f64> {
    let hit = selectors.iter().any(|(key, value)| match (tags.get(*key), value) {
        (Some(actual), Some(expected)) => actual == expected,
        (Some(_), None) => true,
        _ => false,
    });
    if hit {
        Some(1.0)
    } else {
        None
    }
}

/// Sum of the walkability weights the tags qualify for.
pub fn walkability_weight(tags: &Tags) -> Option<f64> {
    let score: f64 = WALKABILITY_WEIGHTS
        .iter()
        .filter(|(key, value, _)| tags.get(*key).map(|v| v == value).unwrap_or(false))
        .map(|(_, _, weight)| weight)
        .sum();
    if score > 0.0 {
        Some(score)
    } else {
        None
    }
}

/// Turns tagged, positioned elements into samples valued by `score`.
pub fn elements_to_samples<F>(elements: &[Element], score: F) -> Vec<Sample>
where
    F: Fn(&Tags) -> Option<f64>,
{
    elements
        .iter()
        .filter(|e| !e.tags.is_empty())
        .filter_map(|e| {
            let (lat, lon) = e.position()?;
            let value = score(&e.tags)?;
            Some(Sample::new(lat, lon, value))
        })
        .collect()
}

pub async fn fetch_elements(
    client: &reqwest::Client,
    bounds: &BoundingBox,
    selectors: &[Selector],
) -> Result<Vec<Element>> {
    let query = build_query(bounds, selectors);
    debug!("overpass query:\n{}", query);

    let response = with_retry("overpass request", || {
        client
            .post(OVERPASS_URL)
            .form(&[("data", query.as_str())])
            .timeout(TIMEOUT)
            .send()
    })
    .await?;
    let body: OverpassResponse = response.error_for_status()?.json().await?;
    info!("overpass returned {} elements", body.elements.len());
    Ok(body.elements)
}

pub async fn fetch_samples<F>(
    client: &reqwest::Client,
    bounds: &BoundingBox,
    selectors: &[Selector],
    score: F,
) -> Result<Vec<Sample>>
where
    F: Fn(&Tags) -> Option<f64>,
{
    let elements = fetch_elements(client, bounds, selectors).await?;
    Ok(elements_to_samples(&elements, score))
}
