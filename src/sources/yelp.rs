use crate::error::Result;
use crate::grid::{Grid, Matrix};
use serde::Deserialize;
use std::time::Duration;

pub const SEARCH_URL: &str = "https://api.yelp.com/v3/businesses/search";
const TIMEOUT: Duration = Duration::from_secs(10);
const SEARCH_RADIUS_METERS: u32 = 1_000;
const SEARCH_LIMIT: u32 = 50;
/// Stays under five requests per second.
const REQUEST_DELAY: Duration = Duration::from_millis(200);

const YELP_SHARE: f64 = 0.4;
const PERMIT_SHARE: f64 = 0.6;
const REVIEW_CAP: f64 = 1_000.0;

pub const TRENDY_CATEGORIES: &[&str] = &[
    "coffee",
    "coffeeroasteries",
    "coffeeshops",
    "vegan",
    "vegetarian",
    "yoga",
    "pilates",
    "cocktailbars",
    "wine_bars",
    "breweries",
    "vintage",
    "vintage_fashion",
    "galleries",
    "artsandcrafts",
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    businesses: Vec<Business>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Business {
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub review_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    pub alias: String,
}

/// Business mix around one cell centre.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Vibe {
    /// Mean number of `$` signs over priced businesses, 0 to 4.
    pub avg_price: f64,
    pub trendy_ratio: f64,
    pub reviews: f64,
}

impl Vibe {
    pub fn from_businesses(businesses: &[Business]) -> Self {
        if businesses.is_empty() {
            return Vibe::default();
        }
        let prices: Vec<f64> = businesses
            .iter()
            .filter_map(|b| b.price.as_deref())
            .filter(|p| !p.is_empty())
            .map(|p| p.chars().count() as f64)
            .collect();
        let avg_price = if prices.is_empty() {
            0.0
        } else {
            prices.iter().sum::<f64>() / prices.len() as f64
        };
        let trendy = businesses
            .iter()
            .filter(|b| {
                b.categories
                    .iter()
                    .any(|c| TRENDY_CATEGORIES.contains(&c.alias.as_str()))
            })
            .count();
        Vibe {
            avg_price,
            trendy_ratio: trendy as f64 / businesses.len() as f64,
            reviews: businesses.iter().map(|b| b.review_count as f64).sum(),
        }
    }

    /// Price, trendiness and review volume folded into [0,1].
    pub fn score(&self) -> f64 {
        let price = self.avg_price / 4.0;
        let vibrancy = (self.reviews / REVIEW_CAP).min(1.0);
        price * 0.3 + self.trendy_ratio * 0.4 + vibrancy * 0.3
    }
}

/// Weighted sum of the Yelp score and the normalized permit investment, cell by cell.
pub fn blend(yelp: &Matrix, permits: &Matrix) -> Matrix {
    yelp.iter()
        .zip(permits.iter())
        .map(|(y, p)| {
            y.iter()
                .zip(p.iter())
                .map(|(y, p)| YELP_SHARE * y + PERMIT_SHARE * p)
                .collect()
        })
        .collect()
}

async fn search(client: &reqwest::Client, api_key: &str, lat: f64, lon: f64) -> Result<Vibe> {
    let response = client
        .get(SEARCH_URL)
        .bearer_auth(api_key)
        .query(&[
            ("latitude", lat.to_string()),
            ("longitude", lon.to_string()),
            ("radius", SEARCH_RADIUS_METERS.to_string()),
            ("limit", SEARCH_LIMIT.to_string()),
            ("sort_by", "review_count".to_string()),
        ])
        .timeout(TIMEOUT)
        .send()
        .await?;
    let body: SearchResponse = response.error_for_status()?.json().await?;
    Ok(Vibe::from_businesses(&body.businesses))
}

/// Yelp score of every cell, searched around the cell centres.
///
/// A failed search scores its cell 0 and the run goes on.
pub async fn fetch_vibe_matrix(
    client: &reqwest::Client,
    grid: &Grid,
    api_key: &str,
) -> Result<Matrix> {
    let mut matrix = grid.zeros();
    let mut failed = 0;
    for (row, cells) in matrix.iter_mut().enumerate() {
        for (col, cell) in cells.iter_mut().enumerate() {
            let (lat, lon) = grid.cell_bounds(row, col).center();
            match search(client, api_key, lat, lon).await {
                Ok(vibe) => *cell = vibe.score(),
                Err(e) => {
                    warn!("yelp search at ({:.4}, {:.4}) failed: {}", lat, lon, e);
                    failed += 1;
                }
            }
            tokio::time::sleep(REQUEST_DELAY).await;
        }
        debug!("yelp: row {} of {} done", row + 1, grid.rows);
    }
    info!(
        "yelp: scored {} cells, {} searches failed",
        grid.rows * grid.cols - failed,
        failed
    );
    Ok(matrix)
}
