use super::with_retry;
use crate::error::Result;
use crate::grid::binning::Sample;
use crate::grid::BoundingBox;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::time::Duration;

pub const BASE_URL: &str = "https://data.lacity.org/resource";
const TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_DELAY: Duration = Duration::from_millis(500);

pub const MIN_PERMIT_VALUATION: f64 = 20_000.0;

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct SocrataQuery {
    pub resource: &'static str,
    pub filter: Option<String>,
    pub select: Option<&'static str>,
    pub order: Option<&'static str>,
    pub page_size: usize,
    pub max_records: usize,
}

impl SocrataQuery {
    pub fn endpoint(&self) -> String {
        format!("{}/{}.json", BASE_URL, self.resource)
    }

    fn params(&self, offset: usize) -> Vec<(&'static str, String)> {
        let limit = self.page_size.min(self.max_records - offset);
        let mut params = vec![("$limit", limit.to_string()), ("$offset", offset.to_string())];
        if let Some(filter) = &self.filter {
            params.push(("$where", filter.clone()));
        }
        if let Some(select) = self.select {
            params.push(("$select", select.to_string()));
        }
        if let Some(order) = self.order {
            params.push(("$order", order.to_string()));
        }
        params
    }
}

/// Noise complaints, one page.
pub fn noise_query() -> SocrataQuery {
    SocrataQuery {
        resource: "h73f-gn57",
        filter: None,
        select: None,
        order: None,
        page_size: 50_000,
        max_records: 50_000,
    }
}

/// Crimes since `since` inside the box, newest first.
pub fn crime_query(bounds: &BoundingBox, since: DateTime<Utc>) -> SocrataQuery {
    let now = Utc::now();
    let filter = format!(
        "date_occ > '{}' AND date_occ < '{}' AND {}",
        since.format("%Y-%m-%dT00:00:00.000"),
        now.format("%Y-%m-%dT23:59:59.999"),
        bbox_filter(bounds, "lat", "lon")
    );
    SocrataQuery {
        resource: "2nrs-mtv8",
        filter: Some(filter),
        select: None,
        order: Some("date_occ DESC"),
        page_size: 1_000,
        max_records: 10_000,
    }
}

/// Building permits issued since `since`.
pub fn permits_query(since: DateTime<Utc>) -> SocrataQuery {
    SocrataQuery {
        resource: "yv23-pmwf",
        filter: Some(format!("issue_date > '{}'", since.format("%Y-%m-%dT%H:%M:%S"))),
        select: Some("latitude,longitude,valuation,permit_type"),
        order: Some("issue_date DESC"),
        page_size: 50_000,
        max_records: 1_000_000,
    }
}

pub fn bbox_filter(bounds: &BoundingBox, lat: &str, lon: &str) -> String {
    format!(
        "{lat} <= {} AND {lat} >= {} AND {lon} <= {} AND {lon} >= {}",
        bounds.north,
        bounds.south,
        bounds.east,
        bounds.west,
        lat = lat,
        lon = lon
    )
}

/// Pages through a resource until a short page or `max_records`.
pub async fn fetch_records(client: &reqwest::Client, query: &SocrataQuery) -> Result<Vec<Record>> {
    let endpoint = query.endpoint();
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < query.max_records {
        let params = query.params(offset);
        let limit = query.page_size.min(query.max_records - offset);
        debug!("socrata {} offset {}", query.resource, offset);

        let response = with_retry("socrata request", || {
            client
                .get(&endpoint)
                .query(&params)
                .timeout(TIMEOUT)
                .send()
        })
        .await?;
        let page: Vec<Record> = response.error_for_status()?.json().await?;
        let page_len = page.len();
        records.extend(page);
        info!(
            "socrata {}: fetched {} records (total {})",
            query.resource,
            page_len,
            records.len()
        );

        if page_len < limit {
            break;
        }
        offset += page_len;
        tokio::time::sleep(PAGE_DELAY).await;
    }
    Ok(records)
}

/// Reads a number stored either as JSON number or numeric string.
pub fn record_number(record: &Record, key: &str) -> Option<f64> {
    let value = match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Position from `latitude`/`longitude` or `lat`/`lon`; the (0, 0) placeholder counts as missing.
pub fn record_position(record: &Record) -> Option<(f64, f64)> {
    let lat = record_number(record, "latitude").or_else(|| record_number(record, "lat"))?;
    let lon = record_number(record, "longitude").or_else(|| record_number(record, "lon"))?;
    if lat == 0.0 && lon == 0.0 {
        return None;
    }
    Some((lat, lon))
}

/// Converts records to samples, valued by `value_key` (or 1.0) and kept only above `min_value`.
pub fn records_to_samples(
    records: &[Record],
    value_key: Option<&str>,
    min_value: Option<f64>,
) -> Vec<Sample> {
    let mut skipped = 0;
    let samples = records
        .iter()
        .filter_map(|record| {
            let sample = sample_from(record, value_key, min_value);
            if sample.is_none() {
                skipped += 1;
            }
            sample
        })
        .collect::<Vec<_>>();
    if skipped > 0 {
        debug!("skipped {} records without usable position or value", skipped);
    }
    samples
}

fn sample_from(record: &Record, value_key: Option<&str>, min_value: Option<f64>) -> Option<Sample> {
    let (lat, lon) = record_position(record)?;
    let value = match value_key {
        Some(key) => record_number(record, key)?,
        None => 1.0,
    };
    if let Some(min) = min_value {
        if value <= min {
            return None;
        }
    }
    Some(Sample::new(lat, lon, value))
}
