use super::with_retry;
use crate::error::{Error, Result};
use crate::grid::binning::Sample;
use crate::grid::BoundingBox;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Median household income per tract, Los Angeles County.
pub const ACS_URL: &str = "https://api.census.gov/data/2021/acs/acs5?get=NAME,B19013_001E&for=tract:*&in=state:06&in=county:037";
/// Tract centroids for California.
pub const GAZETTEER_URL: &str =
    "https://www2.census.gov/geo/docs/maps-data/data/gazetteer/2021_Gazetteer/2021_gaz_tracts_06.txt";
const TIMEOUT: Duration = Duration::from_secs(30);
const INCOME_VARIABLE: &str = "B19013_001E";

/// GEOID → median income, keeping only positive incomes (the ACS marks missing data negative).
pub fn parse_acs(rows: &[Vec<Value>]) -> Result<HashMap<String, f64>> {
    let header = rows
        .first()
        .ok_or_else(|| Error::Provider("empty census response".to_string()))?;
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h.as_str() == Some(name))
            .ok_or_else(|| Error::Provider(format!("census response lacks {} column", name)))
    };
    let income = column(INCOME_VARIABLE)?;
    let state = column("state")?;
    let county = column("county")?;
    let tract = column("tract")?;

    let text = |row: &Vec<Value>, i: usize| row.get(i).and_then(|v| v.as_str()).map(String::from);
    let mut incomes = HashMap::new();
    for row in rows.iter().skip(1) {
        let value = match text(row, income).and_then(|s| s.parse::<f64>().ok()) {
            Some(v) if v > 0.0 => v,
            _ => continue,
        };
        if let (Some(s), Some(c), Some(t)) = (text(row, state), text(row, county), text(row, tract))
        {
            incomes.insert(format!("{}{}{}", s, c, t), value);
        }
    }
    Ok(incomes)
}

#[derive(Debug, Deserialize)]
struct GazetteerRow {
    #[serde(rename = "GEOID")]
    geoid: String,
    #[serde(rename = "INTPTLAT")]
    lat: f64,
    #[serde(rename = "INTPTLONG")]
    lon: f64,
}

/// GEOID → (lat, lon) from the tab separated Gazetteer file.
///
/// Rows with unparsable coordinates are skipped.
pub fn parse_gazetteer(reader: impl std::io::Read) -> Result<HashMap<String, (f64, f64)>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    for column in ["GEOID", "INTPTLAT", "INTPTLONG"] {
        if !headers.iter().any(|h| h == column) {
            return Err(Error::Provider(format!("gazetteer lacks {} column", column)));
        }
    }

    let mut centroids = HashMap::new();
    for row in csv_reader.deserialize::<GazetteerRow>() {
        match row {
            Ok(row) => {
                centroids.insert(row.geoid, (row.lat, row.lon));
            }
            Err(e) => debug!("skipping gazetteer row: {}", e),
        }
    }
    Ok(centroids)
}

/// Joins incomes and centroids into samples inside `bounds`.
pub fn join_income(
    incomes: &HashMap<String, f64>,
    centroids: &HashMap<String, (f64, f64)>,
    bounds: &BoundingBox,
) -> Vec<Sample> {
    let mut samples: Vec<Sample> = incomes
        .iter()
        .filter_map(|(id, income)| {
            let (lat, lon) = centroids.get(id)?;
            if bounds.contains(*lat, *lon) {
                Some(Sample::new(*lat, *lon, *income))
            } else {
                None
            }
        })
        .collect();
    samples.sort_by(|a, b| a.lat.total_cmp(&b.lat).then(a.lon.total_cmp(&b.lon)));
    samples
}

pub async fn fetch_income_samples(
    client: &reqwest::Client,
    bounds: &BoundingBox,
) -> Result<Vec<Sample>> {
    let response = with_retry("census acs request", || {
        client.get(ACS_URL).timeout(TIMEOUT).send()
    })
    .await?;
    let rows: Vec<Vec<Value>> = response.error_for_status()?.json().await?;
    let incomes = parse_acs(&rows)?;
    info!("census: {} tracts with income", incomes.len());

    let response = with_retry("census gazetteer request", || {
        client.get(GAZETTEER_URL).timeout(TIMEOUT).send()
    })
    .await?;
    let text = response.error_for_status()?.text().await?;
    let centroids = parse_gazetteer(text.as_bytes())?;

    let samples = join_income(&incomes, &centroids, bounds);
    info!("census: {} tracts inside the bounding box", samples.len());
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acs_rows() -> Vec<Vec<Value>> {
        serde_json::from_value(serde_json::json!([
            ["NAME", "B19013_001E", "state", "county", "tract"],
            ["Tract 1", "85000", "06", "037", "101110"],
            ["Tract 2", "-666666666", "06", "037", "101122"],
            ["Tract 3", null, "06", "037", "101210"],
            ["Tract 4", "52000", "06", "037", "980000"]
        ]))
        .unwrap()
    }

    const GAZETTEER: &str = "USPS\tGEOID\tALAND\tINTPTLAT\tINTPTLONG                                                                                                               \n\
CA\t06037101110\t1142401\t34.259\t-118.293\n\
CA\t06037101122\t2644045\t34.268\t-118.290\n\
CA\t06037980000\t100\t33.700\t-118.290\n";

    #[test]
    fn acs_drops_sentinels() {
        let incomes = parse_acs(&acs_rows()).unwrap();
        assert_eq!(incomes.len(), 2);
        assert_eq!(incomes["06037101110"], 85000.0);
    }

    #[test]
    fn acs_requires_income_column() {
        let rows: Vec<Vec<Value>> =
            serde_json::from_value(serde_json::json!([["NAME", "state"]])).unwrap();
        assert!(parse_acs(&rows).is_err());
    }

    #[test]
    fn gazetteer_header_is_trimmed() {
        let centroids = parse_gazetteer(GAZETTEER.as_bytes()).unwrap();
        assert_eq!(centroids["06037101110"], (34.259, -118.293));
        assert_eq!(centroids.len(), 3);
    }

    #[test]
    fn gazetteer_skips_bad_rows_and_needs_coordinates() {
        let text = "GEOID\tINTPTLAT\tINTPTLONG\n06037101110\t34.259\t-118.293\n06037101122\tn/a\t-118.290\n";
        let centroids = parse_gazetteer(text.as_bytes()).unwrap();
        assert_eq!(centroids.len(), 1);

        let err = parse_gazetteer("GEOID\tALAND\n06037101110\t100\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("INTPTLAT"));
        assert!(parse_gazetteer("".as_bytes()).is_err());
    }

    #[test]
    fn join_keeps_tracts_inside_box() {
        let incomes = parse_acs(&acs_rows()).unwrap();
        let centroids = parse_gazetteer(GAZETTEER.as_bytes()).unwrap();
        let samples = join_income(&incomes, &centroids, &BoundingBox::los_angeles());
        assert_eq!(samples, vec![Sample::new(34.259, -118.293, 85000.0)]);
    }
}
