use crate::error::{Error, Result};
use crate::grid::binning::Sample;
use h3o::{CellIndex, LatLng};
use serde::Deserialize;
use std::io::Read;

/// County FIPS of Los Angeles, without the leading zero of the state code.
pub const LA_COUNTY_FIPS: &str = "6037";
pub const MIN_DOWNLOAD_MBPS: f64 = 100.0;

const REQUIRED_COLUMNS: [&str; 3] = ["block_geoid", "h3_res8_id", "max_advertised_download_speed"];

/// One row of the FCC broadband data collection export.
#[derive(Debug, Deserialize)]
pub struct BroadbandRow {
    pub block_geoid: String,
    pub h3_res8_id: String,
    pub max_advertised_download_speed: f64,
}

impl BroadbandRow {
    pub fn in_la_county(&self) -> bool {
        self.block_geoid
            .trim()
            .trim_start_matches('0')
            .starts_with(LA_COUNTY_FIPS)
    }

    pub fn is_high_speed(&self) -> bool {
        self.max_advertised_download_speed >= MIN_DOWNLOAD_MBPS
    }

    /// Centre of the row's H3 cell.
    pub fn position(&self) -> Option<(f64, f64)> {
        let cell: CellIndex = self.h3_res8_id.trim().parse().ok()?;
        let center = LatLng::from(cell);
        Some((center.lat(), center.lng()))
    }
}

/// Download speeds of high speed offers in Los Angeles County, placed at their H3 cell centres.
pub fn read_samples(reader: impl Read) -> Result<Vec<Sample>> {
    let mut csv_reader = csv::Reader::from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h.trim() == column) {
            return Err(Error::InvalidRequest(format!(
                "broadband csv lacks {} column",
                column
            )));
        }
    }

    let mut samples = Vec::new();
    let mut skipped = 0;
    for row in csv_reader.deserialize::<BroadbandRow>() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                debug!("skipping broadband row: {}", e);
                skipped += 1;
                continue;
            }
        };
        if !row.in_la_county() || !row.is_high_speed() {
            continue;
        }
        match row.position() {
            Some((lat, lon)) => {
                samples.push(Sample::new(lat, lon, row.max_advertised_download_speed))
            }
            None => {
                debug!("skipping invalid h3 cell {}", row.h3_res8_id);
                skipped += 1;
            }
        }
    }
    info!(
        "fcc: {} high speed offers in Los Angeles County, {} rows skipped",
        samples.len(),
        skipped
    );
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use h3o::Resolution;

    fn h3_cell(lat: f64, lon: f64) -> String {
        LatLng::new(lat, lon)
            .unwrap()
            .to_cell(Resolution::Eight)
            .to_string()
    }

    #[test]
    fn keeps_fast_offers_in_la_county() {
        let downtown = h3_cell(34.05, -118.25);
        let csv = format!(
            "frn,block_geoid,h3_res8_id,max_advertised_download_speed\n\
             1,060371234001000,{cell},1000\n\
             2,60371234001001,{cell},2000\n\
             3,060371234001002,{cell},50\n\
             4,060591234001000,{cell},1000\n\
             5,060371234001003,not-a-cell,1000\n\
             6,060371234001004,{cell},fast\n",
            cell = downtown
        );
        let samples = read_samples(csv.as_bytes()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 1000.0);
        assert_eq!(samples[1].value, 2000.0);
        assert!((samples[0].lat - 34.05).abs() < 0.01);
        assert!((samples[0].lon + 118.25).abs() < 0.01);
    }

    #[test]
    fn missing_column_is_rejected() {
        let err = read_samples("block_geoid,speed\n060371234001000,1000\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("h3_res8_id"));
    }
}
