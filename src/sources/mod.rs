pub mod census;
pub mod fcc;
pub mod overpass;
pub mod socrata;
pub mod yelp;

use crate::error::{Error, Result};
use crate::features::Indicator;
use crate::grid::binning::{bin_samples, Aggregate, Sample};
use crate::grid::matrix_file::MatrixFile;
use crate::grid::normalize::{min_max, normalize, Normalization};
use crate::grid::{Grid, Matrix, OutOfBounds};
use chrono::{Duration as ChronoDuration, Utc};
use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const MAX_ATTEMPTS: u32 = 3;

/// Inputs some datasets need beyond the grid.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// FCC broadband export, read by the connectivity dataset.
    pub csv: Option<PathBuf>,
    /// Enables the Yelp half of the community vibe index.
    pub yelp_api_key: Option<String>,
}

/// A dataset that can be fetched from a public source and written as a matrix file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Dataset {
    Noise,
    Crime,
    Connectivity,
    CommunityVibe,
    Accessibility,
    Education,
    Mobility,
    Wellbeing,
    Walkability,
    Income,
}

impl Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.indicator())
    }
}

impl Dataset {
    pub fn indicator(self) -> Indicator {
        match self {
            Dataset::Noise => Indicator::Noise,
            Dataset::Crime => Indicator::Crime,
            Dataset::Connectivity => Indicator::Connectivity,
            Dataset::CommunityVibe => Indicator::CommunityVibe,
            Dataset::Accessibility => Indicator::Accessibility,
            Dataset::Education => Indicator::Education,
            Dataset::Mobility => Indicator::Mobility,
            Dataset::Wellbeing => Indicator::Wellbeing,
            Dataset::Walkability => Indicator::Walkability,
            Dataset::Income => Indicator::Income,
        }
    }

    pub fn aspect(self) -> &'static str {
        match self {
            Dataset::Noise => "Noise",
            Dataset::Crime => "Crime",
            Dataset::Connectivity => "Connectivity",
            Dataset::CommunityVibe => "CommunityVibe",
            Dataset::Accessibility => "Wheelchair Accessibility",
            Dataset::Education => "Education",
            Dataset::Mobility => "Mobility",
            Dataset::Wellbeing => "Wellbeing",
            Dataset::Walkability => "Walkability",
            Dataset::Income => "mean_income",
        }
    }

    pub fn aggregate(self) -> Aggregate {
        match self {
            Dataset::CommunityVibe | Dataset::Walkability => Aggregate::Sum,
            Dataset::Income | Dataset::Connectivity => Aggregate::Mean,
            _ => Aggregate::Count,
        }
    }

    pub fn normalization(self) -> Normalization {
        match self {
            Dataset::CommunityVibe
            | Dataset::Connectivity
            | Dataset::Accessibility
            | Dataset::Wellbeing
            | Dataset::Walkability => Normalization::MaxOnly,
            _ => Normalization::MinMax,
        }
    }

    /// Point datasets queried with the whole box clamp strays into edge cells, the rest drop them.
    pub fn out_of_bounds(self) -> OutOfBounds {
        match self {
            Dataset::Accessibility | Dataset::Education | Dataset::Mobility => OutOfBounds::Clamp,
            _ => OutOfBounds::Drop,
        }
    }

    fn unit(self) -> Option<&'static str> {
        match self {
            Dataset::Walkability => Some("walkability_index (normalized 0-1)"),
            Dataset::Connectivity => Some("Mbps (normalized 0-1)"),
            Dataset::CommunityVibe => Some("investment_index (normalized 0-1)"),
            _ => None,
        }
    }

    fn source(self) -> Option<&'static str> {
        match self {
            Dataset::CommunityVibe => Some("LADBS Building Permits (2 years, >$20k)"),
            _ => None,
        }
    }

    pub async fn fetch_samples(
        self,
        client: &reqwest::Client,
        grid: &Grid,
        options: &IngestOptions,
    ) -> Result<Vec<Sample>> {
        let bounds = &grid.bounds;
        match self {
            Dataset::Connectivity => {
                let path = options.csv.as_ref().ok_or_else(|| {
                    Error::InvalidRequest(
                        "connectivity is read from the FCC broadband csv, pass --csv <file>"
                            .to_string(),
                    )
                })?;
                fcc::read_samples(std::fs::File::open(path)?)
            }
            Dataset::Noise => {
                let records = socrata::fetch_records(client, &socrata::noise_query()).await?;
                Ok(socrata::records_to_samples(&records, None, None))
            }
            Dataset::Crime => {
                let query = socrata::crime_query(bounds, Utc::now() - ChronoDuration::days(365));
                let records = socrata::fetch_records(client, &query).await?;
                Ok(socrata::records_to_samples(&records, None, None))
            }
            Dataset::CommunityVibe => {
                let query = socrata::permits_query(Utc::now() - ChronoDuration::days(730));
                let records = socrata::fetch_records(client, &query).await?;
                Ok(socrata::records_to_samples(
                    &records,
                    Some("valuation"),
                    Some(socrata::MIN_PERMIT_VALUATION),
                ))
            }
            Dataset::Accessibility => {
                overpass::fetch_samples(client, bounds, overpass::ACCESSIBILITY, |tags| {
                    overpass::matches_any(tags, overpass::ACCESSIBILITY)
                })
                .await
            }
            Dataset::Education => {
                overpass::fetch_samples(client, bounds, overpass::EDUCATION, |tags| {
                    overpass::matches_any(tags, overpass::EDUCATION)
                })
                .await
            }
            Dataset::Mobility => {
                overpass::fetch_samples(client, bounds, overpass::MOBILITY, |tags| {
                    overpass::matches_any(tags, overpass::MOBILITY)
                })
                .await
            }
            Dataset::Wellbeing => {
                overpass::fetch_samples(client, bounds, overpass::WELLBEING, |tags| {
                    overpass::matches_any(tags, overpass::WELLBEING)
                })
                .await
            }
            Dataset::Walkability => {
                overpass::fetch_samples(
                    client,
                    bounds,
                    overpass::WALKABILITY_KEYS,
                    overpass::walkability_weight,
                )
                .await
            }
            Dataset::Income => census::fetch_income_samples(client, bounds).await,
        }
    }

    /// Bins, normalizes and packages samples as this dataset's matrix file.
    ///
    /// Fails when no sample lands in a cell.
    pub fn build_matrix(self, grid: &Grid, samples: &[Sample]) -> Result<MatrixFile> {
        let binned = bin_samples(grid, samples, self.aggregate(), self.out_of_bounds());
        info!(
            "{}: {} samples binned, {} dropped",
            self,
            binned.binned,
            binned.dropped
        );
        if binned.binned == 0 {
            return Err(Error::EmptyDataset(self.to_string()));
        }
        let raw_max = min_max(&binned.matrix).map(|(_, max)| max);
        let matrix = normalize(&binned.matrix, self.normalization());

        let indicator = self.indicator();
        let mut file = MatrixFile::new(self.aspect(), indicator.matrix_field(), grid, matrix);
        match self {
            Dataset::Walkability | Dataset::CommunityVibe => file.max_score = raw_max,
            Dataset::Connectivity => file.max_speed = raw_max,
            _ => {}
        }
        file.unit = self.unit().map(String::from);
        file.source = self.source().map(String::from);
        Ok(file)
    }
}

/// Folds the Yelp score into a permit-only community vibe file and renormalizes it.
pub fn blend_yelp(mut file: MatrixFile, yelp: &Matrix) -> MatrixFile {
    let blended = yelp::blend(yelp, &file.matrix);
    file.max_score = min_max(&blended).map(|(_, max)| max);
    file.matrix = normalize(&blended, Normalization::MaxOnly);
    file.unit = Some("community_vibe_index (normalized 0-1)".to_string());
    file.source = Some("LADBS Building Permits (2 years, >$20k) + Yelp Fusion".to_string());
    file
}

/// Fetches a dataset and writes its matrix file into `out_dir`.
pub async fn ingest(
    dataset: Dataset,
    grid: &Grid,
    out_dir: &Path,
    options: &IngestOptions,
) -> anyhow::Result<PathBuf> {
    let client = reqwest::Client::new();

    let start = Instant::now();
    let samples = dataset.fetch_samples(&client, grid, options).await?;
    let elapsed = start.elapsed().as_secs_f64();
    info!("{}: fetched {} samples in {}s", dataset, samples.len(), elapsed);

    if samples.is_empty() {
        return Err(anyhow::anyhow!(
            "{}: provider returned no samples, refusing to write an empty matrix",
            dataset
        ));
    }

    let mut file = dataset.build_matrix(grid, &samples)?;
    if dataset == Dataset::CommunityVibe {
        match &options.yelp_api_key {
            Some(api_key) => {
                let vibe = yelp::fetch_vibe_matrix(&client, grid, api_key).await?;
                file = blend_yelp(file, &vibe);
            }
            None => info!("{}: YELP_API_KEY not set, using permits only", dataset),
        }
    }
    let path = file.write(out_dir, dataset.indicator().file_prefix())?;
    Ok(path)
}

/// Runs `request` until it succeeds, retrying transport failures with exponential backoff.
///
/// HTTP status errors are returned immediately.
pub async fn with_retry<T, F, Fut>(what: &str, mut request: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = reqwest::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && attempt + 1 < MAX_ATTEMPTS => {
                let backoff = Duration::from_secs(2u64.pow(attempt));
                warn!(
                    "{} failed on attempt {}: {}, retrying in {}s",
                    what,
                    attempt + 1,
                    e,
                    backoff.as_secs()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(Error::Provider(format!(
                    "{} failed after {} attempt(s): {}",
                    what,
                    attempt + 1,
                    e
                )))
            }
        }
    }
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}
