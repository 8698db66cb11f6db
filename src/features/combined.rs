use super::similarity::{similarity, Method};
use super::{FeatureVector, Indicator, PreferenceVector, FEATURE_DIM};
use crate::error::{Error, Result};
use crate::grid::matrix_file::MatrixFile;
use crate::grid::{Grid, Matrix};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub indicator: Indicator,
    pub file: Option<String>,
    pub aspect: Option<String>,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_speed: Option<f64>,
}

impl SourceInfo {
    fn missing(indicator: Indicator) -> Self {
        SourceInfo {
            indicator,
            file: None,
            aspect: None,
            loaded: false,
            max_score: None,
            max_speed: None,
        }
    }
}

/// Every cell's feature vector, assembled from one matrix file per indicator.
#[derive(Debug, Clone, Serialize)]
pub struct CombinedGrid {
    pub grid: Grid,
    pub cells: Vec<Vec<FeatureVector>>,
    pub sources: Vec<SourceInfo>,
}

impl CombinedGrid {
    pub fn new(grid: Grid) -> Self {
        CombinedGrid {
            grid,
            cells: vec![vec![[0.0; FEATURE_DIM]; grid.cols]; grid.rows],
            sources: Indicator::ALL.iter().map(|&i| SourceInfo::missing(i)).collect(),
        }
    }

    /// Loads the newest matrix file of every indicator from `dir`.
    ///
    /// Malformed files always fail. Missing files fail unless `allow_missing`, in which case
    /// the indicator stays zero and is reported as not loaded.
    pub fn load(dir: &Path, grid: Grid, allow_missing: bool) -> Result<Self> {
        let mut combined = CombinedGrid::new(grid);
        for indicator in Indicator::ALL {
            let latest = MatrixFile::latest(dir, indicator.file_prefix(), grid.rows, grid.cols);
            let path = match latest {
                Ok(path) => path,
                Err(e @ Error::MissingDataset { .. }) => {
                    if !allow_missing {
                        return Err(e);
                    }
                    warn!("{}: {}, filling with zeros", indicator, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let file = MatrixFile::read(&path, indicator.matrix_field())?;
            combined
                .inject(indicator, &file.matrix)
                .map_err(|e| Error::matrix_file(&path, e.to_string()))?;
            combined.sources[indicator.index()] = SourceInfo {
                indicator,
                file: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string()),
                aspect: Some(file.aspect),
                loaded: true,
                max_score: file.max_score,
                max_speed: file.max_speed,
            };
            info!("loaded {} from {}", indicator, path.display());
        }
        Ok(combined)
    }

    /// Writes a normalized matrix into the indicator's slot of every cell.
    pub fn inject(&mut self, indicator: Indicator, matrix: &Matrix) -> Result<()> {
        if matrix.len() != self.grid.rows {
            return Err(Error::DimensionMismatch {
                expected: self.grid.rows,
                actual: matrix.len(),
            });
        }
        for row in matrix {
            if row.len() != self.grid.cols {
                return Err(Error::DimensionMismatch {
                    expected: self.grid.cols,
                    actual: row.len(),
                });
            }
            if let Some(v) = row.iter().find(|v| !(0.0..=1.0).contains(*v)) {
                return Err(Error::InvalidVector(format!(
                    "{} value {} is not normalized",
                    indicator, v
                )));
            }
        }

        let slot = indicator.index();
        for (cells, values) in self.cells.iter_mut().zip(matrix.iter()) {
            for (cell, &v) in cells.iter_mut().zip(values.iter()) {
                cell[slot] = v;
            }
        }
        self.sources[slot].loaded = true;
        Ok(())
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&FeatureVector> {
        self.cells.get(row).and_then(|r| r.get(col))
    }

    /// Similarity of every cell to the preference vector.
    pub fn heatmap(&self, preference: &PreferenceVector, method: Method) -> Result<Matrix> {
        self.cells
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| similarity(preference.as_slice(), cell, method))
                    .collect::<Result<Vec<_>>>()
            })
            .collect()
    }

    pub fn loaded_indicators(&self) -> Vec<Indicator> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.indicator)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_all(dir: &Path, grid: &Grid, skip: Option<Indicator>) {
        for indicator in Indicator::ALL {
            if Some(indicator) == skip {
                continue;
            }
            let mut matrix = grid.zeros();
            matrix[0][0] = 1.0;
            matrix[2][3] = (indicator.index() as f64) / 10.0;
            let file = MatrixFile::new(indicator.name(), indicator.matrix_field(), grid, matrix);
            file.write(dir, indicator.file_prefix()).unwrap();
        }
    }

    #[test]
    fn inject_fills_one_slot() {
        let grid = Grid::los_angeles();
        let mut combined = CombinedGrid::new(grid);
        let mut matrix = grid.zeros();
        matrix[4][5] = 0.75;
        combined.inject(Indicator::Noise, &matrix).unwrap();

        let cell = combined.cell(4, 5).unwrap();
        assert_eq!(cell[Indicator::Noise.index()], 0.75);
        assert_eq!(cell[Indicator::Crime.index()], 0.0);
        assert_eq!(combined.loaded_indicators(), vec![Indicator::Noise]);
    }

    #[test]
    fn inject_rejects_bad_matrices() {
        let grid = Grid::los_angeles();
        let mut combined = CombinedGrid::new(grid);
        let small = vec![vec![0.0; 20]; 19];
        assert!(combined.inject(Indicator::Crime, &small).is_err());

        let mut unnormalized = grid.zeros();
        unnormalized[1][1] = 3.0;
        assert!(combined.inject(Indicator::Crime, &unnormalized).is_err());
    }

    #[test]
    fn load_reads_every_indicator() {
        let dir = tempfile::tempdir().unwrap();
        let grid = Grid::los_angeles();
        write_all(dir.path(), &grid, None);

        let combined = CombinedGrid::load(dir.path(), grid, false).unwrap();
        assert_eq!(combined.loaded_indicators().len(), FEATURE_DIM);
        assert_eq!(combined.cell(0, 0).unwrap(), &[1.0; FEATURE_DIM]);
        assert_eq!(
            combined.cell(2, 3).unwrap()[Indicator::Education.index()],
            0.8
        );
        assert_eq!(
            combined.sources[Indicator::Mobility.index()].aspect.as_deref(),
            Some("mobility")
        );
    }

    #[test]
    fn missing_indicator_fails_unless_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let grid = Grid::los_angeles();
        write_all(dir.path(), &grid, Some(Indicator::Health));

        let err = CombinedGrid::load(dir.path(), grid, false).unwrap_err();
        assert!(err.to_string().contains("health_matrix"));

        let combined = CombinedGrid::load(dir.path(), grid, true).unwrap();
        assert!(!combined.sources[Indicator::Health.index()].loaded);
        assert_eq!(combined.loaded_indicators().len(), FEATURE_DIM - 1);
    }

    #[test]
    fn malformed_file_fails_even_when_missing_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let grid = Grid::los_angeles();
        write_all(dir.path(), &grid, None);
        std::fs::write(
            dir.path().join("noise_matrix_20x20_29991231T000000Z.json"),
            "not json",
        )
        .unwrap();

        let err = CombinedGrid::load(dir.path(), grid, true).unwrap_err();
        assert!(matches!(err, Error::MatrixFile { .. }));
    }

    #[test]
    fn load_ignores_files_for_other_grid_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let grid = Grid::los_angeles();
        write_all(dir.path(), &grid, None);

        let coarse = Grid::new(grid.bounds, 40, 40).unwrap();
        let mut matrix = coarse.zeros();
        matrix[39][39] = 1.0;
        let big = MatrixFile::new("Noise", "NoiseMatrix", &coarse, matrix);
        let content = serde_json::to_string(&[big]).unwrap();
        std::fs::write(
            dir.path().join("noise_matrix_40x40_29991231T000000Z.json"),
            content,
        )
        .unwrap();

        let combined = CombinedGrid::load(dir.path(), grid, false).unwrap();
        let noise = &combined.sources[Indicator::Noise.index()];
        assert!(noise.file.as_deref().unwrap().starts_with("noise_matrix_20x20_"));
        assert_eq!(combined.cell(0, 0).unwrap()[Indicator::Noise.index()], 1.0);
    }

    #[test]
    fn heatmap_covers_every_cell() {
        let grid = Grid::los_angeles();
        let mut combined = CombinedGrid::new(grid);
        let mut matrix = grid.zeros();
        matrix[0][0] = 1.0;
        combined.inject(Indicator::Income, &matrix).unwrap();

        let mut values = [0.0; FEATURE_DIM];
        values[Indicator::Income.index()] = 1.0;
        let preference = PreferenceVector::from_slice(&values).unwrap();

        let heatmap = combined.heatmap(&preference, Method::Cosine).unwrap();
        assert_eq!(heatmap.len(), 20);
        assert!(heatmap.iter().all(|r| r.len() == 20));
        assert!((heatmap[0][0] - 1.0).abs() < 1e-12);
        assert_eq!(heatmap[10][10], 0.0);
    }
}
