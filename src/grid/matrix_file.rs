// on-disk layout, shared with the existing JSON/ directory:
//
// [
//   {
//     "Aspect": "Noise",
//     "NoiseMatrix": [[0.0, ...], ...],     <- field name varies per dataset
//     "Norigin": 34.3344,
//     "WOrigin": -118.6057,
//     "VerticalStep": 0.0236,
//     "HorizontalStep": 0.024105,
//     "MaxScore": 412.0,                     <- optional
//     "MaxSpeed": 1000.0,                    <- optional
//     "Unit": "...",                         <- optional
//     "Source": "..."                        <- optional
//   }
// ]

use super::{Grid, Matrix};
use crate::error::{Error, Result};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixFile {
    pub aspect: String,
    pub field: String,
    pub matrix: Matrix,
    pub norigin: f64,
    pub worigin: f64,
    pub vertical_step: f64,
    pub horizontal_step: f64,
    pub max_score: Option<f64>,
    pub max_speed: Option<f64>,
    pub unit: Option<String>,
    pub source: Option<String>,
}

impl MatrixFile {
    pub fn new(aspect: &str, field: &str, grid: &Grid, matrix: Matrix) -> Self {
        MatrixFile {
            aspect: aspect.to_string(),
            field: field.to_string(),
            matrix,
            norigin: grid.bounds.north,
            worigin: grid.bounds.west,
            vertical_step: grid.lat_step(),
            horizontal_step: grid.lon_step(),
            max_score: None,
            max_speed: None,
            unit: None,
            source: None,
        }
    }

    pub fn rows(&self) -> usize {
        self.matrix.len()
    }

    pub fn cols(&self) -> usize {
        self.matrix.first().map(|r| r.len()).unwrap_or(0)
    }

    /// Writes `{prefix}_{rows}x{cols}_{timestamp}.json` into `dir` and returns its path.
    pub fn write(&self, dir: &Path, prefix: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        let file_name = format!("{}_{}x{}_{}.json", prefix, self.rows(), self.cols(), stamp);
        let path = dir.join(file_name);
        let content = serde_json::to_string_pretty(&[self])?;
        std::fs::write(&path, content)?;
        info!(
            "wrote {} ({}x{}) to {}",
            self.aspect,
            self.rows(),
            self.cols(),
            path.display()
        );
        Ok(path)
    }

    /// Reads a matrix file, taking the matrix from `field`.
    pub fn read(path: &Path, field: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::matrix_file(path, format!("read failed: {}", e)))?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| Error::matrix_file(path, format!("invalid json: {}", e)))?;
        Self::from_value(&value, field).map_err(|reason| Error::matrix_file(path, reason))
    }

    fn from_value(value: &Value, field: &str) -> std::result::Result<Self, String> {
        let object = value
            .as_array()
            .and_then(|a| a.first())
            .and_then(|o| o.as_object())
            .ok_or_else(|| "expected an array holding one object".to_string())?;

        let aspect = object
            .get("Aspect")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing Aspect".to_string())?
            .to_string();
        let matrix = parse_matrix(
            object
                .get(field)
                .ok_or_else(|| format!("missing matrix field {}", field))?,
        )?;

        Ok(MatrixFile {
            aspect,
            field: field.to_string(),
            matrix,
            norigin: required_f64(object, "Norigin")?,
            worigin: required_f64(object, "WOrigin")?,
            vertical_step: required_f64(object, "VerticalStep")?,
            horizontal_step: required_f64(object, "HorizontalStep")?,
            max_score: object.get("MaxScore").and_then(|v| v.as_f64()),
            max_speed: object.get("MaxSpeed").and_then(|v| v.as_f64()),
            unit: object.get("Unit").and_then(|v| v.as_str()).map(String::from),
            source: object.get("Source").and_then(|v| v.as_str()).map(String::from),
        })
    }

    /// Newest file in `dir` whose name starts with `prefix` and fits a `rows`x`cols` grid.
    ///
    /// Files written for another grid size are skipped. Names without a size are taken as is.
    pub fn latest(dir: &Path, prefix: &str, rows: usize, cols: usize) -> Result<PathBuf> {
        let missing = || Error::MissingDataset {
            prefix: prefix.to_string(),
            dir: dir.to_path_buf(),
        };
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Err(missing()),
        };

        // stamped names sort after unstamped ones, then by stamp
        let mut newest: Option<((Option<String>, String), PathBuf)> = None;
        for entry in entries {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) if name.starts_with(prefix) && name.ends_with(".json") => name,
                _ => continue,
            };
            let stem = &name[prefix.len()..name.len() - ".json".len()];
            if let Some(size) = name_size(stem) {
                if size != (rows, cols) {
                    debug!("skipping {}, grid is {}x{}", name, rows, cols);
                    continue;
                }
            }
            let key = (name_stamp(stem).map(String::from), name.to_string());
            if newest.as_ref().map(|(k, _)| key > *k).unwrap_or(true) {
                newest = Some((key, path.clone()));
            }
        }
        newest.map(|(_, path)| path).ok_or_else(missing)
    }
}

/// `(rows, cols)` from the `_{rows}x{cols}_` part of a file name.
fn name_size(stem: &str) -> Option<(usize, usize)> {
    let size = stem.trim_start_matches('_').split('_').next()?;
    let (rows, cols) = size.split_once('x')?;
    Some((rows.parse().ok()?, cols.parse().ok()?))
}

/// Trailing `%Y%m%dT%H%M%SZ` stamp of a file name.
fn name_stamp(stem: &str) -> Option<&str> {
    let stamp = stem.rsplit('_').next()?;
    let bytes = stamp.as_bytes();
    let is_stamp = bytes.len() == 16
        && bytes[8] == b'T'
        && bytes[15] == b'Z'
        && bytes[..8].iter().chain(&bytes[9..15]).all(u8::is_ascii_digit);
    is_stamp.then_some(stamp)
}

impl Serialize for MatrixFile {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("Aspect", &self.aspect)?;
        map.serialize_entry(&self.field, &self.matrix)?;
        map.serialize_entry("Norigin", &self.norigin)?;
        map.serialize_entry("WOrigin", &self.worigin)?;
        map.serialize_entry("VerticalStep", &self.vertical_step)?;
        map.serialize_entry("HorizontalStep", &self.horizontal_step)?;
        if let Some(max_score) = self.max_score {
            map.serialize_entry("MaxScore", &max_score)?;
        }
        if let Some(max_speed) = self.max_speed {
            map.serialize_entry("MaxSpeed", &max_speed)?;
        }
        if let Some(unit) = &self.unit {
            map.serialize_entry("Unit", unit)?;
        }
        if let Some(source) = &self.source {
            map.serialize_entry("Source", source)?;
        }
        map.end()
    }
}

fn required_f64(object: &Map<String, Value>, key: &str) -> std::result::Result<f64, String> {
    object
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| format!("missing or non-numeric {}", key))
}

fn parse_matrix(value: &Value) -> std::result::Result<Matrix, String> {
    let rows = value
        .as_array()
        .ok_or_else(|| "matrix is not an array".to_string())?;
    let mut matrix = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let row = row
            .as_array()
            .ok_or_else(|| format!("matrix row {} is not an array", i))?;
        let mut parsed = Vec::with_capacity(row.len());
        for (j, v) in row.iter().enumerate() {
            match v.as_f64() {
                Some(f) if f.is_finite() => parsed.push(f),
                _ => return Err(format!("matrix[{}][{}] is not a finite number", i, j)),
            }
        }
        matrix.push(parsed);
    }
    if let Some(first) = matrix.first() {
        let width = first.len();
        if let Some(i) = matrix.iter().position(|r| r.len() != width) {
            return Err(format!(
                "matrix row {} has {} columns, expected {}",
                i,
                matrix[i].len(),
                width
            ));
        }
    }
    Ok(matrix)
}
