pub mod binning;
pub mod matrix_file;
pub mod normalize;

use crate::error::{Error, Result};
use serde::Serialize;

pub const DEFAULT_ROWS: usize = 20;
pub const DEFAULT_COLS: usize = 20;

/// Row-major matrix, row 0 is the northern band and column 0 the western band.
pub type Matrix = Vec<Vec<f64>>;

pub fn zeros(rows: usize, cols: usize) -> Matrix {
    vec![vec![0.0; cols]; rows]
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self> {
        let finite = [north, south, east, west].iter().all(|v| v.is_finite());
        if !finite {
            return Err(Error::InvalidBounds("non-finite coordinate".to_string()));
        }
        if north <= south {
            return Err(Error::InvalidBounds(format!(
                "north {} must be greater than south {}",
                north, south
            )));
        }
        if east <= west {
            return Err(Error::InvalidBounds(format!(
                "east {} must be greater than west {}",
                east, west
            )));
        }
        Ok(BoundingBox {
            north,
            south,
            east,
            west,
        })
    }

    /// The Los Angeles area every dataset is collected for.
    pub const fn los_angeles() -> Self {
        BoundingBox {
            north: 34.3344,
            south: 33.8624,
            east: -118.1236,
            west: -118.6057,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.south <= lat && lat <= self.north && self.west <= lon && lon <= self.east
    }

    /// `(lat, lon)` of the middle of the box.
    pub fn center(&self) -> (f64, f64) {
        ((self.north + self.south) / 2.0, (self.east + self.west) / 2.0)
    }

    pub fn lat_span(&self) -> f64 {
        self.north - self.south
    }

    pub fn lon_span(&self) -> f64 {
        self.east - self.west
    }
}

/// What to do with a coordinate that falls outside the bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfBounds {
    Drop,
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Grid {
    pub bounds: BoundingBox,
    pub rows: usize,
    pub cols: usize,
}

impl Grid {
    pub fn new(bounds: BoundingBox, rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidBounds(format!(
                "grid must have at least one cell, got {}x{}",
                rows, cols
            )));
        }
        Ok(Grid { bounds, rows, cols })
    }

    pub fn los_angeles() -> Self {
        Grid {
            bounds: BoundingBox::los_angeles(),
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
        }
    }

    /// Latitude degrees per row.
    pub fn lat_step(&self) -> f64 {
        self.bounds.lat_span() / self.rows as f64
    }

    /// Longitude degrees per column.
    pub fn lon_step(&self) -> f64 {
        self.bounds.lon_span() / self.cols as f64
    }

    /// Maps a coordinate to `(row, col)`.
    ///
    /// With [`OutOfBounds::Drop`] a coordinate outside the box yields `None`; with
    /// [`OutOfBounds::Clamp`] it lands in the nearest edge cell. Non-finite coordinates
    /// never map to a cell.
    pub fn cell_index(&self, lat: f64, lon: f64, policy: OutOfBounds) -> Option<(usize, usize)> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if policy == OutOfBounds::Drop && !self.bounds.contains(lat, lon) {
            return None;
        }
        let row = ((self.bounds.north - lat) / self.lat_step()).floor();
        let col = ((lon - self.bounds.west) / self.lon_step()).floor();
        Some((clamp_index(row, self.rows), clamp_index(col, self.cols)))
    }

    /// Bounding box of a single cell.
    pub fn cell_bounds(&self, row: usize, col: usize) -> BoundingBox {
        let north = self.bounds.north - row as f64 * self.lat_step();
        let west = self.bounds.west + col as f64 * self.lon_step();
        BoundingBox {
            north,
            south: north - self.lat_step(),
            east: west + self.lon_step(),
            west,
        }
    }

    pub fn zeros(&self) -> Matrix {
        zeros(self.rows, self.cols)
    }
}

fn clamp_index(raw: f64, n: usize) -> usize {
    if raw <= 0.0 {
        0
    } else {
        (raw as usize).min(n - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn northwest_corner_is_origin() {
        let grid = Grid::los_angeles();
        assert_eq!(
            grid.cell_index(34.3344, -118.6057, OutOfBounds::Drop),
            Some((0, 0))
        );
    }

    #[test]
    fn southeast_corner_is_last_cell() {
        let grid = Grid::los_angeles();
        assert_eq!(
            grid.cell_index(33.8624, -118.1236, OutOfBounds::Drop),
            Some((19, 19))
        );
    }

    #[test]
    fn in_box_points_stay_in_range() {
        let grid = Grid::los_angeles();
        let b = grid.bounds;
        for i in 0..=50 {
            for j in 0..=50 {
                let lat = b.south + b.lat_span() * i as f64 / 50.0;
                let lon = b.west + b.lon_span() * j as f64 / 50.0;
                let (row, col) = grid.cell_index(lat, lon, OutOfBounds::Drop).unwrap();
                assert!(row < 20 && col < 20);
            }
        }
    }

    #[test]
    fn rows_grow_southward_and_cols_eastward() {
        let grid = Grid::los_angeles();
        let (lat, lon) = grid.cell_bounds(7, 12).center();
        assert_eq!(grid.cell_index(lat, lon, OutOfBounds::Drop), Some((7, 12)));
    }

    #[test]
    fn outside_points_drop_or_clamp() {
        let grid = Grid::los_angeles();
        assert_eq!(grid.cell_index(35.0, -118.3, OutOfBounds::Drop), None);
        let (row, _) = grid.cell_index(35.0, -118.3, OutOfBounds::Clamp).unwrap();
        assert_eq!(row, 0);
        assert_eq!(
            grid.cell_index(33.0, -119.0, OutOfBounds::Clamp),
            Some((19, 0))
        );
        assert_eq!(grid.cell_index(f64::NAN, -118.3, OutOfBounds::Clamp), None);
    }

    #[test]
    fn rejects_inverted_bounds() {
        assert!(BoundingBox::new(33.0, 34.0, -118.0, -119.0).is_err());
        assert!(BoundingBox::new(34.0, 33.0, -119.0, -118.0).is_err());
        assert!(BoundingBox::new(34.0, 33.0, -118.0, -119.0).is_ok());
        assert!(Grid::new(BoundingBox::los_angeles(), 0, 20).is_err());
    }
}
