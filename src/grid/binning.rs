use super::{Grid, Matrix, OutOfBounds};

/// A single observation reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub lat: f64,
    pub lon: f64,
    pub value: f64,
}

impl Sample {
    pub fn new(lat: f64, lon: f64, value: f64) -> Self {
        Sample { lat, lon, value }
    }

    pub fn point(lat: f64, lon: f64) -> Self {
        Sample::new(lat, lon, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Sum,
    Mean,
}

#[derive(Debug, Clone)]
pub struct Binned {
    pub matrix: Matrix,
    pub binned: usize,
    pub dropped: usize,
}

pub fn bin_samples(
    grid: &Grid,
    samples: &[Sample],
    aggregate: Aggregate,
    policy: OutOfBounds,
) -> Binned {
    let mut matrix = grid.zeros();
    let mut counts = vec![vec![0usize; grid.cols]; grid.rows];
    let mut binned = 0;
    let mut dropped = 0;

    for sample in samples {
        let cell = grid.cell_index(sample.lat, sample.lon, policy);
        let (row, col) = match cell {
            Some(rc) if aggregate == Aggregate::Count || sample.value.is_finite() => rc,
            _ => {
                dropped += 1;
                continue;
            }
        };
        match aggregate {
            Aggregate::Count => matrix[row][col] += 1.0,
            Aggregate::Sum | Aggregate::Mean => matrix[row][col] += sample.value,
        }
        counts[row][col] += 1;
        binned += 1;
    }

    if aggregate == Aggregate::Mean {
        for (row, counts) in matrix.iter_mut().zip(counts.iter()) {
            for (v, &n) in row.iter_mut().zip(counts.iter()) {
                if n > 0 {
                    *v /= n as f64;
                }
            }
        }
    }

    debug!(
        "binned {} samples into {}x{} grid, dropped {}",
        binned, grid.rows, grid.cols, dropped
    );
    Binned {
        matrix,
        binned,
        dropped,
    }
}
