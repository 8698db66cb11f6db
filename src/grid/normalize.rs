use super::Matrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// `value / max`
    MaxOnly,
    /// `(value - min) / (max - min)`
    MinMax,
}

/// Rescales a matrix into [0,1].
///
/// A matrix with no positive maximum (max-only) or no spread (min-max) becomes all zeros.
pub fn normalize(matrix: &Matrix, method: Normalization) -> Matrix {
    let (min, max) = match min_max(matrix) {
        Some(mm) => mm,
        None => return zero_like(matrix),
    };

    match method {
        Normalization::MaxOnly => {
            if max <= 0.0 {
                return zero_like(matrix);
            }
            map(matrix, |v| (v / max).clamp(0.0, 1.0))
        }
        Normalization::MinMax => {
            let range = max - min;
            if range <= 0.0 {
                return zero_like(matrix);
            }
            map(matrix, |v| ((v - min) / range).clamp(0.0, 1.0))
        }
    }
}

/// Smallest and largest finite values, `None` when there are none.
pub fn min_max(matrix: &Matrix) -> Option<(f64, f64)> {
    matrix
        .iter()
        .flatten()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

fn map(matrix: &Matrix, f: impl Fn(f64) -> f64) -> Matrix {
    matrix
        .iter()
        .map(|row| {
            row.iter()
                .map(|&v| if v.is_finite() { f(v) } else { 0.0 })
                .collect()
        })
        .collect()
}

fn zero_like(matrix: &Matrix) -> Matrix {
    matrix.iter().map(|row| vec![0.0; row.len()]).collect()
}
