use super::{Indicator, FEATURE_DIM};
use crate::error::{Error, Result};
use serde::{Serialize, Serializer};

const ML_SIGMA: f64 = 0.3;
const WEIGHTED_KERNEL: f64 = 0.2;
const ZERO_VARIANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Cosine,
    Ml,
    Manhattan,
    Weighted,
    Pearson,
}

impl Method {
    /// Unknown names fall back to cosine.
    pub fn parse(name: &str) -> Method {
        match name.trim().to_ascii_lowercase().as_str() {
            "ml" => Method::Ml,
            "manhattan" => Method::Manhattan,
            "weighted" => Method::Weighted,
            "pearson" => Method::Pearson,
            _ => Method::Cosine,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Cosine => "cosine",
            Method::Ml => "ml",
            Method::Manhattan => "manhattan",
            Method::Weighted => "weighted",
            Method::Pearson => "pearson",
        }
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Similarity in [0,1] between two feature vectors.
pub fn similarity(a: &[f64], b: &[f64], method: Method) -> Result<f64> {
    validate(a)?;
    validate(b)?;

    let score = match method {
        Method::Cosine => cosine_similarity(a, b),
        Method::Ml => ml_similarity(a, b),
        Method::Manhattan => manhattan_similarity(a, b),
        Method::Weighted => weighted_similarity(a, b),
        Method::Pearson => pearson_similarity(a, b),
    };
    Ok(score.clamp(0.0, 1.0))
}

fn validate(v: &[f64]) -> Result<()> {
    if v.len() != FEATURE_DIM {
        return Err(Error::DimensionMismatch {
            expected: FEATURE_DIM,
            actual: v.len(),
        });
    }
    if let Some(i) = v.iter().position(|x| !x.is_finite()) {
        return Err(Error::InvalidVector(format!(
            "{} is not a finite number",
            Indicator::ALL[i]
        )));
    }
    Ok(())
}

fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn magnitude(a: &[f64]) -> f64 {
    a.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let mag_a = magnitude(a);
    let mag_b = magnitude(b);
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot_product(a, b) / (mag_a * mag_b)
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn ml_similarity(a: &[f64], b: &[f64]) -> f64 {
    let s = 1.0 - euclidean(a, b) / (FEATURE_DIM as f64).sqrt();
    (-(1.0 - s).powi(2) / (2.0 * ML_SIGMA * ML_SIGMA)).exp()
}

fn manhattan_similarity(a: &[f64], b: &[f64]) -> f64 {
    let distance: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum();
    1.0 - distance / FEATURE_DIM as f64
}

fn weighted_similarity(a: &[f64], b: &[f64]) -> f64 {
    let total_weight: f64 = Indicator::ALL.iter().map(|i| i.weight()).sum();
    let weighted: f64 = Indicator::ALL
        .iter()
        .map(|i| i.weight() * (a[i.index()] - b[i.index()]).powi(2))
        .sum();
    let distance = weighted.sqrt() / total_weight.sqrt();
    (-distance.powi(2) / WEIGHTED_KERNEL).exp()
}

fn pearson_similarity(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    // rounding leaves a constant vector with a tiny nonzero variance
    let flat = ZERO_VARIANCE * n;
    if var_a <= flat || var_b <= flat {
        return 0.0;
    }
    let r = cov / (var_a.sqrt() * var_b.sqrt());
    if !r.is_finite() {
        return 0.0;
    }
    (r + 1.0) / 2.0
}
