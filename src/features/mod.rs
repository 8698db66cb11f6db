pub mod combined;
pub mod similarity;

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};

pub const FEATURE_DIM: usize = 11;

/// Per-cell indicator values, in [`Indicator::ALL`] order.
pub type FeatureVector = [f64; FEATURE_DIM];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indicator {
    Income,
    Crime,
    Connectivity,
    Noise,
    Walkability,
    Accessibility,
    Wellbeing,
    Mobility,
    Education,
    CommunityVibe,
    Health,
}

impl Indicator {
    pub const ALL: [Indicator; FEATURE_DIM] = [
        Indicator::Income,
        Indicator::Crime,
        Indicator::Connectivity,
        Indicator::Noise,
        Indicator::Walkability,
        Indicator::Accessibility,
        Indicator::Wellbeing,
        Indicator::Mobility,
        Indicator::Education,
        Indicator::CommunityVibe,
        Indicator::Health,
    ];

    /// Slot in a [`FeatureVector`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Indicator::Income => "income",
            Indicator::Crime => "crime",
            Indicator::Connectivity => "connectivity",
            Indicator::Noise => "noise",
            Indicator::Walkability => "walkability",
            Indicator::Accessibility => "accessibility",
            Indicator::Wellbeing => "wellbeing",
            Indicator::Mobility => "mobility",
            Indicator::Education => "education",
            Indicator::CommunityVibe => "community_vibe",
            Indicator::Health => "health",
        }
    }

    /// Weight used by the weighted similarity.
    pub fn weight(self) -> f64 {
        match self {
            Indicator::Income => 1.2,
            Indicator::Crime => 1.5,
            Indicator::Connectivity => 1.0,
            Indicator::Noise => 1.0,
            Indicator::Walkability => 0.8,
            Indicator::Accessibility => 1.3,
            Indicator::Wellbeing => 0.9,
            Indicator::Mobility => 0.9,
            Indicator::Education => 1.1,
            Indicator::CommunityVibe => 0.8,
            Indicator::Health => 1.2,
        }
    }

    /// File name prefix of the matrix files feeding this indicator.
    pub fn file_prefix(self) -> &'static str {
        match self {
            Indicator::Income => "income_matrix",
            Indicator::Crime => "crime_matrix",
            Indicator::Connectivity => "connectivity_matrix",
            Indicator::Noise => "noise_matrix",
            Indicator::Walkability => "walkability_matrix",
            Indicator::Accessibility => "accessibility_matrix",
            Indicator::Wellbeing => "wellbeing_matrix",
            Indicator::Mobility => "mobility_matrix",
            Indicator::Education => "education_matrix",
            Indicator::CommunityVibe => "community_vibe_matrix",
            Indicator::Health => "health_matrix",
        }
    }

    /// JSON key holding the matrix inside the file.
    pub fn matrix_field(self) -> &'static str {
        match self {
            Indicator::Income => "matrix",
            Indicator::Crime => "CrimeMatrix",
            Indicator::Connectivity => "ConnectivityMatrix",
            Indicator::Noise => "NoiseMatrix",
            Indicator::Walkability => "WalkabilityMatrix",
            Indicator::Accessibility => "AccessibilityMatrix",
            Indicator::Wellbeing => "WellbeingMatrix",
            // mobility and education were written in the crime layout
            Indicator::Mobility => "CrimeMatrix",
            Indicator::Education => "CrimeMatrix",
            Indicator::CommunityVibe => "CommunityVibMatrix",
            Indicator::Health => "HealthMatrix",
        }
    }
}

impl std::fmt::Display for Indicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for Indicator {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// How much a user cares about each indicator, every component in [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PreferenceVector(FeatureVector);

impl PreferenceVector {
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        if values.len() != FEATURE_DIM {
            return Err(Error::InvalidVector(format!(
                "vector must contain exactly {} values, got {}",
                FEATURE_DIM,
                values.len()
            )));
        }
        if let Some((i, v)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0 || **v > 1.0)
        {
            return Err(Error::InvalidVector(format!(
                "{} = {} is outside [0, 1]",
                Indicator::ALL[i],
                v
            )));
        }
        let mut vector = [0.0; FEATURE_DIM];
        vector.copy_from_slice(values);
        Ok(PreferenceVector(vector))
    }

    /// Parses a comma separated list such as `0.1,0.5,...`.
    pub fn parse_csv(text: &str) -> Result<Self> {
        let values = text
            .split(',')
            .map(|s| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| Error::InvalidVector(format!("{:?} is not a number", s.trim())))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_slice(&values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}
