use serde::{Deserialize, Serialize};

/// Adult size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Toy,
    Small,
    Medium,
    Large,
    Giant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildClass {
    Slender,
    Athletic,
    Muscular,
    Stocky,
    LongBodied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoatType {
    Smooth,
    Double,
    Wire,
    Curly,
    Silky,
    Corded,
}

/// When and where gray appears with age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrayingPattern {
    EarlyMuzzle,
    LateMuzzle,
    FullFace,
    Minimal,
}

/// Age target of one generated variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeTarget {
    OneYear,
    ThreeYears,
}

impl AgeTarget {
    pub fn years(&self) -> u8 {
        match self {
            AgeTarget::OneYear => 1,
            AgeTarget::ThreeYears => 3,
        }
    }

    /// Key used in the simulation block and the polling contract.
    pub fn key(&self) -> &'static str {
        match self {
            AgeTarget::OneYear => "1_years",
            AgeTarget::ThreeYears => "3_years",
        }
    }
}

/// Static physical-trait metadata for a breed, derived from its name.
///
/// Snapshotted into the scan's simulation block when a job runs so the
/// prompts that produced a rendering stay reconstructible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreedProfile {
    pub size: SizeClass,
    pub build: BuildClass,
    pub coat: CoatType,
    pub graying: GrayingPattern,
    pub brachycephalic: bool,
    pub grows_significantly: bool,
    pub body_at_one_year: String,
    pub face_at_one_year: String,
    pub size_at_one_year: String,
    pub body_at_three_years: String,
    pub face_at_three_years: String,
    pub size_at_three_years: String,
}
