use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::profile::BreedProfile;

/// How the primary breed for a scan was decided.
///
/// Stored as text in the `scans.method` column; the serde names are the wire
/// and DB representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMethod {
    /// Exact digest match against a reusable earlier scan.
    ExactMatch,
    /// A human correction exists for this exact image.
    AdminCorrected,
    /// Classifier and identifier agreed.
    MlGeminiConfirmed,
    /// Identifier overrode the classifier.
    GeminiOverride,
    /// Identifier overrode a hybrid-prone classifier prediction.
    GeminiHybridOverride,
    /// Local classifier alone (identifier unavailable or not consulted).
    Model,
    /// Classifier nearest-reference memory match.
    Memory,
}

impl PredictionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionMethod::ExactMatch => "exact_match",
            PredictionMethod::AdminCorrected => "admin_corrected",
            PredictionMethod::MlGeminiConfirmed => "ml_gemini_confirmed",
            PredictionMethod::GeminiOverride => "gemini_override",
            PredictionMethod::GeminiHybridOverride => "gemini_hybrid_override",
            PredictionMethod::Model => "model",
            PredictionMethod::Memory => "memory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact_match" => Some(PredictionMethod::ExactMatch),
            "admin_corrected" => Some(PredictionMethod::AdminCorrected),
            "ml_gemini_confirmed" => Some(PredictionMethod::MlGeminiConfirmed),
            "gemini_override" => Some(PredictionMethod::GeminiOverride),
            "gemini_hybrid_override" => Some(PredictionMethod::GeminiHybridOverride),
            "model" => Some(PredictionMethod::Model),
            "memory" => Some(PredictionMethod::Memory),
            _ => None,
        }
    }

    /// Methods whose past answers are not trusted enough to reuse on a
    /// digest match without re-running full identification.
    pub fn is_low_quality(&self) -> bool {
        matches!(self, PredictionMethod::Model | PredictionMethod::Memory)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
        }
    }
}

/// Age-progression lifecycle. Transitions are monotonic
/// (pending → queued → generating → complete | failed); only an explicit
/// regenerate resets a finished record back to queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    #[default]
    Pending,
    Queued,
    Generating,
    Complete,
    Failed,
}

impl SimulationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationStatus::Pending => "pending",
            SimulationStatus::Queued => "queued",
            SimulationStatus::Generating => "generating",
            SimulationStatus::Complete => "complete",
            SimulationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SimulationStatus::Pending),
            "queued" => Some(SimulationStatus::Queued),
            "generating" => Some(SimulationStatus::Generating),
            "complete" => Some(SimulationStatus::Complete),
            "failed" => Some(SimulationStatus::Failed),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, SimulationStatus::Complete | SimulationStatus::Failed)
    }
}

/// One ranked runner-up prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreedAlternative {
    pub breed: String,
    pub confidence: f64,
}

/// The simulation block stored in `scans.simulation` (jsonb).
///
/// Field names `1_years` / `3_years` are the client-facing polling contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationData {
    #[serde(default)]
    pub status: SimulationStatus,
    #[serde(rename = "1_years")]
    pub one_year: Option<String>,
    #[serde(rename = "3_years")]
    pub three_years: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breed_profile: Option<BreedProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One analyzed image. The single shared mutable resource of the pipeline:
/// the consensus engine, the correction handler, and the age-progression job
/// all write to it with targeted field-level updates.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanRecord {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub image_path: String,
    pub image_digest: String,
    pub breed: String,
    pub confidence: f64,
    pub alternatives: serde_json::Value,
    pub verification: String,
    pub method: String,
    pub description: Option<String>,
    pub origin: serde_json::Value,
    pub health_risks: serde_json::Value,
    pub simulation: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanRecord {
    /// `None` means the stored tag is unknown — treated as low quality by the
    /// cache policy.
    pub fn method(&self) -> Option<PredictionMethod> {
        PredictionMethod::parse(&self.method)
    }

    pub fn is_verified(&self) -> bool {
        self.verification == VerificationStatus::Verified.as_str()
    }

    pub fn simulation(&self) -> SimulationData {
        serde_json::from_value(self.simulation.clone()).unwrap_or_default()
    }

    pub fn alternatives(&self) -> Vec<BreedAlternative> {
        serde_json::from_value(self.alternatives.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_round_trip() {
        for m in [
            PredictionMethod::ExactMatch,
            PredictionMethod::AdminCorrected,
            PredictionMethod::MlGeminiConfirmed,
            PredictionMethod::GeminiOverride,
            PredictionMethod::GeminiHybridOverride,
            PredictionMethod::Model,
            PredictionMethod::Memory,
        ] {
            assert_eq!(PredictionMethod::parse(m.as_str()), Some(m));
        }
        assert_eq!(PredictionMethod::parse("oracle"), None);
    }

    #[test]
    fn test_low_quality_set() {
        assert!(PredictionMethod::Model.is_low_quality());
        assert!(PredictionMethod::Memory.is_low_quality());
        assert!(!PredictionMethod::MlGeminiConfirmed.is_low_quality());
        assert!(!PredictionMethod::AdminCorrected.is_low_quality());
        assert!(!PredictionMethod::GeminiOverride.is_low_quality());
    }

    #[test]
    fn test_simulation_data_uses_polling_field_names() {
        let data = SimulationData {
            status: SimulationStatus::Complete,
            one_year: Some("sims/abc_1y.png".to_string()),
            three_years: None,
            breed_profile: None,
            error: None,
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["status"], "complete");
        assert_eq!(json["1_years"], "sims/abc_1y.png");
        assert!(json["3_years"].is_null());
    }

    #[test]
    fn test_simulation_data_default_is_pending() {
        let data: SimulationData = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(data.status, SimulationStatus::Pending);
        assert!(data.one_year.is_none());
    }
}
