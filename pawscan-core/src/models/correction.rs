use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of submitting a corrected (image, label) pair to the classifier's
/// teaching interface. Mirrors the teaching service's own status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeachStatus {
    /// Not yet submitted (or submission still in flight).
    Pending,
    Added,
    Updated,
    Skipped,
    Error,
}

impl TeachStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeachStatus::Pending => "pending",
            TeachStatus::Added => "added",
            TeachStatus::Updated => "updated",
            TeachStatus::Skipped => "skipped",
            TeachStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TeachStatus::Pending),
            "added" => Some(TeachStatus::Added),
            "updated" => Some(TeachStatus::Updated),
            "skipped" => Some(TeachStatus::Skipped),
            "error" => Some(TeachStatus::Error),
            _ => None,
        }
    }
}

/// One human breed correction. Immutable once written, except for
/// `teach_status`, which records the best-effort teaching outcome and can be
/// updated by an out-of-band re-teach.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CorrectionEntry {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub image_path: String,
    pub image_digest: String,
    pub predicted_breed: String,
    pub corrected_breed: String,
    pub confidence_at_correction: f64,
    pub teach_status: String,
    pub created_at: DateTime<Utc>,
}

impl CorrectionEntry {
    pub fn teach_status(&self) -> Option<TeachStatus> {
        TeachStatus::parse(&self.teach_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teach_status_round_trip() {
        for s in [
            TeachStatus::Pending,
            TeachStatus::Added,
            TeachStatus::Updated,
            TeachStatus::Skipped,
            TeachStatus::Error,
        ] {
            assert_eq!(TeachStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TeachStatus::parse("done"), None);
    }
}
