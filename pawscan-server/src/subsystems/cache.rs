//! Content-hash cache — digest lookup and the reuse policy
//!
//! An exact digest match lets the pipeline skip inference entirely, but only
//! when the past answer is worth reusing: a record produced by the local
//! classifier alone (or by an unknown method) below the confidence floor is
//! never silently reused — full identification runs again.

use sqlx::PgPool;

use pawscan_core::models::scan::ScanRecord;

/// Records from low-quality methods are reusable only at or above this
/// confidence.
pub const REUSE_CONFIDENCE_FLOOR: f64 = 85.0;

/// Latest scan with the given content digest, if any.
pub async fn find_latest_by_digest(
    pool: &PgPool,
    digest: &str,
) -> Result<Option<ScanRecord>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM scans WHERE image_digest = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(digest)
    .fetch_optional(pool)
    .await
}

/// Whether a prior record's answer may be copied forward on a digest match.
///
/// A record is reusable unless its method is in the low-quality set
/// (classifier-only or unknown) AND its confidence is below the floor.
pub fn is_reusable(record: &ScanRecord) -> bool {
    let low_quality = record.method().map_or(true, |m| m.is_low_quality());
    !low_quality || record.confidence >= REUSE_CONFIDENCE_FLOOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(method: &str, confidence: f64) -> ScanRecord {
        ScanRecord {
            id: Uuid::new_v4(),
            user_id: None,
            image_path: "uploads/x.jpg".to_string(),
            image_digest: "d".repeat(64),
            breed: "Beagle".to_string(),
            confidence,
            alternatives: serde_json::json!([]),
            verification: "pending".to_string(),
            method: method.to_string(),
            description: None,
            origin: serde_json::Value::Null,
            health_risks: serde_json::Value::Null,
            simulation: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_low_quality_below_floor_not_reusable() {
        assert!(!is_reusable(&record("model", 84.9)));
        assert!(!is_reusable(&record("memory", 50.0)));
    }

    #[test]
    fn test_low_quality_at_floor_reusable() {
        assert!(is_reusable(&record("model", 85.0)));
        assert!(is_reusable(&record("memory", 99.0)));
    }

    #[test]
    fn test_high_quality_methods_always_reusable() {
        assert!(is_reusable(&record("ml_gemini_confirmed", 20.0)));
        assert!(is_reusable(&record("gemini_override", 65.0)));
        assert!(is_reusable(&record("admin_corrected", 100.0)));
        assert!(is_reusable(&record("exact_match", 70.0)));
    }

    #[test]
    fn test_unknown_method_treated_as_low_quality() {
        assert!(!is_reusable(&record("oracle", 70.0)));
        assert!(is_reusable(&record("oracle", 90.0)));
    }
}
