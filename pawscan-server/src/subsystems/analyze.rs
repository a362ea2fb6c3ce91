//! Scan analysis pipeline
//!
//! The synchronous path a new upload takes: validation gate, dog gate
//! (fail-open), content digest, correction override, cache reuse, consensus,
//! persist, job dispatch. The caller blocks on the model calls; only the
//! age-progression work is offloaded.
//!
//! Two overrides short-circuit inference on a digest match, in order:
//! a recorded human correction (hard guarantee: an admin-corrected image is
//! never re-inferred), then a reusable prior scan. A prior scan produced by
//! a low-quality method below the confidence floor is not reusable, and full
//! identification runs again.

use uuid::Uuid;

use pawscan_core::digest::content_digest;
use pawscan_core::error::ScanError;
use pawscan_core::identifier::IdentifierBackend;
use pawscan_core::models::correction::CorrectionEntry;
use pawscan_core::models::scan::{
    PredictionMethod, ScanRecord, SimulationData, SimulationStatus, VerificationStatus,
};

use crate::subsystems::{cache, consensus::BreedConsensusEngine, corrections};
use crate::AppContext;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_IMAGE_EDGE_PX: u32 = 10_000;

// ============================================================================
// Upload validation
// ============================================================================

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    let trimmed = text.trim_start();
    trimmed.starts_with("<svg") || (trimmed.starts_with("<?xml") && text.contains("<svg"))
}

/// Validate an upload and return the storage extension for it.
///
/// SVG is accepted by format sniffing but exempt from the raster decode and
/// dimension checks (it is not raster).
pub fn validate_upload(bytes: &[u8]) -> Result<&'static str, ScanError> {
    if bytes.is_empty() {
        return Err(ScanError::Validation("The upload is empty.".to_string()));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ScanError::Validation(
            "Image exceeds the 10 MB limit.".to_string(),
        ));
    }

    if looks_like_svg(bytes) {
        return Ok("svg");
    }

    let format = image::guess_format(bytes).map_err(|_| {
        ScanError::Validation("Unsupported or unrecognized image format.".to_string())
    })?;

    let ext = match format {
        image::ImageFormat::Jpeg => "jpg",
        image::ImageFormat::Png => "png",
        image::ImageFormat::WebP => "webp",
        image::ImageFormat::Gif => "gif",
        image::ImageFormat::Avif => "avif",
        image::ImageFormat::Bmp => "bmp",
        _ => {
            return Err(ScanError::Validation(
                "Unsupported image format. Allowed: JPEG, PNG, WebP, GIF, AVIF, BMP, SVG."
                    .to_string(),
            ))
        }
    };

    let img = image::load_from_memory(bytes).map_err(|_| {
        ScanError::Validation("The image could not be decoded; it may be corrupted.".to_string())
    })?;

    if img.width() > MAX_IMAGE_EDGE_PX || img.height() > MAX_IMAGE_EDGE_PX {
        return Err(ScanError::Validation(
            "Image dimensions exceed the 10000×10000 pixel limit.".to_string(),
        ));
    }

    Ok(ext)
}

/// Pre-classification gate. The gate's own failure admits the image
/// (fail-open): a broken gate must not take uploads down with it.
async fn dog_gate(identifier: &dyn IdentifierBackend, bytes: &[u8]) -> Result<(), ScanError> {
    match identifier.is_dog(bytes).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ScanError::NotADog),
        Err(e) => {
            tracing::warn!(error = %e, "Dog gate unavailable — failing open");
            Ok(())
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub async fn fetch_scan(
    pool: &sqlx::PgPool,
    id: Uuid,
) -> Result<Option<ScanRecord>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM scans WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Analyze one upload end to end and return the persisted record.
pub async fn analyze_upload(
    ctx: &AppContext,
    user_id: Option<Uuid>,
    bytes: &[u8],
) -> Result<ScanRecord, ScanError> {
    let ext = validate_upload(bytes)?;
    dog_gate(ctx.identifier.as_ref(), bytes).await?;

    let digest = content_digest(bytes);

    // 1. Exact-image correction override: never re-infer
    if let Some(correction) = corrections::find_correction(&ctx.pool, &digest)
        .await
        .map_err(ScanError::Database)?
    {
        tracing::info!(digest = %digest, breed = %correction.corrected_breed, "Correction override hit");
        let prior = fetch_scan(&ctx.pool, correction.scan_id)
            .await
            .map_err(ScanError::Database)?;
        return persist_corrected_copy(ctx, user_id, bytes, &digest, ext, &correction, prior.as_ref())
            .await;
    }

    // 2. Content-hash cache
    if let Some(prior) = cache::find_latest_by_digest(&ctx.pool, &digest)
        .await
        .map_err(ScanError::Database)?
    {
        if cache::is_reusable(&prior) {
            tracing::info!(digest = %digest, prior = %prior.id, "Cache hit — reusing prior analysis");
            return persist_reused_copy(ctx, user_id, bytes, &digest, ext, &prior).await;
        }
        tracing::info!(
            digest = %digest,
            method = %prior.method,
            confidence = prior.confidence,
            "Digest hit below reuse quality — re-running identification"
        );
    }

    // 3. Full consensus
    let engine = BreedConsensusEngine::new(ctx.classifier.as_ref(), ctx.identifier.as_ref());
    let outcome = engine.run(bytes).await?;
    persist_fresh(ctx, user_id, bytes, &digest, ext, outcome).await
}

/// Delete a scan, its stored blobs, and its cached status.
pub async fn delete_scan(ctx: &AppContext, id: Uuid) -> Result<bool, ScanError> {
    let scan = match fetch_scan(&ctx.pool, id).await.map_err(ScanError::Database)? {
        Some(s) => s,
        None => return Ok(false),
    };

    let simulation = scan.simulation();
    for path in [
        Some(scan.image_path.clone()),
        simulation.one_year,
        simulation.three_years,
    ]
    .into_iter()
    .flatten()
    {
        if let Err(e) = ctx.store.delete(&path).await {
            tracing::warn!(scan_id = %id, path = %path, error = %e, "Blob delete failed");
        }
    }

    sqlx::query("DELETE FROM scans WHERE id = $1")
        .bind(id)
        .execute(&ctx.pool)
        .await
        .map_err(ScanError::Database)?;
    ctx.status_cache.invalidate(&id).await;

    tracing::info!(scan_id = %id, "Scan deleted");
    Ok(true)
}

// ============================================================================
// Persistence
// ============================================================================

struct NewScan {
    id: Uuid,
    user_id: Option<Uuid>,
    image_path: String,
    image_digest: String,
    breed: String,
    confidence: f64,
    alternatives: serde_json::Value,
    verification: &'static str,
    method: &'static str,
    description: Option<String>,
    origin: serde_json::Value,
    health_risks: serde_json::Value,
    simulation: SimulationData,
}

async fn insert_scan(pool: &sqlx::PgPool, new: NewScan) -> Result<ScanRecord, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO scans
            (id, user_id, image_path, image_digest, breed, confidence, alternatives,
             verification, method, description, origin, health_risks, simulation)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING *
        "#,
    )
    .bind(new.id)
    .bind(new.user_id)
    .bind(&new.image_path)
    .bind(&new.image_digest)
    .bind(&new.breed)
    .bind(new.confidence)
    .bind(&new.alternatives)
    .bind(new.verification)
    .bind(new.method)
    .bind(&new.description)
    .bind(&new.origin)
    .bind(&new.health_risks)
    .bind(serde_json::to_value(&new.simulation).unwrap_or(serde_json::json!({})))
    .fetch_one(pool)
    .await
}

async fn store_upload(
    ctx: &AppContext,
    scan_id: Uuid,
    ext: &str,
    bytes: &[u8],
) -> Result<String, ScanError> {
    let path = format!("uploads/{}.{}", scan_id, ext);
    ctx.store.put(&path, bytes).await?;
    Ok(path)
}

/// Fresh analysis: persist the consensus outcome, then dispatch the job.
/// Persist happens-before dispatch for every path that enqueues.
async fn persist_fresh(
    ctx: &AppContext,
    user_id: Option<Uuid>,
    bytes: &[u8],
    digest: &str,
    ext: &str,
    outcome: crate::subsystems::consensus::ConsensusOutcome,
) -> Result<ScanRecord, ScanError> {
    let id = Uuid::new_v4();
    let image_path = store_upload(ctx, id, ext, bytes).await?;

    let record = insert_scan(
        &ctx.pool,
        NewScan {
            id,
            user_id,
            image_path,
            image_digest: digest.to_string(),
            breed: outcome.breed,
            confidence: outcome.confidence,
            alternatives: serde_json::to_value(&outcome.alternatives)
                .unwrap_or(serde_json::json!([])),
            verification: VerificationStatus::Pending.as_str(),
            method: outcome.method.as_str(),
            description: outcome.description,
            origin: outcome.origin,
            health_risks: outcome.health_risks,
            simulation: SimulationData {
                status: SimulationStatus::Queued,
                ..SimulationData::default()
            },
        },
    )
    .await
    .map_err(ScanError::Database)?;

    ctx.jobs.dispatch(id).await;
    Ok(record)
}

/// Cache reuse: copy the prior record's analysis and derived artifacts
/// forward. A complete prior simulation is copied; anything else queues a
/// fresh job for the new record.
async fn persist_reused_copy(
    ctx: &AppContext,
    user_id: Option<Uuid>,
    bytes: &[u8],
    digest: &str,
    ext: &str,
    prior: &ScanRecord,
) -> Result<ScanRecord, ScanError> {
    let id = Uuid::new_v4();
    let image_path = store_upload(ctx, id, ext, bytes).await?;

    let prior_sim = prior.simulation();
    let (simulation, needs_job) = if prior_sim.status == SimulationStatus::Complete {
        (prior_sim, false)
    } else {
        (
            SimulationData {
                status: SimulationStatus::Queued,
                ..SimulationData::default()
            },
            true,
        )
    };

    let record = insert_scan(
        &ctx.pool,
        NewScan {
            id,
            user_id,
            image_path,
            image_digest: digest.to_string(),
            breed: prior.breed.clone(),
            confidence: prior.confidence,
            alternatives: prior.alternatives.clone(),
            verification: if prior.is_verified() {
                VerificationStatus::Verified.as_str()
            } else {
                VerificationStatus::Pending.as_str()
            },
            method: PredictionMethod::ExactMatch.as_str(),
            description: prior.description.clone(),
            origin: prior.origin.clone(),
            health_risks: prior.health_risks.clone(),
            simulation,
        },
    )
    .await
    .map_err(ScanError::Database)?;

    if needs_job {
        ctx.jobs.dispatch(id).await;
    }
    Ok(record)
}

/// Correction override: the corrected breed is the verified primary at 100,
/// with every derived artifact copied from the prior corrected record.
async fn persist_corrected_copy(
    ctx: &AppContext,
    user_id: Option<Uuid>,
    bytes: &[u8],
    digest: &str,
    ext: &str,
    correction: &CorrectionEntry,
    prior: Option<&ScanRecord>,
) -> Result<ScanRecord, ScanError> {
    let id = Uuid::new_v4();
    let image_path = store_upload(ctx, id, ext, bytes).await?;

    let (description, origin, health_risks, alternatives, prior_sim) = match prior {
        Some(p) => (
            p.description.clone(),
            p.origin.clone(),
            p.health_risks.clone(),
            p.alternatives.clone(),
            p.simulation(),
        ),
        // Corrected scan was deleted: the correction itself still stands
        None => (
            None,
            serde_json::Value::Null,
            serde_json::Value::Null,
            serde_json::json!([]),
            SimulationData::default(),
        ),
    };

    let (simulation, needs_job) = if prior_sim.status == SimulationStatus::Complete {
        (prior_sim, false)
    } else {
        (
            SimulationData {
                status: SimulationStatus::Queued,
                ..SimulationData::default()
            },
            true,
        )
    };

    let record = insert_scan(
        &ctx.pool,
        NewScan {
            id,
            user_id,
            image_path,
            image_digest: digest.to_string(),
            breed: correction.corrected_breed.clone(),
            confidence: corrections::VERIFIED_CONFIDENCE,
            alternatives,
            verification: VerificationStatus::Verified.as_str(),
            method: PredictionMethod::AdminCorrected.as_str(),
            description,
            origin,
            health_risks,
            simulation,
        },
    )
    .await
    .map_err(ScanError::Database)?;

    if needs_job {
        ctx.jobs.dispatch(id).await;
    }
    Ok(record)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pawscan_core::classifier::ClassifierPrediction;
    use pawscan_core::identifier::{Identification, IdentifierError};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::ImageBuffer::from_pixel(
            width,
            height,
            image::Rgb([128u8, 90, 60]),
        ));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_validate_accepts_png() {
        assert_eq!(validate_upload(&png_bytes(64, 64)).unwrap(), "png");
    }

    #[test]
    fn test_validate_accepts_svg_without_raster_checks() {
        let svg = b"<?xml version=\"1.0\"?><svg xmlns=\"http://www.w3.org/2000/svg\"></svg>";
        assert_eq!(validate_upload(svg).unwrap(), "svg");
    }

    #[test]
    fn test_validate_rejects_empty_and_garbage() {
        assert!(matches!(
            validate_upload(b""),
            Err(ScanError::Validation(_))
        ));
        assert!(matches!(
            validate_upload(b"definitely not an image"),
            Err(ScanError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_payload() {
        let huge = vec![0u8; MAX_UPLOAD_BYTES + 1];
        match validate_upload(&huge) {
            Err(ScanError::Validation(msg)) => assert!(msg.contains("10 MB")),
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_excessive_dimensions() {
        let wide = png_bytes(MAX_IMAGE_EDGE_PX + 1, 1);
        match validate_upload(&wide) {
            Err(ScanError::Validation(msg)) => assert!(msg.contains("10000")),
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    // ------------------------------------------------------------------
    // Dog gate
    // ------------------------------------------------------------------

    struct GateIdentifier {
        verdict: Option<bool>,
    }

    #[async_trait]
    impl IdentifierBackend for GateIdentifier {
        async fn identify(
            &self,
            _image: &[u8],
            _hint: Option<&ClassifierPrediction>,
        ) -> Result<Identification, IdentifierError> {
            unimplemented!("not exercised by gate tests")
        }

        async fn is_dog(&self, _image: &[u8]) -> Result<bool, IdentifierError> {
            self.verdict.ok_or(IdentifierError::Api {
                code: 503,
                message: "down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_gate_rejects_non_dogs() {
        let gate = GateIdentifier {
            verdict: Some(false),
        };
        let result = dog_gate(&gate, b"cat photo").await;
        assert!(matches!(result, Err(ScanError::NotADog)));
    }

    #[tokio::test]
    async fn test_gate_admits_dogs() {
        let gate = GateIdentifier {
            verdict: Some(true),
        };
        assert!(dog_gate(&gate, b"dog photo").await.is_ok());
    }

    #[tokio::test]
    async fn test_gate_fails_open_on_error() {
        let gate = GateIdentifier { verdict: None };
        assert!(dog_gate(&gate, b"any photo").await.is_ok());
    }
}
