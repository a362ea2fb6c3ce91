//! Age-progression job
//!
//! Generates the 1-year and 3-year renderings for a scan. The two variants
//! are issued concurrently and joined with a settle-all barrier: a slow or
//! failing variant never blocks the other. Up to three attempts re-run only
//! the variants still missing, with exponential backoff between attempts.
//! Partial success is success: a run may finish Complete with one null path.
//!
//! Writers re-read and rewrite the whole simulation block and invalidate the
//! status cache afterwards. There is no lock against a concurrent
//! regenerate; last writer wins, which the idempotent status semantics make
//! acceptable.

use moka::future::Cache as MokaCache;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use pawscan_core::breeds;
use pawscan_core::config::SimulationConfig;
use pawscan_core::error::ScanError;
use pawscan_core::generation::ImageGenerator;
use pawscan_core::models::profile::{AgeTarget, BreedProfile};
use pawscan_core::models::scan::{ScanRecord, SimulationData, SimulationStatus};

use crate::storage::BlobStore;
use crate::subsystems::queue::JobSender;
use crate::subsystems::status_cache::StatusCache;

/// Everything a job run needs. Shared by the queue worker.
#[derive(Clone)]
pub struct JobDeps {
    pub pool: PgPool,
    pub store: Arc<dyn BlobStore>,
    pub generator: Arc<dyn ImageGenerator>,
    pub status_cache: StatusCache,
    pub payload_cache: PayloadCache,
    pub config: SimulationConfig,
}

// ============================================================================
// Generation payload preparation
// ============================================================================

/// 10-minute cache of normalized generation payloads, keyed by content
/// digest, so repeated attempts and regenerates skip the decode/resize work.
#[derive(Clone)]
pub struct PayloadCache {
    inner: MokaCache<String, Arc<Vec<u8>>>,
}

impl PayloadCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            inner: MokaCache::builder()
                .max_capacity(256)
                .time_to_live(Duration::from_secs(ttl_secs))
                .build(),
        }
    }

    fn get(&self, digest: &str) -> Option<Arc<Vec<u8>>> {
        self.inner.get(digest)
    }

    async fn insert(&self, digest: String, payload: Arc<Vec<u8>>) {
        self.inner.insert(digest, payload).await;
    }
}

/// Decode, cap the longest side, re-encode as JPEG.
pub fn normalize_image(bytes: &[u8], max_edge: u32) -> Result<Vec<u8>, ScanError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ScanError::Validation(format!("The stored image could not be decoded: {}", e)))?;

    let img = if img.width().max(img.height()) > max_edge {
        img.resize(max_edge, max_edge, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buf = std::io::Cursor::new(Vec::new());
    rgb.write_to(&mut buf, image::ImageFormat::Jpeg)
        .map_err(|e| ScanError::Storage(format!("payload re-encode failed: {}", e)))?;
    Ok(buf.into_inner())
}

async fn prepare_payload(deps: &JobDeps, scan: &ScanRecord) -> Result<Arc<Vec<u8>>, ScanError> {
    if let Some(cached) = deps.payload_cache.get(&scan.image_digest) {
        tracing::debug!(scan_id = %scan.id, "Generation payload cache hit");
        return Ok(cached);
    }

    let original = deps.store.get(&scan.image_path).await?;
    let normalized = Arc::new(normalize_image(&original, deps.config.max_payload_edge)?);
    deps.payload_cache
        .insert(scan.image_digest.clone(), normalized.clone())
        .await;
    Ok(normalized)
}

// ============================================================================
// Simulation block writes
// ============================================================================

/// Re-read, mutate, and rewrite a scan's simulation block, then invalidate
/// its status-cache entry. Field-level update: nothing else on the row is
/// touched.
pub async fn write_simulation(
    pool: &PgPool,
    status_cache: &StatusCache,
    scan_id: Uuid,
    mutate: impl FnOnce(&mut SimulationData),
) -> Result<(), sqlx::Error> {
    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT simulation FROM scans WHERE id = $1")
            .bind(scan_id)
            .fetch_optional(pool)
            .await?;

    let current = match row {
        Some((value,)) => value,
        None => {
            tracing::warn!(scan_id = %scan_id, "Simulation write skipped: scan deleted");
            return Ok(());
        }
    };

    let mut data: SimulationData = serde_json::from_value(current).unwrap_or_default();
    mutate(&mut data);

    sqlx::query("UPDATE scans SET simulation = $1, updated_at = NOW() WHERE id = $2")
        .bind(serde_json::to_value(&data).unwrap_or(serde_json::json!({})))
        .bind(scan_id)
        .execute(pool)
        .await?;

    status_cache.invalidate(&scan_id).await;
    Ok(())
}

// ============================================================================
// Variant generation loop
// ============================================================================

async fn run_variant(
    generator: &dyn ImageGenerator,
    store: &dyn BlobStore,
    active: bool,
    payload: &[u8],
    scan_id: Uuid,
    breed: &str,
    profile: &BreedProfile,
    target: AgeTarget,
) -> Option<Result<String, ScanError>> {
    if !active {
        return None;
    }

    let prompt = breeds::aging_prompt(breed, profile, target);
    match generator.generate(payload, &prompt).await {
        Ok(bytes) => {
            let path = format!("sims/{}_{}.png", scan_id, target.key());
            match store.put(&path, &bytes).await {
                Ok(()) => Some(Ok(path)),
                Err(e) => Some(Err(e)),
            }
        }
        Err(e) => Some(Err(e.into())),
    }
}

/// Run the attempt loop for both variants.
///
/// Each attempt issues only the variants still missing, concurrently, and
/// waits for both to settle. Returns whatever succeeded plus the last error
/// seen, for the caller to judge.
pub async fn generate_variants(
    generator: &dyn ImageGenerator,
    store: &dyn BlobStore,
    payload: &[u8],
    scan_id: Uuid,
    breed: &str,
    profile: &BreedProfile,
    config: &SimulationConfig,
) -> (Option<String>, Option<String>, Option<ScanError>) {
    let mut one_year: Option<String> = None;
    let mut three_years: Option<String> = None;
    let mut last_error: Option<ScanError> = None;

    for attempt in 1..=config.variant_attempts {
        let (r1, r3) = tokio::join!(
            run_variant(
                generator,
                store,
                one_year.is_none(),
                payload,
                scan_id,
                breed,
                profile,
                AgeTarget::OneYear,
            ),
            run_variant(
                generator,
                store,
                three_years.is_none(),
                payload,
                scan_id,
                breed,
                profile,
                AgeTarget::ThreeYears,
            ),
        );

        for (slot, settled, target) in [
            (&mut one_year, r1, AgeTarget::OneYear),
            (&mut three_years, r3, AgeTarget::ThreeYears),
        ] {
            match settled {
                Some(Ok(path)) => {
                    tracing::info!(scan_id = %scan_id, target = target.key(), path = %path, "Variant generated");
                    *slot = Some(path);
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        scan_id = %scan_id,
                        target = target.key(),
                        attempt = attempt,
                        error = %e,
                        "Variant generation failed"
                    );
                    last_error = Some(e);
                }
                None => {}
            }
        }

        if one_year.is_some() && three_years.is_some() {
            break;
        }

        if attempt < config.variant_attempts {
            let delay = config.backoff_base_ms * 2u64.pow(attempt);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    (one_year, three_years, last_error)
}

// ============================================================================
// Job entry points
// ============================================================================

/// Run one age-progression job to completion and persist the outcome.
pub async fn run_simulation_job(deps: &JobDeps, scan_id: Uuid) -> Result<(), ScanError> {
    let scan: Option<ScanRecord> = sqlx::query_as("SELECT * FROM scans WHERE id = $1")
        .bind(scan_id)
        .fetch_optional(&deps.pool)
        .await
        .map_err(ScanError::Database)?;

    let scan = match scan {
        Some(s) => s,
        None => {
            tracing::warn!(scan_id = %scan_id, "Job skipped: scan deleted while queued");
            return Ok(());
        }
    };

    let profile = breeds::profile(&scan.breed);

    write_simulation(&deps.pool, &deps.status_cache, scan_id, |data| {
        data.status = SimulationStatus::Generating;
        data.breed_profile = Some(profile.clone());
        data.error = None;
    })
    .await
    .map_err(ScanError::Database)?;

    tracing::info!(scan_id = %scan_id, breed = %scan.breed, "Age progression started");

    let body = async {
        let payload = prepare_payload(deps, &scan).await?;
        Ok::<_, ScanError>(
            generate_variants(
                deps.generator.as_ref(),
                deps.store.as_ref(),
                &payload,
                scan_id,
                &scan.breed,
                &profile,
                &deps.config,
            )
            .await,
        )
    };

    match body.await {
        Ok((one_year, three_years, last_error)) => {
            if one_year.is_none() && three_years.is_none() {
                let error = last_error.unwrap_or(ScanError::ExternalService {
                    service: pawscan_core::Service::Generation,
                    failure: pawscan_core::ServiceFailure::Unavailable,
                });
                let message = error.user_message();
                write_simulation(&deps.pool, &deps.status_cache, scan_id, |data| {
                    data.status = SimulationStatus::Failed;
                    data.error = Some(message.clone());
                })
                .await
                .map_err(ScanError::Database)?;
                tracing::error!(scan_id = %scan_id, "Age progression failed on both variants");
                Err(error)
            } else {
                // Partial success is success: a missing variant stays null
                write_simulation(&deps.pool, &deps.status_cache, scan_id, |data| {
                    data.status = SimulationStatus::Complete;
                    data.one_year = one_year.clone();
                    data.three_years = three_years.clone();
                    data.error = None;
                })
                .await
                .map_err(ScanError::Database)?;
                tracing::info!(scan_id = %scan_id, "Age progression complete");
                Ok(())
            }
        }
        Err(e) => {
            let message = e.user_message();
            write_simulation(&deps.pool, &deps.status_cache, scan_id, |data| {
                data.status = SimulationStatus::Failed;
                data.error = Some(message.clone());
            })
            .await
            .map_err(ScanError::Database)?;
            tracing::error!(scan_id = %scan_id, error = %e, "Age progression job threw");
            Err(e)
        }
    }
}

/// Record a queue-level timeout as a failed state.
pub async fn record_job_timeout(deps: &JobDeps, scan_id: Uuid) {
    let message = ScanError::JobTimeout(deps.config.job_timeout_secs).user_message();
    if let Err(e) = write_simulation(&deps.pool, &deps.status_cache, scan_id, |data| {
        data.status = SimulationStatus::Failed;
        data.error = Some(message.clone());
    })
    .await
    {
        tracing::error!(scan_id = %scan_id, error = %e, "Failed to record job timeout");
    }
}

/// Reset a scan's simulation and re-dispatch it.
///
/// The only control the product exposes: unconditionally clears prior
/// variant paths and errors, flips the status back to queued, and enqueues.
/// Returns false if the scan does not exist.
pub async fn regenerate(
    pool: &PgPool,
    status_cache: &StatusCache,
    jobs: &JobSender,
    scan_id: Uuid,
) -> Result<bool, ScanError> {
    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM scans WHERE id = $1")
        .bind(scan_id)
        .fetch_optional(pool)
        .await
        .map_err(ScanError::Database)?;

    if exists.is_none() {
        return Ok(false);
    }

    write_simulation(pool, status_cache, scan_id, |data| {
        *data = SimulationData {
            status: SimulationStatus::Queued,
            ..SimulationData::default()
        };
    })
    .await
    .map_err(ScanError::Database)?;

    jobs.dispatch(scan_id).await;
    tracing::info!(scan_id = %scan_id, "Regenerate requested");
    Ok(true)
}

// ============================================================================
// TESTS
// ============================================================================
