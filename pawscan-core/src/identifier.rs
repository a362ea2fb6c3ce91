//! Deep breed identifier — vision-language model client
//!
//! Second stage of consensus. Receives the image plus an optional hint from
//! the fast classifier and returns a structured identification: primary
//! breed, category, ranked alternatives, and the derived description /
//! origin / health blocks.
//!
//! Two policies live here:
//! - **Hint tiering** — the classifier's output is framed by confidence tier
//!   (strong / weak / suppressed) before it reaches the identifier prompt.
//!   An overconfident wrong hint is more harmful than no hint.
//! - **Confidence calibration** — model self-reported confidence is
//!   systematically overconfident; a bounded jitter is applied and results
//!   are clamped so a primary never reads as exactly 100 or below a
//!   believable floor.

use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::classifier::ClassifierPrediction;
use crate::config::IdentifierConfig;
use crate::error::{ScanError, Service, ServiceFailure};
use crate::models::scan::BreedAlternative;

/// Primary predictions are clamped into this range.
pub const PRIMARY_CONFIDENCE_RANGE: (f64, f64) = (65.0, 98.0);

/// Alternative predictions are clamped into this range.
pub const ALTERNATIVE_CONFIDENCE_RANGE: (f64, f64) = (15.0, 84.0);

/// Bounded jitter applied to self-reported confidence before clamping.
const CONFIDENCE_JITTER: f64 = 3.0;

/// Maximum ranked alternatives kept on a scan.
pub const MAX_ALTERNATIVES: usize = 5;

// ============================================================================
// Hint tiering
// ============================================================================

/// How strongly the classifier's output is framed in the identifier prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintTier {
    /// ≥ 98% — presented as a strong starting point.
    Strong,
    /// 75–97% — presented as weak, explicitly not to anchor on.
    Weak,
    /// < 75% — hint suppressed entirely; the identifier works unguided.
    Suppressed,
}

impl HintTier {
    pub fn for_confidence(confidence: f64) -> Self {
        if confidence >= 98.0 {
            HintTier::Strong
        } else if confidence >= 75.0 {
            HintTier::Weak
        } else {
            HintTier::Suppressed
        }
    }
}

// ============================================================================
// Breed categories and name cleanup
// ============================================================================

/// Mutually exclusive classification of the returned breed name, evaluated
/// in fixed priority order: landrace, then recognized designer cross, then
/// purebred, with unnamed two-parent mixes last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreedCategory {
    NativeLandrace,
    DesignerHybrid,
    Purebred,
    UnnamedMix,
}

const LANDRACE_TERMS: &[&str] = &[
    "landrace",
    "pariah",
    "village dog",
    "desi dog",
    "indog",
    "aspin",
    "askal",
];

const HYBRID_NAMES: &[&str] = &[
    "puggle", "pomsky", "chiweenie", "chorkie", "labsky", "horgi", "shepsky", "borador",
    "beabull", "cavachon", "morkie", "shorkie", "goldador",
];

fn has_mix_markers(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains('/')
        || lower.contains(" x ")
        || lower.ends_with(" mix")
        || lower.ends_with(" cross")
        || lower.ends_with("mixed breed")
}

/// Classify a raw breed name. Priority order matters: a name matching the
/// landrace heuristics is never re-examined for mix markers.
pub fn classify_breed_name(name: &str) -> BreedCategory {
    let lower = name.to_lowercase();

    if LANDRACE_TERMS.iter().any(|t| lower.contains(t)) {
        return BreedCategory::NativeLandrace;
    }

    let known_hybrid = HYBRID_NAMES.iter().any(|h| lower.contains(h));
    if known_hybrid || lower.ends_with("doodle") || lower.ends_with("poo") {
        return BreedCategory::DesignerHybrid;
    }

    if has_mix_markers(&lower) {
        return BreedCategory::UnnamedMix;
    }

    BreedCategory::Purebred
}

/// Normalize a raw breed string according to its category.
///
/// Recognized designer-hybrid names pass through unmodified; every other
/// category is stripped of mix/cross suffixes, slash-separated alternates,
/// and " x <breed>" suffixes.
pub fn clean_breed_name(raw: &str, category: BreedCategory) -> String {
    let trimmed = raw.trim();
    if category == BreedCategory::DesignerHybrid {
        return trimmed.to_string();
    }

    let mut name = trimmed.split('/').next().unwrap_or(trimmed).trim().to_string();

    if let Ok(re) = Regex::new(r"(?i)\s+x\s+\S.*$") {
        name = re.replace(&name, "").to_string();
    }
    if let Ok(re) = Regex::new(r"(?i)[\s-]+(mixed breed|mix|cross)\s*$") {
        name = re.replace(&name, "").to_string();
    }

    name.trim().to_string()
}

// ============================================================================
// Confidence calibration
// ============================================================================

/// Jitter and clamp a self-reported primary confidence into [65, 98].
pub fn calibrate_primary(self_reported: f64) -> f64 {
    let jitter: f64 = rand::thread_rng().gen_range(-CONFIDENCE_JITTER..=CONFIDENCE_JITTER);
    (self_reported + jitter).clamp(PRIMARY_CONFIDENCE_RANGE.0, PRIMARY_CONFIDENCE_RANGE.1)
}

/// Jitter and clamp a self-reported alternative confidence into [15, 84].
pub fn calibrate_alternative(self_reported: f64) -> f64 {
    let jitter: f64 = rand::thread_rng().gen_range(-CONFIDENCE_JITTER..=CONFIDENCE_JITTER);
    (self_reported + jitter).clamp(
        ALTERNATIVE_CONFIDENCE_RANGE.0,
        ALTERNATIVE_CONFIDENCE_RANGE.1,
    )
}

// ============================================================================
// Result and error types
// ============================================================================

/// Structured identification returned by the deep model, post-processed:
/// breed cleaned by category, confidences calibrated, alternatives deduped
/// against the primary.
#[derive(Debug, Clone)]
pub struct Identification {
    pub breed: String,
    pub confidence: f64,
    pub category: BreedCategory,
    pub alternatives: Vec<BreedAlternative>,
    pub description: Option<String>,
    pub origin: serde_json::Value,
    pub health_risks: serde_json::Value,
}

#[derive(Error, Debug)]
pub enum IdentifierError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Identifier API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Identifier rate limited")]
    RateLimited,

    #[error("Content blocked by the identifier: {reason}")]
    Blocked { reason: String },

    #[error("Identifier returned unparseable output: {0}")]
    Parse(String),

    #[error("Missing API key")]
    MissingApiKey,
}

impl IdentifierError {
    /// Transient failures worth retrying; content blocks and parse failures
    /// are deterministic and are not.
    fn is_transient(&self) -> bool {
        match self {
            IdentifierError::Http(_) | IdentifierError::RateLimited => true,
            IdentifierError::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

impl From<IdentifierError> for ScanError {
    fn from(e: IdentifierError) -> Self {
        match e {
            IdentifierError::Parse(msg) => ScanError::Parse(msg),
            IdentifierError::RateLimited => ScanError::ExternalService {
                service: Service::Identifier,
                failure: ServiceFailure::RateLimited,
            },
            IdentifierError::Blocked { .. } => ScanError::ExternalService {
                service: Service::Identifier,
                failure: ServiceFailure::ContentBlocked,
            },
            IdentifierError::Http(_) => ScanError::ExternalService {
                service: Service::Identifier,
                failure: ServiceFailure::Network,
            },
            IdentifierError::Api { .. } | IdentifierError::MissingApiKey => {
                ScanError::ExternalService {
                    service: Service::Identifier,
                    failure: ServiceFailure::Unavailable,
                }
            }
        }
    }
}

/// Abstraction over the deep identifier, so the pipeline can be exercised
/// against mocks.
#[async_trait]
pub trait IdentifierBackend: Send + Sync {
    async fn identify(
        &self,
        image: &[u8],
        hint: Option<&ClassifierPrediction>,
    ) -> Result<Identification, IdentifierError>;

    /// Binary pre-classification gate. Callers apply the fail-open policy:
    /// a transport error here must allow the image through.
    async fn is_dog(&self, image: &[u8]) -> Result<bool, IdentifierError>;
}

// ============================================================================
// Prompt construction
// ============================================================================

/// Build the identification prompt, framing the classifier hint by tier.
pub fn identification_prompt(hint: Option<&ClassifierPrediction>) -> String {
    let mut prompt = String::from(
        "Identify the dog breed using professional canine morphology analysis \
         (ears, skull shape, coat texture, markings, tail carriage, body proportion). \
         If the dog is a recognized designer cross, return the cross name itself. \
         Respond with strict JSON only, no prose, in this shape:\n\
         {\"breed\": string, \"confidence\": number (0-100), \
         \"alternatives\": [{\"breed\": string, \"confidence\": number}], \
         \"description\": string, \
         \"origin\": {\"region\": string, \"history\": string}, \
         \"health_risks\": [{\"condition\": string, \"risk\": string}]}\n\
         List up to five alternatives, most likely first.",
    );

    if let Some(h) = hint {
        match HintTier::for_confidence(h.confidence) {
            HintTier::Strong => {
                prompt.push_str(&format!(
                    "\nA fast local classifier identified this dog as \"{}\" with {:.0}% \
                     confidence. Treat that as a strong starting point and verify it \
                     against the visible morphology.",
                    h.breed, h.confidence
                ));
            }
            HintTier::Weak => {
                prompt.push_str(&format!(
                    "\nA fast local classifier suggested \"{}\" ({:.0}%). Treat that as a \
                     weak hint only; do not anchor on it.",
                    h.breed, h.confidence
                ));
            }
            HintTier::Suppressed => {}
        }
    }

    prompt
}

fn dog_gate_prompt() -> &'static str {
    "Does this photo contain a dog? Respond with strict JSON only: {\"is_dog\": true} or {\"is_dog\": false}."
}

// ============================================================================
// Response parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawIdentification {
    breed: String,
    confidence: f64,
    #[serde(default)]
    alternatives: Vec<RawAlternative>,
    description: Option<String>,
    origin: Option<serde_json::Value>,
    health_risks: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawAlternative {
    breed: String,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct IsDogVerdict {
    is_dog: bool,
}

/// Parse model output text as JSON, with fallback extraction for responses
/// wrapped in a fenced code block or surrounded by prose.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    // Fenced ```json ... ``` block
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }

    // Last resort: first '{' to last '}'
    let open = trimmed.find('{')?;
    let close = trimmed.rfind('}')?;
    if close > open {
        Some(&trimmed[open..=close])
    } else {
        None
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, IdentifierError> {
    let json = extract_json(text)
        .ok_or_else(|| IdentifierError::Parse("no JSON object in model output".to_string()))?;
    serde_json::from_str(json).map_err(|e| IdentifierError::Parse(e.to_string()))
}

/// Post-process a raw identification: categorize, clean, calibrate, dedup.
fn finalize(raw: RawIdentification) -> Identification {
    let category = classify_breed_name(&raw.breed);
    let breed = clean_breed_name(&raw.breed, category);
    let confidence = calibrate_primary(raw.confidence);

    let mut alternatives: Vec<BreedAlternative> = Vec::new();
    for alt in raw.alternatives {
        let alt_category = classify_breed_name(&alt.breed);
        let alt_breed = clean_breed_name(&alt.breed, alt_category);
        if alt_breed.eq_ignore_ascii_case(&breed) || alt_breed.is_empty() {
            continue;
        }
        if alternatives
            .iter()
            .any(|a| a.breed.eq_ignore_ascii_case(&alt_breed))
        {
            continue;
        }
        alternatives.push(BreedAlternative {
            breed: alt_breed,
            confidence: calibrate_alternative(alt.confidence),
        });
        if alternatives.len() == MAX_ALTERNATIVES {
            break;
        }
    }

    Identification {
        breed,
        confidence,
        category,
        alternatives,
        description: raw.description,
        origin: raw.origin.unwrap_or(serde_json::Value::Null),
        health_risks: raw.health_risks.unwrap_or(serde_json::Value::Null),
    }
}

// ============================================================================
// Gemini wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    Image {
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Serialize)]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f64,
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiTextPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiTextPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// GeminiIdentifierClient
// ============================================================================

/// Deep identifier client — calls the Gemini generateContent API.
#[derive(Debug, Clone)]
pub struct GeminiIdentifierClient {
    client: Client,
    config: IdentifierConfig,
    api_key: String,
    base_url: String,
}

impl GeminiIdentifierClient {
    pub fn new(config: IdentifierConfig, api_key: Option<String>) -> Result<Self, IdentifierError> {
        Self::with_base_url(
            config,
            api_key,
            "https://generativelanguage.googleapis.com/v1beta".to_string(),
        )
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: IdentifierConfig,
        api_key: Option<String>,
        base_url: String,
    ) -> Result<Self, IdentifierError> {
        let api_key = api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            return Err(IdentifierError::MissingApiKey);
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            api_key,
            base_url,
        })
    }

    /// One generateContent round trip, returning the first candidate's text.
    async fn generate_text(&self, prompt: &str, image: &[u8]) -> Result<String, IdentifierError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.config.model, self.api_key
        );

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::Text {
                        text: prompt.to_string(),
                    },
                    GeminiPart::Image {
                        inline_data: GeminiInlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        },
                    },
                ],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.2,
                response_mime_type: "application/json".to_string(),
            },
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            return Err(IdentifierError::RateLimited);
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Identifier API error");
            return Err(IdentifierError::Api { code, message });
        }

        let body: GeminiResponse = response.json().await?;

        if let Some(reason) = body
            .prompt_feedback
            .and_then(|f| f.block_reason)
        {
            return Err(IdentifierError::Blocked { reason });
        }

        let candidate = body
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| IdentifierError::Parse("response has no candidates".to_string()))?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(IdentifierError::Blocked {
                reason: "SAFETY".to_string(),
            });
        }

        candidate
            .content
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| IdentifierError::Parse("candidate has no text part".to_string()))
    }

    async fn generate_with_retry(
        &self,
        prompt: &str,
        image: &[u8],
    ) -> Result<String, IdentifierError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        RetryIf::spawn(
            retry_strategy,
            || self.generate_text(prompt, image),
            IdentifierError::is_transient,
        )
        .await
        .map_err(|e| {
            tracing::error!(
                attempts = self.config.max_retries,
                error = %e,
                "Identifier call failed"
            );
            e
        })
    }
}

#[async_trait]
impl IdentifierBackend for GeminiIdentifierClient {
    async fn identify(
        &self,
        image: &[u8],
        hint: Option<&ClassifierPrediction>,
    ) -> Result<Identification, IdentifierError> {
        let prompt = identification_prompt(hint);
        let text = self.generate_with_retry(&prompt, image).await?;
        let raw: RawIdentification = parse_payload(&text)?;
        Ok(finalize(raw))
    }

    async fn is_dog(&self, image: &[u8]) -> Result<bool, IdentifierError> {
        let text = self.generate_with_retry(dog_gate_prompt(), image).await?;
        let verdict: IsDogVerdict = parse_payload(&text)?;
        Ok(verdict.is_dog)
    }
}

// ============================================================================
// TESTS
// ============================================================================
