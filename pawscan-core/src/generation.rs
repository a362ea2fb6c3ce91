//! Age-progression image generation — vision model client
//!
//! Single-shot by design: the age-progression job owns the retry loop, so a
//! failed call here is reported, not retried. The client only distinguishes
//! the failure modes the job and the user messaging care about.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::GenerationConfig;
use crate::error::{ScanError, Service, ServiceFailure};

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Generation rate limited")]
    RateLimited,

    #[error("Content blocked by the generation service: {reason}")]
    Blocked { reason: String },

    #[error("Response contained no image data")]
    MissingImage,

    #[error("Missing API key")]
    MissingApiKey,
}

impl From<GenerationError> for ScanError {
    fn from(e: GenerationError) -> Self {
        let failure = match e {
            GenerationError::RateLimited => ServiceFailure::RateLimited,
            GenerationError::Blocked { .. } => ServiceFailure::ContentBlocked,
            GenerationError::Http(_) => ServiceFailure::Network,
            GenerationError::Api { .. }
            | GenerationError::MissingImage
            | GenerationError::MissingApiKey => ServiceFailure::Unavailable,
        };
        ScanError::ExternalService {
            service: Service::Generation,
            failure,
        }
    }
}

/// Abstraction over the image-generation service.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one derived image from a normalized JPEG payload and a
    /// breed-aware instruction prompt. Returns raw image bytes.
    async fn generate(&self, image_jpeg: &[u8], prompt: &str)
        -> Result<Vec<u8>, GenerationError>;
}

// ============================================================================
// Gemini wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    #[serde(rename = "generationConfig")]
    generation_config: RequestGenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    Image { inline_data: RequestInlineData },
}

#[derive(Debug, Serialize)]
struct RequestInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct RequestGenerationConfig {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<ResponsePromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
struct ResponseInlineData {
    data: String,
}

#[derive(Debug, Deserialize)]
struct ResponsePromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// GeminiImageClient
// ============================================================================

/// Image-generation client — calls the Gemini generateContent API with an
/// image response modality.
#[derive(Debug, Clone)]
pub struct GeminiImageClient {
    client: Client,
    config: GenerationConfig,
    api_key: String,
    base_url: String,
}

impl GeminiImageClient {
    pub fn new(config: GenerationConfig, api_key: Option<String>) -> Result<Self, GenerationError> {
        Self::with_base_url(
            config,
            api_key,
            "https://generativelanguage.googleapis.com/v1beta".to_string(),
        )
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: GenerationConfig,
        api_key: Option<String>,
        base_url: String,
    ) -> Result<Self, GenerationError> {
        let api_key = api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            return Err(GenerationError::MissingApiKey);
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
}

#[async_trait]
impl ImageGenerator for GeminiImageClient {
    async fn generate(
        &self,
        image_jpeg: &[u8],
        prompt: &str,
    ) -> Result<Vec<u8>, GenerationError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.config.model, self.api_key
        );

        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::Text {
                        text: prompt.to_string(),
                    },
                    RequestPart::Image {
                        inline_data: RequestInlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(image_jpeg),
                        },
                    },
                ],
            }],
            generation_config: RequestGenerationConfig {
                response_modalities: vec!["IMAGE".to_string(), "TEXT".to_string()],
            },
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            return Err(GenerationError::RateLimited);
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Generation API error");
            return Err(GenerationError::Api { code, message });
        }

        let body: GenerateResponse = response.json().await?;

        if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(GenerationError::Blocked { reason });
        }

        let candidate = body
            .candidates
            .into_iter()
            .next()
            .ok_or(GenerationError::MissingImage)?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(GenerationError::Blocked {
                reason: "SAFETY".to_string(),
            });
        }

        let data = candidate
            .content
            .and_then(|c| c.parts.into_iter().find_map(|p| p.inline_data))
            .ok_or(GenerationError::MissingImage)?;

        base64::engine::general_purpose::STANDARD
            .decode(data.data.as_bytes())
            .map_err(|_| GenerationError::MissingImage)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> GenerationConfig {
        GenerationConfig {
            model: "image-model".to_string(),
            connect_timeout_secs: 2,
            request_timeout_secs: 5,
        }
    }

    fn test_client(base_url: String) -> GeminiImageClient {
        GeminiImageClient::with_base_url(test_config(), Some("test-api-key".to_string()), base_url)
            .expect("Failed to create client")
    }

    #[tokio::test]
    async fn test_generate_decodes_inline_image() {
        let mock_server = MockServer::start().await;
        let client = test_client(mock_server.uri());

        let png_bytes = b"\x89PNG fake image body";
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes);

        Mock::given(method("POST"))
            .and(path("/models/image-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [
                        { "text": "Here is your aged dog" },
                        { "inline_data": { "mime_type": "image/png", "data": encoded } }
                    ]},
                    "finishReason": "STOP"
                }]
            })))
            .mount(&mock_server)
            .await;

        let bytes = client
            .generate(b"jpeg bytes", "age this dog")
            .await
            .expect("generate failed");
        assert_eq!(bytes, png_bytes);
    }

    #[tokio::test]
    async fn test_generate_safety_block_is_typed() {
        let mock_server = MockServer::start().await;
        let client = test_client(mock_server.uri());

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "finishReason": "SAFETY" }]
            })))
            .mount(&mock_server)
            .await;

        let result = client.generate(b"jpeg bytes", "age this dog").await;
        assert!(matches!(result, Err(GenerationError::Blocked { .. })));
    }

    #[tokio::test]
    async fn test_generate_missing_image_part() {
        let mock_server = MockServer::start().await;
        let client = test_client(mock_server.uri());

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "no image, sorry" }] }
                }]
            })))
            .mount(&mock_server)
            .await;

        let result = client.generate(b"jpeg bytes", "age this dog").await;
        assert!(matches!(result, Err(GenerationError::MissingImage)));
    }

    #[tokio::test]
    async fn test_generate_quota_maps_to_rate_limited() {
        let mock_server = MockServer::start().await;
        let client = test_client(mock_server.uri());

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let result = client.generate(b"jpeg bytes", "age this dog").await;
        assert!(matches!(result, Err(GenerationError::RateLimited)));

        let scan_err: ScanError = result.unwrap_err().into();
        match scan_err {
            ScanError::ExternalService { service, failure } => {
                assert_eq!(service, Service::Generation);
                assert_eq!(failure, ServiceFailure::RateLimited);
            }
            other => panic!("Expected ExternalService, got {:?}", other),
        }
    }
}
