//! Fast local breed classifier — HTTP client for the sidecar service
//!
//! Two operations:
//! - **predict** — top-1 breed plus a ranked top-5, confidence in 0..100
//! - **teach** — submit a verified (image, label) pair to the reference
//!   memory; the service decides whether it was added, updated or skipped
//!
//! The classifier is the cheap first stage of consensus. Its unavailability
//! is never fatal: the pipeline degrades to identifier-only.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::ClassifierConfig;
use crate::models::correction::TeachStatus;
use crate::models::scan::BreedAlternative;

/// Top-1 prediction plus ranked runners-up, confidence scaled to 0..100.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierPrediction {
    pub breed: String,
    pub confidence: f64,
    pub top_5: Vec<BreedAlternative>,
}

/// Outcome of one teaching submission.
#[derive(Debug, Clone)]
pub struct TeachOutcome {
    pub status: TeachStatus,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Classifier service error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Classifier response missing prediction")]
    MissingPrediction,

    #[error("Classifier disabled by configuration")]
    Disabled,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

/// Abstraction over the fast classifier, so the consensus engine can be
/// exercised against mocks.
#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    async fn predict(&self, image: &[u8]) -> Result<ClassifierPrediction, ClassifierError>;

    /// Submit a corrected (image, label) pair to the teaching interface.
    async fn teach(&self, image: &[u8], label: &str) -> Result<TeachOutcome, ClassifierError>;
}

// ============================================================================
// Wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct PredictRequest {
    image: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    breed: Option<String>,
    confidence: Option<f64>,
    #[serde(default)]
    top_5: Vec<RawAlternative>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAlternative {
    breed: String,
    confidence: f64,
}

#[derive(Debug, Serialize)]
struct LearnRequest {
    image: String,
    label: String,
}

#[derive(Debug, Deserialize)]
struct LearnResponse {
    status: Option<String>,
    #[serde(default)]
    message: String,
    error: Option<String>,
}

// ============================================================================
// HttpClassifierClient
// ============================================================================

/// HTTP client for the classifier sidecar.
#[derive(Debug, Clone)]
pub struct HttpClassifierClient {
    client: Client,
    config: ClassifierConfig,
    base_url: String,
}

impl HttpClassifierClient {
    pub fn new(config: ClassifierConfig) -> Result<Self, ClassifierError> {
        let base_url = config.base_url.clone();
        Self::with_base_url(config, base_url)
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: ClassifierConfig,
        base_url: String,
    ) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    async fn predict_once(&self, image_b64: &str) -> Result<ClassifierPrediction, ClassifierError> {
        let url = format!("{}/predict", self.base_url);
        let request = PredictRequest {
            image: image_b64.to_string(),
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), body = %body, "Classifier API error");
            return Err(ClassifierError::Api {
                code: status.as_u16(),
                message: body,
            });
        }

        let parsed: PredictResponse = response.json().await?;

        if let Some(err) = parsed.error {
            return Err(ClassifierError::Api {
                code: 200,
                message: err,
            });
        }

        let breed = parsed.breed.ok_or(ClassifierError::MissingPrediction)?;
        let confidence = parsed.confidence.ok_or(ClassifierError::MissingPrediction)?;

        // Service reports softmax probabilities in 0..1
        Ok(ClassifierPrediction {
            breed,
            confidence: (confidence * 100.0).clamp(0.0, 100.0),
            top_5: parsed
                .top_5
                .into_iter()
                .map(|a| BreedAlternative {
                    breed: a.breed,
                    confidence: (a.confidence * 100.0).clamp(0.0, 100.0),
                })
                .collect(),
        })
    }
}

#[async_trait]
impl ClassifierBackend for HttpClassifierClient {
    async fn predict(&self, image: &[u8]) -> Result<ClassifierPrediction, ClassifierError> {
        if !self.config.enabled {
            return Err(ClassifierError::Disabled);
        }

        let image_b64 = base64::engine::general_purpose::STANDARD.encode(image);

        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || self.predict_once(&image_b64)).await;

        match result {
            Ok(prediction) => Ok(prediction),
            Err(e) => {
                tracing::warn!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All classifier predict attempts failed"
                );
                Err(ClassifierError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    async fn teach(&self, image: &[u8], label: &str) -> Result<TeachOutcome, ClassifierError> {
        if !self.config.enabled {
            return Err(ClassifierError::Disabled);
        }

        let url = format!("{}/learn", self.base_url);
        let request = LearnRequest {
            image: base64::engine::general_purpose::STANDARD.encode(image),
            label: label.to_string(),
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), body = %body, "Teaching API error");
            return Err(ClassifierError::Api {
                code: status.as_u16(),
                message: body,
            });
        }

        let parsed: LearnResponse = response.json().await?;

        if let Some(err) = parsed.error {
            return Err(ClassifierError::Api {
                code: 200,
                message: err,
            });
        }

        let status = parsed
            .status
            .as_deref()
            .and_then(TeachStatus::parse)
            .unwrap_or(TeachStatus::Error);

        Ok(TeachOutcome {
            status,
            message: parsed.message,
        })
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

    fn test_config() -> ClassifierConfig {
        ClassifierConfig {
            enabled: true,
            base_url: String::new(),
            connect_timeout_secs: 2,
            request_timeout_secs: 5,
            max_retries: 2,
            retry_delay_ms: 10,
        }
    }

    fn mock_predict_response() -> serde_json::Value {
        serde_json::json!({
            "breed": "Labrador Retriever",
            "confidence": 0.91,
            "top_5": [
                { "breed": "Labrador Retriever", "confidence": 0.91 },
                { "breed": "Golden Retriever", "confidence": 0.05 },
                { "breed": "Flat-Coated Retriever", "confidence": 0.02 }
            ]
        })
    }

    #[tokio::test]
    async fn test_predict_scales_confidence_to_percent() {
        let mock_server = MockServer::start().await;
        let client = HttpClassifierClient::with_base_url(test_config(), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_predict_response()))
            .mount(&mock_server)
            .await;

        let prediction = client.predict(b"jpeg bytes").await.expect("predict failed");
        assert_eq!(prediction.breed, "Labrador Retriever");
        assert!((prediction.confidence - 91.0).abs() < 1e-9);
        assert_eq!(prediction.top_5.len(), 3);
        assert!((prediction.top_5[1].confidence - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_predict_retries_then_exhausts_on_500() {
        let mock_server = MockServer::start().await;
        let client = HttpClassifierClient::with_base_url(test_config(), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let result = client.predict(b"jpeg bytes").await;
        match result {
            Err(ClassifierError::RetryExhausted { attempts }) => assert_eq!(attempts, 2),
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_predict_recovers_after_transient_failure() {
        let mock_server = MockServer::start().await;
        let client = HttpClassifierClient::with_base_url(test_config(), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_predict_response()))
            .mount(&mock_server)
            .await;

        let prediction = client.predict(b"jpeg bytes").await.expect("predict failed");
        assert_eq!(prediction.breed, "Labrador Retriever");
    }

    #[tokio::test]
    async fn test_predict_disabled_returns_error() {
        let mut config = test_config();
        config.enabled = false;
        let client = HttpClassifierClient::with_base_url(config, "http://127.0.0.1:1".to_string())
            .expect("Failed to create client");

        let result = client.predict(b"jpeg bytes").await;
        assert!(matches!(result, Err(ClassifierError::Disabled)));
    }

    #[tokio::test]
    async fn test_teach_maps_service_statuses() {
        for (wire, expected) in [
            ("added", TeachStatus::Added),
            ("updated", TeachStatus::Updated),
            ("skipped", TeachStatus::Skipped),
        ] {
            let mock_server = MockServer::start().await;
            let client = HttpClassifierClient::with_base_url(test_config(), mock_server.uri())
                .expect("Failed to create client");

            Mock::given(method("POST"))
                .and(path("/learn"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "status": wire,
                    "message": "ok"
                })))
                .mount(&mock_server)
                .await;

            let outcome = client
                .teach(b"jpeg bytes", "Golden Retriever")
                .await
                .expect("teach failed");
            assert_eq!(outcome.status, expected, "wire status {}", wire);
        }
    }

    #[tokio::test]
    async fn test_teach_unknown_status_maps_to_error() {
        let mock_server = MockServer::start().await;
        let client = HttpClassifierClient::with_base_url(test_config(), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/learn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "mystery",
                "message": "?"
            })))
            .mount(&mock_server)
            .await;

        let outcome = client.teach(b"jpeg bytes", "Beagle").await.expect("teach failed");
        assert_eq!(outcome.status, TeachStatus::Error);
    }

    #[tokio::test]
    async fn test_teach_service_error_body_surfaces_as_api_error() {
        let mock_server = MockServer::start().await;
        let client = HttpClassifierClient::with_base_url(test_config(), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/learn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "reference file corrupt"
            })))
            .mount(&mock_server)
            .await;

        let result = client.teach(b"jpeg bytes", "Beagle").await;
        match result {
            Err(ClassifierError::Api { message, .. }) => {
                assert!(message.contains("reference file corrupt"))
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }
}
