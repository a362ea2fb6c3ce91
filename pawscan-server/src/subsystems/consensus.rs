//! Breed consensus engine — two-stage reconciliation
//!
//! Stage 1 is the fast local classifier; stage 2 is the deep identifier,
//! prompted with the classifier's output as a tiered hint. The stages are
//! sequential by design: the identifier's prompt depends on the classifier's
//! output, so there is nothing to parallelize here.
//!
//! Arbitration: the identifier wins a disagreement only when it is confident
//! (≥ 75); otherwise the classifier's breed is kept and the reported
//! confidence is the larger of the two. Classifier unavailability degrades
//! to identifier-only; identifier failure after a successful classifier call
//! surfaces as a typed error.

use pawscan_core::classifier::{ClassifierBackend, ClassifierPrediction};
use pawscan_core::error::ScanError;
use pawscan_core::identifier::{
    Identification, IdentifierBackend, ALTERNATIVE_CONFIDENCE_RANGE, MAX_ALTERNATIVES,
    PRIMARY_CONFIDENCE_RANGE,
};
use pawscan_core::models::scan::{BreedAlternative, PredictionMethod};

/// Identifier confidence required to override a disagreeing classifier.
pub const OVERRIDE_CONFIDENCE_FLOOR: f64 = 75.0;

/// Classifier labels that frequently turn out to be one parent of a designer
/// cross. A disagreement on one of these is tagged as a hybrid override.
const HYBRID_PRONE: &[&str] = &[
    "poodle",
    "bichon",
    "maltese",
    "cocker spaniel",
    "golden retriever",
    "labrador",
    "schnauzer",
    "airedale",
    "yorkshire",
];

/// Final consensus result, ready to persist onto a scan.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub breed: String,
    pub confidence: f64,
    pub method: PredictionMethod,
    pub alternatives: Vec<BreedAlternative>,
    pub description: Option<String>,
    pub origin: serde_json::Value,
    pub health_risks: serde_json::Value,
}

pub struct BreedConsensusEngine<'a> {
    classifier: &'a dyn ClassifierBackend,
    identifier: &'a dyn IdentifierBackend,
}

fn is_hybrid_prone(breed: &str) -> bool {
    let lower = breed.to_lowercase();
    HYBRID_PRONE.iter().any(|b| lower.contains(b))
}

fn clamp_primary(confidence: f64) -> f64 {
    confidence.clamp(PRIMARY_CONFIDENCE_RANGE.0, PRIMARY_CONFIDENCE_RANGE.1)
}

fn clamp_alternative(confidence: f64) -> f64 {
    confidence.clamp(
        ALTERNATIVE_CONFIDENCE_RANGE.0,
        ALTERNATIVE_CONFIDENCE_RANGE.1,
    )
}

/// Clamp, dedup against the primary and each other, cap the count.
fn shape_alternatives(primary: &str, raw: Vec<BreedAlternative>) -> Vec<BreedAlternative> {
    let mut shaped: Vec<BreedAlternative> = Vec::new();
    for alt in raw {
        if alt.breed.eq_ignore_ascii_case(primary) || alt.breed.is_empty() {
            continue;
        }
        if shaped
            .iter()
            .any(|a| a.breed.eq_ignore_ascii_case(&alt.breed))
        {
            continue;
        }
        shaped.push(BreedAlternative {
            breed: alt.breed,
            confidence: clamp_alternative(alt.confidence),
        });
        if shaped.len() == MAX_ALTERNATIVES {
            break;
        }
    }
    shaped
}

impl<'a> BreedConsensusEngine<'a> {
    pub fn new(classifier: &'a dyn ClassifierBackend, identifier: &'a dyn IdentifierBackend) -> Self {
        Self {
            classifier,
            identifier,
        }
    }

    pub async fn run(&self, image: &[u8]) -> Result<ConsensusOutcome, ScanError> {
        // Stage 1: fast classifier. Unavailability is non-fatal.
        let prediction = match self.classifier.predict(image).await {
            Ok(p) => {
                tracing::info!(breed = %p.breed, confidence = p.confidence, "Classifier prediction");
                Some(p)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Classifier unavailable — degrading to identifier-only");
                None
            }
        };

        // Stage 2: deep identifier, hinted by the classifier where available.
        // If the classifier already failed, an identifier failure here is the
        // pipeline-level fatal case.
        let identification = self.identifier.identify(image, prediction.as_ref()).await?;
        tracing::info!(
            breed = %identification.breed,
            confidence = identification.confidence,
            category = ?identification.category,
            "Identifier verdict"
        );

        match prediction {
            None => Ok(Self::identifier_verbatim(identification)),
            Some(p) => Ok(Self::arbitrate(p, identification)),
        }
    }

    /// Degraded path: the identifier's result stands alone, under its own tag.
    fn identifier_verbatim(id: Identification) -> ConsensusOutcome {
        ConsensusOutcome {
            breed: id.breed,
            confidence: clamp_primary(id.confidence),
            method: PredictionMethod::GeminiOverride,
            alternatives: id.alternatives,
            description: id.description,
            origin: id.origin,
            health_risks: id.health_risks,
        }
    }

    fn arbitrate(prediction: ClassifierPrediction, id: Identification) -> ConsensusOutcome {
        let disagrees = !id.breed.eq_ignore_ascii_case(&prediction.breed);

        if disagrees && id.confidence >= OVERRIDE_CONFIDENCE_FLOOR {
            let method = if is_hybrid_prone(&prediction.breed) {
                PredictionMethod::GeminiHybridOverride
            } else {
                PredictionMethod::GeminiOverride
            };
            tracing::info!(
                classifier = %prediction.breed,
                identifier = %id.breed,
                method = method.as_str(),
                "Identifier overrode classifier"
            );
            let mut alternatives = id.alternatives;
            // The rejected classifier breed is still a plausible runner-up
            alternatives.push(BreedAlternative {
                breed: prediction.breed,
                confidence: prediction.confidence,
            });
            ConsensusOutcome {
                alternatives: shape_alternatives(&id.breed, alternatives),
                breed: id.breed,
                confidence: clamp_primary(id.confidence),
                method,
                description: id.description,
                origin: id.origin,
                health_risks: id.health_risks,
            }
        } else {
            // Agreement, or a disagreement the identifier isn't sure about:
            // the classifier's breed stands, blending in the identifier's
            // confidence when it is the stronger signal.
            let confidence = clamp_primary(prediction.confidence.max(id.confidence));
            ConsensusOutcome {
                alternatives: shape_alternatives(&prediction.breed, prediction.top_5),
                breed: prediction.breed,
                confidence,
                method: PredictionMethod::MlGeminiConfirmed,
                description: id.description,
                origin: id.origin,
                health_risks: id.health_risks,
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pawscan_core::classifier::{ClassifierError, TeachOutcome};
    use pawscan_core::identifier::{BreedCategory, IdentifierError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // Mock backends (no HTTP)
    // ------------------------------------------------------------------

    struct MockClassifier {
        result: Option<ClassifierPrediction>,
        calls: AtomicUsize,
    }

    impl MockClassifier {
        fn up(breed: &str, confidence: f64) -> Self {
            Self {
                result: Some(ClassifierPrediction {
                    breed: breed.to_string(),
                    confidence,
                    top_5: vec![],
                }),
                calls: AtomicUsize::new(0),
            }
        }

        fn down() -> Self {
            Self {
                result: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn with_top_5(mut self, top_5: Vec<(&str, f64)>) -> Self {
            if let Some(p) = self.result.as_mut() {
                p.top_5 = top_5
                    .into_iter()
                    .map(|(b, c)| BreedAlternative {
                        breed: b.to_string(),
                        confidence: c,
                    })
                    .collect();
            }
            self
        }
    }

    #[async_trait]
    impl ClassifierBackend for MockClassifier {
        async fn predict(&self, _image: &[u8]) -> Result<ClassifierPrediction, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .ok_or(ClassifierError::RetryExhausted { attempts: 2 })
        }

        async fn teach(&self, _image: &[u8], _label: &str) -> Result<TeachOutcome, ClassifierError> {
            unimplemented!("not exercised by consensus tests")
        }
    }

    struct MockIdentifier {
        result: Option<Identification>,
        calls: AtomicUsize,
        last_hint: Mutex<Option<ClassifierPrediction>>,
    }

    impl MockIdentifier {
        fn up(breed: &str, confidence: f64) -> Self {
            Self {
                result: Some(Identification {
                    breed: breed.to_string(),
                    confidence,
                    category: BreedCategory::Purebred,
                    alternatives: vec![],
                    description: Some("A good dog.".to_string()),
                    origin: serde_json::json!({"region": "Europe"}),
                    health_risks: serde_json::json!([]),
                }),
                calls: AtomicUsize::new(0),
                last_hint: Mutex::new(None),
            }
        }

        fn down() -> Self {
            Self {
                result: None,
                calls: AtomicUsize::new(0),
                last_hint: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl IdentifierBackend for MockIdentifier {
        async fn identify(
            &self,
            _image: &[u8],
            hint: Option<&ClassifierPrediction>,
        ) -> Result<Identification, IdentifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_hint.lock().unwrap() = hint.cloned();
            self.result.clone().ok_or(IdentifierError::Api {
                code: 503,
                message: "down".to_string(),
            })
        }

        async fn is_dog(&self, _image: &[u8]) -> Result<bool, IdentifierError> {
            Ok(true)
        }
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_agreement_confirms_with_max_confidence() {
        // Classifier ("Labrador", 91), identifier ("Labrador", 88)
        let classifier = MockClassifier::up("Labrador", 91.0);
        let identifier = MockIdentifier::up("Labrador", 88.0);
        let engine = BreedConsensusEngine::new(&classifier, &identifier);

        let outcome = engine.run(b"jpeg").await.expect("consensus failed");
        assert_eq!(outcome.breed, "Labrador");
        assert_eq!(outcome.method, PredictionMethod::MlGeminiConfirmed);
        assert!((outcome.confidence - 91.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_confident_disagreement_overrides() {
        let classifier = MockClassifier::up("Beagle", 91.0);
        let identifier = MockIdentifier::up("Harrier", 85.0);
        let engine = BreedConsensusEngine::new(&classifier, &identifier);

        let outcome = engine.run(b"jpeg").await.unwrap();
        assert_eq!(outcome.breed, "Harrier");
        assert_eq!(outcome.method, PredictionMethod::GeminiOverride);
        // rejected classifier breed kept as a runner-up
        assert!(outcome
            .alternatives
            .iter()
            .any(|a| a.breed == "Beagle"));
    }

    #[tokio::test]
    async fn test_unsure_disagreement_keeps_classifier() {
        let classifier = MockClassifier::up("Beagle", 91.0);
        let identifier = MockIdentifier::up("Harrier", 70.0);
        let engine = BreedConsensusEngine::new(&classifier, &identifier);

        let outcome = engine.run(b"jpeg").await.unwrap();
        assert_eq!(outcome.breed, "Beagle");
        assert_eq!(outcome.method, PredictionMethod::MlGeminiConfirmed);
        assert!((outcome.confidence - 91.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_hybrid_prone_breed_gets_hybrid_override_tag() {
        let classifier = MockClassifier::up("Standard Poodle", 90.0);
        let identifier = MockIdentifier::up("Goldendoodle", 88.0);
        let engine = BreedConsensusEngine::new(&classifier, &identifier);

        let outcome = engine.run(b"jpeg").await.unwrap();
        assert_eq!(outcome.breed, "Goldendoodle");
        assert_eq!(outcome.method, PredictionMethod::GeminiHybridOverride);
    }

    #[tokio::test]
    async fn test_case_insensitive_agreement_is_not_a_disagreement() {
        let classifier = MockClassifier::up("labrador retriever", 80.0);
        let identifier = MockIdentifier::up("Labrador Retriever", 95.0);
        let engine = BreedConsensusEngine::new(&classifier, &identifier);

        let outcome = engine.run(b"jpeg").await.unwrap();
        assert_eq!(outcome.breed, "labrador retriever");
        assert_eq!(outcome.method, PredictionMethod::MlGeminiConfirmed);
        assert!((outcome.confidence - 95.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_classifier_down_degrades_to_identifier_only() {
        let classifier = MockClassifier::down();
        let identifier = MockIdentifier::up("Vizsla", 90.0);
        let engine = BreedConsensusEngine::new(&classifier, &identifier);

        let outcome = engine.run(b"jpeg").await.unwrap();
        assert_eq!(outcome.breed, "Vizsla");
        assert_eq!(outcome.method, PredictionMethod::GeminiOverride);
        // the identifier ran unguided
        assert!(identifier.last_hint.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_both_down_is_fatal() {
        let classifier = MockClassifier::down();
        let identifier = MockIdentifier::down();
        let engine = BreedConsensusEngine::new(&classifier, &identifier);

        let result = engine.run(b"jpeg").await;
        assert!(matches!(result, Err(ScanError::ExternalService { .. })));
    }

    #[tokio::test]
    async fn test_hint_carries_classifier_output() {
        let classifier = MockClassifier::up("Labrador", 91.0);
        let identifier = MockIdentifier::up("Labrador", 88.0);
        let engine = BreedConsensusEngine::new(&classifier, &identifier);

        engine.run(b"jpeg").await.unwrap();
        let hint = identifier.last_hint.lock().unwrap().clone().expect("hint missing");
        assert_eq!(hint.breed, "Labrador");
        assert!((hint.confidence - 91.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_alternatives_clamped_and_deduped() {
        let classifier = MockClassifier::up("Beagle", 91.0).with_top_5(vec![
            ("Beagle", 91.0),
            ("Harrier", 5.0),
            ("harrier", 4.0),
            ("English Foxhound", 2.0),
        ]);
        let identifier = MockIdentifier::up("Beagle", 88.0);
        let engine = BreedConsensusEngine::new(&classifier, &identifier);

        let outcome = engine.run(b"jpeg").await.unwrap();
        assert_eq!(outcome.alternatives.len(), 2);
        for alt in &outcome.alternatives {
            assert!(!alt.breed.eq_ignore_ascii_case(&outcome.breed));
            assert!((15.0..=84.0).contains(&alt.confidence));
        }
    }

    #[tokio::test]
    async fn test_primary_confidence_stays_in_range() {
        // Max-blend of a near-certain classifier must still clamp to 98
        let classifier = MockClassifier::up("Beagle", 99.5);
        let identifier = MockIdentifier::up("Beagle", 90.0);
        let engine = BreedConsensusEngine::new(&classifier, &identifier);

        let outcome = engine.run(b"jpeg").await.unwrap();
        assert!((65.0..=98.0).contains(&outcome.confidence));
    }
}
