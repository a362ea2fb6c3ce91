use thiserror::Error;

/// External model service involved in a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Classifier,
    Identifier,
    Generation,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Classifier => "classifier",
            Service::Identifier => "identifier",
            Service::Generation => "generation",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an external service call failed. Distinguished for user messaging:
/// "service down" vs "content blocked" vs "quota exceeded".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceFailure {
    Unavailable,
    RateLimited,
    ContentBlocked,
    Network,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid upload: {0}")]
    Validation(String),

    #[error("No dog detected in the image")]
    NotADog,

    #[error("{service} service failure: {failure:?}")]
    ExternalService {
        service: Service,
        failure: ServiceFailure,
    },

    #[error("Unparseable model output: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Age progression exceeded {0}s wall clock")]
    JobTimeout(u64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// User-facing message. Never names the upstream provider and never
    /// includes raw error text from an external service.
    pub fn user_message(&self) -> String {
        match self {
            ScanError::Validation(msg) => msg.clone(),
            ScanError::NotADog => {
                "We couldn't find a dog in this photo. Please try another picture.".to_string()
            }
            ScanError::ExternalService { failure, .. } => match failure {
                ServiceFailure::Unavailable => {
                    "The breed analysis service is temporarily unavailable. Please try again later."
                        .to_string()
                }
                ServiceFailure::RateLimited => {
                    "The analysis service is temporarily busy. Please try again in a few minutes."
                        .to_string()
                }
                ServiceFailure::ContentBlocked => {
                    "This image couldn't be processed. Please try a different photo.".to_string()
                }
                ServiceFailure::Network => {
                    "A network issue interrupted the analysis. Please try again.".to_string()
                }
            },
            ScanError::Parse(_) => {
                "We were unable to identify a breed from this photo. Please try again.".to_string()
            }
            ScanError::Storage(_) => "We couldn't save your photo. Please try again.".to_string(),
            ScanError::JobTimeout(_) => {
                "Age progression took too long and was stopped. You can regenerate it.".to_string()
            }
            ScanError::Database(_) | ScanError::Config(_) | ScanError::Io(_) => {
                "Something went wrong on our side. Please try again.".to_string()
            }
        }
    }

    /// Terminal errors are reported to the caller immediately, with no retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanError::Validation(_) | ScanError::NotADog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_never_leak_provider_names() {
        let errors = vec![
            ScanError::NotADog,
            ScanError::ExternalService {
                service: Service::Identifier,
                failure: ServiceFailure::Unavailable,
            },
            ScanError::ExternalService {
                service: Service::Generation,
                failure: ServiceFailure::ContentBlocked,
            },
            ScanError::ExternalService {
                service: Service::Classifier,
                failure: ServiceFailure::RateLimited,
            },
            ScanError::Parse("candidates[0] missing".to_string()),
            ScanError::Storage("disk full at /var/uploads".to_string()),
            ScanError::JobTimeout(180),
        ];

        for e in errors {
            let msg = e.user_message().to_lowercase();
            for leaked in ["gemini", "google", "convnext", "candidates", "/var"] {
                assert!(
                    !msg.contains(leaked),
                    "user message for {:?} leaks '{}': {}",
                    e,
                    leaked,
                    msg
                );
            }
        }
    }

    #[test]
    fn test_validation_message_passes_through() {
        let e = ScanError::Validation("Image exceeds the 10 MB limit".to_string());
        assert_eq!(e.user_message(), "Image exceeds the 10 MB limit");
        assert!(e.is_terminal());
    }

    #[test]
    fn test_quota_and_outage_map_to_distinct_messages() {
        let busy = ScanError::ExternalService {
            service: Service::Identifier,
            failure: ServiceFailure::RateLimited,
        };
        let down = ScanError::ExternalService {
            service: Service::Identifier,
            failure: ServiceFailure::Unavailable,
        };
        assert_ne!(busy.user_message(), down.user_message());
    }

    #[test]
    fn test_external_service_is_not_terminal() {
        let e = ScanError::ExternalService {
            service: Service::Classifier,
            failure: ServiceFailure::Network,
        };
        assert!(!e.is_terminal());
    }
}
