use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct PawscanConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub identifier: IdentifierConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8790,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "data/uploads".to_string(),
        }
    }
}

/// Fast local classifier service (HTTP sidecar).
#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    pub enabled: bool,
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://127.0.0.1:8791".to_string(),
            connect_timeout_secs: 3,
            request_timeout_secs: 20,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

/// Deep vision-language identifier.
#[derive(Debug, Deserialize, Clone)]
pub struct IdentifierConfig {
    pub model: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 45,
            max_retries: 2,
            retry_delay_ms: 1000,
        }
    }
}

/// Age-progression image generation.
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    pub model: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash-preview-image-generation".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 90,
        }
    }
}

/// Age-progression job and queue tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    pub queue_capacity: usize,
    /// Per-variant attempts inside one job run.
    pub variant_attempts: u32,
    /// Backoff between attempts is `backoff_base_ms * 2^attempt`.
    pub backoff_base_ms: u64,
    /// Wall-clock ceiling for one whole job run.
    pub job_timeout_secs: u64,
    /// Whole-job requeues at the queue level, on top of per-variant retries.
    pub job_retries: u32,
    pub payload_cache_ttl_secs: u64,
    /// Longest edge of the normalized generation payload, in pixels.
    pub max_payload_edge: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            variant_attempts: 3,
            backoff_base_ms: 1000,
            job_timeout_secs: 300,
            job_retries: 2,
            payload_cache_ttl_secs: 600,
            max_payload_edge: 1024,
        }
    }
}

impl PawscanConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder().add_source(File::with_name(path)).build()?;
        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulation_defaults_match_retry_contract() {
        let sim = SimulationConfig::default();
        assert_eq!(sim.variant_attempts, 3);
        // 2^attempt seconds: attempt 1 -> 2s, attempt 2 -> 4s
        assert_eq!(sim.backoff_base_ms * 2u64.pow(1), 2000);
        assert_eq!(sim.backoff_base_ms * 2u64.pow(2), 4000);
        assert_eq!(sim.payload_cache_ttl_secs, 600);
    }

    #[test]
    fn test_optional_sections_default() {
        let http = HttpConfig::default();
        assert!(http.enabled);
        assert_eq!(http.host, "127.0.0.1");
        let storage = StorageConfig::default();
        assert!(!storage.root.is_empty());
    }
}
