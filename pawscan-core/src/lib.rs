pub mod breeds;
pub mod classifier;
pub mod config;
pub mod db;
pub mod digest;
pub mod error;
pub mod generation;
pub mod identifier;
pub mod models;

pub use config::PawscanConfig;
pub use classifier::{ClassifierBackend, ClassifierError, ClassifierPrediction, HttpClassifierClient, TeachOutcome};
pub use error::{ScanError, Service, ServiceFailure};
pub use generation::{GeminiImageClient, GenerationError, ImageGenerator};
pub use identifier::{
    BreedCategory, GeminiIdentifierClient, HintTier, Identification, IdentifierBackend,
    IdentifierError,
};
