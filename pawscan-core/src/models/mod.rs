pub mod correction;
pub mod profile;
pub mod scan;

pub use correction::{CorrectionEntry, TeachStatus};
pub use profile::{AgeTarget, BreedProfile, BuildClass, CoatType, GrayingPattern, SizeClass};
pub use scan::{
    BreedAlternative, PredictionMethod, ScanRecord, SimulationData, SimulationStatus,
    VerificationStatus,
};
