pub mod analysis_service;
pub mod training_service;

pub use analysis_service::{Analysis, AnalysisService, Prediction, PredictionSource};
pub use training_service::{TrainingReport, TrainingService};
