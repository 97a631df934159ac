pub mod artifacts;
pub mod indicators;
pub mod predictor;
pub mod scaling;
pub mod sentiment;
pub mod services;
pub mod signal;
pub mod windowing;

pub use artifacts::ArtifactStore;
pub use signal::SignalGenerator;
pub use windowing::{PrepareMode, Prepared, WindowError, WindowPipeline};
