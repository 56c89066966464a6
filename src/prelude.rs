// Re-export the most commonly used types and functions
pub use crate::config::{EstimatorConfig, SIGNAL_LENGTH};
pub use crate::estimator::{PhaseMeasurement, PhaseShiftEstimator};
pub use crate::util::{self, SineSource};
pub use crate::worker::BackgroundPhaseShiftEstimator;
