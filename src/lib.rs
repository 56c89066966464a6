//! Phase shift measurement between two synchronously sampled signals of the same, known
//! frequency, using block-based cross-correlation.
//!
//! Feed one pair of samples per sampling period to a [`PhaseShiftEstimator`]. Every `N` pairs it
//! correlates the collected block and converts the lag of the correlation peak into a time delay
//! and a phase angle in degrees:
//!
//! ```
//! use phase_shift::prelude::*;
//!
//! let mut estimator = PhaseShiftEstimator::new(10.0, 1000.0);
//! let source = SineSource::new(10.0, 1000.0).with_phase_degrees(18.0);
//!
//! let mut phase = 0.0;
//! for (current, voltage) in source.take(SIGNAL_LENGTH) {
//!     phase = estimator.process_sample(current, voltage);
//! }
//!
//! assert!((phase - 18.0).abs() <= 3.6);
//! ```
//!
//! [`BackgroundPhaseShiftEstimator`] does the same thing, but runs the correlation pass on a
//! worker thread so the ingestion side never performs the quadratic pass itself.
//!
//! The library only logs through the [`log`] facade. Binaries are expected to install a logger.

#![cfg_attr(feature = "docs", feature(doc_auto_cfg))]

pub mod config;
pub mod correlation;
pub mod estimator;
pub mod util;
pub mod worker;

pub mod prelude;

pub use config::{EstimatorConfig, SIGNAL_LENGTH};
pub use estimator::{PhaseMeasurement, PhaseShiftEstimator};
pub use worker::BackgroundPhaseShiftEstimator;
