//! Estimator configuration, loadable from JSON.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::correlation;

/// The default number of sample pairs per correlation block.
pub const SIGNAL_LENGTH: usize = 1024;

/// Everything needed to construct a [`PhaseShiftEstimator`][crate::PhaseShiftEstimator].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatorConfig {
    /// The known fundamental frequency of both signals, in Hz. This is trusted blindly when
    /// converting the measured delay to a phase angle.
    pub signal_frequency: f32,
    /// The rate at which sample pairs are fed to the estimator, in Hz.
    pub sampling_frequency: f32,
    /// The number of sample pairs per block. Each block results in exactly one correlation pass.
    #[serde(default = "default_block_len")]
    pub block_len: usize,
}

fn default_block_len() -> usize {
    SIGNAL_LENGTH
}

impl EstimatorConfig {
    pub fn new(signal_frequency: f32, sampling_frequency: f32) -> Self {
        Self {
            signal_frequency,
            sampling_frequency,
            block_len: SIGNAL_LENGTH,
        }
    }

    pub fn with_block_len(mut self, block_len: usize) -> Self {
        self.block_len = block_len;
        self
    }

    /// Parse a JSON configuration and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).context("Could not parse the estimator configuration")?;
        config.validate()?;

        Ok(config)
    }

    /// Read a JSON configuration file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read '{}'", path.display()))?;

        Self::from_json_str(&json).with_context(|| format!("Invalid configuration in '{}'", path.display()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Could not serialize the estimator configuration")
    }

    /// Check the preconditions the estimator relies on. The estimator itself never checks these.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.sampling_frequency.is_finite() && self.sampling_frequency > 0.0,
            "The sampling frequency must be positive, got {} Hz",
            self.sampling_frequency
        );
        anyhow::ensure!(
            self.signal_frequency.is_finite() && self.signal_frequency > 0.0,
            "The signal frequency must be positive, got {} Hz",
            self.signal_frequency
        );
        anyhow::ensure!(
            self.block_len >= 2,
            "A block needs at least two samples, got {}",
            self.block_len
        );

        Ok(())
    }

    /// Log a warning if a block covers less than one period of the signal, in which case the
    /// correlation peak is not meaningful. Returns whether it warned. Meant to be called once,
    /// after loading a configuration.
    pub fn warn_if_unreliable(&self) -> bool {
        let block_duration = self.block_len as f32 / self.sampling_frequency;
        let unreliable = block_duration * self.signal_frequency < 1.0;
        if unreliable {
            log::warn!(
                "A block of {} samples covers less than one period of a {} Hz signal, the phase \
                 estimate will be unreliable",
                self.block_len,
                self.signal_frequency
            );
        }

        unreliable
    }

    /// The phase resolution of a single lag step, in degrees.
    pub fn lag_step_degrees(&self) -> f32 {
        360.0 * self.signal_frequency / self.sampling_frequency
    }

    pub fn correlation_len(&self) -> usize {
        correlation::correlation_len(self.block_len)
    }
}
