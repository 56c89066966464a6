//! A synthetic two-channel sine source, useful as a stand-in for real acquisition.

use std::f64::consts::TAU;

/// Generates synchronized sample pairs `amplitude1 * sin(2π f t)` and
/// `amplitude2 * sin(2π f (t + shift))`, where the shift is derived from a simulated phase in
/// degrees. Time advances by one sampling period per generated pair, starting at `t = 0`.
///
/// This is an infinite [`Iterator`] over `(channel1, channel2)` pairs.
#[derive(Debug, Clone)]
pub struct SineSource {
    signal_frequency: f32,
    sampling_frequency: f32,
    amplitude1: f32,
    amplitude2: f32,
    /// The shift between the channels, in seconds. Positive values advance channel 2.
    time_shift: f64,
    /// Kept as an integer so the time base does not drift over long runs.
    sample_idx: u64,
}

impl SineSource {
    /// A unit-amplitude source with both channels in phase.
    pub fn new(signal_frequency: f32, sampling_frequency: f32) -> Self {
        Self {
            signal_frequency,
            sampling_frequency,
            amplitude1: 1.0,
            amplitude2: 1.0,
            time_shift: 0.0,
            sample_idx: 0,
        }
    }

    pub fn with_amplitudes(mut self, amplitude1: f32, amplitude2: f32) -> Self {
        self.amplitude1 = amplitude1;
        self.amplitude2 = amplitude2;
        self
    }

    pub fn with_phase_degrees(mut self, phase_degrees: f32) -> Self {
        self.set_phase_degrees(phase_degrees);
        self
    }

    pub fn with_time_shift(mut self, seconds: f64) -> Self {
        self.time_shift = seconds;
        self
    }

    /// Change the simulated phase. Takes effect from the next generated pair onwards.
    pub fn set_phase_degrees(&mut self, phase_degrees: f32) {
        self.time_shift = (phase_degrees as f64 / 360.0) / self.signal_frequency as f64;
    }

    /// The simulated phase in degrees.
    pub fn phase_degrees(&self) -> f32 {
        (self.time_shift * self.signal_frequency as f64 * 360.0) as f32
    }

    pub fn time_shift(&self) -> f64 {
        self.time_shift
    }

    /// The time of the next pair, in seconds.
    pub fn time(&self) -> f64 {
        self.sample_idx as f64 / self.sampling_frequency as f64
    }

    /// Produce the next pair and advance time by one sampling period.
    pub fn next_pair(&mut self) -> (f32, f32) {
        let t = self.time();
        let omega = TAU * self.signal_frequency as f64;

        let channel1 = self.amplitude1 as f64 * (omega * t).sin();
        let channel2 = self.amplitude2 as f64 * (omega * (t + self.time_shift)).sin();
        self.sample_idx += 1;

        (channel1 as f32, channel2 as f32)
    }

    /// Restart at `t = 0` while keeping the amplitudes and the simulated phase.
    pub fn reset(&mut self) {
        self.sample_idx = 0;
    }
}

impl Iterator for SineSource {
    type Item = (f32, f32);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_pair())
    }
}
