//! The block-based phase shift estimator.

use crate::config::EstimatorConfig;
use crate::correlation;
use crate::util;

/// The result of a single correlation pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseMeasurement {
    /// Index of the maximum in the `2N - 1` correlation coefficients. `N - 1` is zero lag.
    pub peak_index: usize,
    /// The correlation coefficient at `peak_index`.
    pub peak_value: f32,
    /// The peak lag converted to seconds. Positive values mean channel 1 leads channel 2.
    pub time_delay: f32,
    /// The time delay converted to degrees at the signal frequency. Not wrapped.
    pub phase: f32,
    /// The number of blocks completed since the last (re)initialization, including this one. Zero
    /// means no block has completed yet.
    pub block_count: u64,
}

/// The part of the estimator that turns a full block into a [`PhaseMeasurement`]. This is shared
/// with the background worker, which runs it on its own thread.
#[derive(Debug)]
pub(crate) struct CorrelationPass {
    pub signal_frequency: f32,
    pub sampling_frequency: f32,
    /// `2N - 1` coefficients, allocated once.
    pub correlation: Vec<f32>,
}

impl CorrelationPass {
    pub fn new(config: &EstimatorConfig) -> Self {
        Self {
            signal_frequency: config.signal_frequency,
            sampling_frequency: config.sampling_frequency,
            correlation: vec![0.0; config.correlation_len()],
        }
    }

    pub fn reset(&mut self, signal_frequency: f32, sampling_frequency: f32) {
        self.signal_frequency = signal_frequency;
        self.sampling_frequency = sampling_frequency;
        self.correlation.fill(0.0);
    }

    /// Correlate both channels, find the peak, and convert it. `block_count` is passed through to
    /// the measurement.
    pub fn run(&mut self, input1: &[f32], input2: &[f32], block_count: u64) -> PhaseMeasurement {
        let block_len = input1.len();
        correlation::cross_correlate_into(input1, input2, &mut self.correlation);

        let (peak_index, peak_value) = correlation::find_peak(&self.correlation);
        let lag = correlation::lag_from_index(peak_index, block_len);
        let time_delay = lag as f32 / self.sampling_frequency;
        let phase = util::delay_to_degrees(time_delay, self.signal_frequency);

        util::permit_alloc(|| {
            log::trace!(
                "Block {block_count}: correlation peak {peak_value} at lag {lag}, delay \
                 {time_delay} s, phase {phase} degrees"
            )
        });

        PhaseMeasurement {
            peak_index,
            peak_value,
            time_delay,
            phase,
            block_count,
        }
    }
}

/// Estimates the phase shift between two synchronously sampled signals of the same, known
/// frequency.
///
/// Sample pairs are collected into non-overlapping blocks of `N` pairs. Every time a block is
/// complete, the full cross-correlation of both channels is computed inline and the lag of its
/// largest coefficient is converted to a time delay and a phase angle. The reported phase thus
/// only changes once every `N` calls to [`process_sample()`][Self::process_sample()], and it is
/// zero until the first block has completed.
///
/// All buffers are allocated when the estimator is constructed. Neither
/// [`initialize()`][Self::initialize()] nor [`process_sample()`][Self::process_sample()] allocate.
/// Keep in mind that the call that completes a block performs `N * (2N - 1)` multiply-adds, while
/// every other call is constant time.
///
/// The phase is only meaningful when the true delay is shorter than one signal period. Longer
/// delays alias, and delays approaching half a period may be resolved to the wrong side because
/// the peak search looks for the largest signed coefficient rather than the largest magnitude.
#[derive(Debug)]
pub struct PhaseShiftEstimator {
    input1: Vec<f32>,
    input2: Vec<f32>,
    /// The write position in both input buffers, always in `[0, N)`.
    current_index: usize,
    /// Set when the last sample of a block has been written and the block still needs to be
    /// correlated.
    pending_compute: bool,

    pass: CorrelationPass,
    measurement: PhaseMeasurement,
}

impl PhaseShiftEstimator {
    /// Create an estimator with the default block length of
    /// [`SIGNAL_LENGTH`][crate::config::SIGNAL_LENGTH] sample pairs.
    pub fn new(signal_frequency: f32, sampling_frequency: f32) -> Self {
        Self::from_config(&EstimatorConfig::new(signal_frequency, sampling_frequency))
    }

    /// Create an estimator with the block length from the configuration. The configuration is not
    /// validated here, use [`EstimatorConfig::validate()`] for that.
    pub fn from_config(config: &EstimatorConfig) -> Self {
        debug_assert!(config.block_len >= 1);
        debug_assert!(config.sampling_frequency > 0.0);

        let mut estimator = Self {
            input1: vec![0.0; config.block_len],
            input2: vec![0.0; config.block_len],
            current_index: 0,
            pending_compute: false,

            pass: CorrelationPass::new(config),
            measurement: PhaseMeasurement::default(),
        };
        estimator.initialize(config.signal_frequency, config.sampling_frequency);

        estimator
    }

    /// Reset the estimator to a clean state with new frequencies. All buffers are zeroed and the
    /// reported phase goes back to zero. The block length stays the same. This can be called at
    /// any time, and afterwards the estimator behaves exactly like a newly constructed one.
    pub fn initialize(&mut self, signal_frequency: f32, sampling_frequency: f32) {
        debug_assert!(sampling_frequency > 0.0);

        self.current_index = 0;
        self.pending_compute = false;
        self.input1.fill(0.0);
        self.input2.fill(0.0);
        self.pass.reset(signal_frequency, sampling_frequency);
        self.measurement = PhaseMeasurement::default();

        log::debug!(
            "Phase shift estimator initialized: {signal_frequency} Hz signal, \
             {sampling_frequency} Hz sampling, {} samples per block",
            self.block_len()
        );
    }

    /// Add one sample from each channel. When this completes a block, the block is correlated
    /// before returning. Returns the phase in degrees of the last completed block.
    pub fn process_sample(&mut self, sample1: f32, sample2: f32) -> f32 {
        self.input1[self.current_index] = sample1;
        self.input2[self.current_index] = sample2;

        self.current_index += 1;
        if self.current_index >= self.block_len() {
            self.current_index = 0;
            self.pending_compute = true;
        }

        if self.pending_compute {
            self.pending_compute = false;
            self.compute();
        }

        self.measurement.phase
    }

    /// Feed two equally long slices of samples through
    /// [`process_sample()`][Self::process_sample()]. Returns the phase after the last pair.
    pub fn process_block(&mut self, channel1: &[f32], channel2: &[f32]) -> f32 {
        debug_assert_eq!(channel1.len(), channel2.len());

        for (&sample1, &sample2) in channel1.iter().zip(channel2) {
            self.process_sample(sample1, sample2);
        }

        self.measurement.phase
    }

    fn compute(&mut self) {
        let block_count = self.measurement.block_count + 1;
        self.measurement = self.pass.run(&self.input1, &self.input2, block_count);
    }

    /// The phase in degrees of the last completed block.
    pub fn phase(&self) -> f32 {
        self.measurement.phase
    }

    /// The time delay in seconds of the last completed block.
    pub fn time_delay(&self) -> f32 {
        self.measurement.time_delay
    }

    pub fn peak_index(&self) -> usize {
        self.measurement.peak_index
    }

    pub fn measurement(&self) -> PhaseMeasurement {
        self.measurement
    }

    /// The full cross-correlation of the last completed block. Index `N - 1` is zero lag.
    pub fn correlation(&self) -> &[f32] {
        &self.pass.correlation
    }

    /// The number of sample pairs per block.
    pub fn block_len(&self) -> usize {
        self.input1.len()
    }

    /// How many pairs of the current block have been written so far.
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn signal_frequency(&self) -> f32 {
        self.pass.signal_frequency
    }

    pub fn sampling_frequency(&self) -> f32 {
        self.pass.sampling_frequency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SIGNAL_LENGTH;
    use crate::util::SineSource;

    fn feed(estimator: &mut PhaseShiftEstimator, source: &mut SineSource, pairs: usize) -> f32 {
        let mut phase = estimator.phase();
        for (sample1, sample2) in source.take(pairs) {
            phase = estimator.process_sample(sample1, sample2);
        }

        phase
    }

    #[test]
    fn fresh_estimator_state() {
        let estimator = PhaseShiftEstimator::new(10.0, 1000.0);

        assert_eq!(estimator.block_len(), SIGNAL_LENGTH);
        assert_eq!(estimator.correlation().len(), 2 * SIGNAL_LENGTH - 1);
        assert_eq!(estimator.current_index(), 0);
        assert_eq!(estimator.measurement(), PhaseMeasurement::default());
        assert!(estimator.correlation().iter().all(|&value| value == 0.0));
    }

    #[test]
    fn eighteen_degrees_at_ten_hertz() {
        let mut estimator = PhaseShiftEstimator::new(10.0, 1000.0);
        let mut source = SineSource::new(10.0, 1000.0).with_time_shift(0.005);

        let phase = feed(&mut estimator, &mut source, SIGNAL_LENGTH);

        approx::assert_abs_diff_eq!(phase, 18.0, epsilon = 3.6);
        approx::assert_abs_diff_eq!(estimator.time_delay(), 0.005, epsilon = 0.001);
        assert_eq!(estimator.measurement().block_count, 1);
        assert_eq!(estimator.current_index(), 0);
    }

    #[test]
    fn identical_channels_have_zero_lag() {
        let mut estimator = PhaseShiftEstimator::new(10.0, 1000.0);
        let mut source = SineSource::new(10.0, 1000.0).with_amplitudes(3.0, 3.0);

        let phase = feed(&mut estimator, &mut source, SIGNAL_LENGTH);

        assert_eq!(estimator.peak_index(), SIGNAL_LENGTH - 1);
        approx::assert_abs_diff_eq!(estimator.time_delay(), 0.0);
        approx::assert_abs_diff_eq!(phase, 0.0);
    }

    #[test]
    fn amplitude_independent() {
        let mut estimator = PhaseShiftEstimator::new(10.0, 1000.0);
        let mut source = SineSource::new(10.0, 1000.0)
            .with_amplitudes(4.0, 2.0)
            .with_phase_degrees(18.0);

        let phase = feed(&mut estimator, &mut source, SIGNAL_LENGTH);

        approx::assert_abs_diff_eq!(phase, 18.0, epsilon = 3.6);
    }

    #[test]
    fn negative_delay() {
        let mut estimator = PhaseShiftEstimator::new(10.0, 1000.0);
        let mut source = SineSource::new(10.0, 1000.0).with_time_shift(-0.005);

        let phase = feed(&mut estimator, &mut source, SIGNAL_LENGTH);

        approx::assert_abs_diff_eq!(phase, -18.0, epsilon = 3.6);
        assert!(estimator.time_delay() < 0.0);
    }

    #[test]
    fn larger_shifts_within_one_period() {
        for (time_shift, expected_phase) in [(0.02, 72.0), (0.04, 144.0)] {
            let mut estimator = PhaseShiftEstimator::new(10.0, 1000.0);
            let mut source = SineSource::new(10.0, 1000.0).with_time_shift(time_shift);

            let phase = feed(&mut estimator, &mut source, SIGNAL_LENGTH);

            approx::assert_abs_diff_eq!(phase, expected_phase, epsilon = 3.6);
        }
    }

    #[test]
    fn shorter_blocks() {
        let config = EstimatorConfig::new(50.0, 1000.0).with_block_len(256);
        let mut estimator = PhaseShiftEstimator::from_config(&config);
        let mut source = SineSource::new(50.0, 1000.0).with_time_shift(0.004);

        let phase = feed(&mut estimator, &mut source, 256);

        assert_eq!(estimator.correlation().len(), 511);
        approx::assert_abs_diff_eq!(phase, 72.0, epsilon = config.lag_step_degrees());
    }

    #[test]
    fn delays_beyond_one_period_alias() {
        // A full period plus 5 ms looks exactly like 5 ms
        let mut estimator = PhaseShiftEstimator::new(10.0, 1000.0);
        let mut source = SineSource::new(10.0, 1000.0).with_time_shift(0.105);

        let phase = feed(&mut estimator, &mut source, SIGNAL_LENGTH);

        approx::assert_abs_diff_eq!(phase, 18.0, epsilon = 3.6);
    }

    #[test]
    fn updates_once_per_block() {
        let config = EstimatorConfig::new(50.0, 1000.0).with_block_len(64);
        let mut estimator = PhaseShiftEstimator::from_config(&config);
        let mut source = SineSource::new(50.0, 1000.0).with_time_shift(0.002);

        for call in 1..64 {
            let (sample1, sample2) = source.next_pair();
            assert_eq!(estimator.process_sample(sample1, sample2), 0.0, "call {call}");
            assert_eq!(estimator.current_index(), call);
        }

        let (sample1, sample2) = source.next_pair();
        let first_block_phase = estimator.process_sample(sample1, sample2);
        approx::assert_abs_diff_eq!(first_block_phase, 36.0, epsilon = config.lag_step_degrees());
        assert_eq!(estimator.measurement().block_count, 1);

        // Switching the source to in-phase only shows up after the next block completes
        source.set_phase_degrees(0.0);
        for call in 1..64 {
            let (sample1, sample2) = source.next_pair();
            assert_eq!(estimator.process_sample(sample1, sample2), first_block_phase, "call {call}");
        }

        let (sample1, sample2) = source.next_pair();
        approx::assert_abs_diff_eq!(estimator.process_sample(sample1, sample2), 0.0);
        assert_eq!(estimator.measurement().block_count, 2);
    }

    #[test]
    fn reinitialize_matches_fresh_estimator() {
        let mut reused = PhaseShiftEstimator::new(10.0, 1000.0);
        let mut source = SineSource::new(10.0, 1000.0).with_time_shift(0.02);
        feed(&mut reused, &mut source, SIGNAL_LENGTH + 100);
        assert_ne!(reused.phase(), 0.0);

        reused.initialize(10.0, 1000.0);
        assert_eq!(reused.phase(), 0.0);
        assert_eq!(reused.current_index(), 0);
        assert_eq!(reused.measurement(), PhaseMeasurement::default());
        assert!(reused.correlation().iter().all(|&value| value == 0.0));

        let mut fresh = PhaseShiftEstimator::new(10.0, 1000.0);
        let mut reused_source = SineSource::new(10.0, 1000.0).with_time_shift(0.005);
        let mut fresh_source = reused_source.clone();
        for _ in 0..(SIGNAL_LENGTH * 2) {
            let (sample1, sample2) = reused_source.next_pair();
            let reused_phase = reused.process_sample(sample1, sample2);
            let (sample1, sample2) = fresh_source.next_pair();
            let fresh_phase = fresh.process_sample(sample1, sample2);

            assert_eq!(reused_phase, fresh_phase);
        }
        assert_eq!(reused.measurement(), fresh.measurement());
        assert_eq!(reused.correlation(), fresh.correlation());
    }

    #[test]
    fn reinitialize_with_new_frequencies() {
        let mut estimator = PhaseShiftEstimator::new(10.0, 1000.0);
        estimator.initialize(50.0, 8000.0);

        assert_eq!(estimator.signal_frequency(), 50.0);
        assert_eq!(estimator.sampling_frequency(), 8000.0);
        assert_eq!(estimator.block_len(), SIGNAL_LENGTH);
    }

    #[test]
    fn silent_input_ties_resolve_to_lowest_index() {
        // Every coefficient is zero, so the very first one wins: the most negative lag
        let config = EstimatorConfig::new(10.0, 1000.0).with_block_len(4);
        let mut estimator = PhaseShiftEstimator::from_config(&config);

        let phase = estimator.process_block(&[0.0; 4], &[0.0; 4]);

        assert_eq!(estimator.peak_index(), 0);
        approx::assert_relative_eq!(estimator.time_delay(), -0.003, epsilon = 1e-6);
        approx::assert_relative_eq!(phase, -10.8, epsilon = 1e-4);
    }

    #[test]
    fn symmetric_ties_resolve_to_lowest_index() {
        // The coefficients are [1, 0, -2, 0, 1], with equal maxima at both ends
        let config = EstimatorConfig::new(10.0, 1000.0).with_block_len(3);
        let mut estimator = PhaseShiftEstimator::from_config(&config);

        estimator.process_block(&[1.0, 0.0, -1.0], &[-1.0, 0.0, 1.0]);

        assert_eq!(estimator.correlation(), &[1.0f32, 0.0, -2.0, 0.0, 1.0]);
        assert_eq!(estimator.peak_index(), 0);
        approx::assert_relative_eq!(estimator.time_delay(), -0.002, epsilon = 1e-6);
    }

    #[test]
    fn process_block_matches_per_sample() {
        let mut per_sample = PhaseShiftEstimator::new(10.0, 1000.0);
        let mut per_block = PhaseShiftEstimator::new(10.0, 1000.0);
        let source = SineSource::new(10.0, 1000.0).with_phase_degrees(36.0);

        let (channel1, channel2): (Vec<f32>, Vec<f32>) = source.take(SIGNAL_LENGTH + 10).unzip();
        let mut expected = 0.0;
        for (&sample1, &sample2) in channel1.iter().zip(&channel2) {
            expected = per_sample.process_sample(sample1, sample2);
        }

        assert_eq!(per_block.process_block(&channel1, &channel2), expected);
        assert_eq!(per_block.current_index(), 10);
    }
}
