//! Full linear cross-correlation and peak search, the two building blocks of a correlation pass.
//!
//! The index convention matches the one used by CMSIS-DSP's `arm_correlate_f32()` for two inputs
//! of equal length `N`: the output has `2N - 1` coefficients and index `N - 1` holds the zero-lag
//! coefficient.

/// The number of coefficients produced when correlating two buffers of `block_len` samples.
#[inline]
pub const fn correlation_len(block_len: usize) -> usize {
    (block_len * 2).saturating_sub(1)
}

/// Compute the full cross-correlation of `input1` and `input2` and write it to `output`.
///
/// ```text
/// output[k] = Σ_i input1[i] · input2[i - (k - (N - 1))]
/// ```
///
/// Terms that would index outside of either buffer are skipped. Indices below `N - 1` mean
/// `input2` leads `input1`, indices above it mean `input1` leads `input2`.
///
/// Both inputs must have the same length `N` and `output` must hold exactly `2N - 1` values. This
/// does not allocate.
pub fn cross_correlate_into(input1: &[f32], input2: &[f32], output: &mut [f32]) {
    let block_len = input1.len();
    debug_assert_eq!(input2.len(), block_len);
    debug_assert_eq!(output.len(), correlation_len(block_len));

    for (k, coefficient) in output.iter_mut().enumerate() {
        // `lag` ranges over `-(N - 1)..=(N - 1)`
        let lag = k as isize - (block_len as isize - 1);

        // Only the overlapping part contributes, so slice both channels to it once
        let (channel1, channel2) = if lag >= 0 {
            let lag = lag as usize;
            (&input1[lag..], &input2[..block_len - lag])
        } else {
            let lag = lag.unsigned_abs();
            (&input1[..block_len - lag], &input2[lag..])
        };

        *coefficient = channel1
            .iter()
            .zip(channel2)
            .map(|(sample1, sample2)| sample1 * sample2)
            .sum();
    }
}

/// Find the maximum signed value in `values`, scanning from left to right. Returns the index and
/// the value of that maximum. A later value only replaces the current maximum if it is strictly
/// greater, so for equal maxima the lowest index wins. An empty slice yields `(0, 0.0)`.
///
/// This intentionally does not look at the magnitude. A deep negative trough is never selected.
pub fn find_peak(values: &[f32]) -> (usize, f32) {
    let Some((&first, rest)) = values.split_first() else {
        return (0, 0.0);
    };

    let mut peak_index = 0;
    let mut peak_value = first;
    for (idx, &value) in rest.iter().enumerate() {
        if value > peak_value {
            peak_value = value;
            peak_index = idx + 1;
        }
    }

    (peak_index, peak_value)
}

/// Convert an index into a correlation result of `2 * block_len - 1` coefficients into a signed
/// lag in samples. Positive lags mean channel 1 leads channel 2.
#[inline]
pub fn lag_from_index(index: usize, block_len: usize) -> isize {
    index as isize - (block_len as isize - 1)
}
