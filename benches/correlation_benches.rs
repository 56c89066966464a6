use criterion::{black_box, BenchmarkId, Criterion};
use phase_shift::correlation::{correlation_len, cross_correlate_into, find_peak};
use phase_shift::util::SineSource;

pub fn bench_correlation(c: &mut Criterion) {
    let mut group = c.benchmark_group("correlation");

    // The full pass is quadratic in the block length, this is the latency spike a caller has to
    // budget for on every N-th sample
    for block_len in [128, 256, 512, 1024] {
        let (channel1, channel2): (Vec<f32>, Vec<f32>) = SineSource::new(50.0, 1000.0)
            .with_phase_degrees(30.0)
            .take(block_len)
            .unzip();
        let mut output = vec![0.0; correlation_len(block_len)];

        group.bench_with_input(
            BenchmarkId::new("cross_correlate_into", block_len),
            &block_len,
            |b, _| {
                b.iter(|| {
                    cross_correlate_into(black_box(&channel1), black_box(&channel2), &mut output);
                });
            },
        );

        group.bench_with_input(BenchmarkId::new("find_peak", block_len), &block_len, |b, _| {
            b.iter(|| find_peak(black_box(&output)));
        });
    }

    group.finish();
}
