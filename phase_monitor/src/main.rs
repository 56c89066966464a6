use anyhow::{Context, Result};
use clap::Parser;
use phase_shift::prelude::*;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[cfg(all(debug_assertions, feature = "assert_process_allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

/// Measure the phase shift between a simulated current and voltage signal.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Load the estimator configuration from a JSON file instead of the frequency and block
    /// length options.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// The fundamental frequency of both signals, in Hz.
    #[arg(long, default_value_t = 10.0)]
    signal_frequency: f32,
    /// The rate at which sample pairs are generated, in Hz.
    #[arg(long, default_value_t = 1000.0)]
    sampling_frequency: f32,
    /// The number of sample pairs per correlation block.
    #[arg(long, default_value_t = SIGNAL_LENGTH)]
    block_len: usize,

    /// The simulated phase of the voltage relative to the current, in degrees.
    #[arg(short, long, default_value_t = 18.0, allow_hyphen_values = true)]
    phase: f32,
    /// Added to the simulated phase after every block, in degrees.
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    phase_step: f32,
    #[arg(long, default_value_t = 4.0)]
    current_amplitude: f32,
    #[arg(long, default_value_t = 2.0)]
    voltage_amplitude: f32,

    /// Stop after this many blocks.
    #[arg(short, long, default_value_t = 10)]
    blocks: u64,
    /// Generate samples at the sampling frequency instead of as fast as possible.
    #[arg(long)]
    realtime: bool,
    /// Run the correlation pass on a worker thread.
    #[arg(long)]
    background: bool,
}

/// The values that are watched with a debugger probe when this runs on a board.
#[derive(Debug, Default, Clone, Copy)]
struct MonitorProbe {
    current: f32,
    voltage: f32,
    simulated_phase: f32,
    measured_phase: f32,
}

/// What a run ended up measuring, mostly useful for testing.
#[derive(Debug, Clone, PartialEq)]
struct RunSummary {
    /// The simulated and measured phase at the end of every block.
    blocks: Vec<(f32, f32)>,
    dropped_blocks: u64,
}

enum Estimator {
    Inline(PhaseShiftEstimator),
    Background(BackgroundPhaseShiftEstimator),
}

impl Estimator {
    fn new(config: EstimatorConfig, background: bool) -> Result<Self> {
        if background {
            Ok(Self::Background(BackgroundPhaseShiftEstimator::new(config)?))
        } else {
            Ok(Self::Inline(PhaseShiftEstimator::from_config(&config)))
        }
    }

    #[inline]
    fn process_sample(&mut self, sample1: f32, sample2: f32) -> f32 {
        match self {
            Estimator::Inline(estimator) => estimator.process_sample(sample1, sample2),
            Estimator::Background(estimator) => estimator.process_sample(sample1, sample2),
        }
    }

    /// The background worker may still be busy with the block that was just completed.
    fn settled_phase(&mut self) -> f32 {
        match self {
            Estimator::Inline(estimator) => estimator.phase(),
            Estimator::Background(estimator) => {
                estimator.wait_for_pending_pass();
                estimator.phase()
            }
        }
    }

    fn dropped_blocks(&self) -> u64 {
        match self {
            Estimator::Inline(_) => 0,
            Estimator::Background(estimator) => estimator.dropped_blocks(),
        }
    }
}

fn main() -> Result<()> {
    setup_logger();

    let cli = Cli::parse();
    let summary = run(&cli)?;
    if summary.dropped_blocks > 0 {
        log::warn!("{} blocks were discarded by the worker", summary.dropped_blocks);
    }

    Ok(())
}

fn setup_logger() {
    // `NIH_LOG` can be used to change the log level and destination
    let result = nih_log::LoggerBuilder::new(log::LevelFilter::Info).build_global();
    if let Err(err) = result {
        eprintln!("Could not initialize the logger: {err:?}");
    }
}

fn load_config(cli: &Cli) -> Result<EstimatorConfig> {
    let config = match &cli.config {
        // Files are validated while loading
        Some(path) => EstimatorConfig::from_file(path)?,
        None => {
            let config = EstimatorConfig::new(cli.signal_frequency, cli.sampling_frequency)
                .with_block_len(cli.block_len);
            config.validate().context("Invalid estimator configuration")?;

            config
        }
    };
    config.warn_if_unreliable();

    Ok(config)
}

fn run(cli: &Cli) -> Result<RunSummary> {
    let config = load_config(cli)?;
    log::info!(
        "Measuring a {} Hz signal sampled at {} Hz, {} samples per block ({:.2} degree resolution)",
        config.signal_frequency,
        config.sampling_frequency,
        config.block_len,
        config.lag_step_degrees()
    );

    let mut estimator = Estimator::new(config, cli.background)?;
    let mut source = SineSource::new(config.signal_frequency, config.sampling_frequency)
        .with_amplitudes(cli.current_amplitude, cli.voltage_amplitude)
        .with_phase_degrees(cli.phase);

    let sample_period = Duration::from_secs_f64(1.0 / config.sampling_frequency as f64);
    let mut next_tick = Instant::now();
    let mut probe = MonitorProbe {
        simulated_phase: cli.phase,
        ..MonitorProbe::default()
    };
    let mut summary = RunSummary {
        blocks: Vec::new(),
        dropped_blocks: 0,
    };

    for block_idx in 0..cli.blocks {
        for _ in 0..config.block_len {
            if cli.realtime {
                next_tick += sample_period;
                if let Some(remaining) = next_tick.checked_duration_since(Instant::now()) {
                    std::thread::sleep(remaining);
                }
            }

            let (current, voltage) = source.next_pair();
            probe.current = current;
            probe.voltage = voltage;
            probe.measured_phase =
                util::process_wrapper(|| estimator.process_sample(current, voltage));
        }

        probe.measured_phase = estimator.settled_phase();
        log::info!(
            "Block {}: simulated {:.2} degrees, measured {:.2} degrees",
            block_idx + 1,
            probe.simulated_phase,
            probe.measured_phase
        );
        log::debug!("{probe:?}");
        summary.blocks.push((probe.simulated_phase, probe.measured_phase));

        if cli.phase_step != 0.0 {
            probe.simulated_phase += cli.phase_step;
            source.set_phase_degrees(probe.simulated_phase);
        }
    }

    summary.dropped_blocks = estimator.dropped_blocks();

    Ok(summary)
}
