//! A variant of the estimator that runs the correlation pass on a background thread.

use anyhow::{Context, Result};
use atomic_float::AtomicF32;
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::EstimatorConfig;
use crate::estimator::{CorrelationPass, PhaseMeasurement};
use crate::util;

/// One block worth of sample pairs. Two of these circulate between the ingestion side and the
/// worker, so nothing is allocated once the estimator is running.
struct Block {
    channel1: Vec<f32>,
    channel2: Vec<f32>,
}

impl Block {
    fn new(block_len: usize) -> Self {
        Self {
            channel1: vec![0.0; block_len],
            channel2: vec![0.0; block_len],
        }
    }
}

/// The same estimator as [`PhaseShiftEstimator`][crate::PhaseShiftEstimator], but the call that
/// completes a block only hands the block off to a worker thread instead of correlating it inline.
/// This keeps every [`process_sample()`][Self::process_sample()] call constant time and free of
/// allocations and locks.
///
/// The returned phase always belongs to the most recently correlated block, never to a partial
/// one. At most one block is waiting for or undergoing correlation at any time. If a block
/// completes while the worker is still busy with the previous one, the new block is discarded and
/// counted in [`dropped_blocks()`][Self::dropped_blocks()].
pub struct BackgroundPhaseShiftEstimator {
    config: EstimatorConfig,

    /// The block currently being filled.
    filling: Block,
    /// The second block, if the worker has returned it.
    spare: Option<Block>,
    current_index: usize,
    dropped_blocks: u64,

    /// Full blocks are sent to the worker through here. Only `None` while dropping.
    job_sender: Option<Sender<Block>>,
    /// Correlated blocks come back through here.
    free_receiver: Receiver<Block>,
    /// Lock-free access to the worker's latest measurement.
    measurement_output: triple_buffer::Output<PhaseMeasurement>,
    /// The latest phase, for consumers on other threads.
    phase: Arc<AtomicF32>,

    worker: Option<JoinHandle<()>>,
}

impl BackgroundPhaseShiftEstimator {
    /// Validate the configuration and spawn the worker thread.
    pub fn new(config: EstimatorConfig) -> Result<Self> {
        config.validate()?;

        let (job_sender, job_receiver) = channel::bounded(1);
        let (free_sender, free_receiver) = channel::bounded(1);
        let (measurement_input, measurement_output) =
            triple_buffer::TripleBuffer::new(&PhaseMeasurement::default()).split();
        let phase = Arc::new(AtomicF32::new(0.0));

        let worker = {
            let pass = CorrelationPass::new(&config);
            let phase = phase.clone();
            thread::Builder::new()
                .name(String::from("phase-shift-worker"))
                .spawn(move || {
                    run_worker(pass, job_receiver, free_sender, measurement_input, phase)
                })
                .context("Could not spawn the phase shift worker thread")?
        };
        log::debug!(
            "Started background phase shift worker for blocks of {} samples",
            config.block_len
        );

        Ok(Self {
            config,

            filling: Block::new(config.block_len),
            spare: Some(Block::new(config.block_len)),
            current_index: 0,
            dropped_blocks: 0,

            job_sender: Some(job_sender),
            free_receiver,
            measurement_output,
            phase,

            worker: Some(worker),
        })
    }

    /// Reset to a clean state with new frequencies. Unlike the other functions this stops and
    /// restarts the worker thread, so it blocks until any running pass has finished and it
    /// allocates new buffers. If the new frequencies are invalid an error is returned and the
    /// estimator keeps running with its old configuration.
    pub fn initialize(&mut self, signal_frequency: f32, sampling_frequency: f32) -> Result<()> {
        let config = EstimatorConfig {
            signal_frequency,
            sampling_frequency,
            ..self.config
        };

        // Nothing is torn down unless the replacement could be started. The assignment drops and
        // joins the old worker, which publishes to its own triple buffer and atomic.
        let fresh = Self::new(config)?;
        *self = fresh;

        Ok(())
    }

    /// Add one sample from each channel. When this completes a block, the block is handed to the
    /// worker if it is idle. Returns the phase in degrees of the most recently correlated block.
    pub fn process_sample(&mut self, sample1: f32, sample2: f32) -> f32 {
        self.filling.channel1[self.current_index] = sample1;
        self.filling.channel2[self.current_index] = sample2;

        self.current_index += 1;
        if self.current_index >= self.config.block_len {
            self.current_index = 0;
            self.submit_block();
        }

        self.measurement_output.read().phase
    }

    fn submit_block(&mut self) {
        if self.spare.is_none() {
            self.spare = self.free_receiver.try_recv().ok();
        }

        let Some(mut block) = self.spare.take() else {
            self.dropped_blocks += 1;
            if self.dropped_blocks == 1 {
                util::permit_alloc(|| {
                    log::warn!(
                        "The phase shift worker cannot keep up, blocks are being discarded"
                    )
                });
            }

            return;
        };

        std::mem::swap(&mut self.filling, &mut block);
        let sent = match &self.job_sender {
            Some(job_sender) => job_sender.try_send(block).is_ok(),
            None => false,
        };
        if !sent {
            self.dropped_blocks += 1;
        }
    }

    /// Block until the worker has finished correlating the block it was last given, if any. After
    /// this returns, [`measurement()`][Self::measurement()] reflects every block that was not
    /// dropped.
    pub fn wait_for_pending_pass(&mut self) {
        if self.spare.is_none() {
            self.spare = self.free_receiver.recv().ok();
        }
    }

    /// The most recently published measurement.
    pub fn measurement(&mut self) -> PhaseMeasurement {
        *self.measurement_output.read()
    }

    /// The phase in degrees of the most recently correlated block.
    pub fn phase(&mut self) -> f32 {
        self.measurement_output.read().phase
    }

    /// A handle that always contains the latest phase in degrees. This can be polled from any
    /// thread.
    pub fn phase_handle(&self) -> Arc<AtomicF32> {
        self.phase.clone()
    }

    /// The number of completed blocks that were discarded because the worker was still busy.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks
    }

    pub fn block_len(&self) -> usize {
        self.config.block_len
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    fn stop_worker(&mut self) {
        // Closing the job channel ends the worker's loop
        self.job_sender = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("The phase shift worker thread panicked");
            }
        }
    }
}

impl Drop for BackgroundPhaseShiftEstimator {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

fn run_worker(
    mut pass: CorrelationPass,
    job_receiver: Receiver<Block>,
    free_sender: Sender<Block>,
    mut measurement_input: triple_buffer::Input<PhaseMeasurement>,
    phase: Arc<AtomicF32>,
) {
    let mut block_count = 0;
    while let Ok(block) = job_receiver.recv() {
        block_count += 1;

        let measurement = pass.run(&block.channel1, &block.channel2, block_count);
        measurement_input.write(measurement);
        phase.store(measurement.phase, Ordering::Relaxed);

        // Only two blocks exist, so there is always room for this one
        if free_sender.send(block).is_err() {
            break;
        }
    }

    log::debug!("Background phase shift worker stopped after {block_count} blocks");
}
