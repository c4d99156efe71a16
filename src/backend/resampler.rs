//! Sample rate conversion for devices that cannot run at the source rate.
//!
//! Uses the `rubato` crate on a dedicated thread between the decoder ring
//! buffer and the device ring buffer.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering::Relaxed},
    },
    thread::{Builder, JoinHandle, sleep},
    time::Duration,
};

use {
    rtrb::{Consumer, PopError::Empty, Producer, PushError::Full},
    rubato::{FftFixedIn, Resampler},
    thiserror::Error,
    tracing::{debug, error, info},
};

/// Samples pulled from the decoder ring per iteration.
const INPUT_BATCH: usize = 4096;

/// Back-off when either ring buffer is not ready.
const RING_SLEEP_DURATION: Duration = Duration::from_micros(200);

/// Error type for resampling operations.
#[derive(Error, Debug)]
pub enum ResamplingError {
    /// Rubato rejected the configuration or the input.
    #[error("Rubato error: {0}")]
    RubatoError(String),
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// The worker thread could not be spawned.
    #[error("Failed to spawn resampler thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

/// Block resampler over interleaved samples.
pub struct AudioResampler {
    resampler: FftFixedIn<f32>,
    channels: usize,
    /// Input frames rubato expects per call.
    chunk_size: usize,
    /// Interleaved samples waiting for a full chunk.
    pending: Vec<f32>,
}

impl AudioResampler {
    /// Creates a resampler from `source_rate` to `target_rate`.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if the rates are zero, equal, or rejected by
    /// rubato.
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channels: usize,
    ) -> Result<Self, ResamplingError> {
        if source_rate == 0 || target_rate == 0 || channels == 0 {
            return Err(ResamplingError::InvalidConfiguration(
                "Sample rates and channel count must be greater than 0".to_string(),
            ));
        }
        if source_rate == target_rate {
            return Err(ResamplingError::InvalidConfiguration(
                "Source and target rates must be different".to_string(),
            ));
        }

        let chunk_size = chunk_size_for(source_rate, target_rate);
        let resampler = FftFixedIn::<f32>::new(
            source_rate as usize,
            target_rate as usize,
            chunk_size,
            1,
            channels,
        )
        .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;

        info!("Resampling {source_rate} Hz -> {target_rate} Hz, {channels} channels, chunk {chunk_size}");

        Ok(AudioResampler {
            resampler,
            channels,
            chunk_size,
            pending: Vec::with_capacity(chunk_size * channels),
        })
    }

    /// Feeds interleaved samples and appends every completed output chunk to `out`.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if rubato fails on a chunk.
    pub fn process_into(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), ResamplingError> {
        self.pending.extend_from_slice(input);
        let chunk_samples = self.chunk_size * self.channels;

        while self.pending.len() >= chunk_samples {
            let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(self.chunk_size); self.channels];
            for frame in self.pending[..chunk_samples].chunks_exact(self.channels) {
                for (plane, &sample) in planar.iter_mut().zip(frame) {
                    plane.push(sample);
                }
            }
            self.pending.drain(..chunk_samples);

            let resampled = self
                .resampler
                .process(&planar, None)
                .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;

            let frames = resampled.first().map_or(0, Vec::len);
            out.reserve(frames * self.channels);
            for frame in 0..frames {
                out.extend(resampled.iter().map(|plane| plane[frame]));
            }
        }
        Ok(())
    }
}

/// Input chunk size for a rate pair, kept within real-time friendly bounds.
fn chunk_size_for(source_rate: u32, target_rate: u32) -> usize {
    let gcd = gcd(source_rate, target_rate);
    let base = (source_rate / gcd) as usize;
    base.next_power_of_two().clamp(256, 4096)
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Background thread moving samples from the decoder ring to the device ring
/// through an [`AudioResampler`].
pub struct ResamplingAudioConsumer {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ResamplingAudioConsumer {
    /// Starts resampling from `source` (at `source_rate`) into `target` (at `target_rate`).
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if the resampler or its thread cannot be created.
    pub fn new(
        source: Consumer<f32>,
        target: Producer<f32>,
        source_rate: u32,
        target_rate: u32,
        channels: usize,
    ) -> Result<Self, ResamplingError> {
        let resampler = AudioResampler::new(source_rate, target_rate, channels)?;
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);

        let thread_handle = Builder::new()
            .name("pipeplay-resampler".to_string())
            .spawn(move || resampling_loop(source, target, resampler, &running_clone))?;

        Ok(ResamplingAudioConsumer {
            running,
            thread_handle: Some(thread_handle),
        })
    }

    /// Stops the thread and drops both ring buffer ends.
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            self.running.store(false, Relaxed);
            let _ = handle.join();
        }
    }
}

impl Drop for ResamplingAudioConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn resampling_loop(
    mut source: Consumer<f32>,
    mut target: Producer<f32>,
    mut resampler: AudioResampler,
    running: &AtomicBool,
) {
    let mut input = Vec::with_capacity(INPUT_BATCH);
    let mut output = Vec::new();

    'outer: while running.load(Relaxed) {
        input.clear();
        while input.len() < INPUT_BATCH {
            match source.pop() {
                Ok(sample) => input.push(sample),
                Err(Empty) => break,
            }
        }

        if input.is_empty() {
            sleep(RING_SLEEP_DURATION);
            continue;
        }

        output.clear();
        if let Err(e) = resampler.process_into(&input, &mut output) {
            error!("Resampling error: {e}");
            continue;
        }

        for &sample in &output {
            loop {
                if !running.load(Relaxed) || target.is_abandoned() {
                    break 'outer;
                }
                match target.push(sample) {
                    Ok(()) => break,
                    Err(Full(_)) => sleep(RING_SLEEP_DURATION),
                }
            }
        }
    }

    debug!("Resampling loop stopped");
}
