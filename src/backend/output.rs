//! Audio output using the `cpal` crate.
//!
//! This module opens the output device, negotiates a stream configuration
//! for the decoded format and renders samples from an `rtrb` ring buffer,
//! applying software gain and counting rendered samples for position queries.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering::Relaxed},
    },
    time::Duration,
};

use {
    cpal::{
        BuildStreamError, Device, FromSample, OutputCallbackInfo, Sample,
        SampleFormat::{self, F32, I16, U16},
        SizedSample, Stream, StreamConfig, SupportedStreamConfig, default_host,
        traits::{DeviceTrait, HostTrait},
    },
    rtrb::{Consumer, PopError::Empty},
    thiserror::Error,
    tracing::{debug, error},
};

use crate::{
    backend::{
        decoder::AudioFormat,
        native::{BusSender, NativeErrorKind, NativeMessage},
    },
    error::NativeRuntimeError,
};

/// Error type for audio output operations.
#[derive(Error, Debug)]
pub enum OutputError {
    /// CPAL refused to build the stream.
    #[error("Audio output error: {0}")]
    CpalError(#[from] BuildStreamError),
    /// No suitable audio device found.
    #[error("No suitable audio device found")]
    NoDeviceFound,
    /// The device cannot render this many channels.
    #[error("Device does not support {channels} channels")]
    UnsupportedChannels { channels: u16 },
    /// Unsupported sample format.
    #[error("Unsupported sample format: {format:?}")]
    UnsupportedSampleFormat { format: SampleFormat },
    /// Resampling error.
    #[error("Resampling error: {0}")]
    ResamplingError(String),
}

/// Output device configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// Device description to open, or the host default.
    pub device_name: Option<String>,
    /// Buffer duration in milliseconds.
    pub buffer_duration_ms: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            buffer_duration_ms: 50,
        }
    }
}

/// Linear software gain shared with the audio callback.
#[derive(Debug, Clone)]
pub struct OutputGain(Arc<AtomicU32>);

impl OutputGain {
    /// Creates a gain of `value`, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn new(value: f64) -> Self {
        let gain = Self(Arc::new(AtomicU32::new(0)));
        gain.set(value);
        gain
    }

    /// Sets the gain, clamped to `0.0..=1.0`.
    pub fn set(&self, value: f64) {
        let value = value.clamp(0.0, 1.0) as f32;
        self.0.store(value.to_bits(), Relaxed);
    }

    /// Current gain.
    #[must_use]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Relaxed))
    }
}

/// Counts rendered samples to derive the elapsed playback time.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    samples_rendered: Arc<AtomicU64>,
    sample_rate: u32,
    channels: u16,
}

impl PlaybackClock {
    /// Creates a clock for a stream with the given layout.
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            samples_rendered: Arc::new(AtomicU64::new(0)),
            sample_rate,
            channels,
        }
    }

    /// Records `samples` rendered interleaved samples.
    pub fn advance(&self, samples: u64) {
        self.samples_rendered.fetch_add(samples, Relaxed);
    }

    /// Milliseconds rendered since the clock was created.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        let per_second = u64::from(self.sample_rate) * u64::from(self.channels.max(1));
        if per_second == 0 {
            return 0;
        }
        let elapsed = self.samples_rendered.load(Relaxed) * 1000 / per_second;
        i64::try_from(elapsed).unwrap_or(i64::MAX)
    }
}

/// An opened output device.
pub struct AudioOutput {
    /// The selected output device.
    device: Device,
    /// Configuration the device was opened with.
    config: OutputConfig,
}

impl AudioOutput {
    /// Opens the configured device, or the host default.
    ///
    /// # Errors
    ///
    /// Returns `OutputError::NoDeviceFound` if no device can be opened.
    pub fn new(config: OutputConfig) -> Result<Self, OutputError> {
        let host = default_host();
        let named = config.device_name.as_deref().and_then(|wanted| {
            host.output_devices().ok()?.find(|device| {
                device
                    .description()
                    .is_ok_and(|desc| desc.to_string() == wanted)
            })
        });
        let device = match named {
            Some(device) => device,
            None => host
                .default_output_device()
                .ok_or(OutputError::NoDeviceFound)?,
        };

        Ok(AudioOutput { device, config })
    }

    /// Configuration the output was opened with.
    #[must_use]
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Picks a stream configuration for `source`.
    ///
    /// Prefers a configuration running at the source rate. Otherwise the
    /// highest rate with the same channel count is chosen and the returned
    /// flag asks for resampling.
    ///
    /// # Errors
    ///
    /// Returns `OutputError` if the device cannot be queried or supports no
    /// configuration with the source channel count.
    pub fn negotiate(
        &self,
        source: &AudioFormat,
    ) -> Result<(SupportedStreamConfig, bool), OutputError> {
        let mut fallback: Option<SupportedStreamConfig> = None;
        let supported = self
            .device
            .supported_output_configs()
            .map_err(|_| OutputError::NoDeviceFound)?;

        for range in supported {
            if range.channels() != source.channels {
                continue;
            }
            if range.min_sample_rate() <= source.sample_rate
                && source.sample_rate <= range.max_sample_rate()
            {
                return Ok((range.with_sample_rate(source.sample_rate), false));
            }
            let candidate = range.with_max_sample_rate();
            if fallback
                .as_ref()
                .is_none_or(|best| candidate.sample_rate() > best.sample_rate())
            {
                fallback = Some(candidate);
            }
        }

        fallback
            .map(|config| (config, true))
            .ok_or(OutputError::UnsupportedChannels {
                channels: source.channels,
            })
    }

    /// Builds a paused-or-running stream that renders from `consumer`.
    ///
    /// Stream failures are posted on `bus` as output errors tagged with `seqnum`.
    ///
    /// # Errors
    ///
    /// Returns `OutputError` if the stream cannot be built.
    pub fn create_stream(
        &self,
        supported: &SupportedStreamConfig,
        consumer: Consumer<f32>,
        gain: OutputGain,
        clock: PlaybackClock,
        bus: BusSender,
        seqnum: u64,
    ) -> Result<Stream, OutputError> {
        let stream_config = supported.config();
        debug!(
            sample_rate = stream_config.sample_rate,
            channels = stream_config.channels,
            format = ?supported.sample_format(),
            "Creating output stream"
        );
        match supported.sample_format() {
            F32 => self.build::<f32>(&stream_config, consumer, gain, clock, bus, seqnum),
            I16 => self.build::<i16>(&stream_config, consumer, gain, clock, bus, seqnum),
            U16 => self.build::<u16>(&stream_config, consumer, gain, clock, bus, seqnum),
            format => Err(OutputError::UnsupportedSampleFormat { format }),
        }
    }

    fn build<T>(
        &self,
        stream_config: &StreamConfig,
        mut consumer: Consumer<f32>,
        gain: OutputGain,
        clock: PlaybackClock,
        bus: BusSender,
        seqnum: u64,
    ) -> Result<Stream, OutputError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let timeout = Duration::from_millis(u64::from(self.config.buffer_duration_ms));
        let stream = self.device.build_output_stream(
            stream_config,
            move |data: &mut [T], _: &OutputCallbackInfo| {
                let gain = gain.get();
                let mut rendered = 0;
                for sample in data.iter_mut() {
                    *sample = match consumer.pop() {
                        Ok(value) => {
                            rendered += 1;
                            T::from_sample((value * gain).clamp(-1.0, 1.0))
                        }
                        // Underrun
                        Err(Empty) => T::EQUILIBRIUM,
                    };
                }
                clock.advance(rendered);
            },
            move |err| {
                error!("Audio stream error: {err}");
                let error = NativeRuntimeError::new(NativeErrorKind::Output, err.to_string());
                let _ = bus.try_send(NativeMessage::Error { seqnum, error });
            },
            Some(timeout),
        )?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::output::{OutputConfig, OutputError, OutputGain, PlaybackClock};

    #[test]
    fn test_output_config_default() {
        let config = OutputConfig::default();
        assert_eq!(config.buffer_duration_ms, 50);
        assert!(config.device_name.is_none());
    }

    #[test]
    fn test_output_error_display() {
        assert_eq!(
            OutputError::NoDeviceFound.to_string(),
            "No suitable audio device found"
        );
        assert_eq!(
            OutputError::UnsupportedChannels { channels: 6 }.to_string(),
            "Device does not support 6 channels"
        );
    }

    #[test]
    fn test_gain_is_clamped() {
        let gain = OutputGain::new(1.5);
        assert_eq!(gain.get(), 1.0);
        gain.set(-0.2);
        assert_eq!(gain.get(), 0.0);
        gain.set(0.5);
        assert_eq!(gain.get(), 0.5);
    }

    #[test]
    fn test_clock_counts_interleaved_samples() {
        let clock = PlaybackClock::new(48_000, 2);
        assert_eq!(clock.elapsed_ms(), 0);
        clock.advance(96_000);
        assert_eq!(clock.elapsed_ms(), 1000);
        clock.advance(48_000);
        assert_eq!(clock.elapsed_ms(), 1500);
    }
}
