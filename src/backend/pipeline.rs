//! The shipped native pipeline: symphonia decoding into a cpal stream.
//!
//! A pipeline owns at most one running graph (decoder thread, optional
//! resampler thread, output stream). Seeking tears the graph down and
//! rebuilds it at the target, which gives flushing-seek semantics without
//! sharing the ring buffers between generations.

use std::{
    path::{Path, PathBuf},
    thread::{Builder, JoinHandle},
};

use {
    cpal::{Stream, SupportedStreamConfig, traits::StreamTrait},
    rtrb::RingBuffer,
    tracing::{debug, error, warn},
};

use crate::{
    backend::{
        decoder::{AudioDecoder, AudioFormat, AudioProducer, DecoderError},
        native::{
            BusSender, NativeErrorKind, NativeMessage, NativePipeline, NativeState,
            PipelineFactory,
        },
        output::{AudioOutput, OutputConfig, OutputError, OutputGain, PlaybackClock},
        resampler::ResamplingAudioConsumer,
    },
    error::{ConstructionError, NativeRuntimeError},
};

/// Smallest ring buffer, in samples.
const MIN_RING_CAPACITY: usize = 4096;

/// Builds [`SymphoniaPipeline`]s for the configured output.
#[derive(Debug, Clone, Default)]
pub struct SymphoniaPipelineFactory {
    output_config: OutputConfig,
}

impl SymphoniaPipelineFactory {
    /// Creates a factory opening pipelines on `output_config`.
    #[must_use]
    pub fn new(output_config: OutputConfig) -> Self {
        Self { output_config }
    }
}

impl PipelineFactory for SymphoniaPipelineFactory {
    fn build(
        &self,
        path: &Path,
        bus: BusSender,
    ) -> Result<Box<dyn NativePipeline>, ConstructionError> {
        let pipeline = SymphoniaPipeline::open(path, self.output_config.clone(), bus)?;
        Ok(Box::new(pipeline))
    }
}

/// Running decode/render graph.
struct Graph {
    stream: Stream,
    decoder_handle: Option<JoinHandle<Result<(), DecoderError>>>,
    resampler: Option<ResamplingAudioConsumer>,
    clock: PlaybackClock,
    /// Absolute position the graph started rendering from.
    base_ms: i64,
}

/// Pipeline for one media file.
pub struct SymphoniaPipeline {
    path: PathBuf,
    format: AudioFormat,
    duration_ms: Option<i64>,
    output: AudioOutput,
    stream_config: SupportedStreamConfig,
    resampling: bool,
    graph: Option<Graph>,
    /// Position to resume from while no graph is running.
    parked_ms: i64,
    state: NativeState,
    gain: OutputGain,
    bus: BusSender,
    /// Tag for messages from the current graph.
    seqnum: u64,
}

impl SymphoniaPipeline {
    /// Probes `path`, opens the output and prerolls a paused graph.
    ///
    /// # Errors
    ///
    /// Returns `ConstructionError` if the file is missing or undecodable, or
    /// the output device cannot render it.
    pub fn open(
        path: &Path,
        output_config: OutputConfig,
        bus: BusSender,
    ) -> Result<Self, ConstructionError> {
        if !path.is_file() {
            return Err(ConstructionError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let decoder = AudioDecoder::new(path)?;
        let format = decoder.format;
        let duration_ms = decoder
            .duration_ms()
            .and_then(|duration| i64::try_from(duration).ok());
        drop(decoder);

        let output = AudioOutput::new(output_config)?;
        let (stream_config, resampling) = output.negotiate(&format)?;

        let mut pipeline = SymphoniaPipeline {
            path: path.to_path_buf(),
            format,
            duration_ms,
            output,
            stream_config,
            resampling,
            graph: None,
            parked_ms: 0,
            state: NativeState::Null,
            gain: OutputGain::new(1.0),
            bus,
            seqnum: 0,
        };

        pipeline.transition(NativeState::Ready);
        pipeline.graph = Some(pipeline.build_graph(0)?);
        pipeline.transition(NativeState::Paused);
        if pipeline.duration_ms.is_some() {
            pipeline.post(NativeMessage::DurationChanged);
        }
        pipeline.post(NativeMessage::NewClock);
        pipeline.post(NativeMessage::AsyncDone);

        Ok(pipeline)
    }

    fn post(&self, message: NativeMessage) {
        if self.bus.try_send(message).is_err() {
            debug!("Pipeline bus closed, dropping message");
        }
    }

    fn post_error(&self, kind: NativeErrorKind, message: impl Into<String>) {
        self.post(NativeMessage::Error {
            seqnum: self.seqnum,
            error: NativeRuntimeError::new(kind, message),
        });
    }

    fn transition(&mut self, new: NativeState) {
        let old = self.state;
        self.state = new;
        self.post(NativeMessage::StateChanged { old, new });
    }

    fn ring_capacity(&self) -> usize {
        let per_second =
            self.format.sample_rate as usize * usize::from(self.format.channels.max(1));
        let buffered_ms = self.output.config().buffer_duration_ms.max(1) as usize * 4;
        (per_second * buffered_ms / 1000)
            .next_power_of_two()
            .max(MIN_RING_CAPACITY)
    }

    fn build_graph(&self, position_ms: i64) -> Result<Graph, ConstructionError> {
        let mut decoder = AudioDecoder::new(&self.path)?;
        if position_ms > 0 {
            decoder.seek(u64::try_from(position_ms).unwrap_or(0))?;
        }

        let capacity = self.ring_capacity();
        let (producer, consumer) = RingBuffer::<f32>::new(capacity);
        let device_config = self.stream_config.config();
        let clock = PlaybackClock::new(device_config.sample_rate, device_config.channels);

        let (device_consumer, resampler) = if self.resampling {
            let (resampled_producer, resampled_consumer) = RingBuffer::<f32>::new(capacity);
            let resampler = ResamplingAudioConsumer::new(
                consumer,
                resampled_producer,
                self.format.sample_rate,
                device_config.sample_rate,
                usize::from(self.format.channels),
            )
            .map_err(|e| OutputError::ResamplingError(e.to_string()))?;
            (resampled_consumer, Some(resampler))
        } else {
            (consumer, None)
        };

        let stream = self.output.create_stream(
            &self.stream_config,
            device_consumer,
            self.gain.clone(),
            clock.clone(),
            self.bus.clone(),
            self.seqnum,
        )?;
        // Some hosts start streams on creation.
        let _ = stream.pause();

        let producer = AudioProducer::new(decoder, producer, self.bus.clone(), self.seqnum);
        let decoder_handle = Builder::new()
            .name("pipeplay-decoder".to_string())
            .spawn(move || producer.run())
            .map_err(|e| ConstructionError::ResourceExhausted {
                reason: e.to_string(),
            })?;

        Ok(Graph {
            stream,
            decoder_handle: Some(decoder_handle),
            resampler,
            clock,
            base_ms: position_ms,
        })
    }

    /// Stops and joins everything the current graph runs, remembering its position.
    ///
    /// Messages the graph already posted become stale.
    fn teardown_graph(&mut self) {
        let Some(mut graph) = self.graph.take() else {
            return;
        };
        self.seqnum = self.seqnum.wrapping_add(1);
        self.parked_ms = graph.base_ms + graph.clock.elapsed_ms();

        let _ = graph.stream.pause();
        drop(graph.stream);
        if let Some(mut resampler) = graph.resampler.take() {
            resampler.stop();
        }
        if let Some(handle) = graph.decoder_handle.take() {
            match handle.join() {
                Ok(Ok(())) => debug!("Decoder thread stopped"),
                Ok(Err(e)) => warn!("Decoder thread stopped with error: {e}"),
                Err(_) => error!("Decoder thread panicked"),
            }
        }
    }

    fn ensure_graph(&mut self) -> bool {
        if self.graph.is_some() {
            return true;
        }
        match self.build_graph(self.parked_ms) {
            Ok(graph) => {
                self.graph = Some(graph);
                true
            }
            Err(e) => {
                self.post_error(NativeErrorKind::Resource, e.to_string());
                false
            }
        }
    }

    fn start_or_pause(&mut self, playing: bool) {
        let Some(graph) = self.graph.as_ref() else {
            return;
        };
        let result = if playing {
            graph.stream.play().map_err(|e| e.to_string())
        } else {
            graph.stream.pause().map_err(|e| e.to_string())
        };
        if let Err(e) = result {
            self.post_error(NativeErrorKind::Output, e);
        }
    }
}

impl NativePipeline for SymphoniaPipeline {
    fn set_state(&mut self, state: NativeState) {
        match state {
            NativeState::Playing | NativeState::Paused => {
                if !self.ensure_graph() {
                    return;
                }
                self.start_or_pause(state == NativeState::Playing);
            }
            NativeState::Ready => {
                self.teardown_graph();
                self.parked_ms = 0;
            }
            NativeState::Null => {
                self.teardown_graph();
            }
        }
        if self.state != state {
            self.transition(state);
        }
        self.post(NativeMessage::AsyncDone);
    }

    fn seek(&mut self, position_ms: i64) -> bool {
        if position_ms < 0 || self.duration_ms.is_some_and(|duration| position_ms > duration) {
            return false;
        }
        let playing = self.state == NativeState::Playing;
        self.teardown_graph();
        self.parked_ms = position_ms;
        if matches!(self.state, NativeState::Playing | NativeState::Paused) {
            if !self.ensure_graph() {
                return false;
            }
            self.start_or_pause(playing);
        }
        self.post(NativeMessage::AsyncDone);
        true
    }

    fn query_position(&self) -> Option<i64> {
        let position = match &self.graph {
            Some(graph) => graph.base_ms + graph.clock.elapsed_ms(),
            None => self.parked_ms,
        };
        Some(match self.duration_ms {
            Some(duration) => position.min(duration),
            None => position,
        })
    }

    fn query_duration(&self) -> Option<i64> {
        self.duration_ms
    }

    fn set_volume(&mut self, volume: f64) {
        self.gain.set(volume);
    }

    fn volume(&self) -> f64 {
        f64::from(self.gain.get())
    }

    fn seqnum(&self) -> u64 {
        self.seqnum
    }
}

impl Drop for SymphoniaPipeline {
    fn drop(&mut self) {
        self.teardown_graph();
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_channel::unbounded;

    use crate::{
        backend::{
            native::PipelineFactory, output::OutputConfig, pipeline::SymphoniaPipelineFactory,
        },
        error::ConstructionError,
    };

    #[test]
    fn test_missing_file_is_construction_error() {
        let factory = SymphoniaPipelineFactory::new(OutputConfig::default());
        let (bus, rx) = unbounded();
        let result = factory.build(Path::new("/nonexistent/file.flac"), bus);
        assert!(matches!(result, Err(ConstructionError::NotFound { .. })));
        // Nothing is posted for a pipeline that was never built.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_directory_is_construction_error() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SymphoniaPipelineFactory::default();
        let (bus, _rx) = unbounded();
        assert!(factory.build(dir.path(), bus).is_err());
    }
}
