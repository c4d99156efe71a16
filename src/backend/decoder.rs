//! Audio file decoding using the `symphonia` crate.
//!
//! This module probes media files, decodes the first audio track into
//! interleaved `f32` samples and feeds them to the output through an `rtrb`
//! ring buffer from a dedicated producer thread.

use std::{
    fs::File,
    io::{Error as StdError, ErrorKind::UnexpectedEof},
    path::Path,
    thread::sleep,
    time::Duration,
};

use {
    rtrb::{Producer, PushError::Full},
    serde::{Deserialize, Serialize},
    symphonia::{
        core::{
            audio::SampleBuffer,
            codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions},
            errors::Error as SymphoniaError,
            formats::{FormatOptions, FormatReader, SeekMode::Accurate, SeekTo::Time},
            io::{MediaSourceStream, MediaSourceStreamOptions},
            meta::MetadataOptions,
            probe::Hint,
            units::Time as MediaTime,
        },
        default::{get_codecs, get_probe},
    },
    thiserror::Error,
    tracing::{debug, warn},
};

use crate::{
    backend::native::{BusSender, NativeErrorKind, NativeMessage},
    error::NativeRuntimeError,
};

/// Sleep duration when the ring buffer is full.
const PRODUCER_SLEEP_DURATION: Duration = Duration::from_micros(100);

/// Poll interval while waiting for the device to drain the ring buffer.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Error type for audio decoding operations.
#[derive(Error, Debug)]
pub enum DecoderError {
    /// Failed to open or read the audio file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Symphonia decoding error.
    #[error("Decoding error: {0}")]
    SymphoniaError(#[from] SymphoniaError),
    /// No audio track found in file.
    #[error("No audio track found")]
    NoAudioTrack,
}

impl DecoderError {
    /// Native error class for this failure when it happens mid-stream.
    #[must_use]
    pub fn native_kind(&self) -> NativeErrorKind {
        match self {
            DecoderError::IoError(_) | DecoderError::SymphoniaError(SymphoniaError::IoError(_)) => {
                NativeErrorKind::Io
            }
            _ => NativeErrorKind::Decode,
        }
    }
}

/// Stream format of the decoded audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
    /// Bits per coded sample, when the container reports it.
    pub bits_per_sample: Option<u32>,
}

/// Decoder for the first audio track of a media file.
pub struct AudioDecoder {
    /// Demuxer for the container.
    format_reader: Box<dyn FormatReader>,
    /// Codec instance for the selected track.
    decoder: Box<dyn Decoder>,
    /// Identifier of the selected track inside the container.
    track_id: u32,
    /// Frame count announced by the container.
    n_frames: Option<u64>,
    /// Reusable interleaving buffer.
    sample_buffer: Option<SampleBuffer<f32>>,
    /// Frame capacity of `sample_buffer`.
    buffer_frames: usize,
    /// Decoded stream format.
    pub format: AudioFormat,
}

impl AudioDecoder {
    /// Opens and probes `path`.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if the file cannot be read, the container is
    /// not recognized, or it holds no decodable audio track.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DecoderError> {
        let path = path.as_ref();

        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let probed = get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecoderError::NoAudioTrack)?;

        let codec_params = &track.codec_params;
        let channels = codec_params.channels.ok_or(DecoderError::NoAudioTrack)?;
        let format = AudioFormat {
            sample_rate: codec_params.sample_rate.unwrap_or(44100),
            channels: u16::try_from(channels.count()).unwrap_or(2),
            bits_per_sample: codec_params.bits_per_coded_sample,
        };
        let track_id = track.id;
        let n_frames = codec_params.n_frames;

        let decoder = get_codecs().make(codec_params, &DecoderOptions::default())?;

        debug!(
            path = %path.display(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Opened audio decoder"
        );

        Ok(AudioDecoder {
            format_reader,
            decoder,
            track_id,
            n_frames,
            sample_buffer: None,
            buffer_frames: 0,
            format,
        })
    }

    /// Decodes the next packet of the selected track.
    ///
    /// # Returns
    ///
    /// Interleaved samples, or `None` at the end of the stream.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` on unrecoverable read or codec failures. Corrupt
    /// packets are skipped.
    pub fn decode_next(&mut self) -> Result<Option<&[f32]>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == UnexpectedEof => return Ok(None),
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping corrupt packet: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if decoded.frames() == 0 {
                continue;
            }

            if decoded.capacity() > self.buffer_frames {
                self.buffer_frames = decoded.capacity();
                self.sample_buffer = None;
            }

            let spec = *decoded.spec();
            let frames = self.buffer_frames as u64;
            let buffer = self
                .sample_buffer
                .get_or_insert_with(|| SampleBuffer::new(frames, spec));
            buffer.copy_interleaved_ref(decoded);
            return Ok(Some(buffer.samples()));
        }
    }

    /// Seeks to `position_ms` from the start of the stream.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if the container refuses the seek.
    pub fn seek(&mut self, position_ms: u64) -> Result<(), DecoderError> {
        let seconds = position_ms / 1000;
        let frac_ms = u32::try_from(position_ms % 1000).unwrap_or(0);
        let time = MediaTime::new(seconds, f64::from(frac_ms) / 1000.0);
        self.format_reader.seek(
            Accurate,
            Time {
                time,
                track_id: Some(self.track_id),
            },
        )?;
        self.decoder.reset();
        Ok(())
    }

    /// Duration of the selected track in milliseconds, if the container knows it.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        frames_to_ms(self.n_frames?, self.format.sample_rate)
    }
}

/// Converts a frame count to milliseconds, rounding to nearest.
///
/// Returns `None` for a zero sample rate.
fn frames_to_ms(frames: u64, sample_rate: u32) -> Option<u64> {
    let sample_rate = u64::from(sample_rate);
    if sample_rate == 0 {
        return None;
    }
    Some((frames.saturating_mul(1000) + sample_rate / 2) / sample_rate)
}

/// Decodes into a ring buffer until the stream ends or the reader goes away.
pub struct AudioProducer {
    /// Source of decoded samples.
    decoder: AudioDecoder,
    /// Ring buffer towards the output.
    producer: Producer<f32>,
    /// Bus to report end of stream and failures on.
    bus: BusSender,
    /// Data flow this producer feeds.
    seqnum: u64,
}

impl AudioProducer {
    /// Creates a producer that reports on `bus`, tagging messages with `seqnum`.
    pub fn new(
        decoder: AudioDecoder,
        producer: Producer<f32>,
        bus: BusSender,
        seqnum: u64,
    ) -> Self {
        Self {
            decoder,
            producer,
            bus,
            seqnum,
        }
    }

    /// Runs the decode loop. Meant for a dedicated worker thread.
    ///
    /// Returns early and quietly once the consuming side of the ring buffer
    /// has been dropped. Posts [`NativeMessage::EndOfStream`] after the last
    /// sample has been consumed.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if decoding fails; the failure is also posted
    /// on the bus.
    pub fn run(mut self) -> Result<(), DecoderError> {
        loop {
            let samples = match self.decoder.decode_next() {
                Ok(Some(samples)) => samples,
                Ok(None) => break,
                Err(e) => {
                    let error = NativeRuntimeError::new(e.native_kind(), e.to_string());
                    let _ = self.bus.try_send(NativeMessage::Error {
                        seqnum: self.seqnum,
                        error,
                    });
                    return Err(e);
                }
            };

            for &sample in samples {
                loop {
                    if self.producer.is_abandoned() {
                        return Ok(());
                    }
                    match self.producer.push(sample) {
                        Ok(()) => break,
                        Err(Full(_)) => sleep(PRODUCER_SLEEP_DURATION),
                    }
                }
            }
        }

        while self.producer.slots() < self.producer.buffer().capacity() {
            if self.producer.is_abandoned() {
                return Ok(());
            }
            sleep(DRAIN_POLL_INTERVAL);
        }

        debug!("Decoder reached end of stream");
        let _ = self.bus.try_send(NativeMessage::EndOfStream {
            seqnum: self.seqnum,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Error, ErrorKind::NotFound, Write};

    use tempfile::NamedTempFile;

    use crate::backend::{
        decoder::{AudioDecoder, DecoderError, frames_to_ms},
        native::NativeErrorKind,
    };

    #[test]
    fn test_frames_to_ms() {
        assert_eq!(frames_to_ms(44_100, 44_100), Some(1000));
        assert_eq!(frames_to_ms(66_150, 44_100), Some(1500));
        assert_eq!(frames_to_ms(0, 48_000), Some(0));
    }

    #[test]
    fn test_frames_to_ms_zero_rate() {
        assert_eq!(frames_to_ms(44_100, 0), None);
    }

    #[test]
    fn test_decoder_error_display() {
        let io_error = Error::new(NotFound, "File not found");
        let decoder_error = DecoderError::IoError(io_error);
        assert!(decoder_error.to_string().contains("IO error"));
        assert_eq!(DecoderError::NoAudioTrack.to_string(), "No audio track found");
    }

    #[test]
    fn test_native_kind() {
        let io_error = DecoderError::IoError(Error::new(NotFound, "gone"));
        assert_eq!(io_error.native_kind(), NativeErrorKind::Io);
        assert_eq!(
            DecoderError::NoAudioTrack.native_kind(),
            NativeErrorKind::Decode
        );
    }

    #[test]
    fn test_missing_file_fails() {
        let result = AudioDecoder::new("/nonexistent/file.flac");
        assert!(matches!(result, Err(DecoderError::IoError(_))));
    }

    #[test]
    fn test_garbage_file_fails() {
        let mut file = NamedTempFile::with_suffix(".mp3").unwrap();
        file.write_all(b"definitely not audio").unwrap();
        assert!(AudioDecoder::new(file.path()).is_err());
    }
}
