//! Codec, extractor and muxer seams.
//!
//! The export pipeline is written against these traits. They follow the
//! shape of platform hardware codec APIs: input is queued, output is polled
//! with a timeout, format changes arrive in-band, and every object is
//! released explicitly.

use glam::Mat4;
use reelcut_core::{FrameBuffer, FrameSink, PcmBuffer, Result};
use std::path::Path;
use std::time::Duration;

use crate::buffer::{BufferInfo, EncodedPacket, Sample};
use crate::format::{MediaFormat, TrackKind};

/// Where a seek lands relative to the requested time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// The closest sync sample at or before the target
    PreviousSync,
    /// The closest sync sample in either direction
    ClosestSync,
}

/// Demuxes one source file.
pub trait MediaExtractor: Send {
    /// Number of tracks in the source.
    fn track_count(&self) -> usize;

    /// Format of track `index`.
    fn track_format(&self, index: usize) -> Result<MediaFormat>;

    /// Choose the track `read_sample` returns samples from.
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Reposition the selected track.
    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<()>;

    /// Next sample of the selected track, `None` at end of stream.
    fn read_sample(&mut self) -> Result<Option<Sample>>;

    /// Release the source.
    fn release(&mut self);
}

/// Index of the first track of `kind`.
pub fn find_track(extractor: &dyn MediaExtractor, kind: TrackKind) -> Result<Option<usize>> {
    for index in 0..extractor.track_count() {
        if extractor.track_format(index)?.kind() == kind {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Input handed to a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecInput {
    Sample(Sample),
    EndOfStream,
}

/// Result of queueing input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputStatus {
    Queued,
    /// No input slot was free; the input is handed back to retry later.
    Busy(CodecInput),
}

/// Result of polling a codec.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecOutput<T> {
    Buffer(T),
    /// The output format is now known (or changed)
    FormatChanged(MediaFormat),
    /// Nothing ready within the timeout
    TryAgainLater,
    /// All output has been emitted
    EndOfStream,
}

/// A decoded video frame together with its texture transform.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub buffer: FrameBuffer,
    pub presentation_time_us: i64,
    /// 4x4 texture-coordinate transform for this frame
    pub transform: Mat4,
}

/// A decoder producing `T` (frames or PCM).
pub trait Decoder<T>: Send {
    fn queue_input(&mut self, input: CodecInput) -> Result<InputStatus>;

    fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecOutput<T>>;

    fn release(&mut self);
}

/// Output side shared by all encoders.
pub trait Encoder: Send {
    /// Poll for compressed output.
    fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecOutput<EncodedPacket>>;

    /// No more input will follow.
    fn signal_end_of_input_stream(&mut self) -> Result<()>;

    fn release(&mut self);
}

/// A video encoder fed through a drawable input surface.
pub trait VideoEncoder: Encoder {
    /// Create the input surface. Can be called once.
    fn create_input_surface(&mut self) -> Result<Box<dyn FrameSink>>;
}

/// An audio encoder fed with PCM.
pub trait AudioEncoder: Encoder {
    /// Queue PCM; its `pts_us` is the output presentation time.
    fn queue_input(&mut self, pcm: &PcmBuffer) -> Result<()>;
}

/// Container writer.
pub trait Muxer: Send {
    /// Register a track, returning its index.
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize>;

    /// Write the container header. No tracks may be added afterwards.
    fn start(&mut self) -> Result<()>;

    /// Append one encoded sample to `track`.
    fn write_sample_data(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<()>;

    /// Finalise the container. Fails if the muxer was never started.
    fn stop(&mut self) -> Result<()>;

    /// Release the output.
    fn release(&mut self);
}

/// Factory for every codec object an export needs.
pub trait CodecProvider: Send + Sync {
    fn create_extractor(&self, source: &str) -> Result<Box<dyn MediaExtractor>>;

    fn create_video_decoder(&self, format: &MediaFormat) -> Result<Box<dyn Decoder<DecodedFrame>>>;

    fn create_audio_decoder(&self, format: &MediaFormat) -> Result<Box<dyn Decoder<PcmBuffer>>>;

    fn create_video_encoder(&self, format: &MediaFormat) -> Result<Box<dyn VideoEncoder>>;

    fn create_audio_encoder(&self, format: &MediaFormat) -> Result<Box<dyn AudioEncoder>>;

    fn create_muxer(&self, output: &Path) -> Result<Box<dyn Muxer>>;
}
