//! Synthetic codec backend.
//!
//! Sources are generated in memory from a [`SourceSpec`], decoding goes
//! through the real raw passthrough decoders, the encoders emit small fake
//! H.264/AAC bitstreams, and the muxer records every call it receives.
//! Every extractor, decoder, encoder and muxer takes a lease on a shared
//! [`ResourceLedger`], so a test can check that nothing outlives a run.

use parking_lot::Mutex;
use reelcut_core::pcm::{frames_to_us, us_to_frames};
use reelcut_core::time::ns_to_us;
use reelcut_core::{FrameBuffer, FrameRate, FrameSink, PcmBuffer, PipelineConfig, ReelError, Result};
use reelcut_export::DeviceFactory;
use reelcut_gpu::{DeviceStats, FailPoint, GraphicsDevice, SoftwareDevice};
use reelcut_media::bitstream::adts;
use reelcut_media::ffmpeg::{pcm_decoder, raw_video_decoder, PassthroughDecoder};
use reelcut_media::{
    AudioEncoder, BufferFlags, BufferInfo, CodecConfig, CodecInput, CodecOutput, CodecProvider,
    DecodedFrame, Decoder, EncodedPacket, Encoder, ExportPreset, InputStatus, MediaExtractor,
    MediaFormat, Mime, Mp4Muxer, Muxer, Sample, SeekMode, TrackKind, VideoEncoder,
};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// PCM frames per synthetic audio sample.
pub const AUDIO_CHUNK_FRAMES: u64 = 1024;

/// Longest a synthetic codec sleeps when asked to wait for output.
const MAX_WAIT: Duration = Duration::from_millis(2);

const SPS: [u8; 4] = [0x67, 0x42, 0xc0, 0x1e];
const PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

// ── Sources ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub duration_us: i64,
    /// Frames between sync samples
    pub gop: u64,
    /// Every n-th frame carries the timestamp of the frame before it
    pub repeat_pts_every: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_us: i64,
    /// Constant value of every PCM sample
    pub level: i16,
}

/// A generated source file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSpec {
    pub video: Option<VideoSpec>,
    pub audio: Option<AudioSpec>,
}

impl SourceSpec {
    /// 32x18 video at 30 fps with a sync sample every 10 frames, plus
    /// 48 kHz stereo audio at a constant level.
    pub fn av(duration_ms: i64) -> Self {
        let duration_us = duration_ms * 1000;
        Self {
            video: Some(VideoSpec {
                width: 32,
                height: 18,
                frame_rate: FrameRate::FPS_30,
                duration_us,
                gop: 10,
                repeat_pts_every: None,
            }),
            audio: Some(AudioSpec {
                sample_rate: 48_000,
                channels: 2,
                duration_us,
                level: 8_000,
            }),
        }
    }

    pub fn video_only(duration_ms: i64) -> Self {
        Self {
            audio: None,
            ..Self::av(duration_ms)
        }
    }

    /// Demux every `n`-th video frame with its predecessor's timestamp.
    pub fn with_repeated_timestamps(mut self, n: u64) -> Self {
        if let Some(video) = self.video.as_mut() {
            video.repeat_pts_every = Some(n);
        }
        self
    }

    pub fn with_audio_level(mut self, level: i16) -> Self {
        if let Some(audio) = self.audio.as_mut() {
            audio.level = level;
        }
        self
    }

    fn formats(&self) -> Vec<MediaFormat> {
        let mut formats = Vec::new();
        if let Some(v) = &self.video {
            formats.push(
                MediaFormat::video(Mime::RawVideo, v.width, v.height)
                    .with_frame_rate(v.frame_rate)
                    .with_duration_us(v.duration_us),
            );
        }
        if let Some(a) = &self.audio {
            formats.push(
                MediaFormat::audio(Mime::RawAudio, a.sample_rate, a.channels)
                    .with_duration_us(a.duration_us),
            );
        }
        formats
    }
}

/// Colour of source frame `index`. The frame number is recoverable from the
/// red and green channels.
pub fn frame_colour(index: u64) -> [u8; 4] {
    [(index % 256) as u8, (index / 256 % 256) as u8, 0x80, 0xff]
}

/// Inverse of [`frame_colour`].
pub fn frame_index(colour: [u8; 4]) -> u64 {
    colour[0] as u64 + colour[1] as u64 * 256
}

// ── Resource ledger ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Extractor,
    Decoder,
    Encoder,
    Muxer,
}

/// Live and total counts of every synthetic codec object.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    live: Mutex<HashMap<Resource, i64>>,
    created: Mutex<HashMap<Resource, u64>>,
}

impl ResourceLedger {
    fn acquire(self: &Arc<Self>, kind: Resource) -> Lease {
        *self.live.lock().entry(kind).or_default() += 1;
        *self.created.lock().entry(kind).or_default() += 1;
        Lease {
            ledger: Arc::clone(self),
            kind,
            released: false,
        }
    }

    pub fn live(&self, kind: Resource) -> i64 {
        self.live.lock().get(&kind).copied().unwrap_or(0)
    }

    /// Objects created but not yet released, over every kind.
    pub fn live_total(&self) -> i64 {
        self.live.lock().values().sum()
    }

    pub fn created(&self, kind: Resource) -> u64 {
        self.created.lock().get(&kind).copied().unwrap_or(0)
    }
}

/// One object's entry in the ledger. Dropping a lease without releasing it
/// leaves the object counted as live.
#[derive(Debug)]
struct Lease {
    ledger: Arc<ResourceLedger>,
    kind: Resource,
    released: bool,
}

impl Lease {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            *self.ledger.live.lock().entry(self.kind).or_default() -= 1;
        }
    }

    fn check_live(&self) -> Result<()> {
        if self.released {
            Err(ReelError::InvalidState(format!("{:?} already released", self.kind)))
        } else {
            Ok(())
        }
    }
}

// ── Traces ─────────────────────────────────────────────────────

/// One call received by the recording muxer.
#[derive(Debug, Clone, PartialEq)]
pub enum MuxEvent {
    AddTrack { index: usize, kind: TrackKind },
    Start,
    Write {
        track: usize,
        pts_us: i64,
        size: usize,
        key: bool,
    },
    Stop,
    Release,
}

/// Shared log of [`MuxEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct MuxTrace {
    events: Arc<Mutex<Vec<MuxEvent>>>,
    frames_at_start: Arc<Mutex<Option<usize>>>,
}

impl MuxTrace {
    fn push(&self, event: MuxEvent) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<MuxEvent> {
        self.events.lock().clone()
    }

    /// Frames the video encoder had received when the muxer started.
    pub fn frames_rendered_at_start(&self) -> Option<usize> {
        *self.frames_at_start.lock()
    }

    pub fn track_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, MuxEvent::AddTrack { .. }))
            .count()
    }

    pub fn track_index(&self, kind: TrackKind) -> Option<usize> {
        self.events().iter().find_map(|e| match e {
            MuxEvent::AddTrack { index, kind: k } if *k == kind => Some(*index),
            _ => None,
        })
    }

    /// Written `(pts_us, key)` pairs of the `kind` track, in write order.
    pub fn samples(&self, kind: TrackKind) -> Vec<(i64, bool)> {
        let Some(track) = self.track_index(kind) else {
            return Vec::new();
        };
        self.events()
            .iter()
            .filter_map(|e| match e {
                MuxEvent::Write {
                    track: t,
                    pts_us,
                    key,
                    ..
                } if *t == track => Some((*pts_us, *key)),
                _ => None,
            })
            .collect()
    }

    pub fn pts(&self, kind: TrackKind) -> Vec<i64> {
        self.samples(kind).into_iter().map(|(pts, _)| pts).collect()
    }

    pub fn count(&self, event: &MuxEvent) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

/// PCM buffer received by the synthetic audio encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmRecord {
    pub pts_us: i64,
    pub frames: usize,
    /// Largest absolute sample value
    pub peak: u16,
}

/// Frame received by the synthetic encoder surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceRecord {
    pub pts_us: i64,
    /// Colour at the centre of the frame
    pub centre: [u8; 4],
}

#[derive(Debug, Clone, Default)]
pub struct AudioTrace(Arc<Mutex<Vec<PcmRecord>>>);

impl AudioTrace {
    pub fn records(&self) -> Vec<PcmRecord> {
        self.0.lock().clone()
    }

    pub fn total_frames(&self) -> u64 {
        self.0.lock().iter().map(|r| r.frames as u64).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SurfaceTrace(Arc<Mutex<Vec<SurfaceRecord>>>);

impl SurfaceTrace {
    pub fn records(&self) -> Vec<SurfaceRecord> {
        self.0.lock().clone()
    }
}

// ── Faults ─────────────────────────────────────────────────────

/// Failures the provider can be told to inject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    pub fail_muxer: bool,
    pub fail_video_encoder: bool,
    pub fail_audio_encoder: bool,
    pub fail_extractor: bool,
    /// The video encoder accepts frames but never produces output
    pub stall_video_encoder: bool,
    /// Decoders refuse every other sample once
    pub busy_decoder: bool,
}

fn wait(timeout: Duration) {
    if !timeout.is_zero() {
        std::thread::sleep(timeout.min(MAX_WAIT));
    }
}

// ── Extractor ──────────────────────────────────────────────────

struct SyntheticExtractor {
    spec: SourceSpec,
    formats: Vec<MediaFormat>,
    selected: Option<usize>,
    next: u64,
    lease: Lease,
}

impl SyntheticExtractor {
    fn selected_kind(&self) -> Result<TrackKind> {
        self.selected
            .and_then(|i| self.formats.get(i))
            .map(|f| f.kind())
            .ok_or_else(|| ReelError::InvalidState("no track selected".into()))
    }

    fn video_sample(&self, v: &VideoSpec) -> Option<Sample> {
        let mut pts = v.frame_rate.frame_time_us(self.next);
        if pts >= v.duration_us {
            return None;
        }
        if let Some(n) = v.repeat_pts_every {
            if self.next > 0 && self.next % n == 0 {
                pts = v.frame_rate.frame_time_us(self.next - 1);
            }
        }
        let frame = FrameBuffer::solid(v.width, v.height, frame_colour(self.next));
        Some(Sample {
            data: frame.data,
            presentation_time_us: pts,
            key_frame: self.next % v.gop == 0,
        })
    }

    fn audio_sample(&self, a: &AudioSpec) -> Option<Sample> {
        let total = us_to_frames(a.duration_us, a.sample_rate);
        let first = self.next * AUDIO_CHUNK_FRAMES;
        if first >= total {
            return None;
        }
        let frames = AUDIO_CHUNK_FRAMES.min(total - first) as usize;
        let samples = vec![a.level; frames * a.channels as usize];
        let pcm = PcmBuffer::new(
            a.sample_rate,
            a.channels,
            frames_to_us(first, a.sample_rate),
            samples,
        );
        Some(Sample {
            data: pcm.to_le_bytes(),
            presentation_time_us: pcm.pts_us,
            key_frame: true,
        })
    }
}

impl MediaExtractor for SyntheticExtractor {
    fn track_count(&self) -> usize {
        self.formats.len()
    }

    fn track_format(&self, index: usize) -> Result<MediaFormat> {
        self.formats
            .get(index)
            .cloned()
            .ok_or_else(|| ReelError::InvalidParameter(format!("no track {}", index)))
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        self.lease.check_live()?;
        if index >= self.formats.len() {
            return Err(ReelError::InvalidParameter(format!("no track {}", index)));
        }
        self.selected = Some(index);
        self.next = 0;
        Ok(())
    }

    fn seek_to(&mut self, time_us: i64, _mode: SeekMode) -> Result<()> {
        self.lease.check_live()?;
        let time_us = time_us.max(0);
        self.next = match self.selected_kind()? {
            TrackKind::Video => {
                let Some(v) = self.spec.video else {
                    return Err(ReelError::Internal("video track on a source without video".into()));
                };
                let mut index = 0;
                while v.frame_rate.frame_time_us(index + 1) <= time_us {
                    index += 1;
                }
                index - index % v.gop
            }
            TrackKind::Audio => {
                let Some(a) = self.spec.audio else {
                    return Err(ReelError::Internal("audio track on a source without audio".into()));
                };
                us_to_frames(time_us, a.sample_rate) / AUDIO_CHUNK_FRAMES
            }
        };
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<Sample>> {
        self.lease.check_live()?;
        let sample = match self.selected_kind()? {
            TrackKind::Video => self.spec.video.as_ref().and_then(|v| self.video_sample(v)),
            TrackKind::Audio => self.spec.audio.as_ref().and_then(|a| self.audio_sample(a)),
        };
        if sample.is_some() {
            self.next += 1;
        }
        Ok(sample)
    }

    fn release(&mut self) {
        self.lease.release();
    }
}

// ── Decoders ───────────────────────────────────────────────────

struct CountedDecoder<T> {
    inner: PassthroughDecoder<T>,
    lease: Lease,
    busy: bool,
    refused: bool,
}

impl<T: Send> Decoder<T> for CountedDecoder<T> {
    fn queue_input(&mut self, input: CodecInput) -> Result<InputStatus> {
        self.lease.check_live()?;
        if self.busy && !self.refused && matches!(input, CodecInput::Sample(_)) {
            self.refused = true;
            return Ok(InputStatus::Busy(input));
        }
        self.refused = false;
        self.inner.queue_input(input)
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecOutput<T>> {
        let output = self.inner.dequeue_output(timeout)?;
        if matches!(output, CodecOutput::TryAgainLater) {
            wait(timeout);
        }
        Ok(output)
    }

    fn release(&mut self) {
        self.inner.release();
        self.lease.release();
    }
}

// ── Encoders ───────────────────────────────────────────────────

/// Input surface of the synthetic video encoder.
struct SyntheticSurface {
    width: u32,
    height: u32,
    queue: Arc<Mutex<VecDeque<i64>>>,
    trace: SurfaceTrace,
    released: bool,
}

impl FrameSink for SyntheticSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn submit(&mut self, frame: &FrameBuffer, presentation_time_ns: i64) -> Result<()> {
        if self.released {
            return Err(ReelError::InvalidState("surface already released".into()));
        }
        if (frame.width, frame.height) != (self.width, self.height) {
            return Err(ReelError::Encoder(format!(
                "surface is {}x{}, got a {}x{} frame",
                self.width, self.height, frame.width, frame.height
            )));
        }
        let pts_us = ns_to_us(presentation_time_ns);
        self.trace.0.lock().push(SurfaceRecord {
            pts_us,
            centre: frame.pixel(frame.width / 2, frame.height / 2),
        });
        self.queue.lock().push_back(pts_us);
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// Output bookkeeping shared by both synthetic encoders.
#[derive(Debug, Default)]
struct Emitter {
    format_sent: bool,
    config_sent: bool,
    input_ended: bool,
    done: bool,
    emitted: u64,
}

impl Emitter {
    /// Next output given the pts of the oldest pending input, if any.
    fn next(
        &mut self,
        format: &MediaFormat,
        pending: Option<i64>,
        packet: impl FnOnce(i64, u64) -> EncodedPacket,
    ) -> Option<CodecOutput<EncodedPacket>> {
        if self.done {
            return Some(CodecOutput::EndOfStream);
        }
        if !self.format_sent && (pending.is_some() || self.input_ended) {
            self.format_sent = true;
            return Some(CodecOutput::FormatChanged(format.clone()));
        }
        if let Some(pts) = pending {
            if !self.config_sent {
                self.config_sent = true;
                return Some(CodecOutput::Buffer(EncodedPacket::new(
                    config_bytes(format),
                    0,
                    BufferFlags::CODEC_CONFIG,
                )));
            }
            let out = packet(pts, self.emitted);
            self.emitted += 1;
            return Some(CodecOutput::Buffer(out));
        }
        if self.input_ended {
            self.done = true;
            return Some(CodecOutput::EndOfStream);
        }
        None
    }
}

fn config_bytes(format: &MediaFormat) -> Vec<u8> {
    match &format.codec_config {
        Some(CodecConfig::Avc { sps, pps }) => {
            let mut out = vec![0, 0, 0, 1];
            out.extend_from_slice(sps);
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(pps);
            out
        }
        Some(CodecConfig::Aac {
            audio_specific_config,
        }) => audio_specific_config.clone(),
        None => Vec::new(),
    }
}

struct SyntheticVideoEncoder {
    format: MediaFormat,
    queue: Arc<Mutex<VecDeque<i64>>>,
    trace: SurfaceTrace,
    surface_created: bool,
    emitter: Emitter,
    stalled: bool,
    lease: Lease,
}

impl Encoder for SyntheticVideoEncoder {
    fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecOutput<EncodedPacket>> {
        self.lease.check_live()?;
        if self.stalled {
            wait(timeout);
            return Ok(CodecOutput::TryAgainLater);
        }
        let pending = self.queue.lock().front().copied();
        let output = self.emitter.next(&self.format, pending, |pts, n| {
            let key = n % 30 == 0;
            let nal = if key { 0x65 } else { 0x41 };
            EncodedPacket::new(
                vec![0, 0, 0, 1, nal, 0x88, 0x84, n as u8],
                pts,
                if key {
                    BufferFlags::KEY_FRAME
                } else {
                    BufferFlags::default()
                },
            )
        });
        match output {
            Some(out) => {
                if matches!(out, CodecOutput::Buffer(ref p) if !p.info.flags.codec_config) {
                    self.queue.lock().pop_front();
                }
                Ok(out)
            }
            None => {
                wait(timeout);
                Ok(CodecOutput::TryAgainLater)
            }
        }
    }

    fn signal_end_of_input_stream(&mut self) -> Result<()> {
        self.lease.check_live()?;
        self.emitter.input_ended = true;
        Ok(())
    }

    fn release(&mut self) {
        self.queue.lock().clear();
        self.lease.release();
    }
}

impl VideoEncoder for SyntheticVideoEncoder {
    fn create_input_surface(&mut self) -> Result<Box<dyn FrameSink>> {
        self.lease.check_live()?;
        if self.surface_created {
            return Err(ReelError::InvalidState("input surface already created".into()));
        }
        self.surface_created = true;
        Ok(Box::new(SyntheticSurface {
            width: self.format.width,
            height: self.format.height,
            queue: Arc::clone(&self.queue),
            trace: self.trace.clone(),
            released: false,
        }))
    }
}

struct SyntheticAudioEncoder {
    format: MediaFormat,
    pending: VecDeque<i64>,
    trace: AudioTrace,
    emitter: Emitter,
    lease: Lease,
}

impl Encoder for SyntheticAudioEncoder {
    fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecOutput<EncodedPacket>> {
        self.lease.check_live()?;
        let pending = self.pending.front().copied();
        let output = self.emitter.next(&self.format, pending, |pts, n| {
            EncodedPacket::new(vec![0x21, 0x10, 0x04, n as u8], pts, BufferFlags::KEY_FRAME)
        });
        match output {
            Some(out) => {
                if matches!(out, CodecOutput::Buffer(ref p) if !p.info.flags.codec_config) {
                    self.pending.pop_front();
                }
                Ok(out)
            }
            None => {
                wait(timeout);
                Ok(CodecOutput::TryAgainLater)
            }
        }
    }

    fn signal_end_of_input_stream(&mut self) -> Result<()> {
        self.lease.check_live()?;
        self.emitter.input_ended = true;
        Ok(())
    }

    fn release(&mut self) {
        self.pending.clear();
        self.lease.release();
    }
}

impl AudioEncoder for SyntheticAudioEncoder {
    fn queue_input(&mut self, pcm: &PcmBuffer) -> Result<()> {
        self.lease.check_live()?;
        if self.emitter.input_ended {
            return Err(ReelError::InvalidState("PCM queued after end of stream".into()));
        }
        if pcm.sample_rate != self.format.sample_rate || pcm.channels != self.format.channels {
            return Err(ReelError::Encoder(format!(
                "expected {} Hz x{}, got {} Hz x{}",
                self.format.sample_rate, self.format.channels, pcm.sample_rate, pcm.channels
            )));
        }
        self.trace.0.lock().push(PcmRecord {
            pts_us: pcm.pts_us,
            frames: pcm.frames(),
            peak: pcm.samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0),
        });
        self.pending.push_back(pcm.pts_us);
        Ok(())
    }
}

// ── Muxer ──────────────────────────────────────────────────────

/// Muxer that records calls and enforces the muxer state rules, optionally
/// forwarding everything to a real muxer.
struct RecordingMuxer {
    trace: MuxTrace,
    surface: SurfaceTrace,
    inner: Option<Box<dyn Muxer>>,
    tracks: Vec<Option<i64>>,
    started: bool,
    stopped: bool,
    lease: Lease,
}

impl Muxer for RecordingMuxer {
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize> {
        self.lease.check_live()?;
        if self.started {
            return Err(ReelError::InvalidState("track added after start".into()));
        }
        if let Some(inner) = self.inner.as_mut() {
            inner.add_track(format)?;
        }
        let index = self.tracks.len();
        self.tracks.push(None);
        self.trace.push(MuxEvent::AddTrack {
            index,
            kind: format.kind(),
        });
        Ok(index)
    }

    fn start(&mut self) -> Result<()> {
        self.lease.check_live()?;
        if self.started {
            return Err(ReelError::InvalidState("muxer started twice".into()));
        }
        if self.tracks.is_empty() {
            return Err(ReelError::InvalidState("muxer started without tracks".into()));
        }
        if let Some(inner) = self.inner.as_mut() {
            inner.start()?;
        }
        self.started = true;
        *self.trace.frames_at_start.lock() = Some(self.surface.0.lock().len());
        self.trace.push(MuxEvent::Start);
        Ok(())
    }

    fn write_sample_data(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<()> {
        self.lease.check_live()?;
        if !self.started || self.stopped {
            return Err(ReelError::InvalidState(
                "write_sample_data outside started state".into(),
            ));
        }
        let last = self
            .tracks
            .get_mut(track)
            .ok_or_else(|| ReelError::InvalidParameter(format!("no track {}", track)))?;
        if let Some(prev) = *last {
            if info.presentation_time_us <= prev {
                return Err(ReelError::InvalidParameter(format!(
                    "track {} pts {} does not follow {}",
                    track, info.presentation_time_us, prev
                )));
            }
        }
        *last = Some(info.presentation_time_us);
        if let Some(inner) = self.inner.as_mut() {
            inner.write_sample_data(track, data, info)?;
        }
        self.trace.push(MuxEvent::Write {
            track,
            pts_us: info.presentation_time_us,
            size: info.size,
            key: info.flags.key_frame,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.lease.check_live()?;
        if !self.started {
            return Err(ReelError::InvalidState("muxer was never started".into()));
        }
        if self.stopped {
            return Err(ReelError::InvalidState("muxer stopped twice".into()));
        }
        if let Some(inner) = self.inner.as_mut() {
            inner.stop()?;
        }
        self.stopped = true;
        self.trace.push(MuxEvent::Stop);
        Ok(())
    }

    fn release(&mut self) {
        if self.lease.released {
            return;
        }
        if let Some(mut inner) = self.inner.take() {
            inner.release();
        }
        self.trace.push(MuxEvent::Release);
        self.lease.release();
    }
}

// ── Provider ───────────────────────────────────────────────────

/// [`CodecProvider`] over in-memory sources.
#[derive(Default)]
pub struct SyntheticProvider {
    sources: HashMap<String, SourceSpec>,
    faults: Faults,
    write_mp4: bool,
    ledger: Arc<ResourceLedger>,
    mux: MuxTrace,
    audio: AudioTrace,
    surface: SurfaceTrace,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, name: impl Into<String>, spec: SourceSpec) -> Self {
        self.sources.insert(name.into(), spec);
        self
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// Also write a real MP4 file to the export output path.
    pub fn writing_mp4(mut self) -> Self {
        self.write_mp4 = true;
        self
    }

    pub fn ledger(&self) -> Arc<ResourceLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn mux(&self) -> MuxTrace {
        self.mux.clone()
    }

    pub fn audio_inputs(&self) -> AudioTrace {
        self.audio.clone()
    }

    pub fn surface_frames(&self) -> SurfaceTrace {
        self.surface.clone()
    }
}

impl CodecProvider for SyntheticProvider {
    fn create_extractor(&self, source: &str) -> Result<Box<dyn MediaExtractor>> {
        if self.faults.fail_extractor {
            return Err(ReelError::Media(format!("cannot open {}", source)));
        }
        let spec = *self
            .sources
            .get(source)
            .ok_or_else(|| ReelError::NotFound(source.to_string()))?;
        Ok(Box::new(SyntheticExtractor {
            spec,
            formats: spec.formats(),
            selected: None,
            next: 0,
            lease: self.ledger.acquire(Resource::Extractor),
        }))
    }

    fn create_video_decoder(&self, format: &MediaFormat) -> Result<Box<dyn Decoder<DecodedFrame>>> {
        Ok(Box::new(CountedDecoder {
            inner: raw_video_decoder(format)?,
            lease: self.ledger.acquire(Resource::Decoder),
            busy: self.faults.busy_decoder,
            refused: false,
        }))
    }

    fn create_audio_decoder(&self, format: &MediaFormat) -> Result<Box<dyn Decoder<PcmBuffer>>> {
        Ok(Box::new(CountedDecoder {
            inner: pcm_decoder(format)?,
            lease: self.ledger.acquire(Resource::Decoder),
            busy: self.faults.busy_decoder,
            refused: false,
        }))
    }

    fn create_video_encoder(&self, format: &MediaFormat) -> Result<Box<dyn VideoEncoder>> {
        if self.faults.fail_video_encoder {
            return Err(ReelError::Encoder("no video encoder for this format".into()));
        }
        let mut output = format.clone().with_codec_config(CodecConfig::Avc {
            sps: SPS.to_vec(),
            pps: PPS.to_vec(),
        });
        output.mime = Mime::H264;
        Ok(Box::new(SyntheticVideoEncoder {
            format: output,
            queue: Arc::default(),
            trace: self.surface.clone(),
            surface_created: false,
            emitter: Emitter::default(),
            stalled: self.faults.stall_video_encoder,
            lease: self.ledger.acquire(Resource::Encoder),
        }))
    }

    fn create_audio_encoder(&self, format: &MediaFormat) -> Result<Box<dyn AudioEncoder>> {
        if self.faults.fail_audio_encoder {
            return Err(ReelError::Encoder("no audio encoder for this format".into()));
        }
        let asc = adts::lc_config(format.sample_rate, format.channels)?;
        let mut output = format.clone().with_codec_config(CodecConfig::Aac {
            audio_specific_config: asc.to_vec(),
        });
        output.mime = Mime::Aac;
        Ok(Box::new(SyntheticAudioEncoder {
            format: output,
            pending: VecDeque::new(),
            trace: self.audio.clone(),
            emitter: Emitter::default(),
            lease: self.ledger.acquire(Resource::Encoder),
        }))
    }

    fn create_muxer(&self, output: &Path) -> Result<Box<dyn Muxer>> {
        if self.faults.fail_muxer {
            return Err(ReelError::Muxer(format!(
                "cannot open {} for writing",
                output.display()
            )));
        }
        let inner = if self.write_mp4 {
            Some(Box::new(Mp4Muxer::create(output)?) as Box<dyn Muxer>)
        } else {
            None
        };
        Ok(Box::new(RecordingMuxer {
            trace: self.mux.clone(),
            surface: self.surface.clone(),
            inner,
            tracks: Vec::new(),
            started: false,
            stopped: false,
            lease: self.ledger.acquire(Resource::Muxer),
        }))
    }
}

// ── Graphics ───────────────────────────────────────────────────

/// Stats of every software device a factory has handed out.
pub type DeviceLog = Arc<Mutex<Vec<Arc<DeviceStats>>>>;

/// Software devices that fail at `fail` (if set), with their stats logged.
pub fn tracked_devices(fail: Option<FailPoint>) -> (DeviceFactory, DeviceLog) {
    let log = DeviceLog::default();
    let created = Arc::clone(&log);
    let factory: DeviceFactory = Arc::new(move || {
        let mut device = SoftwareDevice::new();
        if let Some(point) = fail {
            device = device.fail_at(point);
        }
        created.lock().push(device.stats());
        Ok(Box::new(device) as Box<dyn GraphicsDevice>)
    });
    (factory, log)
}

/// Live graphics objects over every logged device.
pub fn live_graphics_objects(log: &DeviceLog) -> i64 {
    log.lock().iter().map(|s| s.live_objects()).sum()
}

// ── Run settings ───────────────────────────────────────────────

/// A small 30 fps preset so the software renderer stays fast.
pub fn test_preset() -> ExportPreset {
    ExportPreset {
        name: "TEST",
        width: 64,
        height: 36,
        video_bitrate: 500_000,
        ..ExportPreset::STANDARD
    }
}

/// Short timeouts for tests that expect a stall.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        dequeue_timeout_ms: 1,
        stall_timeout_ms: 150,
        drain_timeout_ms: 150,
        max_frames_in_flight: 4,
        progress_interval_frames: 5,
    }
}

/// A unique path in the system temp directory.
pub fn temp_output(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("reelcut-{}-{}", uuid::Uuid::new_v4(), name))
}
