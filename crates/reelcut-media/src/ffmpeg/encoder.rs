//! H.264 and AAC encoders backed by ffmpeg subprocesses.
//!
//! Raw input goes to ffmpeg's stdin, the elementary stream comes back on
//! stdout and is split into access units (Annex-B) or frames (ADTS) by a
//! reader thread. Presentation times never round-trip through ffmpeg: they
//! are queued on the input side and matched to output in order.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use reelcut_core::pcm::frames_to_us;
use reelcut_core::time::ns_to_us;
use reelcut_core::{FrameBuffer, FrameRate, FrameSink, PcmBuffer, ReelError, Result};
use std::collections::VecDeque;
use std::io::Write;
use std::process::ChildStdin;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::process::{spawn_reader, FfmpegProcess, PipeEvent};
use crate::bitstream::{adts, annexb, AccessUnitSplitter, AdtsHeader, AdtsReader};
use crate::buffer::{BufferFlags, EncodedPacket};
use crate::codec::{AudioEncoder, CodecOutput, Encoder, VideoEncoder};
use crate::format::{CodecConfig, MediaFormat, Mime};

/// State shared between a video encoder and its input surface.
struct VideoInput {
    stdin: Option<ChildStdin>,
    /// Presentation times of submitted frames not yet matched to output
    pending_pts: VecDeque<i64>,
}

/// The encoder's input surface: frames written here are piped to ffmpeg.
struct PipeSurface {
    width: u32,
    height: u32,
    input: Arc<Mutex<VideoInput>>,
}

impl FrameSink for PipeSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn submit(&mut self, frame: &FrameBuffer, presentation_time_ns: i64) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(ReelError::Encoder(format!(
                "surface is {}x{}, got a {}x{} frame",
                self.width, self.height, frame.width, frame.height
            )));
        }
        let mut input = self.input.lock();
        let pts = ns_to_us(presentation_time_ns);
        input.pending_pts.push_back(pts);
        let stdin = input
            .stdin
            .as_mut()
            .ok_or_else(|| ReelError::InvalidState("encoder input already closed".into()))?;
        stdin
            .write_all(&frame.data)
            .map_err(|e| ReelError::Encoder(format!("writing frame to ffmpeg: {}", e)))?;
        trace!(pts_us = pts, "frame submitted to encoder");
        Ok(())
    }

    fn release(&mut self) {
        // The encoder owns the pipe; dropping the surface closes nothing.
    }
}

/// libx264 through ffmpeg, emitting Annex-B access units.
pub struct FfmpegH264Encoder {
    format: MediaFormat,
    process: Option<FfmpegProcess>,
    input: Arc<Mutex<VideoInput>>,
    output: Receiver<PipeEvent<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
    surface_created: bool,
    ready: VecDeque<CodecOutput<EncodedPacket>>,
    config_sent: bool,
    ended: bool,
}

impl FfmpegH264Encoder {
    /// Start an encoder for `format` (H.264, with size, frame rate and bit rate).
    pub fn start(format: &MediaFormat) -> Result<Self> {
        if format.mime != Mime::H264 {
            return Err(ReelError::UnsupportedFormat(format!(
                "video encoder output {}",
                format.mime
            )));
        }
        if format.width == 0 || format.height == 0 || format.width % 2 != 0 || format.height % 2 != 0
        {
            return Err(ReelError::InvalidParameter(format!(
                "H.264 output needs even dimensions, got {}x{}",
                format.width, format.height
            )));
        }
        let args = Self::args(format);
        let mut process = FfmpegProcess::spawn("h264", &args, true)?;
        let stdin = process.take_stdin()?;
        let stdout = process.take_stdout()?;
        let (output, reader) = spawn_reader("h264", stdout, AccessUnitSplitter::new())?;
        debug!(width = format.width, height = format.height, "h264 encoder started");

        Ok(Self {
            format: format.clone(),
            process: Some(process),
            input: Arc::new(Mutex::new(VideoInput {
                stdin: Some(stdin),
                pending_pts: VecDeque::new(),
            })),
            output,
            reader: Some(reader),
            surface_created: false,
            ready: VecDeque::new(),
            config_sent: false,
            ended: false,
        })
    }

    fn args(format: &MediaFormat) -> Vec<String> {
        let rate: FrameRate = format.frame_rate.unwrap_or_default();
        let gop = (rate.to_fps_f64().round() as u32).max(1) * 2;
        let bit_rate = format.bit_rate.unwrap_or(8_000_000);
        let mut args: Vec<String> = ["-f", "rawvideo", "-pix_fmt", "rgba", "-s"]
            .map(String::from)
            .to_vec();
        args.push(format!("{}x{}", format.width, format.height));
        args.push("-r".into());
        args.push(rate.as_ratio());
        args.extend(
            [
                "-i",
                "pipe:0",
                "-vsync",
                "passthrough",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-preset",
                "veryfast",
                "-tune",
                "zerolatency",
                "-bf",
                "0",
                "-x264-params",
                "aud=1",
                "-g",
            ]
            .map(String::from),
        );
        args.push(gop.to_string());
        args.push("-b:v".into());
        args.push(bit_rate.to_string());
        args.extend(["-f", "h264", "pipe:1"].map(String::from));
        args
    }

    fn handle_access_unit(&mut self, au: Vec<u8>) -> Result<()> {
        if !self.config_sent {
            let (sps, pps) = annexb::parameter_sets(&au).ok_or_else(|| {
                ReelError::Encoder("first access unit carries no SPS/PPS".into())
            })?;
            let format = self
                .format
                .clone()
                .with_codec_config(CodecConfig::Avc {
                    sps: sps.clone(),
                    pps: pps.clone(),
                });
            self.ready.push_back(CodecOutput::FormatChanged(format));
            self.ready.push_back(CodecOutput::Buffer(EncodedPacket::new(
                annexb::encode_parameter_sets(&sps, &pps),
                0,
                BufferFlags::CODEC_CONFIG,
            )));
            self.config_sent = true;
        }
        let pts = self.input.lock().pending_pts.pop_front().ok_or_else(|| {
            ReelError::Encoder("encoder produced more frames than it was given".into())
        })?;
        let flags = if annexb::contains_idr(&au) {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::default()
        };
        self.ready
            .push_back(CodecOutput::Buffer(EncodedPacket::new(au, pts, flags)));
        Ok(())
    }
}

impl Encoder for FfmpegH264Encoder {
    fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecOutput<EncodedPacket>> {
        if let Some(out) = self.ready.pop_front() {
            return Ok(out);
        }
        if self.ended {
            return Ok(CodecOutput::EndOfStream);
        }
        match self.output.recv_timeout(timeout) {
            Ok(PipeEvent::Item(au)) => {
                self.handle_access_unit(au)?;
                Ok(self.ready.pop_front().unwrap_or(CodecOutput::TryAgainLater))
            }
            Ok(PipeEvent::Failed(e)) => Err(ReelError::Encoder(format!("h264 output: {}", e))),
            Ok(PipeEvent::Closed) | Err(RecvTimeoutError::Disconnected) => {
                let leftover = self.input.lock().pending_pts.len();
                if leftover > 0 {
                    warn!(frames = leftover, "h264 encoder closed with frames outstanding");
                }
                self.ended = true;
                Ok(CodecOutput::EndOfStream)
            }
            Err(RecvTimeoutError::Timeout) => Ok(CodecOutput::TryAgainLater),
        }
    }

    fn signal_end_of_input_stream(&mut self) -> Result<()> {
        // Closing stdin makes ffmpeg flush and exit.
        self.input.lock().stdin.take();
        Ok(())
    }

    fn release(&mut self) {
        self.input.lock().stdin.take();
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.ready.clear();
    }
}

impl VideoEncoder for FfmpegH264Encoder {
    fn create_input_surface(&mut self) -> Result<Box<dyn FrameSink>> {
        if self.surface_created {
            return Err(ReelError::InvalidState(
                "input surface already created".into(),
            ));
        }
        self.surface_created = true;
        Ok(Box::new(PipeSurface {
            width: self.format.width,
            height: self.format.height,
            input: Arc::clone(&self.input),
        }))
    }
}

/// Maps encoder output sample positions back to presentation times.
#[derive(Debug, Default)]
struct PtsMap {
    /// (first stream frame, pts of that frame)
    segments: Vec<(u64, i64)>,
    frames_in: u64,
}

impl PtsMap {
    fn record(&mut self, pts_us: i64, frames: u64, sample_rate: u32) {
        let expected = self
            .segments
            .last()
            .map(|&(start, pts)| pts + frames_to_us(self.frames_in - start, sample_rate));
        if expected != Some(pts_us) {
            self.segments.push((self.frames_in, pts_us));
        }
        self.frames_in += frames;
    }

    fn pts_of(&self, frame: u64, sample_rate: u32) -> Option<i64> {
        let idx = self.segments.partition_point(|&(start, _)| start <= frame);
        let &(start, pts) = self.segments.get(idx.checked_sub(1)?)?;
        Some(pts + frames_to_us(frame - start, sample_rate))
    }
}

/// FFmpeg's native AAC encoder, emitting raw AAC frames.
pub struct FfmpegAacEncoder {
    format: MediaFormat,
    process: Option<FfmpegProcess>,
    stdin: Option<ChildStdin>,
    output: Receiver<PipeEvent<(AdtsHeader, Vec<u8>)>>,
    reader: Option<JoinHandle<()>>,
    pts_map: PtsMap,
    frames_out: u64,
    last_pts: Option<i64>,
    format_sent: bool,
    ready: VecDeque<CodecOutput<EncodedPacket>>,
    ended: bool,
}

impl FfmpegAacEncoder {
    pub fn start(format: &MediaFormat) -> Result<Self> {
        if format.mime != Mime::Aac {
            return Err(ReelError::UnsupportedFormat(format!(
                "audio encoder output {}",
                format.mime
            )));
        }
        // Rejects rates AAC cannot signal.
        adts::lc_config(format.sample_rate, format.channels)?;
        if format.channels == 0 {
            return Err(ReelError::InvalidParameter("audio output has no channels".into()));
        }
        let bit_rate = format.bit_rate.unwrap_or(128_000);
        let mut args: Vec<String> = ["-f", "s16le", "-ar"].map(String::from).to_vec();
        args.push(format.sample_rate.to_string());
        args.push("-ac".into());
        args.push(format.channels.to_string());
        args.extend(["-i", "pipe:0", "-c:a", "aac", "-b:a"].map(String::from));
        args.push(bit_rate.to_string());
        args.extend(["-f", "adts", "pipe:1"].map(String::from));

        let mut process = FfmpegProcess::spawn("aac", &args, true)?;
        let stdin = process.take_stdin()?;
        let stdout = process.take_stdout()?;
        let (output, reader) = spawn_reader("aac", stdout, AdtsReader::new())?;
        debug!(sample_rate = format.sample_rate, channels = format.channels, "aac encoder started");

        Ok(Self {
            format: format.clone(),
            process: Some(process),
            stdin: Some(stdin),
            output,
            reader: Some(reader),
            pts_map: PtsMap::default(),
            frames_out: 0,
            last_pts: None,
            format_sent: false,
            ready: VecDeque::new(),
            ended: false,
        })
    }

    fn handle_frame(&mut self, header: AdtsHeader, payload: Vec<u8>) {
        if !self.format_sent {
            let format = self.format.clone().with_codec_config(CodecConfig::Aac {
                audio_specific_config: header.audio_specific_config().to_vec(),
            });
            self.ready.push_back(CodecOutput::FormatChanged(format));
            self.format_sent = true;
        }
        let rate = self.format.sample_rate;
        let mut pts = self
            .pts_map
            .pts_of(self.frames_out, rate)
            .unwrap_or_else(|| frames_to_us(self.frames_out, rate));
        if let Some(last) = self.last_pts {
            if pts <= last {
                pts = last + 1;
            }
        }
        self.last_pts = Some(pts);
        self.frames_out += adts::SAMPLES_PER_FRAME as u64;
        self.ready.push_back(CodecOutput::Buffer(EncodedPacket::new(
            payload,
            pts,
            BufferFlags::KEY_FRAME,
        )));
    }
}

impl Encoder for FfmpegAacEncoder {
    fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecOutput<EncodedPacket>> {
        if let Some(out) = self.ready.pop_front() {
            return Ok(out);
        }
        if self.ended {
            return Ok(CodecOutput::EndOfStream);
        }
        match self.output.recv_timeout(timeout) {
            Ok(PipeEvent::Item((header, payload))) => {
                self.handle_frame(header, payload);
                Ok(self.ready.pop_front().unwrap_or(CodecOutput::TryAgainLater))
            }
            Ok(PipeEvent::Failed(e)) => Err(ReelError::Encoder(format!("aac output: {}", e))),
            Ok(PipeEvent::Closed) | Err(RecvTimeoutError::Disconnected) => {
                self.ended = true;
                Ok(CodecOutput::EndOfStream)
            }
            Err(RecvTimeoutError::Timeout) => Ok(CodecOutput::TryAgainLater),
        }
    }

    fn signal_end_of_input_stream(&mut self) -> Result<()> {
        self.stdin.take();
        Ok(())
    }

    fn release(&mut self) {
        self.stdin.take();
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.ready.clear();
    }
}

impl AudioEncoder for FfmpegAacEncoder {
    fn queue_input(&mut self, pcm: &PcmBuffer) -> Result<()> {
        if pcm.sample_rate != self.format.sample_rate || pcm.channels != self.format.channels {
            return Err(ReelError::Encoder(format!(
                "encoder expects {} Hz x{}, got {} Hz x{}",
                self.format.sample_rate, self.format.channels, pcm.sample_rate, pcm.channels
            )));
        }
        if pcm.is_empty() {
            return Ok(());
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ReelError::InvalidState("encoder input already closed".into()))?;
        stdin
            .write_all(&pcm.to_le_bytes())
            .map_err(|e| ReelError::Encoder(format!("writing PCM to ffmpeg: {}", e)))?;
        self.pts_map
            .record(pcm.pts_us, pcm.frames() as u64, self.format.sample_rate);
        Ok(())
    }
}
