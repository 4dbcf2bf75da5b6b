//! Source demuxing through an ffmpeg decode pipe.
//!
//! FFmpeg decodes the selected stream itself, so the "samples" this extractor
//! hands out are already raw: tightly packed RGBA frames for video and
//! interleaved s16le PCM for audio. They pair with the passthrough decoders.

use reelcut_core::pcm::frames_to_us;
use reelcut_core::{FrameBuffer, FrameRate, ReelError, Result};
use std::process::ChildStdout;
use tracing::debug;

use super::process::{read_full, seconds_arg, FfmpegProcess};
use crate::buffer::Sample;
use crate::codec::{MediaExtractor, SeekMode};
use crate::format::{MediaFormat, TrackKind};
use crate::probe::MediaProbe;

/// PCM frames per audio sample handed out.
const AUDIO_FRAMES_PER_SAMPLE: usize = 1024;

struct DecodePipe {
    process: FfmpegProcess,
    stdout: ChildStdout,
}

/// [`MediaExtractor`] over one source file.
pub struct FfmpegExtractor {
    source: String,
    formats: Vec<MediaFormat>,
    selected: Option<usize>,
    seek_us: i64,
    emitted: u64,
    pipe: Option<DecodePipe>,
}

impl FfmpegExtractor {
    /// Probe `source` and expose its primary video and audio streams.
    pub fn open(source: &str) -> Result<Self> {
        let probe = MediaProbe::probe(source)?;
        Ok(Self::from_probe(&probe))
    }

    pub fn from_probe(probe: &MediaProbe) -> Self {
        Self {
            source: probe.path.clone(),
            formats: probe.decoded_formats(),
            selected: None,
            seek_us: 0,
            emitted: 0,
            pipe: None,
        }
    }

    fn selected_format(&self) -> Result<&MediaFormat> {
        let index = self
            .selected
            .ok_or_else(|| ReelError::InvalidState("no track selected".into()))?;
        self.formats
            .get(index)
            .ok_or_else(|| ReelError::InvalidParameter(format!("no track {}", index)))
    }

    fn decode_args(&self, format: &MediaFormat) -> Vec<String> {
        let mut args = vec![
            "-ss".to_string(),
            seconds_arg(self.seek_us.max(0)),
            "-noautorotate".to_string(),
            "-i".to_string(),
            self.source.clone(),
        ];
        match format.kind() {
            TrackKind::Video => {
                let rate = format.frame_rate.unwrap_or_default();
                args.extend(
                    [
                        "-map",
                        "0:v:0",
                        "-an",
                        "-f",
                        "rawvideo",
                        "-pix_fmt",
                        "rgba",
                        "-r",
                    ]
                    .map(String::from),
                );
                args.push(rate.as_ratio());
            }
            TrackKind::Audio => {
                args.extend(["-map", "0:a:0", "-vn", "-f", "s16le", "-ac"].map(String::from));
                args.push(format.channels.to_string());
                args.push("-ar".to_string());
                args.push(format.sample_rate.to_string());
            }
        }
        args.push("pipe:1".to_string());
        args
    }

    fn open_pipe(&mut self) -> Result<()> {
        let format = self.selected_format()?.clone();
        let args = self.decode_args(&format);
        let mut process = FfmpegProcess::spawn(format!("decode-{}", format.kind()), &args, false)?;
        let stdout = process.take_stdout()?;
        debug!(source = %self.source, kind = %format.kind(), seek_us = self.seek_us, "decode pipe opened");
        self.pipe = Some(DecodePipe { process, stdout });
        Ok(())
    }

    fn close_pipe(&mut self) {
        if let Some(mut pipe) = self.pipe.take() {
            pipe.process.kill();
        }
    }
}

impl MediaExtractor for FfmpegExtractor {
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
        if index >= self.formats.len() {
            return Err(ReelError::InvalidParameter(format!("no track {}", index)));
        }
        if self.selected != Some(index) {
            self.close_pipe();
            self.selected = Some(index);
            self.emitted = 0;
        }
        Ok(())
    }

    /// Decoding restarts at `time_us`. FFmpeg decodes from the preceding
    /// keyframe and discards up to the target, so both modes land exactly.
    fn seek_to(&mut self, time_us: i64, _mode: SeekMode) -> Result<()> {
        self.close_pipe();
        self.seek_us = time_us.max(0);
        self.emitted = 0;
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<Sample>> {
        let format = self.selected_format()?.clone();
        if self.pipe.is_none() {
            self.open_pipe()?;
        }
        let Some(pipe) = self.pipe.as_mut() else {
            return Ok(None);
        };

        match format.kind() {
            TrackKind::Video => {
                let mut data = vec![0u8; FrameBuffer::byte_len(format.width, format.height)];
                let n = read_full(&mut pipe.stdout, &mut data)?;
                if n < data.len() {
                    // A partial frame only occurs at EOF.
                    return Ok(None);
                }
                let rate: FrameRate = format.frame_rate.unwrap_or_default();
                let pts = self.seek_us + rate.frame_time_us(self.emitted);
                self.emitted += 1;
                Ok(Some(Sample {
                    data,
                    presentation_time_us: pts,
                    key_frame: true,
                }))
            }
            TrackKind::Audio => {
                let frame_bytes = format.channels.max(1) as usize * 2;
                let mut data = vec![0u8; AUDIO_FRAMES_PER_SAMPLE * frame_bytes];
                let n = read_full(&mut pipe.stdout, &mut data)?;
                let n = n - n % frame_bytes;
                if n == 0 {
                    return Ok(None);
                }
                data.truncate(n);
                let pts = self.seek_us + frames_to_us(self.emitted, format.sample_rate);
                self.emitted += (n / frame_bytes) as u64;
                Ok(Some(Sample {
                    data,
                    presentation_time_us: pts,
                    key_frame: true,
                }))
            }
        }
    }

    fn release(&mut self) {
        self.close_pipe();
    }
}
