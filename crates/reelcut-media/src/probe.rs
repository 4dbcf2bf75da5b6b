//! Media file probing to get metadata without full decode.

use reelcut_core::{FrameRate, ReelError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;

use crate::format::{MediaFormat, Mime};

/// Information about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaProbe {
    /// File path
    pub path: String,
    /// Container duration in microseconds
    pub duration_us: i64,
    /// Video streams
    pub video_streams: Vec<VideoStreamInfo>,
    /// Audio streams
    pub audio_streams: Vec<AudioStreamInfo>,
    /// Container format
    pub format: String,
}

/// Information about a video stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub index: usize,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub pixel_format: String,
    pub bit_rate: Option<u64>,
}

/// Information about an audio stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub index: usize,
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: Option<u64>,
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    pix_fmt: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
    bit_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

fn seconds_to_us(value: Option<&str>) -> Option<i64> {
    value
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| (s * 1_000_000.0).round() as i64)
}

impl MediaProbe {
    /// Probe a media file with ffprobe.
    pub fn probe<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        if !path.exists() {
            return Err(ReelError::NotFound(format!("File not found: {}", path_str)));
        }

        let ffprobe = ffmpeg_sidecar::ffprobe::ffprobe_path();
        let output = Command::new(&ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .map_err(|e| ReelError::Media(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(ReelError::Media(format!(
                "ffprobe failed on {}: {}",
                path_str,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        let probe = Self::from_ffprobe_json(&path_str, &json)?;
        tracing::debug!(
            path = %path_str,
            duration_us = probe.duration_us,
            video = probe.video_streams.len(),
            audio = probe.audio_streams.len(),
            "probed media"
        );
        Ok(probe)
    }

    /// Build a probe from ffprobe's `-print_format json -show_format
    /// -show_streams` output.
    pub fn from_ffprobe_json(path: &str, json: &str) -> Result<Self> {
        let raw: FfprobeOutput = serde_json::from_str(json)
            .map_err(|e| ReelError::Media(format!("Failed to parse ffprobe output: {}", e)))?;

        let mut video_streams = Vec::new();
        let mut audio_streams = Vec::new();
        let mut longest_stream = 0i64;

        for s in &raw.streams {
            if let Some(d) = seconds_to_us(s.duration.as_deref()) {
                longest_stream = longest_stream.max(d);
            }
            let bit_rate = s.bit_rate.as_deref().and_then(|b| b.parse().ok());
            let codec = s.codec_name.clone().unwrap_or_default();
            match s.codec_type.as_deref() {
                Some("video") => {
                    let frame_rate = s
                        .avg_frame_rate
                        .as_deref()
                        .and_then(FrameRate::parse)
                        .or_else(|| s.r_frame_rate.as_deref().and_then(FrameRate::parse))
                        .unwrap_or_default();
                    video_streams.push(VideoStreamInfo {
                        index: s.index,
                        codec,
                        width: s.width.unwrap_or(0),
                        height: s.height.unwrap_or(0),
                        frame_rate,
                        pixel_format: s.pix_fmt.clone().unwrap_or_default(),
                        bit_rate,
                    });
                }
                Some("audio") => {
                    audio_streams.push(AudioStreamInfo {
                        index: s.index,
                        codec,
                        sample_rate: s
                            .sample_rate
                            .as_deref()
                            .and_then(|r| r.parse().ok())
                            .unwrap_or(0),
                        channels: s.channels.unwrap_or(0),
                        bit_rate,
                    });
                }
                _ => {}
            }
        }

        let format = raw.format.as_ref();
        let duration_us = format
            .and_then(|f| seconds_to_us(f.duration.as_deref()))
            .unwrap_or(longest_stream);

        Ok(Self {
            path: path.to_string(),
            duration_us,
            video_streams,
            audio_streams,
            format: format
                .and_then(|f| f.format_name.clone())
                .unwrap_or_default(),
        })
    }

    /// Duration in whole milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.duration_us / 1_000
    }

    /// Check if the file has video.
    pub fn has_video(&self) -> bool {
        !self.video_streams.is_empty()
    }

    /// Check if the file has audio.
    pub fn has_audio(&self) -> bool {
        !self.audio_streams.is_empty()
    }

    /// Get the primary video stream info.
    pub fn primary_video(&self) -> Option<&VideoStreamInfo> {
        self.video_streams.first()
    }

    /// Get the primary audio stream info.
    pub fn primary_audio(&self) -> Option<&AudioStreamInfo> {
        self.audio_streams.first()
    }

    /// Formats of the decoded streams FFmpeg will produce: the primary video
    /// stream as RGBA frames, then the primary audio stream as PCM.
    pub fn decoded_formats(&self) -> Vec<MediaFormat> {
        let mut formats = Vec::new();
        if let Some(v) = self.primary_video() {
            formats.push(
                MediaFormat::video(Mime::RawVideo, v.width, v.height)
                    .with_frame_rate(v.frame_rate)
                    .with_duration_us(self.duration_us),
            );
        }
        if let Some(a) = self.primary_audio() {
            formats.push(
                MediaFormat::audio(Mime::RawAudio, a.sample_rate, a.channels)
                    .with_duration_us(self.duration_us),
            );
        }
        formats
    }
}
