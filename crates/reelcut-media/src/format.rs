//! Track formats exchanged between extractors, codecs and muxers.

use reelcut_core::FrameRate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => f.write_str("video"),
            TrackKind::Audio => f.write_str("audio"),
        }
    }
}

/// Stream encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mime {
    /// H.264 / AVC
    H264,
    /// AAC-LC
    Aac,
    /// Uncompressed RGBA8 frames
    RawVideo,
    /// Interleaved s16le PCM
    RawAudio,
}

impl Mime {
    pub fn kind(self) -> TrackKind {
        match self {
            Mime::H264 | Mime::RawVideo => TrackKind::Video,
            Mime::Aac | Mime::RawAudio => TrackKind::Audio,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mime::H264 => "video/avc",
            Mime::Aac => "audio/mp4a-latm",
            Mime::RawVideo => "video/raw",
            Mime::RawAudio => "audio/raw",
        }
    }
}

impl fmt::Display for Mime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Out-of-band decoder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecConfig {
    /// H.264 parameter sets, without start codes
    Avc { sps: Vec<u8>, pps: Vec<u8> },
    /// MPEG-4 AudioSpecificConfig
    Aac { audio_specific_config: Vec<u8> },
}

/// Description of one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub mime: Mime,
    /// Track duration, if known
    pub duration_us: Option<i64>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<FrameRate>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Target or measured bit rate, bits per second
    pub bit_rate: Option<u32>,
    pub codec_config: Option<CodecConfig>,
}

impl MediaFormat {
    /// A video format.
    pub fn video(mime: Mime, width: u32, height: u32) -> Self {
        Self {
            mime,
            duration_us: None,
            width,
            height,
            frame_rate: None,
            sample_rate: 0,
            channels: 0,
            bit_rate: None,
            codec_config: None,
        }
    }

    /// An audio format.
    pub fn audio(mime: Mime, sample_rate: u32, channels: u16) -> Self {
        Self {
            mime,
            duration_us: None,
            width: 0,
            height: 0,
            frame_rate: None,
            sample_rate,
            channels,
            bit_rate: None,
            codec_config: None,
        }
    }

    pub fn with_frame_rate(mut self, rate: FrameRate) -> Self {
        self.frame_rate = Some(rate);
        self
    }

    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    pub fn with_codec_config(mut self, config: CodecConfig) -> Self {
        self.codec_config = Some(config);
        self
    }

    #[inline]
    pub fn kind(&self) -> TrackKind {
        self.mime.kind()
    }
}
