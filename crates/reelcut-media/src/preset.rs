//! Export presets.

use reelcut_core::{FrameRate, Result};
use serde::Serialize;

use crate::bitstream::adts;
use crate::format::{CodecConfig, MediaFormat, Mime};

/// Target encoding settings. The catalog is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportPreset {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    /// Video bit rate, bits per second
    pub video_bitrate: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    /// Audio bit rate, bits per second
    pub audio_bitrate: u32,
}

impl ExportPreset {
    /// 720p for social feeds.
    pub const SNS: Self = Self {
        name: "SNS",
        width: 1280,
        height: 720,
        frame_rate: FrameRate::FPS_30,
        video_bitrate: 4_000_000,
        audio_sample_rate: 44_100,
        audio_channels: 2,
        audio_bitrate: 128_000,
    };

    pub const STANDARD: Self = Self {
        name: "STANDARD",
        width: 1920,
        height: 1080,
        frame_rate: FrameRate::FPS_30,
        video_bitrate: 8_000_000,
        audio_sample_rate: 48_000,
        audio_channels: 2,
        audio_bitrate: 192_000,
    };

    pub const HIGH_QUALITY: Self = Self {
        name: "HIGH_QUALITY",
        width: 1920,
        height: 1080,
        frame_rate: FrameRate::FPS_60,
        video_bitrate: 16_000_000,
        audio_sample_rate: 48_000,
        audio_channels: 2,
        audio_bitrate: 256_000,
    };

    /// Every catalog entry.
    pub const ALL: [Self; 3] = [Self::SNS, Self::STANDARD, Self::HIGH_QUALITY];

    /// Look up a catalog entry (case-insensitive, `-` and `_` equivalent).
    pub fn by_name(name: &str) -> Option<Self> {
        let wanted = name.trim().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(&wanted))
    }

    /// Format handed to the video encoder.
    pub fn video_format(&self) -> MediaFormat {
        MediaFormat::video(Mime::H264, self.width, self.height)
            .with_frame_rate(self.frame_rate)
            .with_bit_rate(self.video_bitrate)
    }

    /// Format handed to the audio encoder.
    pub fn audio_format(&self) -> MediaFormat {
        MediaFormat::audio(Mime::Aac, self.audio_sample_rate, self.audio_channels)
            .with_bit_rate(self.audio_bitrate)
    }

    /// AAC-LC track description for the muxer. An LC encoder at this rate
    /// and channel count always reports this AudioSpecificConfig.
    pub fn audio_track_format(&self) -> Result<MediaFormat> {
        let asc = adts::lc_config(self.audio_sample_rate, self.audio_channels)?;
        Ok(self.audio_format().with_codec_config(CodecConfig::Aac {
            audio_specific_config: asc.to_vec(),
        }))
    }
}

impl Default for ExportPreset {
    fn default() -> Self {
        Self::STANDARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(ExportPreset::by_name("sns"), Some(ExportPreset::SNS));
        assert_eq!(
            ExportPreset::by_name("high-quality"),
            Some(ExportPreset::HIGH_QUALITY)
        );
        assert_eq!(ExportPreset::by_name("ultra"), None);
    }

    #[test]
    fn test_formats() {
        let v = ExportPreset::HIGH_QUALITY.video_format();
        assert_eq!((v.width, v.height), (1920, 1080));
        assert_eq!(v.frame_rate, Some(FrameRate::FPS_60));
        let a = ExportPreset::SNS.audio_format();
        assert_eq!((a.sample_rate, a.channels), (44_100, 2));
        assert_eq!(a.mime, Mime::Aac);
    }

    #[test]
    fn test_audio_track_carries_lc_config() {
        let a = ExportPreset::STANDARD.audio_track_format().unwrap();
        assert_eq!(
            a.codec_config,
            Some(CodecConfig::Aac {
                audio_specific_config: vec![0x11, 0x90]
            })
        );
    }
}
