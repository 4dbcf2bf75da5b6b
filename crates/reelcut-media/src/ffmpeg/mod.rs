//! Codec provider driving FFmpeg subprocesses through ffmpeg-sidecar's
//! binary discovery.

pub mod decoder;
pub mod encoder;
pub mod extractor;
pub mod process;

pub use decoder::{pcm_decoder, raw_video_decoder, PassthroughDecoder};
pub use encoder::{FfmpegAacEncoder, FfmpegH264Encoder};
pub use extractor::FfmpegExtractor;
pub use process::{ffmpeg_available, FfmpegProcess};

use reelcut_core::{PcmBuffer, Result};
use std::path::Path;

use crate::codec::{
    AudioEncoder, CodecProvider, DecodedFrame, Decoder, MediaExtractor, Muxer, VideoEncoder,
};
use crate::format::MediaFormat;
use crate::mp4::Mp4Muxer;

/// [`CodecProvider`] backed by the ffmpeg binary and the built-in MP4 muxer.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegProvider;

impl FfmpegProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CodecProvider for FfmpegProvider {
    fn create_extractor(&self, source: &str) -> Result<Box<dyn MediaExtractor>> {
        Ok(Box::new(FfmpegExtractor::open(source)?))
    }

    fn create_video_decoder(&self, format: &MediaFormat) -> Result<Box<dyn Decoder<DecodedFrame>>> {
        Ok(Box::new(raw_video_decoder(format)?))
    }

    fn create_audio_decoder(&self, format: &MediaFormat) -> Result<Box<dyn Decoder<PcmBuffer>>> {
        Ok(Box::new(pcm_decoder(format)?))
    }

    fn create_video_encoder(&self, format: &MediaFormat) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(FfmpegH264Encoder::start(format)?))
    }

    fn create_audio_encoder(&self, format: &MediaFormat) -> Result<Box<dyn AudioEncoder>> {
        Ok(Box::new(FfmpegAacEncoder::start(format)?))
    }

    fn create_muxer(&self, output: &Path) -> Result<Box<dyn Muxer>> {
        Ok(Box::new(Mp4Muxer::create(output)?))
    }
}
