//! Reelcut Media - codec seams and container I/O
//!
//! This crate handles:
//! - Extractor, decoder, encoder and muxer traits
//! - Media formats, buffer metadata and export presets
//! - Media file probing through ffprobe
//! - Annex-B H.264 and ADTS AAC bitstream parsing
//! - An ISO-BMFF (MP4) muxer
//! - A codec provider driving FFmpeg subprocesses

pub mod bitstream;
pub mod buffer;
pub mod codec;
pub mod ffmpeg;
pub mod format;
pub mod mp4;
pub mod preset;
pub mod probe;

pub use buffer::{BufferFlags, BufferInfo, EncodedPacket, Sample};
pub use codec::{
    find_track, AudioEncoder, CodecInput, CodecOutput, CodecProvider, DecodedFrame, Decoder,
    Encoder, InputStatus, MediaExtractor, Muxer, SeekMode, VideoEncoder,
};
pub use ffmpeg::FfmpegProvider;
pub use format::{CodecConfig, MediaFormat, Mime, TrackKind};
pub use mp4::Mp4Muxer;
pub use preset::ExportPreset;
pub use probe::MediaProbe;
