//! ISO-BMFF (MP4) output.

pub mod boxes;
pub mod writer;

pub use writer::Mp4Muxer;
