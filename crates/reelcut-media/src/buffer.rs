//! Compressed sample and buffer metadata.

/// Per-buffer flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Sync sample (IDR for H.264, every AAC frame)
    pub key_frame: bool,
    /// Out-of-band configuration data, not media
    pub codec_config: bool,
    /// Last buffer of the stream
    pub end_of_stream: bool,
}

impl BufferFlags {
    pub const KEY_FRAME: Self = Self {
        key_frame: true,
        codec_config: false,
        end_of_stream: false,
    };

    pub const CODEC_CONFIG: Self = Self {
        key_frame: false,
        codec_config: true,
        end_of_stream: false,
    };
}

/// Metadata accompanying a buffer handed to a muxer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub presentation_time_us: i64,
    pub size: usize,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn new(presentation_time_us: i64, size: usize, flags: BufferFlags) -> Self {
        Self {
            presentation_time_us,
            size,
            flags,
        }
    }
}

/// A sample read from an extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub data: Vec<u8>,
    /// Source presentation time
    pub presentation_time_us: i64,
    pub key_frame: bool,
}

/// A compressed buffer produced by an encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub info: BufferInfo,
}

impl EncodedPacket {
    pub fn new(data: Vec<u8>, presentation_time_us: i64, flags: BufferFlags) -> Self {
        let size = data.len();
        Self {
            data,
            info: BufferInfo::new(presentation_time_us, size, flags),
        }
    }
}
