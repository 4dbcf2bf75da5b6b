//! Interleaved 16-bit PCM buffers.

/// A block of decoded, interleaved signed 16-bit audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (samples per frame)
    pub channels: u16,
    /// Presentation time of the first frame, microseconds
    pub pts_us: i64,
    /// Interleaved samples, `frames * channels` long
    pub samples: Vec<i16>,
}

impl PcmBuffer {
    pub fn new(sample_rate: u32, channels: u16, pts_us: i64, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            channels,
            pts_us,
            samples,
        }
    }

    /// Decode little-endian `s16le` bytes (an odd trailing byte is dropped).
    pub fn from_le_bytes(sample_rate: u32, channels: u16, pts_us: i64, bytes: &[u8]) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Self::new(sample_rate, channels, pts_us, samples)
    }

    /// Encode to little-endian `s16le` bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for s in &self.samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    /// Number of frames (one sample per channel).
    #[inline]
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Duration covered by the buffer in microseconds.
    #[inline]
    pub fn duration_us(&self) -> i64 {
        frames_to_us(self.frames() as u64, self.sample_rate)
    }

    /// Presentation time of frame `index` in microseconds.
    #[inline]
    pub fn frame_time_us(&self, index: usize) -> i64 {
        self.pts_us + frames_to_us(index as u64, self.sample_rate)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Convert a frame count at `sample_rate` to microseconds (truncating).
#[inline]
pub fn frames_to_us(frames: u64, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    (frames as i128 * 1_000_000 / sample_rate as i128) as i64
}

/// Convert microseconds to a frame count at `sample_rate` (truncating).
#[inline]
pub fn us_to_frames(us: i64, sample_rate: u32) -> u64 {
    if us <= 0 {
        return 0;
    }
    (us as i128 * sample_rate as i128 / 1_000_000) as u64
}
