//! ADTS-framed AAC.
//!
//! FFmpeg's `adts` muxer prefixes every raw AAC frame with a 7 (or 9) byte
//! header. MP4 stores the raw frames and describes the stream once with an
//! AudioSpecificConfig.

use reelcut_core::{ReelError, Result};

/// Sampling frequencies indexed by `sampling_frequency_index`.
pub const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// PCM frames per AAC-LC frame.
pub const SAMPLES_PER_FRAME: u32 = 1024;

/// Index of `rate` in [`SAMPLE_RATES`].
pub fn sampling_frequency_index(rate: u32) -> Option<u8> {
    SAMPLE_RATES.iter().position(|&r| r == rate).map(|i| i as u8)
}

/// Two-byte AudioSpecificConfig for the given stream parameters.
pub fn audio_specific_config(object_type: u8, frequency_index: u8, channels: u8) -> [u8; 2] {
    let bits: u16 = ((object_type as u16 & 0x1f) << 11)
        | ((frequency_index as u16 & 0x0f) << 7)
        | ((channels as u16 & 0x0f) << 3);
    bits.to_be_bytes()
}

/// AudioSpecificConfig for AAC-LC at `sample_rate`.
pub fn lc_config(sample_rate: u32, channels: u16) -> Result<[u8; 2]> {
    let index = sampling_frequency_index(sample_rate).ok_or_else(|| {
        ReelError::UnsupportedFormat(format!("AAC sample rate {} Hz", sample_rate))
    })?;
    Ok(audio_specific_config(2, index, channels as u8))
}

/// A parsed ADTS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// MPEG-4 audio object type (2 = AAC-LC)
    pub object_type: u8,
    pub frequency_index: u8,
    pub channel_config: u8,
    /// Whole frame length, header included
    pub frame_length: usize,
    pub header_length: usize,
}

impl AdtsHeader {
    /// Parse a header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 7 {
            return Err(ReelError::Media("ADTS header truncated".into()));
        }
        if data[0] != 0xff || data[1] & 0xf0 != 0xf0 {
            return Err(ReelError::Media("ADTS sync word not found".into()));
        }
        let protection_absent = data[1] & 0x01 == 1;
        let profile = (data[2] >> 6) & 0x03;
        let frequency_index = (data[2] >> 2) & 0x0f;
        let channel_config = ((data[2] & 0x01) << 2) | ((data[3] >> 6) & 0x03);
        let frame_length = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] >> 5) as usize);
        let header_length = if protection_absent { 7 } else { 9 };

        if frequency_index as usize >= SAMPLE_RATES.len() {
            return Err(ReelError::Media(format!(
                "ADTS sampling frequency index {} is reserved",
                frequency_index
            )));
        }
        if frame_length < header_length {
            return Err(ReelError::Media(format!(
                "ADTS frame length {} shorter than its header",
                frame_length
            )));
        }
        Ok(Self {
            object_type: profile + 1,
            frequency_index,
            channel_config,
            frame_length,
            header_length,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.frequency_index as usize]
    }

    pub fn audio_specific_config(&self) -> [u8; 2] {
        audio_specific_config(self.object_type, self.frequency_index, self.channel_config)
    }

    /// Build a protection-absent header for a payload of `payload_len` bytes.
    pub fn encode(object_type: u8, frequency_index: u8, channels: u8, payload_len: usize) -> [u8; 7] {
        let frame_length = payload_len + 7;
        let profile = object_type.saturating_sub(1) & 0x03;
        [
            0xff,
            0xf1,
            (profile << 6) | ((frequency_index & 0x0f) << 2) | ((channels >> 2) & 0x01),
            ((channels & 0x03) << 6) | ((frame_length >> 11) as u8 & 0x03),
            (frame_length >> 3) as u8,
            (((frame_length & 0x07) as u8) << 5) | 0x1f,
            0xfc,
        ]
    }
}

/// Splits a chunked ADTS stream into (header, raw frame) pairs.
#[derive(Debug, Default)]
pub struct AdtsReader {
    buffer: Vec<u8>,
}

impl AdtsReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes, returning every complete frame.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<(AdtsHeader, Vec<u8>)>> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        let mut offset = 0;
        while self.buffer.len() - offset >= 7 {
            let header = AdtsHeader::parse(&self.buffer[offset..])?;
            if self.buffer.len() - offset < header.frame_length {
                break;
            }
            let payload =
                self.buffer[offset + header.header_length..offset + header.frame_length].to_vec();
            frames.push((header, payload));
            offset += header.frame_length;
        }
        self.buffer.drain(..offset);
        Ok(frames)
    }

    /// Bytes left over that do not form a complete frame.
    pub fn remaining(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = AdtsHeader::encode(2, 4, 2, payload.len()).to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_header_fields() {
        let data = frame(&[1, 2, 3]);
        let header = AdtsHeader::parse(&data).unwrap();
        assert_eq!(header.object_type, 2);
        assert_eq!(header.sample_rate(), 44_100);
        assert_eq!(header.channel_config, 2);
        assert_eq!(header.frame_length, 10);
        assert_eq!(header.header_length, 7);
    }

    #[test]
    fn test_audio_specific_config() {
        // AAC-LC, 44.1 kHz, stereo
        assert_eq!(lc_config(44_100, 2).unwrap(), [0x12, 0x10]);
        // AAC-LC, 48 kHz, stereo
        assert_eq!(lc_config(48_000, 2).unwrap(), [0x11, 0x90]);
        assert!(lc_config(44_000, 2).is_err());
    }

    #[test]
    fn test_reader_handles_partial_frames() {
        let stream = [frame(&[0xaa; 200]), frame(&[0xbb; 5]), frame(&[0xcc; 17])].concat();
        let mut reader = AdtsReader::new();
        let mut payloads = Vec::new();
        for chunk in stream.chunks(9) {
            for (_, payload) in reader.push(chunk).unwrap() {
                payloads.push(payload);
            }
        }
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[0], vec![0xaa; 200]);
        assert_eq!(payloads[2], vec![0xcc; 17]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_bad_sync_rejected() {
        assert!(AdtsHeader::parse(&[0x00; 7]).is_err());
        assert!(AdtsHeader::parse(&[0xff, 0xf1]).is_err());
    }
}
