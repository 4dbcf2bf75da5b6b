//! Decoders for the raw streams produced by [`super::FfmpegExtractor`].
//!
//! The heavy lifting already happened in the ffmpeg decode pipe; these only
//! wrap the raw bytes into frames or PCM while keeping the queue/poll codec
//! contract intact.

use glam::Mat4;
use reelcut_core::{FrameBuffer, PcmBuffer, ReelError, Result};
use std::collections::VecDeque;
use std::time::Duration;

use crate::codec::{CodecInput, CodecOutput, DecodedFrame, Decoder, InputStatus};
use crate::format::{MediaFormat, Mime};

/// Input slots before `queue_input` reports busy.
const INPUT_SLOTS: usize = 4;

type Convert<T> = fn(&MediaFormat, Vec<u8>, i64) -> Result<T>;

/// Decoder that converts each queued sample straight into one output.
pub struct PassthroughDecoder<T> {
    format: MediaFormat,
    convert: Convert<T>,
    pending: VecDeque<T>,
    format_reported: bool,
    input_ended: bool,
    output_ended: bool,
    released: bool,
}

impl<T> PassthroughDecoder<T> {
    fn new(format: MediaFormat, convert: Convert<T>) -> Self {
        Self {
            format,
            convert,
            pending: VecDeque::with_capacity(INPUT_SLOTS),
            format_reported: false,
            input_ended: false,
            output_ended: false,
            released: false,
        }
    }

    fn check_live(&self) -> Result<()> {
        if self.released {
            Err(ReelError::InvalidState("decoder already released".into()))
        } else {
            Ok(())
        }
    }
}

fn to_frame(format: &MediaFormat, data: Vec<u8>, pts: i64) -> Result<DecodedFrame> {
    let buffer = FrameBuffer::from_rgba(format.width, format.height, data)
        .map_err(|e| ReelError::Decoder(e.to_string()))?;
    Ok(DecodedFrame {
        buffer,
        presentation_time_us: pts,
        transform: Mat4::IDENTITY,
    })
}

fn to_pcm(format: &MediaFormat, data: Vec<u8>, pts: i64) -> Result<PcmBuffer> {
    Ok(PcmBuffer::from_le_bytes(
        format.sample_rate,
        format.channels,
        pts,
        &data,
    ))
}

/// RGBA frames out of raw video samples.
pub fn raw_video_decoder(format: &MediaFormat) -> Result<PassthroughDecoder<DecodedFrame>> {
    if format.mime != Mime::RawVideo {
        return Err(ReelError::UnsupportedFormat(format!(
            "video decoder input {}",
            format.mime
        )));
    }
    if format.width == 0 || format.height == 0 {
        return Err(ReelError::InvalidParameter(
            "video track has no dimensions".into(),
        ));
    }
    Ok(PassthroughDecoder::new(format.clone(), to_frame))
}

/// PCM out of raw s16le samples.
pub fn pcm_decoder(format: &MediaFormat) -> Result<PassthroughDecoder<PcmBuffer>> {
    if format.mime != Mime::RawAudio {
        return Err(ReelError::UnsupportedFormat(format!(
            "audio decoder input {}",
            format.mime
        )));
    }
    if format.sample_rate == 0 || format.channels == 0 {
        return Err(ReelError::InvalidParameter(
            "audio track has no sample rate or channels".into(),
        ));
    }
    Ok(PassthroughDecoder::new(format.clone(), to_pcm))
}

impl<T: Send> Decoder<T> for PassthroughDecoder<T> {
    fn queue_input(&mut self, input: CodecInput) -> Result<InputStatus> {
        self.check_live()?;
        if self.input_ended {
            return Err(ReelError::InvalidState(
                "input queued after end of stream".into(),
            ));
        }
        match input {
            CodecInput::EndOfStream => {
                self.input_ended = true;
                Ok(InputStatus::Queued)
            }
            CodecInput::Sample(sample) => {
                if self.pending.len() >= INPUT_SLOTS {
                    return Ok(InputStatus::Busy(CodecInput::Sample(sample)));
                }
                let out = (self.convert)(&self.format, sample.data, sample.presentation_time_us)?;
                self.pending.push_back(out);
                Ok(InputStatus::Queued)
            }
        }
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<CodecOutput<T>> {
        self.check_live()?;
        if self.output_ended {
            return Ok(CodecOutput::EndOfStream);
        }
        if !self.format_reported {
            self.format_reported = true;
            return Ok(CodecOutput::FormatChanged(self.format.clone()));
        }
        if let Some(out) = self.pending.pop_front() {
            return Ok(CodecOutput::Buffer(out));
        }
        if self.input_ended {
            self.output_ended = true;
            return Ok(CodecOutput::EndOfStream);
        }
        Ok(CodecOutput::TryAgainLater)
    }

    fn release(&mut self) {
        self.pending.clear();
        self.released = true;
    }
}
