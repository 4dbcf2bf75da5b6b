//! Per-clip demux and decode, shared by both track processors.

use reelcut_core::Result;
use reelcut_media::{
    find_track, CodecInput, CodecOutput, Decoder, InputStatus, MediaExtractor, MediaFormat,
    SeekMode, TrackKind,
};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Track processor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Opening the next clip's source
    AwaitingInput,
    Decoding,
    /// An encoder input was just submitted; taking its output
    AwaitingEncoderDrain,
    /// End of stream signalled; final drain
    Draining,
    Done,
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Extractor and decoder for one clip's track.
///
/// Both are released when the value is dropped, whichever way the clip ends.
pub struct ClipSource<T> {
    extractor: Box<dyn MediaExtractor>,
    decoder: Box<dyn Decoder<T>>,
    pending: Option<CodecInput>,
    input_done: bool,
    end_us: i64,
    samples_fed: u64,
}

impl<T> ClipSource<T> {
    /// Open the first `kind` track of `extractor` and position it at
    /// `start_us`. Returns `None` (with the extractor released) if the source
    /// has no such track.
    pub fn open<F>(
        mut extractor: Box<dyn MediaExtractor>,
        kind: TrackKind,
        start_us: i64,
        end_us: i64,
        create_decoder: F,
    ) -> Result<Option<Self>>
    where
        F: FnOnce(&MediaFormat) -> Result<Box<dyn Decoder<T>>>,
    {
        match Self::prepare(extractor.as_mut(), kind, start_us) {
            Ok(Some(format)) => match create_decoder(&format) {
                Ok(decoder) => Ok(Some(Self {
                    extractor,
                    decoder,
                    pending: None,
                    input_done: false,
                    end_us,
                    samples_fed: 0,
                })),
                Err(e) => {
                    extractor.release();
                    Err(e)
                }
            },
            Ok(None) => {
                extractor.release();
                Ok(None)
            }
            Err(e) => {
                extractor.release();
                Err(e)
            }
        }
    }

    fn prepare(
        extractor: &mut dyn MediaExtractor,
        kind: TrackKind,
        start_us: i64,
    ) -> Result<Option<MediaFormat>> {
        let Some(track) = find_track(extractor, kind)? else {
            return Ok(None);
        };
        extractor.select_track(track)?;
        extractor.seek_to(start_us, SeekMode::PreviousSync)?;
        let format = extractor.track_format(track)?;
        debug!(%kind, track, mime = %format.mime, start_us, "source track opened");
        Ok(Some(format))
    }

    /// Queue the next sample, or end of stream once the window is passed.
    /// Returns whether the decoder accepted input.
    pub fn feed(&mut self) -> Result<bool> {
        if self.input_done {
            return Ok(false);
        }
        let input = match self.pending.take() {
            Some(input) => input,
            None => match self.extractor.read_sample()? {
                Some(sample) if sample.presentation_time_us < self.end_us => {
                    CodecInput::Sample(sample)
                }
                _ => CodecInput::EndOfStream,
            },
        };
        let end_of_stream = input == CodecInput::EndOfStream;
        match self.decoder.queue_input(input)? {
            InputStatus::Queued => {
                if end_of_stream {
                    self.input_done = true;
                } else {
                    self.samples_fed += 1;
                }
                Ok(true)
            }
            InputStatus::Busy(input) => {
                self.pending = Some(input);
                Ok(false)
            }
        }
    }

    pub fn dequeue(&mut self, timeout: Duration) -> Result<CodecOutput<T>> {
        self.decoder.dequeue_output(timeout)
    }

    pub fn samples_fed(&self) -> u64 {
        self.samples_fed
    }
}

impl<T> Drop for ClipSource<T> {
    fn drop(&mut self) {
        self.decoder.release();
        self.extractor.release();
    }
}
