//! Audio track processor.
//!
//! Decodes each clip's audio, applies the clip's gain envelope in source
//! time, resamples to the preset format at the clip's speed, and re-encodes.
//! A clip's audio never runs past its output duration.

use reelcut_audio::{apply_gain, Resampler};
use reelcut_core::pcm::{frames_to_us, us_to_frames};
use reelcut_core::time::US_PER_SEC;
use reelcut_core::{PcmBuffer, PipelineConfig, ReelError, Result};
use reelcut_media::{AudioEncoder, CodecOutput, CodecProvider, ExportPreset, TrackKind};
use tracing::{debug, trace};

use crate::deadline::StallWatch;
use crate::drain::EncoderDrain;
use crate::gate::MuxerGate;
use crate::plan::PlannedClip;
use crate::progress::ProgressReporter;
use crate::track::{ClipSource, TrackState};

/// Everything the audio processor borrows for one clip.
pub struct AudioContext<'a> {
    pub provider: &'a dyn CodecProvider,
    pub encoder: &'a mut dyn AudioEncoder,
    pub gate: &'a MuxerGate,
    pub preset: &'a ExportPreset,
    pub config: &'a PipelineConfig,
    pub progress: &'a mut ProgressReporter,
}

/// Output side of one clip.
struct ClipOutput {
    resampler: Option<Resampler>,
    offset_us: i64,
    cap_frames: u64,
    written_frames: u64,
}

/// Frames covering `us` at `rate`, rounded up.
fn frames_ceil(us: i64, rate: u32) -> u64 {
    if us <= 0 {
        return 0;
    }
    let us = us as u128;
    let per_sec = US_PER_SEC as u128;
    ((us * rate as u128 + per_sec - 1) / per_sec) as u64
}

/// Keep only the frames of `pcm` whose time lies in `[start_us, end_us)`.
pub fn trim_to_window(mut pcm: PcmBuffer, start_us: i64, end_us: i64) -> Option<PcmBuffer> {
    let rate = pcm.sample_rate;
    let channels = pcm.channels.max(1) as usize;
    let frames = pcm.frames() as u64;
    let skip = frames_ceil(start_us - pcm.pts_us, rate).min(frames);
    let keep = frames_ceil(end_us - pcm.pts_us, rate).min(frames);
    if skip >= keep {
        return None;
    }
    if skip == 0 && keep == frames {
        return Some(pcm);
    }
    pcm.samples.truncate(keep as usize * channels);
    pcm.samples.drain(..skip as usize * channels);
    pcm.pts_us += frames_to_us(skip, rate);
    Some(pcm)
}

/// Audio side of an export, carried across clips.
#[derive(Debug)]
pub struct AudioTrackProcessor {
    state: TrackState,
    drain: EncoderDrain,
    frames_written: u64,
    clips_without_audio: usize,
}

impl Default for AudioTrackProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioTrackProcessor {
    pub fn new() -> Self {
        Self {
            state: TrackState::AwaitingInput,
            drain: EncoderDrain::new(TrackKind::Audio),
            frames_written: 0,
            clips_without_audio: 0,
        }
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    /// PCM frames handed to the encoder, at the preset rate.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn samples_emitted(&self) -> u64 {
        self.drain.emitted()
    }

    pub fn clips_without_audio(&self) -> usize {
        self.clips_without_audio
    }

    /// Add the audio track to `gate` from the preset, so the muxer can start
    /// as soon as video registers even when no source has audio yet.
    pub fn register_track(&mut self, gate: &MuxerGate, preset: &ExportPreset) -> Result<()> {
        let format = preset.audio_track_format()?;
        gate.register_track(TrackKind::Audio, &format)?;
        self.drain.mark_preregistered();
        Ok(())
    }

    fn transition(&mut self, next: TrackState) {
        if self.state != next {
            trace!(track = "audio", from = %self.state, to = %next, "state");
            self.state = next;
        }
    }

    /// Decode, process and encode one clip's audio.
    pub fn process_clip(&mut self, ctx: &mut AudioContext<'_>, clip: &PlannedClip) -> Result<()> {
        self.transition(TrackState::AwaitingInput);
        let extractor = ctx.provider.create_extractor(&clip.clip.source)?;
        let provider = ctx.provider;
        let Some(mut source) = ClipSource::open(
            extractor,
            TrackKind::Audio,
            clip.start_us(),
            clip.end_us(),
            |format| provider.create_audio_decoder(format),
        )?
        else {
            debug!(clip = clip.index, source = %clip.clip.source, "no audio track; clip is silent");
            self.clips_without_audio += 1;
            return Ok(());
        };

        let rate = ctx.preset.audio_sample_rate;
        let mut output = ClipOutput {
            resampler: None,
            offset_us: clip.audio_offset_us,
            cap_frames: us_to_frames(clip.output_duration_us, rate),
            written_frames: 0,
        };
        debug!(
            clip = clip.index,
            offset_us = output.offset_us,
            cap_frames = output.cap_frames,
            muted = clip.audio.as_ref().is_some_and(|a| a.muted),
            "audio clip started"
        );

        self.transition(TrackState::Decoding);
        let mut watch = StallWatch::new("audio decoder", ctx.config.stall_timeout());
        loop {
            ctx.progress.check_cancelled()?;
            if source.feed()? {
                watch.progress();
            }
            match source.dequeue(ctx.config.dequeue_timeout())? {
                CodecOutput::Buffer(pcm) => {
                    watch.progress();
                    self.consume(ctx, clip, &mut output, pcm)?;
                }
                CodecOutput::FormatChanged(format) => {
                    watch.progress();
                    debug!(
                        sample_rate = format.sample_rate,
                        channels = format.channels,
                        "decoder output format"
                    );
                }
                CodecOutput::TryAgainLater => {
                    trace!("audio decoder: try again later");
                    watch.check()?;
                }
                CodecOutput::EndOfStream => break,
            }
        }
        drop(source);

        if let Some(mut resampler) = output.resampler.take() {
            let tail = resampler.flush();
            self.emit(ctx, &mut output, tail)?;
        }
        self.transition(TrackState::AwaitingInput);
        ctx.progress.report();
        debug!(
            clip = clip.index,
            frames = output.written_frames,
            short_by = output.cap_frames - output.written_frames,
            "audio clip finished"
        );
        Ok(())
    }

    fn consume(
        &mut self,
        ctx: &mut AudioContext<'_>,
        clip: &PlannedClip,
        output: &mut ClipOutput,
        pcm: PcmBuffer,
    ) -> Result<()> {
        let Some(mut pcm) = trim_to_window(pcm, clip.start_us(), clip.end_us()) else {
            return Ok(());
        };
        apply_gain(&mut pcm, &clip.envelope, clip.start_us());

        let mut resampler = match output.resampler.take() {
            Some(r) => r,
            None => Resampler::new(
                pcm.sample_rate,
                pcm.channels,
                ctx.preset.audio_sample_rate,
                ctx.preset.audio_channels,
                clip.clip.speed,
            )?,
        };
        if resampler.in_rate() != pcm.sample_rate {
            return Err(ReelError::Audio(format!(
                "source sample rate changed from {} to {} Hz mid-clip",
                resampler.in_rate(),
                pcm.sample_rate
            )));
        }
        let samples = resampler.process(&pcm.samples);
        output.resampler = Some(resampler);
        self.emit(ctx, output, samples)
    }

    fn emit(
        &mut self,
        ctx: &mut AudioContext<'_>,
        output: &mut ClipOutput,
        mut samples: Vec<i16>,
    ) -> Result<()> {
        let rate = ctx.preset.audio_sample_rate;
        let channels = ctx.preset.audio_channels as usize;
        let frames = (samples.len() / channels) as u64;
        let take = frames.min(output.cap_frames - output.written_frames);
        if take == 0 {
            return Ok(());
        }
        samples.truncate(take as usize * channels);
        let pts = output.offset_us + frames_to_us(output.written_frames, rate);
        ctx.encoder
            .queue_input(&PcmBuffer::new(rate, ctx.preset.audio_channels, pts, samples))?;
        output.written_frames += take;
        self.frames_written += take;
        self.drain.submitted();
        trace!(pts, frames = take, "pcm queued");

        self.transition(TrackState::AwaitingEncoderDrain);
        // Audio input is never throttled; the video track bounds the run.
        self.drain.drain_ready(
            &mut *ctx.encoder,
            ctx.gate,
            u64::MAX,
            ctx.config.dequeue_timeout(),
            ctx.config.stall_timeout(),
        )?;
        self.transition(TrackState::Decoding);
        Ok(())
    }

    /// Signal end of stream and drain the encoder completely.
    pub fn finish(
        &mut self,
        encoder: &mut dyn AudioEncoder,
        gate: &MuxerGate,
        config: &PipelineConfig,
    ) -> Result<()> {
        self.transition(TrackState::Draining);
        encoder.signal_end_of_input_stream()?;
        self.drain
            .drain_to_end(&mut *encoder, gate, config.dequeue_timeout(), config.drain_timeout())?;
        self.transition(TrackState::Done);
        debug!(
            frames = self.frames_written,
            samples = self.drain.emitted(),
            silent_clips = self.clips_without_audio,
            "audio track done"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(pts_us: i64, frames: usize) -> PcmBuffer {
        let samples = (0..frames as i16).flat_map(|i| [i, i]).collect();
        PcmBuffer::new(1000, 2, pts_us, samples)
    }

    #[test]
    fn test_trim_inside_window_untouched() {
        let buf = pcm(10_000, 10);
        assert_eq!(trim_to_window(buf.clone(), 0, 1_000_000), Some(buf));
    }

    #[test]
    fn test_trim_front_and_back() {
        // 1 kHz: one frame per ms. Frames at 10..20 ms; keep [12, 15) ms.
        let trimmed = trim_to_window(pcm(10_000, 10), 12_000, 15_000).unwrap();
        assert_eq!(trimmed.pts_us, 12_000);
        assert_eq!(trimmed.frames(), 3);
        assert_eq!(trimmed.samples, vec![2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn test_trim_outside_window() {
        assert_eq!(trim_to_window(pcm(0, 10), 20_000, 30_000), None);
        assert_eq!(trim_to_window(pcm(50_000, 10), 0, 50_000), None);
    }

    #[test]
    fn test_frames_ceil() {
        assert_eq!(frames_ceil(0, 48_000), 0);
        assert_eq!(frames_ceil(-5, 48_000), 0);
        assert_eq!(frames_ceil(1, 48_000), 1);
        assert_eq!(frames_ceil(1_000_000, 48_000), 48_000);
    }
}
