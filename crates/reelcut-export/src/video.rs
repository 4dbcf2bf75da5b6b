//! Video track processor.
//!
//! Decodes each clip's video, renders every frame in the clip's trim window
//! through the compositor into the encoder surface, and moves encoded output
//! into the muxer gate.

use reelcut_core::time::{scale_by_speed, us_to_ns};
use reelcut_core::{PipelineConfig, ReelError, Result};
use reelcut_gpu::{RenderSurfaceBridge, SurfaceRole, TextureCompositor};
use reelcut_media::{CodecOutput, CodecProvider, DecodedFrame, TrackKind, VideoEncoder};
use tracing::{debug, trace, warn};

use crate::deadline::StallWatch;
use crate::drain::EncoderDrain;
use crate::gate::MuxerGate;
use crate::plan::PlannedClip;
use crate::progress::ProgressReporter;
use crate::track::{ClipSource, TrackState};

/// Everything the video processor borrows for one clip.
pub struct VideoContext<'a> {
    pub provider: &'a dyn CodecProvider,
    pub encoder: &'a mut dyn VideoEncoder,
    pub bridge: &'a mut RenderSurfaceBridge,
    pub compositor: &'a TextureCompositor,
    pub gate: &'a MuxerGate,
    pub config: &'a PipelineConfig,
    pub progress: &'a mut ProgressReporter,
}

/// Video side of an export, carried across clips.
#[derive(Debug)]
pub struct VideoTrackProcessor {
    state: TrackState,
    drain: EncoderDrain,
    last_pts_us: Option<i64>,
    frames_rendered: u64,
    frames_skipped: u64,
}

impl Default for VideoTrackProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoTrackProcessor {
    pub fn new() -> Self {
        Self {
            state: TrackState::AwaitingInput,
            drain: EncoderDrain::new(TrackKind::Video),
            last_pts_us: None,
            frames_rendered: 0,
            frames_skipped: 0,
        }
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    /// Encoded samples handed to the gate.
    pub fn samples_emitted(&self) -> u64 {
        self.drain.emitted()
    }

    /// Output time of the last rendered frame.
    pub fn last_pts_us(&self) -> Option<i64> {
        self.last_pts_us
    }

    fn transition(&mut self, next: TrackState) {
        if self.state != next {
            trace!(track = "video", from = %self.state, to = %next, "state");
            self.state = next;
        }
    }

    /// Decode and render one clip.
    pub fn process_clip(&mut self, ctx: &mut VideoContext<'_>, clip: &PlannedClip) -> Result<()> {
        self.transition(TrackState::AwaitingInput);
        let extractor = ctx.provider.create_extractor(&clip.clip.source)?;
        let provider = ctx.provider;
        let mut source = ClipSource::open(
            extractor,
            TrackKind::Video,
            clip.start_us(),
            clip.end_us(),
            |format| provider.create_video_decoder(format),
        )?
        .ok_or_else(|| {
            ReelError::Media(format!("{} has no video track", clip.clip.source))
        })?;
        debug!(
            clip = clip.index,
            source = %clip.clip.source,
            offset_us = clip.video_offset_us,
            speed = clip.clip.speed,
            "video clip started"
        );

        self.transition(TrackState::Decoding);
        let rendered_before = self.frames_rendered;
        let mut watch = StallWatch::new("video decoder", ctx.config.stall_timeout());
        loop {
            ctx.progress.check_cancelled()?;
            if source.feed()? {
                watch.progress();
            }
            match source.dequeue(ctx.config.dequeue_timeout())? {
                CodecOutput::Buffer(frame) => {
                    watch.progress();
                    self.render(ctx, clip, frame)?;
                }
                CodecOutput::FormatChanged(format) => {
                    watch.progress();
                    debug!(width = format.width, height = format.height, "decoder output format");
                }
                CodecOutput::TryAgainLater => {
                    trace!("video decoder: try again later");
                    watch.check()?;
                }
                CodecOutput::EndOfStream => break,
            }
        }
        drop(source);

        self.transition(TrackState::AwaitingInput);
        ctx.progress.report();
        debug!(
            clip = clip.index,
            frames = self.frames_rendered - rendered_before,
            "video clip finished"
        );
        Ok(())
    }

    fn render(
        &mut self,
        ctx: &mut VideoContext<'_>,
        clip: &PlannedClip,
        frame: DecodedFrame,
    ) -> Result<()> {
        let t = frame.presentation_time_us;
        if t < clip.start_us() || t >= clip.end_us() {
            trace!(pts = t, "frame outside trim window dropped");
            return Ok(());
        }
        let out_pts = clip.video_offset_us + scale_by_speed(t - clip.start_us(), clip.clip.speed);
        if let Some(last) = self.last_pts_us {
            if out_pts <= last {
                warn!(pts = out_pts, last, "frame would not advance the output clock; skipped");
                self.frames_skipped += 1;
                return Ok(());
            }
        }

        ctx.bridge.make_current(SurfaceRole::Decoder)?;
        let matrix = ctx.bridge.update_tex_image(
            ctx.compositor.external_texture(),
            &frame.buffer,
            frame.transform,
        )?;
        ctx.bridge.make_current(SurfaceRole::Encoder)?;
        ctx.compositor.draw(ctx.bridge, &matrix)?;
        ctx.bridge.set_presentation_time(us_to_ns(out_pts));
        ctx.bridge.swap_buffers()?;

        self.last_pts_us = Some(out_pts);
        self.frames_rendered += 1;
        self.drain.submitted();
        ctx.progress.frame_done();
        trace!(source_pts = t, pts = out_pts, "frame rendered");

        self.transition(TrackState::AwaitingEncoderDrain);
        self.drain.drain_ready(
            &mut *ctx.encoder,
            ctx.gate,
            u64::from(ctx.config.max_frames_in_flight),
            ctx.config.dequeue_timeout(),
            ctx.config.stall_timeout(),
        )?;
        self.transition(TrackState::Decoding);
        Ok(())
    }

    /// Signal end of stream and drain the encoder completely.
    pub fn finish(
        &mut self,
        encoder: &mut dyn VideoEncoder,
        gate: &MuxerGate,
        config: &PipelineConfig,
    ) -> Result<()> {
        self.transition(TrackState::Draining);
        encoder.signal_end_of_input_stream()?;
        self.drain
            .drain_to_end(&mut *encoder, gate, config.dequeue_timeout(), config.drain_timeout())?;
        self.transition(TrackState::Done);
        debug!(
            frames = self.frames_rendered,
            skipped = self.frames_skipped,
            samples = self.drain.emitted(),
            "video track done"
        );
        Ok(())
    }
}
