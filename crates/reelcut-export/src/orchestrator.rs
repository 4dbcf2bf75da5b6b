//! Export orchestration.
//!
//! One run validates the session, builds the plan, sets up the muxer, the
//! encoders and the render bridge, processes every clip (video, then audio)
//! and tears everything down through a single finalisation path. The final
//! 100% progress snapshot is sent after teardown whether or not the run
//! succeeded.

use crossbeam_channel::Receiver;
use reelcut_core::{PipelineConfig, ReelError, Result};
use reelcut_gpu::{
    GraphicsDevice, RenderSurfaceBridge, SoftwareDevice, TextureCompositor, WgpuDevice,
};
use reelcut_media::{AudioEncoder, CodecProvider, ExportPreset, Muxer, VideoEncoder};
use reelcut_timeline::EditorSession;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioContext, AudioTrackProcessor};
use crate::gate::MuxerGate;
use crate::plan::ExportPlan;
use crate::progress::{ExportCancel, ExportProgress, ExportStage, ProgressReporter};
use crate::video::{VideoContext, VideoTrackProcessor};

/// Creates the graphics device for a run, on the worker thread.
pub type DeviceFactory = Arc<dyn Fn() -> Result<Box<dyn GraphicsDevice>> + Send + Sync>;

/// Devices backed by wgpu.
pub fn wgpu_devices() -> DeviceFactory {
    Arc::new(|| Ok(Box::new(WgpuDevice::new()) as Box<dyn GraphicsDevice>))
}

/// CPU devices; no GPU required.
pub fn software_devices() -> DeviceFactory {
    Arc::new(|| Ok(Box::new(SoftwareDevice::new()) as Box<dyn GraphicsDevice>))
}

/// What a finished export produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub output: PathBuf,
    pub clips: usize,
    pub duration_us: i64,
    pub video_frames: u64,
    pub frames_skipped: u64,
    pub video_samples: u64,
    /// Whether an audio encoder took part in the run
    pub has_audio: bool,
    pub audio_frames: u64,
    pub audio_samples: u64,
}

/// Every resource a run may hold. Fields are filled in setup order and
/// emptied by [`RunResources::teardown`].
struct RunResources {
    muxer: Option<Box<dyn Muxer>>,
    gate: Option<MuxerGate>,
    video_encoder: Option<Box<dyn VideoEncoder>>,
    audio_encoder: Option<Box<dyn AudioEncoder>>,
    bridge: Option<RenderSurfaceBridge>,
    compositor: Option<TextureCompositor>,
    video: VideoTrackProcessor,
    audio: AudioTrackProcessor,
}

fn keep_first(first: &mut Option<ReelError>, step: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!(step, error = %e, "teardown step failed");
        first.get_or_insert(e);
    }
}

impl RunResources {
    fn new() -> Self {
        Self {
            muxer: None,
            gate: None,
            video_encoder: None,
            audio_encoder: None,
            bridge: None,
            compositor: None,
            video: VideoTrackProcessor::new(),
            audio: AudioTrackProcessor::new(),
        }
    }

    /// Release everything held, in order. Every step runs even if an
    /// earlier one failed; the first failure is returned.
    fn teardown(&mut self, config: &PipelineConfig) -> Result<()> {
        let mut first = None;

        if let (Some(encoder), Some(gate)) = (self.video_encoder.as_mut(), self.gate.as_ref()) {
            keep_first(
                &mut first,
                "video drain",
                self.video.finish(encoder.as_mut(), gate, config),
            );
        }
        if let (Some(encoder), Some(gate)) = (self.audio_encoder.as_mut(), self.gate.as_ref()) {
            keep_first(
                &mut first,
                "audio drain",
                self.audio.finish(encoder.as_mut(), gate, config),
            );
        }

        if let Some(mut bridge) = self.bridge.take() {
            if let Some(mut compositor) = self.compositor.take() {
                compositor.release(&mut bridge);
            }
            bridge.release();
        }
        if let Some(mut encoder) = self.video_encoder.take() {
            encoder.release();
        }
        if let Some(mut encoder) = self.audio_encoder.take() {
            encoder.release();
        }

        if let Some(gate) = self.gate.take() {
            keep_first(&mut first, "muxer stop", gate.finish());
            gate.release();
        }
        if let Some(mut muxer) = self.muxer.take() {
            muxer.release();
        }
        debug!("export resources released");
        first.map_or(Ok(()), Err)
    }
}

/// Runs exports against a codec provider and a graphics device factory.
#[derive(Clone)]
pub struct ExportPipeline {
    provider: Arc<dyn CodecProvider>,
    devices: DeviceFactory,
    config: PipelineConfig,
}

impl ExportPipeline {
    pub fn new(provider: Arc<dyn CodecProvider>, devices: DeviceFactory) -> Self {
        Self {
            provider,
            devices,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Export `session` to `output` on the calling thread.
    pub fn run(
        &self,
        session: &EditorSession,
        preset: &ExportPreset,
        output: &Path,
        progress: &mut ProgressReporter,
    ) -> Result<ExportSummary> {
        info!(
            output = %output.display(),
            preset = preset.name,
            clips = session.video_clips.len(),
            "export started"
        );
        progress.enter(ExportStage::Preparing);

        let mut resources = RunResources::new();
        let result = self.execute(&mut resources, session, preset, output, progress);

        progress.enter(ExportStage::Finalizing);
        let teardown = resources.teardown(&self.config);
        progress.complete();

        match (result, teardown) {
            (Ok(mut summary), Ok(())) => {
                summary.video_frames = resources.video.frames_rendered();
                summary.frames_skipped = resources.video.frames_skipped();
                summary.video_samples = resources.video.samples_emitted();
                summary.audio_frames = resources.audio.frames_written();
                summary.audio_samples = resources.audio.samples_emitted();
                info!(
                    output = %summary.output.display(),
                    frames = summary.video_frames,
                    audio = summary.has_audio,
                    "export finished"
                );
                Ok(summary)
            }
            (Ok(_), Err(e)) => {
                error!(error = %e, "export failed during finalisation");
                Err(e)
            }
            (Err(e), teardown) => {
                if let Err(t) = teardown {
                    warn!(error = %t, "teardown after a failed export also failed");
                }
                if matches!(e, ReelError::Cancelled) {
                    info!("export cancelled");
                } else {
                    error!(error = %e, "export failed");
                }
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        res: &mut RunResources,
        session: &EditorSession,
        preset: &ExportPreset,
        output: &Path,
        progress: &mut ProgressReporter,
    ) -> Result<ExportSummary> {
        let plan = ExportPlan::build(session, preset)?;
        progress.set_total_frames(plan.total_frames);
        progress.check_cancelled()?;

        res.muxer = Some(self.provider.create_muxer(output)?);
        let video_encoder = res
            .video_encoder
            .insert(self.provider.create_video_encoder(&preset.video_format())?);
        let sink = video_encoder.create_input_surface()?;
        let device = (self.devices)()?;
        let bridge = res
            .bridge
            .insert(RenderSurfaceBridge::new(device, sink)?);
        res.compositor = Some(TextureCompositor::new(bridge)?);

        match self.provider.create_audio_encoder(&preset.audio_format()) {
            Ok(encoder) => res.audio_encoder = Some(encoder),
            Err(e) => warn!(error = %e, "audio encoder unavailable; exporting video only"),
        }
        let muxer = res
            .muxer
            .take()
            .ok_or_else(|| ReelError::Internal("muxer missing after setup".into()))?;
        let gate = res
            .gate
            .insert(MuxerGate::new(muxer, res.audio_encoder.is_some()));
        if res.audio_encoder.is_some() {
            res.audio.register_track(gate, preset)?;
        }
        debug!(
            clips = plan.clips.len(),
            total_frames = plan.total_frames,
            audio = res.audio_encoder.is_some(),
            "export set up"
        );

        let (Some(gate), Some(video_encoder), Some(bridge), Some(compositor)) = (
            res.gate.as_ref(),
            res.video_encoder.as_mut(),
            res.bridge.as_mut(),
            res.compositor.as_ref(),
        ) else {
            return Err(ReelError::Internal("export resources incomplete".into()));
        };

        for clip in &plan.clips {
            progress.enter(ExportStage::Video);
            let mut video_ctx = VideoContext {
                provider: self.provider.as_ref(),
                encoder: video_encoder.as_mut(),
                bridge: &mut *bridge,
                compositor,
                gate,
                config: &self.config,
                progress: &mut *progress,
            };
            res.video.process_clip(&mut video_ctx, clip)?;

            if let Some(audio_encoder) = res.audio_encoder.as_mut() {
                progress.enter(ExportStage::Audio);
                let mut audio_ctx = AudioContext {
                    provider: self.provider.as_ref(),
                    encoder: audio_encoder.as_mut(),
                    gate,
                    preset,
                    config: &self.config,
                    progress: &mut *progress,
                };
                res.audio.process_clip(&mut audio_ctx, clip)?;
            }
        }

        Ok(ExportSummary {
            output: output.to_path_buf(),
            clips: plan.clips.len(),
            duration_us: plan.total_duration_us,
            video_frames: 0,
            frames_skipped: 0,
            video_samples: 0,
            has_audio: res.audio_encoder.is_some(),
            audio_frames: 0,
            audio_samples: 0,
        })
    }

    /// Run the export on a worker thread.
    pub fn spawn(
        &self,
        session: EditorSession,
        preset: ExportPreset,
        output: PathBuf,
    ) -> Result<ExportHandle> {
        let cancel = ExportCancel::new();
        let (mut reporter, progress) =
            ProgressReporter::channel(cancel.clone(), self.config.progress_interval_frames);
        let pipeline = self.clone();
        let worker = std::thread::Builder::new()
            .name("reelcut-export".into())
            .spawn(move || pipeline.run(&session, &preset, &output, &mut reporter))?;
        Ok(ExportHandle {
            progress,
            cancel,
            worker,
        })
    }
}

/// A running export.
pub struct ExportHandle {
    progress: Receiver<ExportProgress>,
    cancel: ExportCancel,
    worker: JoinHandle<Result<ExportSummary>>,
}

impl ExportHandle {
    /// Progress snapshots; the channel closes when the worker exits.
    pub fn progress(&self) -> &Receiver<ExportProgress> {
        &self.progress
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> ExportCancel {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker and return its result.
    pub fn join(self) -> Result<ExportSummary> {
        self.worker
            .join()
            .map_err(|_| ReelError::Internal("export worker panicked".into()))?
    }
}
