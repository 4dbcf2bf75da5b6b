//! Reelcut Export - the export pipeline
//!
//! Turns an edit session into one MP4:
//! - An export plan laying clips out back to back
//! - Video and audio track processors driving decoders and encoders
//! - A muxer gate that starts the muxer once every track is known
//! - Stall detection, progress reporting and cancellation
//! - The orchestrator owning setup and teardown of a run

pub mod audio;
pub mod deadline;
pub mod drain;
pub mod gate;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod track;
pub mod video;

pub use audio::AudioTrackProcessor;
pub use deadline::StallWatch;
pub use gate::{GatePhase, MuxerGate};
pub use orchestrator::{
    software_devices, wgpu_devices, DeviceFactory, ExportHandle, ExportPipeline, ExportSummary,
};
pub use plan::{ExportPlan, PlannedClip};
pub use progress::{ExportCancel, ExportProgress, ExportStage, ProgressReporter};
pub use track::TrackState;
pub use video::VideoTrackProcessor;
