//! Reelcut Timeline - Edit session model
//!
//! The immutable input of an export run:
//! - Video clips with trim windows, timeline positions and speed factors
//! - Audio tracks whose clips carry volume, mute, fades and keyframes
//! - A versioned JSON session file

pub mod clip;
pub mod serialization;
pub mod session;
pub mod track;

pub use clip::{AudioClip, AudioSourceType, VideoClip, VolumeKeyframe};
pub use serialization::SessionFile;
pub use session::EditorSession;
pub use track::AudioTrack;
