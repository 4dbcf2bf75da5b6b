//! Reelcut Audio - PCM processing for export
//!
//! - Gain envelopes: static volume, mute, linear keyframes, fades
//! - Sample-accurate gain with hard clamping on 16-bit PCM
//! - Streaming linear resampler for speed, rate and channel conversion

pub mod automation;
pub mod gain;
pub mod resample;

pub use automation::GainEnvelope;
pub use gain::{apply_gain, scale_sample};
pub use resample::Resampler;
