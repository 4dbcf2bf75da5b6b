//! Reelcut Core - Foundation types for the export pipeline
//!
//! This crate provides the fundamental types used throughout reelcut:
//! - Error type and result alias
//! - Frame rates and microsecond time helpers
//! - RGBA frame buffers, PCM buffers and the encoder input seam
//! - Configuration loading and tracing initialisation

pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod pcm;
pub mod time;

pub use config::{LoggingConfig, PipelineConfig, ReelcutConfig};
pub use error::{ReelError, Result};
pub use frame::{FrameBuffer, FrameSink};
pub use pcm::PcmBuffer;
pub use time::FrameRate;
