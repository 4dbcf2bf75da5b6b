//! In-memory [`FrameSink`] for exercising the bridge without an encoder.

use parking_lot::Mutex;
use reelcut_core::{FrameBuffer, FrameSink, ReelError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Frames captured by a [`CaptureSink`], with their presentation times (ns).
pub type CapturedFrames = Arc<Mutex<Vec<(FrameBuffer, i64)>>>;

/// Records every submitted frame.
pub struct CaptureSink {
    width: u32,
    height: u32,
    frames: CapturedFrames,
    released: Arc<AtomicBool>,
}

impl CaptureSink {
    pub fn new(width: u32, height: u32) -> (Self, CapturedFrames) {
        let frames = CapturedFrames::default();
        (
            Self {
                width,
                height,
                frames: Arc::clone(&frames),
                released: Arc::new(AtomicBool::new(false)),
            },
            frames,
        )
    }

    /// Set once `release` has been called.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

impl FrameSink for CaptureSink {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn submit(&mut self, frame: &FrameBuffer, presentation_time_ns: i64) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            return Err(ReelError::InvalidState("sink already released".into()));
        }
        self.frames.lock().push((frame.clone(), presentation_time_ns));
        Ok(())
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
