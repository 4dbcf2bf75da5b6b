//! Progress reporting and cancellation.

use crossbeam_channel::{Receiver, Sender};
use reelcut_core::{ReelError, Result};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// What the pipeline is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Preparing,
    Video,
    Audio,
    Finalizing,
    Complete,
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportStage::Preparing => "preparing",
            ExportStage::Video => "video",
            ExportStage::Audio => "audio",
            ExportStage::Finalizing => "finalizing",
            ExportStage::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// One progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportProgress {
    pub frames_processed: u64,
    pub total_frames: u64,
    /// 0.0 to 100.0; exactly 100.0 only on the final snapshot
    pub percentage: f32,
    pub stage: ExportStage,
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct ExportCancel(Arc<AtomicBool>);

impl ExportCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Highest percentage reported before the run has finished.
const RUNNING_CAP: f32 = 99.0;

/// Sends snapshots to the progress receiver and watches for cancellation.
///
/// A receiver that has been dropped counts as a cancellation request.
pub struct ProgressReporter {
    tx: Option<Sender<ExportProgress>>,
    cancel: ExportCancel,
    interval: u64,
    frames_processed: u64,
    total_frames: u64,
    stage: ExportStage,
    receiver_gone: bool,
    completed: bool,
}

impl ProgressReporter {
    pub fn new(tx: Sender<ExportProgress>, cancel: ExportCancel, interval: u64) -> Self {
        Self {
            tx: Some(tx),
            cancel,
            interval: interval.max(1),
            frames_processed: 0,
            total_frames: 0,
            stage: ExportStage::Preparing,
            receiver_gone: false,
            completed: false,
        }
    }

    /// A reporter with nowhere to send; only the cancel flag is honoured.
    pub fn silent(cancel: ExportCancel) -> Self {
        Self {
            tx: None,
            cancel,
            interval: 1,
            frames_processed: 0,
            total_frames: 0,
            stage: ExportStage::Preparing,
            receiver_gone: false,
            completed: false,
        }
    }

    /// A reporter plus the receiving end of its channel.
    pub fn channel(cancel: ExportCancel, interval: u64) -> (Self, Receiver<ExportProgress>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx, cancel, interval), rx)
    }

    pub fn set_total_frames(&mut self, total: u64) {
        self.total_frames = total;
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn stage(&self) -> ExportStage {
        self.stage
    }

    fn snapshot(&self) -> ExportProgress {
        let percentage = if self.completed {
            100.0
        } else if self.total_frames == 0 {
            0.0
        } else {
            let pct = self.frames_processed as f64 / self.total_frames as f64 * 100.0;
            (pct as f32).min(RUNNING_CAP)
        };
        ExportProgress {
            frames_processed: self.frames_processed,
            total_frames: self.total_frames,
            percentage,
            stage: self.stage,
        }
    }

    fn send(&mut self) {
        let snapshot = self.snapshot();
        trace!(
            frames = snapshot.frames_processed,
            total = snapshot.total_frames,
            stage = %snapshot.stage,
            "progress"
        );
        if let Some(tx) = &self.tx {
            if tx.send(snapshot).is_err() && !self.receiver_gone {
                debug!("progress receiver dropped");
                self.receiver_gone = true;
            }
        }
    }

    /// Switch stage and report.
    pub fn enter(&mut self, stage: ExportStage) {
        if self.completed {
            return;
        }
        self.stage = stage;
        self.send();
    }

    /// Count one rendered frame; reports every `interval` frames.
    pub fn frame_done(&mut self) {
        self.frames_processed += 1;
        if self.frames_processed % self.interval == 0 {
            self.send();
        }
    }

    /// Unconditional report, used at clip boundaries.
    pub fn report(&mut self) {
        if !self.completed {
            self.send();
        }
    }

    /// `Err(Cancelled)` once the flag is set or a send found the receiver
    /// gone.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() || self.receiver_gone {
            return Err(ReelError::Cancelled);
        }
        Ok(())
    }

    /// Emit the single 100% snapshot. Later calls do nothing.
    pub fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.stage = ExportStage::Complete;
        self.send();
    }
}
