//! The muxer gate.
//!
//! All muxer access goes through one lock, and the gate is the only place
//! that knows whether the muxer has started. Tracks register as their
//! encoders report output formats; the muxer starts exactly once, when every
//! expected track is present. Samples written earlier are held and flushed
//! in arrival order on start.

use parking_lot::Mutex;
use reelcut_core::{ReelError, Result};
use reelcut_media::{BufferInfo, MediaFormat, Muxer, TrackKind};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    /// Waiting for tracks; samples are buffered
    Collecting,
    Started,
    Stopped,
    Released,
}

struct HeldSample {
    track: usize,
    data: Vec<u8>,
    info: BufferInfo,
}

struct GateState {
    muxer: Box<dyn Muxer>,
    expected: usize,
    video_track: Option<usize>,
    audio_track: Option<usize>,
    formats: [Option<MediaFormat>; 2],
    phase: GatePhase,
    held: Vec<HeldSample>,
    written: [u64; 2],
}

impl GateState {
    fn slot(&mut self, kind: TrackKind) -> &mut Option<usize> {
        match kind {
            TrackKind::Video => &mut self.video_track,
            TrackKind::Audio => &mut self.audio_track,
        }
    }

    fn registered(&self) -> usize {
        self.video_track.is_some() as usize + self.audio_track.is_some() as usize
    }

    fn start(&mut self) -> Result<()> {
        if self.phase != GatePhase::Collecting {
            return Err(ReelError::InvalidState(format!(
                "muxer start requested in phase {:?}",
                self.phase
            )));
        }
        self.muxer.start()?;
        self.phase = GatePhase::Started;
        let held = std::mem::take(&mut self.held);
        info!(tracks = self.registered(), held = held.len(), "muxer started");
        for sample in held {
            self.muxer
                .write_sample_data(sample.track, &sample.data, &sample.info)?;
        }
        Ok(())
    }
}

fn kind_index(kind: TrackKind) -> usize {
    match kind {
        TrackKind::Video => 0,
        TrackKind::Audio => 1,
    }
}

/// Serialised, start-once access to the output muxer.
pub struct MuxerGate {
    state: Mutex<GateState>,
}

impl MuxerGate {
    /// Wrap `muxer`, expecting a video track and, if `expect_audio`, an
    /// audio track.
    pub fn new(muxer: Box<dyn Muxer>, expect_audio: bool) -> Self {
        Self {
            state: Mutex::new(GateState {
                muxer,
                expected: 1 + expect_audio as usize,
                video_track: None,
                audio_track: None,
                formats: [None, None],
                phase: GatePhase::Collecting,
                held: Vec::new(),
                written: [0; 2],
            }),
        }
    }

    pub fn phase(&self) -> GatePhase {
        self.state.lock().phase
    }

    pub fn is_started(&self) -> bool {
        self.phase() == GatePhase::Started
    }

    /// Muxer track index for `kind`, once registered.
    pub fn track(&self, kind: TrackKind) -> Option<usize> {
        let mut state = self.state.lock();
        *state.slot(kind)
    }

    /// Format `kind` was registered with.
    pub fn track_format(&self, kind: TrackKind) -> Option<MediaFormat> {
        self.state.lock().formats[kind_index(kind)].clone()
    }

    /// Samples handed to the muxer for `kind` (held samples not counted).
    pub fn samples_written(&self, kind: TrackKind) -> u64 {
        self.state.lock().written[kind_index(kind)]
    }

    /// Add the track for `kind`. Registering a kind twice is an error.
    /// Starts the muxer when this completes the expected set.
    pub fn register_track(&self, kind: TrackKind, format: &MediaFormat) -> Result<usize> {
        let mut state = self.state.lock();
        if state.slot(kind).is_some() {
            return Err(ReelError::InvalidState(format!(
                "{} track registered twice",
                kind
            )));
        }
        if state.phase != GatePhase::Collecting {
            return Err(ReelError::InvalidState(format!(
                "{} track registered after the muxer started",
                kind
            )));
        }
        let index = state.muxer.add_track(format)?;
        *state.slot(kind) = Some(index);
        state.formats[kind_index(kind)] = Some(format.clone());
        debug!(%kind, index, mime = %format.mime, "track registered");
        if state.registered() == state.expected {
            state.start()?;
        }
        Ok(index)
    }

    /// Write (or hold) one encoded sample of `kind`.
    pub fn write(&self, kind: TrackKind, data: &[u8], info: &BufferInfo) -> Result<()> {
        let mut state = self.state.lock();
        let track = state.slot(kind).ok_or_else(|| {
            ReelError::InvalidState(format!("{} sample before its track was registered", kind))
        })?;
        match state.phase {
            GatePhase::Collecting => {
                state.held.push(HeldSample {
                    track,
                    data: data.to_vec(),
                    info: *info,
                });
                Ok(())
            }
            GatePhase::Started => {
                state.muxer.write_sample_data(track, data, info)?;
                state.written[kind_index(kind)] += 1;
                Ok(())
            }
            phase => Err(ReelError::InvalidState(format!(
                "sample written in phase {:?}",
                phase
            ))),
        }
    }

    /// Finalise: start with whatever tracks registered if the expected set
    /// never completed, then stop. A gate with no tracks never starts and
    /// there is nothing to stop.
    pub fn finish(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.phase == GatePhase::Collecting {
            if state.registered() == 0 {
                warn!("no track was registered; muxer never started");
                return Ok(());
            }
            debug!(
                registered = state.registered(),
                expected = state.expected,
                "starting muxer with the tracks that registered"
            );
            state.start()?;
        }
        if state.phase == GatePhase::Started {
            state.muxer.stop()?;
            state.phase = GatePhase::Stopped;
        }
        Ok(())
    }

    /// Release the muxer, closing the output. Idempotent.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.phase != GatePhase::Released {
            state.muxer.release();
            state.held.clear();
            state.phase = GatePhase::Released;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcut_media::{BufferFlags, Mime};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        AddTrack(Mime),
        Start,
        Write(usize, i64),
        Stop,
        Release,
    }

    struct LogMuxer {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl Muxer for LogMuxer {
        fn add_track(&mut self, format: &MediaFormat) -> Result<usize> {
            let mut calls = self.calls.lock();
            let n = calls.iter().filter(|c| matches!(c, Call::AddTrack(_))).count();
            calls.push(Call::AddTrack(format.mime));
            Ok(n)
        }
        fn start(&mut self) -> Result<()> {
            self.calls.lock().push(Call::Start);
            Ok(())
        }
        fn write_sample_data(&mut self, track: usize, _: &[u8], info: &BufferInfo) -> Result<()> {
            self.calls
                .lock()
                .push(Call::Write(track, info.presentation_time_us));
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            self.calls.lock().push(Call::Stop);
            Ok(())
        }
        fn release(&mut self) {
            self.calls.lock().push(Call::Release);
        }
    }

    fn gate(expect_audio: bool) -> (MuxerGate, Arc<Mutex<Vec<Call>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let muxer = LogMuxer {
            calls: Arc::clone(&calls),
        };
        (MuxerGate::new(Box::new(muxer), expect_audio), calls)
    }

    fn info(pts: i64) -> BufferInfo {
        BufferInfo::new(pts, 1, BufferFlags::default())
    }

    #[test]
    fn test_holds_samples_until_all_tracks() {
        let (gate, calls) = gate(true);
        gate.register_track(TrackKind::Video, &MediaFormat::video(Mime::H264, 2, 2))
            .unwrap();
        gate.write(TrackKind::Video, &[1], &info(0)).unwrap();
        gate.write(TrackKind::Video, &[1], &info(33)).unwrap();
        assert!(!gate.is_started());
        assert_eq!(calls.lock().len(), 1);

        gate.register_track(TrackKind::Audio, &MediaFormat::audio(Mime::Aac, 48_000, 2))
            .unwrap();
        assert!(gate.is_started());
        gate.write(TrackKind::Audio, &[1], &info(0)).unwrap();
        gate.finish().unwrap();
        gate.release();
        gate.release();

        assert_eq!(
            *calls.lock(),
            vec![
                Call::AddTrack(Mime::H264),
                Call::AddTrack(Mime::Aac),
                Call::Start,
                Call::Write(0, 0),
                Call::Write(0, 33),
                Call::Write(1, 0),
                Call::Stop,
                Call::Release,
            ]
        );
    }

    #[test]
    fn test_double_registration_rejected() {
        let (gate, _) = gate(true);
        let format = MediaFormat::video(Mime::H264, 2, 2);
        gate.register_track(TrackKind::Video, &format).unwrap();
        assert!(matches!(
            gate.register_track(TrackKind::Video, &format),
            Err(ReelError::InvalidState(_))
        ));
    }

    #[test]
    fn test_write_before_registration_rejected() {
        let (gate, _) = gate(false);
        assert!(gate.write(TrackKind::Video, &[0], &info(0)).is_err());
    }

    #[test]
    fn test_finish_starts_with_partial_tracks() {
        let (gate, calls) = gate(true);
        gate.register_track(TrackKind::Video, &MediaFormat::video(Mime::H264, 2, 2))
            .unwrap();
        gate.write(TrackKind::Video, &[1], &info(0)).unwrap();
        gate.finish().unwrap();
        assert_eq!(gate.phase(), GatePhase::Stopped);
        assert_eq!(
            calls.lock()[1..].to_vec(),
            vec![Call::Start, Call::Write(0, 0), Call::Stop]
        );
    }

    #[test]
    fn test_finish_without_tracks_is_noop() {
        let (gate, calls) = gate(false);
        gate.finish().unwrap();
        gate.release();
        assert_eq!(*calls.lock(), vec![Call::Release]);
    }

    #[test]
    fn test_single_track_starts_immediately() {
        let (gate, _) = gate(false);
        gate.register_track(TrackKind::Video, &MediaFormat::video(Mime::H264, 2, 2))
            .unwrap();
        assert!(gate.is_started());
        assert!(gate
            .register_track(TrackKind::Audio, &MediaFormat::audio(Mime::Aac, 48_000, 2))
            .is_err());
    }
}
