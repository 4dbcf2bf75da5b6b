//! End-to-end export runs against the synthetic backend.
//!
//! Covers timestamp continuity across clips, muxer start ordering, teardown
//! on every failure path, stall detection, audio degradation, cancellation
//! and progress reporting.

use crossbeam_channel::bounded;
use reelcut_core::{PipelineConfig, ReelError, Result};
use reelcut_export::{
    ExportCancel, ExportPipeline, ExportProgress, ExportStage, ExportSummary, ProgressReporter,
};
use reelcut_gpu::FailPoint;
use reelcut_media::TrackKind;
use reelcut_timeline::{EditorSession, VideoClip};
use std::path::Path;
use std::sync::Arc;

use crate::synthetic::{
    fast_config, frame_index, live_graphics_objects, test_preset, tracked_devices, AudioTrace,
    DeviceLog, Faults, MuxEvent, MuxTrace, Resource, ResourceLedger, SourceSpec, SurfaceTrace,
    SyntheticProvider,
};

// ── Helpers ────────────────────────────────────────────────────

struct Run {
    result: Result<ExportSummary>,
    mux: MuxTrace,
    audio: AudioTrace,
    surface: SurfaceTrace,
    ledger: Arc<ResourceLedger>,
    devices: DeviceLog,
    progress: Vec<ExportProgress>,
}

impl Run {
    fn summary(&self) -> &ExportSummary {
        match &self.result {
            Ok(summary) => summary,
            Err(e) => panic!("export failed: {}", e),
        }
    }

    fn error(&self) -> &ReelError {
        match &self.result {
            Ok(_) => panic!("export unexpectedly succeeded"),
            Err(e) => e,
        }
    }

    fn assert_nothing_alive(&self) {
        assert_eq!(self.ledger.live_total(), 0, "codec objects leaked");
        assert_eq!(live_graphics_objects(&self.devices), 0, "graphics objects leaked");
    }
}

fn provider() -> SyntheticProvider {
    SyntheticProvider::new()
        .with_source("a.mp4", SourceSpec::av(3000))
        .with_source("b.mp4", SourceSpec::av(3000))
        .with_source("silent.mp4", SourceSpec::video_only(3000))
}

fn session(clips: Vec<VideoClip>) -> EditorSession {
    let mut session = EditorSession::new();
    for clip in clips {
        session.append_sequential(clip);
    }
    session
}

fn export_with(
    provider: SyntheticProvider,
    session: &EditorSession,
    config: PipelineConfig,
    fail: Option<FailPoint>,
) -> Run {
    let mux = provider.mux();
    let audio = provider.audio_inputs();
    let surface = provider.surface_frames();
    let ledger = provider.ledger();
    let (factory, devices) = tracked_devices(fail);
    let pipeline = ExportPipeline::new(Arc::new(provider), factory).with_config(config);

    let (mut reporter, rx) =
        ProgressReporter::channel(ExportCancel::new(), pipeline.config().progress_interval_frames);
    let result = pipeline.run(session, &test_preset(), Path::new("out.mp4"), &mut reporter);
    drop(reporter);

    Run {
        result,
        mux,
        audio,
        surface,
        ledger,
        devices,
        progress: rx.try_iter().collect(),
    }
}

fn export(session: &EditorSession) -> Run {
    export_with(provider(), session, PipelineConfig::default(), None)
}

fn scenario_a() -> EditorSession {
    session(vec![
        VideoClip::new("a.mp4", 0, 2000),
        VideoClip::new("b.mp4", 1000, 3000).with_speed(2.0),
    ])
}

fn assert_strictly_increasing(pts: &[i64]) {
    for pair in pts.windows(2) {
        assert!(pair[1] > pair[0], "{} does not follow {}", pair[1], pair[0]);
    }
}

// ── Single clip ────────────────────────────────────────────────

#[test]
fn single_clip_exports_every_frame_in_window() {
    let run = export(&session(vec![VideoClip::new("a.mp4", 0, 2000)]));
    let summary = run.summary();

    assert_eq!(summary.clips, 1);
    assert_eq!(summary.duration_us, 2_000_000);
    assert_eq!(summary.video_frames, 60);
    assert_eq!(summary.frames_skipped, 0);
    assert_eq!(summary.video_samples, 60);
    assert!(summary.has_audio);
    assert_eq!(summary.audio_frames, 96_000);

    let video = run.mux.samples(TrackKind::Video);
    assert_eq!(video.len(), 60);
    assert_eq!(video[0], (0, true));
    assert_eq!(run.audio.total_frames(), 96_000);
    run.assert_nothing_alive();
}

#[test]
fn rendered_frames_come_from_the_trim_window() {
    let run = export(&session(vec![VideoClip::new("a.mp4", 500, 1000)]));
    run.summary();

    let frames = run.surface.records();
    assert_eq!(frames.len(), 15);
    // 500 ms at 30 fps is source frame 15; the seek lands on sync frame 10.
    let indices: Vec<u64> = frames.iter().map(|f| frame_index(f.centre)).collect();
    assert_eq!(indices, (15..30).collect::<Vec<_>>());
    assert_eq!(frames[0].pts_us, 0);
}

#[test]
fn muxer_is_stopped_and_released_once() {
    let run = export(&session(vec![VideoClip::new("a.mp4", 0, 1000)]));
    run.summary();

    assert_eq!(run.mux.count(&MuxEvent::Start), 1);
    assert_eq!(run.mux.count(&MuxEvent::Stop), 1);
    assert_eq!(run.mux.count(&MuxEvent::Release), 1);
    assert_eq!(run.mux.events().last(), Some(&MuxEvent::Release));
}

// ── Multiple clips ─────────────────────────────────────────────

#[test]
fn timestamps_increase_across_clips() {
    let run = export(&scenario_a());
    run.summary();

    let video = run.mux.pts(TrackKind::Video);
    let audio = run.mux.pts(TrackKind::Audio);
    assert_eq!(video.len(), 120);
    assert!(!audio.is_empty());
    assert_strictly_increasing(&video);
    assert_strictly_increasing(&audio);
    run.assert_nothing_alive();
}

#[test]
fn speed_change_places_second_clip_after_first() {
    let run = export(&scenario_a());
    let summary = run.summary();
    assert_eq!(summary.duration_us, 3_000_000);

    let video = run.mux.pts(TrackKind::Video);
    // Clip 1 yields 60 frames; clip 2 starts at its planned offset.
    assert!((video[60] - 2_000_000).abs() <= 1_000, "second clip starts at {}", video[60]);
    assert!(video[59] < 2_000_000);

    let frames = run.surface.records();
    assert_eq!(frame_index(frames[60].centre), 30);
}

#[test]
fn output_duration_matches_sum_of_clips() {
    let run = export(&scenario_a());
    let summary = run.summary();
    let frame_us = test_preset().frame_rate.frame_interval_us();

    let video = run.mux.pts(TrackKind::Video);
    let video_end = video.last().copied().unwrap_or(0) + frame_us;
    assert!(
        (video_end - summary.duration_us).abs() <= frame_us,
        "video ends at {} for {}",
        video_end,
        summary.duration_us
    );

    // 2 s at 1x plus 2 s of source at 2x, at 48 kHz.
    let expected_audio = 144_000i64;
    let tolerance = 48_000 * frame_us / 1_000_000;
    assert!(
        (summary.audio_frames as i64 - expected_audio).abs() <= tolerance,
        "audio frames {}",
        summary.audio_frames
    );
}

#[test]
fn source_without_audio_leaves_a_gap() {
    let run = export(&session(vec![
        VideoClip::new("silent.mp4", 0, 1000),
        VideoClip::new("a.mp4", 0, 1000),
    ]));
    let summary = run.summary();
    assert!(summary.has_audio);
    assert_eq!(summary.video_frames, 60);

    let audio = run.mux.pts(TrackKind::Audio);
    assert_eq!(audio.first().copied(), Some(1_000_000));
    assert_eq!(summary.audio_frames, 48_000);
    run.assert_nothing_alive();
}

#[test]
fn repeated_source_timestamps_are_skipped() {
    let provider =
        provider().with_source("stutter.mp4", SourceSpec::av(3000).with_repeated_timestamps(10));
    let run = export_with(
        provider,
        &session(vec![VideoClip::new("stutter.mp4", 0, 1000)]),
        PipelineConfig::default(),
        None,
    );
    let summary = run.summary();

    // Frames 10 and 20 repeat the timestamps of 9 and 19.
    assert_eq!(summary.frames_skipped, 2);
    assert_eq!(summary.video_frames, 28);
    let pts = run.mux.pts(TrackKind::Video);
    assert_eq!(pts.len(), 28);
    assert_strictly_increasing(&pts);

    let indices: Vec<u64> = run
        .surface
        .records()
        .iter()
        .map(|f| frame_index(f.centre))
        .collect();
    assert!(indices.contains(&9));
    assert!(!indices.contains(&10));
    assert!(!indices.contains(&20));
    run.assert_nothing_alive();
}

// ── Muxer ordering ─────────────────────────────────────────────

#[test]
fn no_sample_written_before_all_tracks_registered() {
    let run = export(&scenario_a());
    run.summary();

    let events = run.mux.events();
    let start = events
        .iter()
        .position(|e| *e == MuxEvent::Start)
        .expect("muxer never started");
    let tracks_before = events[..start]
        .iter()
        .filter(|e| matches!(e, MuxEvent::AddTrack { .. }))
        .count();
    assert_eq!(tracks_before, 2);
    assert!(!events[..start]
        .iter()
        .any(|e| matches!(e, MuxEvent::Write { .. })));
    assert!(!events[start..]
        .iter()
        .any(|e| matches!(e, MuxEvent::AddTrack { .. })));
}

#[test]
fn silent_sources_do_not_hold_video_until_teardown() {
    let run = export(&session(vec![
        VideoClip::new("silent.mp4", 0, 3000),
        VideoClip::new("silent.mp4", 0, 3000),
    ]));
    let summary = run.summary();
    assert!(summary.has_audio);
    assert_eq!(summary.audio_samples, 0);
    assert_eq!(run.mux.pts(TrackKind::Video).len(), 180);

    // Both tracks are in place once the video encoder reports its format,
    // so the muxer starts after the first frame rather than at finalisation.
    let at_start = run
        .mux
        .frames_rendered_at_start()
        .expect("muxer never started");
    assert!(at_start <= 1 + PipelineConfig::default().max_frames_in_flight as usize);
    assert_eq!(run.mux.track_count(), 2);
    assert!(run.mux.track_index(TrackKind::Audio).is_some());
    run.assert_nothing_alive();
}

// ── Setup failures ─────────────────────────────────────────────

#[test]
fn muxer_failure_leaves_nothing_alive() {
    let faults = Faults {
        fail_muxer: true,
        ..Faults::default()
    };
    let run = export_with(
        provider().with_faults(faults),
        &scenario_a(),
        PipelineConfig::default(),
        None,
    );
    assert!(matches!(run.error(), ReelError::Muxer(_)));
    assert!(run.mux.events().is_empty());
    assert!(run.devices.lock().is_empty());
    run.assert_nothing_alive();
}

#[test]
fn video_encoder_failure_releases_muxer() {
    let faults = Faults {
        fail_video_encoder: true,
        ..Faults::default()
    };
    let run = export_with(
        provider().with_faults(faults),
        &scenario_a(),
        PipelineConfig::default(),
        None,
    );
    assert!(matches!(run.error(), ReelError::Encoder(_)));
    assert_eq!(run.ledger.created(Resource::Muxer), 1);
    assert_eq!(run.mux.events(), vec![MuxEvent::Release]);
    run.assert_nothing_alive();
}

#[test]
fn graphics_failures_release_everything() {
    let points = [
        FailPoint::ChooseConfig,
        FailPoint::CreateContext,
        FailPoint::CreateWindowSurface,
        FailPoint::CreatePbufferSurface,
        FailPoint::CreateProgram,
        FailPoint::CreateTexture,
        FailPoint::MakeCurrent,
        FailPoint::Draw,
    ];
    for point in points {
        let run = export_with(
            provider(),
            &scenario_a(),
            PipelineConfig::default(),
            Some(point),
        );
        assert!(run.result.is_err(), "{:?} did not fail the export", point);
        assert_eq!(run.ledger.live_total(), 0, "{:?} leaked codec objects", point);
        assert_eq!(
            live_graphics_objects(&run.devices),
            0,
            "{:?} leaked graphics objects",
            point
        );
        assert_eq!(run.ledger.live(Resource::Encoder), 0);
    }
}

#[test]
fn missing_source_fails_and_releases() {
    let run = export(&session(vec![VideoClip::new("missing.mp4", 0, 1000)]));
    assert!(matches!(run.error(), ReelError::NotFound(_)));
    run.assert_nothing_alive();
}

#[test]
fn extractor_failure_aborts_the_export() {
    let faults = Faults {
        fail_extractor: true,
        ..Faults::default()
    };
    let run = export_with(
        provider().with_faults(faults),
        &scenario_a(),
        PipelineConfig::default(),
        None,
    );
    assert!(matches!(run.error(), ReelError::Media(_)));
    assert!(run.mux.pts(TrackKind::Video).is_empty());
    run.assert_nothing_alive();
}

#[test]
fn invalid_session_is_rejected_before_setup() {
    let run = export(&session(vec![VideoClip::new("a.mp4", 2000, 1000)]));
    assert!(matches!(run.error(), ReelError::Timeline(_)));
    assert_eq!(run.ledger.created(Resource::Muxer), 0);
    assert!(run.devices.lock().is_empty());
}

// ── Degraded and stalled runs ──────────────────────────────────

#[test]
fn missing_audio_encoder_exports_video_only() {
    let faults = Faults {
        fail_audio_encoder: true,
        ..Faults::default()
    };
    let run = export_with(
        provider().with_faults(faults),
        &scenario_a(),
        PipelineConfig::default(),
        None,
    );
    let summary = run.summary();
    assert!(!summary.has_audio);
    assert_eq!(summary.audio_frames, 0);
    assert_eq!(run.mux.track_count(), 1);
    assert_eq!(run.mux.track_index(TrackKind::Audio), None);
    assert_eq!(run.mux.pts(TrackKind::Video).len(), 120);
    assert!(run.audio.records().is_empty());
    run.assert_nothing_alive();
}

#[test]
fn stalled_encoder_times_out() {
    let faults = Faults {
        stall_video_encoder: true,
        ..Faults::default()
    };
    let run = export_with(provider().with_faults(faults), &scenario_a(), fast_config(), None);
    assert!(matches!(run.error(), ReelError::Timeout(_)), "got {}", run.error());
    assert!(run.mux.pts(TrackKind::Video).is_empty());
    // Only the in-flight limit plus one frame reached the encoder.
    assert_eq!(run.surface.records().len(), 5);
    run.assert_nothing_alive();
}

#[test]
fn busy_decoder_still_delivers_every_frame() {
    let faults = Faults {
        busy_decoder: true,
        ..Faults::default()
    };
    let run = export_with(
        provider().with_faults(faults),
        &session(vec![VideoClip::new("a.mp4", 0, 2000)]),
        PipelineConfig::default(),
        None,
    );
    let summary = run.summary();
    assert_eq!(summary.video_frames, 60);
    assert_eq!(summary.audio_frames, 96_000);
    run.assert_nothing_alive();
}

// ── Progress and cancellation ──────────────────────────────────

#[test]
fn progress_ends_with_single_complete_event() {
    let run = export(&scenario_a());
    run.summary();

    let last = run.progress.last().expect("no progress events");
    assert_eq!(last.stage, ExportStage::Complete);
    assert_eq!(last.percentage, 100.0);
    assert_eq!(last.total_frames, 90);

    let complete = run
        .progress
        .iter()
        .filter(|p| p.stage == ExportStage::Complete)
        .count();
    assert_eq!(complete, 1);

    let running = &run.progress[..run.progress.len() - 1];
    assert!(running.iter().all(|p| p.percentage <= 99.0));
    for pair in running.windows(2) {
        assert!(pair[1].frames_processed >= pair[0].frames_processed);
    }
}

#[test]
fn failed_export_still_reports_completion() {
    let faults = Faults {
        fail_video_encoder: true,
        ..Faults::default()
    };
    let run = export_with(
        provider().with_faults(faults),
        &scenario_a(),
        PipelineConfig::default(),
        None,
    );
    assert!(run.result.is_err());
    let last = run.progress.last().expect("no progress events");
    assert_eq!(last.stage, ExportStage::Complete);
    assert_eq!(last.percentage, 100.0);
}

#[test]
fn cancellation_tears_down() {
    let provider = provider();
    let ledger = provider.ledger();
    let mux = provider.mux();
    let (factory, devices) = tracked_devices(None);
    let pipeline = ExportPipeline::new(Arc::new(provider), factory);

    let cancel = ExportCancel::new();
    // A rendezvous channel holds the worker at every progress event.
    let (tx, rx) = bounded(0);
    let mut reporter = ProgressReporter::new(tx, cancel.clone(), 5);
    let session = scenario_a();
    let worker = std::thread::spawn(move || {
        pipeline.run(&session, &test_preset(), Path::new("out.mp4"), &mut reporter)
    });

    let mut events: Vec<ExportProgress> = Vec::new();
    for event in rx.iter() {
        events.push(event);
        if event.stage == ExportStage::Video && event.frames_processed >= 5 {
            cancel.cancel();
            break;
        }
    }
    events.extend(rx.iter());
    let result = worker.join().expect("export worker panicked");

    assert!(matches!(result, Err(ReelError::Cancelled)));
    let last = events.last().expect("no progress events");
    assert_eq!(last.stage, ExportStage::Complete);
    assert!(mux.events().contains(&MuxEvent::Release));
    assert_eq!(ledger.live_total(), 0);
    assert_eq!(live_graphics_objects(&devices), 0);
}

#[test]
fn spawned_export_streams_progress() {
    let provider = provider();
    let ledger = provider.ledger();
    let pipeline = ExportPipeline::new(Arc::new(provider), tracked_devices(None).0);
    let handle = pipeline
        .spawn(
            session(vec![VideoClip::new("a.mp4", 0, 1000)]),
            test_preset(),
            "out.mp4".into(),
        )
        .unwrap();

    let events: Vec<ExportProgress> = handle.progress().iter().collect();
    let summary = handle.join().unwrap();
    assert_eq!(summary.video_frames, 30);
    assert_eq!(events.last().map(|p| p.stage), Some(ExportStage::Complete));
    assert!(events.iter().any(|p| p.stage == ExportStage::Video));
    assert_eq!(ledger.live_total(), 0);
}
