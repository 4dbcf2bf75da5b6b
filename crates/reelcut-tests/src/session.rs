//! Session files feeding the export pipeline.

use reelcut_export::{software_devices, ExportCancel, ExportPipeline, ExportPlan, ProgressReporter};
use reelcut_media::ExportPreset;
use reelcut_timeline::{
    AudioClip, AudioTrack, EditorSession, SessionFile, VideoClip, VolumeKeyframe,
};
use std::path::Path;
use std::sync::Arc;

use crate::synthetic::{temp_output, test_preset, SourceSpec, SyntheticProvider};

fn edited_session() -> EditorSession {
    let mut session = EditorSession::new();
    session.append_sequential(VideoClip::new("a.mp4", 0, 1500));
    session.append_sequential(VideoClip::new("a.mp4", 500, 2500).with_speed(2.0));

    let mut track = AudioTrack::new("Embedded");
    for video in &session.video_clips {
        let mut audio = AudioClip::embedded_in(video);
        audio.fade_in_ms = 100;
        audio.add_keyframe(VolumeKeyframe::new(0, 0.5)).unwrap();
        track.add_clip(audio);
    }
    session.push_audio_track(track);
    session
}

#[test]
fn saved_session_loads_identically() {
    let session = edited_session();
    let path = temp_output("session.json");
    SessionFile::new(session.clone()).save_to_file(&path).unwrap();
    let loaded = SessionFile::load_from_file(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(loaded.session, session);
}

#[test]
fn loaded_session_plans_like_the_original() {
    let session = edited_session();
    let json = SessionFile::new(session.clone()).to_json().unwrap();
    let loaded = SessionFile::from_json(&json).unwrap().session;

    let original = ExportPlan::build(&session, &ExportPreset::SNS).unwrap();
    let reloaded = ExportPlan::build(&loaded, &ExportPreset::SNS).unwrap();
    assert_eq!(original.total_duration_us, reloaded.total_duration_us);
    assert_eq!(original.total_frames, reloaded.total_frames);
    assert_eq!(reloaded.total_duration_us, 2_500_000);
    assert!(reloaded.clips.iter().all(|c| c.audio.is_some()));
}

#[test]
fn loaded_session_exports() {
    let json = SessionFile::new(edited_session()).to_json().unwrap();
    let session = SessionFile::from_json(&json).unwrap().session;

    let provider = SyntheticProvider::new().with_source("a.mp4", SourceSpec::av(3000));
    let ledger = provider.ledger();
    let pipeline = ExportPipeline::new(Arc::new(provider), software_devices());
    let mut progress = ProgressReporter::silent(ExportCancel::new());
    let summary = pipeline
        .run(&session, &test_preset(), Path::new("out.mp4"), &mut progress)
        .unwrap();

    assert_eq!(summary.clips, 2);
    assert_eq!(summary.duration_us, 2_500_000);
    assert!(summary.has_audio);
    assert_eq!(ledger.live_total(), 0);
}
