//! Gain, timing and planning properties across timeline, audio and export.

use proptest::prelude::*;
use reelcut_audio::{apply_gain, GainEnvelope, Resampler};
use reelcut_core::{PcmBuffer, PipelineConfig};
use reelcut_export::{software_devices, ExportCancel, ExportPipeline, ExportPlan, ProgressReporter};
use reelcut_media::ExportPreset;
use reelcut_timeline::{
    AudioClip, AudioSourceType, AudioTrack, EditorSession, VideoClip, VolumeKeyframe,
};
use std::path::Path;
use std::sync::Arc;

use crate::synthetic::{test_preset, AudioTrace, SourceSpec, SyntheticProvider};

// ── Helpers ────────────────────────────────────────────────────

/// One clip of `source` with its embedded audio configured by `edit`.
fn session_with_audio(source: &str, edit: impl FnOnce(&mut AudioClip)) -> EditorSession {
    let video = VideoClip::new(source, 0, 1000);
    let mut audio = AudioClip::embedded_in(&video);
    edit(&mut audio);
    let mut track = AudioTrack::new("Embedded");
    track.add_clip(audio);

    let mut session = EditorSession::new();
    session.append_sequential(video);
    session.push_audio_track(track);
    session
}

fn export_audio(spec: SourceSpec, session: &EditorSession) -> AudioTrace {
    let provider = SyntheticProvider::new().with_source("clip.mp4", spec);
    let audio = provider.audio_inputs();
    let pipeline = ExportPipeline::new(Arc::new(provider), software_devices())
        .with_config(PipelineConfig::default());
    let mut progress = ProgressReporter::silent(ExportCancel::new());
    pipeline
        .run(session, &test_preset(), Path::new("out.mp4"), &mut progress)
        .unwrap();
    audio
}

// ── Gain ───────────────────────────────────────────────────────

#[test]
fn keyframes_interpolate_linearly() {
    let mut clip = AudioClip::new("clip.mp4", AudioSourceType::VideoEmbedded, 0, 2000);
    clip.add_keyframe(VolumeKeyframe::new(0, 0.0)).unwrap();
    clip.add_keyframe(VolumeKeyframe::new(1000, 1.0)).unwrap();
    let envelope = GainEnvelope::from_clip(&clip);

    assert!((envelope.gain_at(500_000) - 0.5).abs() < 1e-6);
    assert_eq!(envelope.gain_at(0), 0.0);
    assert_eq!(envelope.gain_at(1_500_000), 1.0);
}

#[test]
fn boosted_full_scale_clamps() {
    let mut clip = AudioClip::new("clip.mp4", AudioSourceType::Music, 0, 1000);
    clip.set_volume(2.0).unwrap();
    let envelope = GainEnvelope::from_clip(&clip);
    let mut pcm = PcmBuffer::new(48_000, 2, 0, vec![i16::MAX, i16::MIN, 20_000, -20_000]);
    apply_gain(&mut pcm, &envelope, 0);
    assert_eq!(pcm.samples, vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN]);
}

#[test]
fn muted_clip_is_silent_in_plan() {
    let session = session_with_audio("clip.mp4", |a| {
        a.volume = 1.0;
        a.muted = true;
    });
    let plan = ExportPlan::build(&session, &ExportPreset::STANDARD).unwrap();
    assert_eq!(plan.clips[0].envelope.gain_at(0), 0.0);
    assert_eq!(plan.clips[0].envelope.gain_at(500_000), 0.0);
}

// ── End to end ─────────────────────────────────────────────────

#[test]
fn muted_clip_exports_silence() {
    let session = session_with_audio("clip.mp4", |a| a.muted = true);
    let audio = export_audio(SourceSpec::av(1000), &session);

    let records = audio.records();
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r.peak == 0));
}

#[test]
fn boosted_export_clamps_without_wrapping() {
    let session = session_with_audio("clip.mp4", |a| a.volume = 2.0);
    let audio = export_audio(SourceSpec::av(1000).with_audio_level(i16::MAX), &session);

    let records = audio.records();
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r.peak == i16::MAX as u16));
}

#[test]
fn unity_export_keeps_source_level() {
    let session = session_with_audio("clip.mp4", |_| {});
    let audio = export_audio(SourceSpec::av(1000).with_audio_level(12_000), &session);
    assert!(audio.records().iter().all(|r| r.peak == 12_000));
    assert_eq!(audio.total_frames(), 48_000);
}

// ── Properties ─────────────────────────────────────────────────

fn clip_strategy() -> impl Strategy<Value = VideoClip> {
    (0i64..5_000, 1i64..5_000, 1u32..=16).prop_map(|(start, len, quarter_speeds)| {
        VideoClip::new("clip.mp4", start, start + len).with_speed(quarter_speeds as f64 / 4.0)
    })
}

proptest! {
    #[test]
    fn plan_offsets_are_contiguous(clips in prop::collection::vec(clip_strategy(), 1..8)) {
        let mut session = EditorSession::new();
        for clip in clips {
            session.append_sequential(clip);
        }
        let plan = ExportPlan::build(&session, &ExportPreset::STANDARD).unwrap();

        let mut expected = 0i64;
        for clip in &plan.clips {
            prop_assert_eq!(clip.video_offset_us, expected);
            prop_assert_eq!(clip.audio_offset_us, expected);
            expected += clip.output_duration_us;
        }
        prop_assert_eq!(plan.total_duration_us, expected);
    }

    #[test]
    fn gain_stays_within_keyframe_range(
        a in 0.0f32..4.0,
        b in 0.0f32..4.0,
        t in 0i64..3_000_000,
    ) {
        let mut clip = AudioClip::new("clip.mp4", AudioSourceType::Music, 0, 3000);
        clip.add_keyframe(VolumeKeyframe::new(500, a)).unwrap();
        clip.add_keyframe(VolumeKeyframe::new(2500, b)).unwrap();
        let gain = GainEnvelope::from_clip(&clip).gain_at(t);
        prop_assert!(gain >= a.min(b) - 1e-4 && gain <= a.max(b) + 1e-4);
    }

    #[test]
    fn resampled_length_follows_speed(quarter_speeds in 1u32..=16, frames in 1usize..4_000) {
        let speed = quarter_speeds as f64 / 4.0;
        let mut resampler = Resampler::new(48_000, 2, 48_000, 2, speed).unwrap();
        let input = vec![1_000i16; frames * 2];
        let mut out = resampler.process(&input);
        out.extend(resampler.flush());

        // Upsampling loses the interpolation tail past the last input frame.
        let expected = frames as f64 / speed;
        let produced = (out.len() / 2) as f64;
        let tolerance = 1.0 / speed + 1.0;
        prop_assert!(
            (produced - expected).abs() <= tolerance,
            "{} frames for {}",
            produced,
            expected
        );
    }
}
