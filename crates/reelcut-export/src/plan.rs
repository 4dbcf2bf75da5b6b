//! Export plan: the per-clip work list with output offsets.

use reelcut_audio::GainEnvelope;
use reelcut_core::time::{ms_to_us, MAX_TIMELINE_MS};
use reelcut_core::{ReelError, Result};
use reelcut_media::ExportPreset;
use reelcut_timeline::{AudioClip, EditorSession, VideoClip};
use tracing::debug;

/// One clip with everything the track processors need.
#[derive(Debug, Clone)]
pub struct PlannedClip {
    /// Position in the session's clip list
    pub index: usize,
    pub clip: VideoClip,
    /// Audio clip co-located with the video clip, if any
    pub audio: Option<AudioClip>,
    pub envelope: GainEnvelope,
    /// Output time of the clip's first video frame
    pub video_offset_us: i64,
    /// Output time of the clip's first audio frame
    pub audio_offset_us: i64,
    pub output_duration_us: i64,
    /// Frames the clip contributes at the preset rate, rounded up
    pub expected_frames: u64,
}

impl PlannedClip {
    /// Trim in point in source microseconds.
    pub fn start_us(&self) -> i64 {
        ms_to_us(self.clip.start_time)
    }

    /// Trim out point in source microseconds (exclusive).
    pub fn end_us(&self) -> i64 {
        ms_to_us(self.clip.end_time)
    }
}

/// The ordered clip list of one export.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub clips: Vec<PlannedClip>,
    pub total_duration_us: i64,
    pub total_frames: u64,
}

impl ExportPlan {
    /// Validate `session` and lay its clips out back to back.
    ///
    /// Clips are concatenated in list order. Video and audio offsets both
    /// advance by each clip's output duration, so a clip whose source has no
    /// audio leaves a silent gap rather than shifting later clips.
    pub fn build(session: &EditorSession, preset: &ExportPreset) -> Result<Self> {
        session.validate()?;
        let limit_us = ms_to_us(MAX_TIMELINE_MS);
        let mut clips = Vec::with_capacity(session.video_clips.len());
        let (mut video_offset_us, mut audio_offset_us) = (0i64, 0i64);
        for (index, clip) in session.video_clips.iter().enumerate() {
            let output_duration_us = clip.output_duration_us();
            let video_end = video_offset_us
                .checked_add(output_duration_us)
                .filter(|end| *end <= limit_us)
                .ok_or_else(|| {
                    ReelError::Timeline(format!(
                        "clip {} ends past the {} ms output limit",
                        index, MAX_TIMELINE_MS
                    ))
                })?;
            let audio = session.audio_clip_for(clip).cloned();
            let envelope = GainEnvelope::for_clip(audio.as_ref());
            clips.push(PlannedClip {
                index,
                clip: clip.clone(),
                audio,
                envelope,
                video_offset_us,
                audio_offset_us,
                output_duration_us,
                expected_frames: preset.frame_rate.frames_in(output_duration_us),
            });
            video_offset_us = video_end;
            audio_offset_us += output_duration_us;
        }
        debug_assert_eq!(video_offset_us, audio_offset_us);
        let video_end = video_offset_us;
        let total_frames = clips.iter().map(|c| c.expected_frames).sum();
        debug!(
            clips = clips.len(),
            duration_us = video_end,
            total_frames,
            "export plan built"
        );
        Ok(Self {
            clips,
            total_duration_us: video_end,
            total_frames,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcut_timeline::{AudioSourceType, AudioTrack};

    fn session(clips: Vec<VideoClip>) -> EditorSession {
        let mut s = EditorSession::new();
        for c in clips {
            s.append_sequential(c);
        }
        s
    }

    #[test]
    fn test_offsets_fold() {
        let s = session(vec![
            VideoClip::new("a.mp4", 0, 2000),
            VideoClip::new("b.mp4", 1000, 3000).with_speed(2.0),
            VideoClip::new("c.mp4", 0, 500),
        ]);
        let plan = ExportPlan::build(&s, &ExportPreset::STANDARD).unwrap();
        let offsets: Vec<i64> = plan.clips.iter().map(|c| c.video_offset_us).collect();
        assert_eq!(offsets, vec![0, 2_000_000, 3_000_000]);
        assert_eq!(plan.total_duration_us, 3_500_000);
        for c in &plan.clips {
            assert_eq!(c.video_offset_us, c.audio_offset_us);
        }
    }

    #[test]
    fn test_total_frames_rounds_up_per_clip() {
        let s = session(vec![
            VideoClip::new("a.mp4", 0, 1001),
            VideoClip::new("b.mp4", 0, 2000),
        ]);
        let preset = ExportPreset::STANDARD;
        let plan = ExportPlan::build(&s, &preset).unwrap();
        let per_clip: Vec<u64> = plan.clips.iter().map(|c| c.expected_frames).collect();
        let fps = preset.frame_rate.to_fps_f64();
        assert_eq!(per_clip[0], (1.001 * fps).ceil() as u64);
        assert_eq!(per_clip[1], (2.0 * fps).ceil() as u64);
        assert_eq!(plan.total_frames, per_clip.iter().sum::<u64>());
    }

    #[test]
    fn test_attaches_co_located_audio() {
        let video = VideoClip::new("a.mp4", 500, 1500);
        let mut s = session(vec![video.clone()]);
        let mut track = AudioTrack::new("Embedded");
        let mut audio = reelcut_timeline::AudioClip::embedded_in(&video);
        audio.muted = true;
        track.add_clip(audio);
        track.add_clip(reelcut_timeline::AudioClip::new(
            "music.mp3",
            AudioSourceType::Music,
            0,
            1000,
        ));
        s.push_audio_track(track);

        let plan = ExportPlan::build(&s, &ExportPreset::STANDARD).unwrap();
        let planned = &plan.clips[0];
        assert!(planned.audio.as_ref().is_some_and(|a| a.muted));
        assert_eq!(planned.envelope.gain_at(0), 0.0);
        assert_eq!(planned.start_us(), 500_000);
        assert_eq!(planned.end_us(), 1_500_000);
    }

    #[test]
    fn test_invalid_session_rejected() {
        let s = session(vec![VideoClip::new("a.mp4", 1000, 1000)]);
        assert!(ExportPlan::build(&s, &ExportPreset::STANDARD).is_err());
    }

    #[test]
    fn test_empty_session_rejected() {
        assert!(ExportPlan::build(&EditorSession::new(), &ExportPreset::SNS).is_err());
    }

    #[test]
    fn test_output_past_limit_rejected() {
        let slow = session(vec![VideoClip::new("a.mp4", 0, 1000).with_speed(1e-12)]);
        assert!(matches!(
            ExportPlan::build(&slow, &ExportPreset::STANDARD),
            Err(ReelError::Timeline(_))
        ));

        let long = session(vec![
            VideoClip::new("a.mp4", 0, MAX_TIMELINE_MS),
            VideoClip::new("b.mp4", 0, MAX_TIMELINE_MS),
        ]);
        assert!(matches!(
            ExportPlan::build(&long, &ExportPreset::STANDARD),
            Err(ReelError::Timeline(_))
        ));
    }
}
