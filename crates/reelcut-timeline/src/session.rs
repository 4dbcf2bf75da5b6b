//! The edit session handed to the export pipeline.

use reelcut_core::{ReelError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clip::{AudioClip, VideoClip};
use crate::track::AudioTrack;

/// Ordered video clips plus audio tracks.
///
/// Exports borrow a session immutably; edits happen before the snapshot is
/// taken.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditorSession {
    /// Video clips in export order
    pub video_clips: Vec<VideoClip>,
    /// Audio tracks
    #[serde(default)]
    pub audio_tracks: Vec<AudioTrack>,
}

impl EditorSession {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a video clip.
    pub fn push_video(&mut self, clip: VideoClip) {
        self.video_clips.push(clip);
    }

    /// Add an audio track.
    pub fn push_audio_track(&mut self, track: AudioTrack) {
        self.audio_tracks.push(track);
    }

    /// Total timeline duration: the latest end over all clips, ms.
    pub fn duration_ms(&self) -> i64 {
        let video_end = self.video_clips.iter().map(|c| c.end_position()).max();
        let audio_end = self.audio_tracks.iter().map(|t| t.end_position()).max();
        video_end.into_iter().chain(audio_end).max().unwrap_or(0)
    }

    /// Check every clip. An export needs at least one video clip.
    pub fn validate(&self) -> Result<()> {
        if self.video_clips.is_empty() {
            return Err(ReelError::Timeline("session has no video clips".into()));
        }
        for (i, clip) in self.video_clips.iter().enumerate() {
            clip.validate()
                .map_err(|e| ReelError::Timeline(format!("video clip {}: {}", i, e)))?;
        }
        for track in &self.audio_tracks {
            for clip in &track.clips {
                clip.validate().map_err(|e| {
                    ReelError::Timeline(format!("audio clip {} in '{}': {}", clip.id, track.name, e))
                })?;
            }
        }
        Ok(())
    }

    /// The audio clip carrying the embedded audio of `video`: same source and
    /// same trim start. The first match across tracks wins.
    pub fn audio_clip_for(&self, video: &VideoClip) -> Option<&AudioClip> {
        self.audio_tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .find(|a| a.source == video.source && a.start_time == video.start_time)
    }

    /// Find a video clip by UUID.
    pub fn find_video(&self, id: Uuid) -> Option<&VideoClip> {
        self.video_clips.iter().find(|c| c.id == id)
    }

    /// Find a video clip mutably by UUID.
    pub fn find_video_mut(&mut self, id: Uuid) -> Option<&mut VideoClip> {
        self.video_clips.iter_mut().find(|c| c.id == id)
    }

    /// Remove a video clip by UUID.
    pub fn remove_video(&mut self, id: Uuid) -> Option<VideoClip> {
        let index = self.video_clips.iter().position(|c| c.id == id)?;
        Some(self.video_clips.remove(index))
    }

    /// Split the video clip `id` at source time `at`, inserting the right
    /// half directly after it. Returns the new clip's id.
    pub fn split_video(&mut self, id: Uuid, at: i64) -> Result<Uuid> {
        let index = self
            .video_clips
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| ReelError::NotFound(format!("video clip {}", id)))?;
        let right = self.video_clips[index].split_at(at)?;
        let right_id = right.id;
        self.video_clips.insert(index + 1, right);
        Ok(right_id)
    }

    /// Append clips back to back: each clip is positioned where the previous
    /// one ends.
    pub fn append_sequential(&mut self, clip: VideoClip) {
        let position = self.video_clips.last().map_or(0, |c| c.end_position());
        self.video_clips.push(clip.at(position));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::AudioSourceType;

    fn scenario_session() -> EditorSession {
        let mut session = EditorSession::new();
        session.append_sequential(VideoClip::new("a.mp4", 0, 2000));
        session.append_sequential(VideoClip::new("b.mp4", 1000, 3000).with_speed(2.0));
        session
    }

    #[test]
    fn test_duration_is_latest_end() {
        let mut session = scenario_session();
        assert_eq!(session.video_clips[1].position, 2000);
        assert_eq!(session.duration_ms(), 3000);

        let mut track = AudioTrack::new("Music");
        let mut music = AudioClip::new("m.mp3", AudioSourceType::Music, 0, 5000);
        music.position = 500;
        track.add_clip(music);
        session.push_audio_track(track);
        assert_eq!(session.duration_ms(), 5500);
    }

    #[test]
    fn test_empty_session() {
        let session = EditorSession::new();
        assert_eq!(session.duration_ms(), 0);
        assert!(session.validate().is_err());
    }

    #[test]
    fn test_validate_reports_bad_clip() {
        let mut session = scenario_session();
        session.video_clips[1].speed = 0.0;
        let err = session.validate().unwrap_err().to_string();
        assert!(err.contains("video clip 1"), "{}", err);
    }

    #[test]
    fn test_audio_clip_for_matches_source_and_start() {
        let mut session = scenario_session();
        let mut track = AudioTrack::new("A1");
        let mut other = AudioClip::new("b.mp4", AudioSourceType::VideoEmbedded, 0, 3000);
        other.volume = 0.1;
        track.add_clip(other);
        let mut matching = AudioClip::embedded_in(&session.video_clips[1]);
        matching.volume = 0.7;
        track.add_clip(matching);
        session.push_audio_track(track);

        let found = session.audio_clip_for(&session.video_clips[1]).unwrap();
        assert_eq!(found.volume, 0.7);
        assert!(session.audio_clip_for(&session.video_clips[0]).is_none());
    }

    #[test]
    fn test_split_video_inserts_after() {
        let mut session = scenario_session();
        let first = session.video_clips[0].id;
        let new_id = session.split_video(first, 500).unwrap();
        assert_eq!(session.video_clips.len(), 3);
        assert_eq!(session.video_clips[1].id, new_id);
        assert_eq!(session.video_clips[1].position, 500);
        assert!(session.split_video(Uuid::new_v4(), 10).is_err());
    }
}
