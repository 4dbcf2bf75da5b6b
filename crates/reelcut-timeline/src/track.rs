//! Audio tracks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clip::AudioClip;

/// A track holding audio clips.
///
/// Clips may overlap; keeping them apart is left to the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    /// Unique track ID
    pub id: Uuid,
    /// Track name
    pub name: String,
    /// Clips in this track
    pub clips: Vec<AudioClip>,
}

impl AudioTrack {
    /// Create a new empty track.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            clips: Vec::new(),
        }
    }

    /// Add a clip to the end of the track.
    pub fn add_clip(&mut self, clip: AudioClip) {
        self.clips.push(clip);
    }

    /// Remove a clip by UUID. Returns the removed clip.
    pub fn remove_clip(&mut self, id: Uuid) -> Option<AudioClip> {
        let index = self.clips.iter().position(|c| c.id == id)?;
        Some(self.clips.remove(index))
    }

    /// Find a clip by UUID.
    pub fn find_clip(&self, id: Uuid) -> Option<&AudioClip> {
        self.clips.iter().find(|c| c.id == id)
    }

    /// Find a clip mutably by UUID.
    pub fn find_clip_mut(&mut self, id: Uuid) -> Option<&mut AudioClip> {
        self.clips.iter_mut().find(|c| c.id == id)
    }

    /// Timeline time at which the last clip ends.
    pub fn end_position(&self) -> i64 {
        self.clips
            .iter()
            .map(|c| c.position.saturating_add(c.duration_ms()))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::AudioSourceType;

    #[test]
    fn test_add_find_remove() {
        let mut track = AudioTrack::new("A1");
        let clip = AudioClip::new("v.wav", AudioSourceType::Recording, 0, 1000);
        let id = clip.id;
        track.add_clip(clip);

        assert!(track.find_clip(id).is_some());
        track.find_clip_mut(id).unwrap().muted = true;
        let removed = track.remove_clip(id).unwrap();
        assert!(removed.muted);
        assert!(track.clips.is_empty());
    }

    #[test]
    fn test_end_position_allows_overlap() {
        let mut track = AudioTrack::new("A1");
        let mut a = AudioClip::new("a.wav", AudioSourceType::Music, 0, 3000);
        a.position = 1000;
        let mut b = AudioClip::new("b.wav", AudioSourceType::Music, 0, 1000);
        b.position = 2000;
        track.add_clip(a);
        track.add_clip(b);
        assert_eq!(track.end_position(), 4000);
        assert_eq!(AudioTrack::new("empty").end_position(), 0);
    }
}
