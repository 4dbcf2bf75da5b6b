//! Clip types for the edit session.
//!
//! All clip times are integer milliseconds. `start_time`/`end_time` are the
//! trim window into the source, `position` is the clip's offset on the
//! global timeline.

use reelcut_core::time::{ms_to_us, scale_by_speed, MAX_TIMELINE_MS};
use reelcut_core::{ReelError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn check_window(start_time: i64, end_time: i64) -> Result<()> {
    if start_time < 0 {
        return Err(ReelError::Timeline(format!(
            "start time {} ms is negative",
            start_time
        )));
    }
    if end_time <= start_time {
        return Err(ReelError::Timeline(format!(
            "end time {} ms must be after start time {} ms",
            end_time, start_time
        )));
    }
    if end_time > MAX_TIMELINE_MS {
        return Err(ReelError::Timeline(format!(
            "end time {} ms is past the {} ms limit",
            end_time, MAX_TIMELINE_MS
        )));
    }
    Ok(())
}

fn check_speed(speed: f64) -> Result<()> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(ReelError::Timeline(format!(
            "speed must be a positive number, got {}",
            speed
        )));
    }
    Ok(())
}

fn check_position(position: i64) -> Result<()> {
    if !(0..=MAX_TIMELINE_MS).contains(&position) {
        return Err(ReelError::Timeline(format!(
            "position {} ms is outside 0..={} ms",
            position, MAX_TIMELINE_MS
        )));
    }
    Ok(())
}

/// A video clip on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoClip {
    /// Unique clip ID
    pub id: Uuid,
    /// Media locator (file path)
    pub source: String,
    /// Trim in point within the source, ms
    pub start_time: i64,
    /// Trim out point within the source, ms (exclusive)
    pub end_time: i64,
    /// Offset on the global timeline, ms
    pub position: i64,
    /// Playback speed (1.0 = normal)
    pub speed: f64,
}

impl VideoClip {
    /// Create a clip covering `[start_time, end_time)` of `source` at speed 1.0.
    pub fn new(source: impl Into<String>, start_time: i64, end_time: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            start_time,
            end_time,
            position: 0,
            speed: 1.0,
        }
    }

    /// Create a clip spanning the whole probed duration of a source.
    pub fn from_source(source: impl Into<String>, duration_ms: i64) -> Result<Self> {
        let clip = Self::new(source, 0, duration_ms);
        clip.validate()?;
        Ok(clip)
    }

    /// Builder-style timeline position.
    pub fn at(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    /// Builder-style playback speed.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Check the clip invariants.
    pub fn validate(&self) -> Result<()> {
        check_window(self.start_time, self.end_time)?;
        check_speed(self.speed)?;
        check_position(self.position)
    }

    /// Length of the trim window in source time, ms.
    #[inline]
    pub fn source_duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }

    /// Duration this clip occupies in the output, microseconds.
    #[inline]
    pub fn output_duration_us(&self) -> i64 {
        scale_by_speed(ms_to_us(self.source_duration_ms()), self.speed)
    }

    /// Duration this clip occupies in the output, ms (rounded).
    #[inline]
    pub fn output_duration_ms(&self) -> i64 {
        (self.source_duration_ms() as f64 / self.speed).round() as i64
    }

    /// Timeline time at which the clip ends.
    #[inline]
    pub fn end_position(&self) -> i64 {
        self.position.saturating_add(self.output_duration_ms())
    }

    /// Set a new trim window.
    pub fn trim(&mut self, start_time: i64, end_time: i64) -> Result<()> {
        check_window(start_time, end_time)?;
        self.start_time = start_time;
        self.end_time = end_time;
        Ok(())
    }

    /// Move the clip on the timeline.
    pub fn move_to(&mut self, position: i64) -> Result<()> {
        check_position(position)?;
        self.position = position;
        Ok(())
    }

    /// Change the playback speed.
    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        check_speed(speed)?;
        self.speed = speed;
        Ok(())
    }

    /// Split at a source time inside the trim window.
    ///
    /// `self` keeps `[start_time, at)`; the returned clip covers
    /// `[at, end_time)`, gets a fresh id and starts where `self` now ends.
    pub fn split_at(&mut self, at: i64) -> Result<VideoClip> {
        if at <= self.start_time || at >= self.end_time {
            return Err(ReelError::Timeline(format!(
                "split point {} ms is outside ({}, {})",
                at, self.start_time, self.end_time
            )));
        }
        let mut right = self.clone();
        right.id = Uuid::new_v4();
        right.start_time = at;
        self.end_time = at;
        right.position = self.end_position();
        Ok(right)
    }
}

/// Where an audio clip's media came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioSourceType {
    /// Audio embedded in a video source
    VideoEmbedded,
    /// Imported music file
    Music,
    /// Voice-over recording
    Recording,
}

/// A volume automation point. `time` is relative to the clip's trim start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeKeyframe {
    /// Clip-relative time, ms
    pub time: i64,
    /// Gain value (1.0 = unity)
    pub value: f32,
}

impl VolumeKeyframe {
    pub fn new(time: i64, value: f32) -> Self {
        Self { time, value }
    }
}

/// An audio clip on an audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioClip {
    /// Unique clip ID
    pub id: Uuid,
    /// Media locator (file path)
    pub source: String,
    /// Origin of the audio
    pub source_type: AudioSourceType,
    /// Trim in point within the source, ms
    pub start_time: i64,
    /// Trim out point within the source, ms
    pub end_time: i64,
    /// Offset on the global timeline, ms
    pub position: i64,
    /// Static gain (1.0 = unity)
    pub volume: f32,
    /// Muted clips are silent regardless of volume
    pub muted: bool,
    /// Sorted automation points
    #[serde(default)]
    pub volume_keyframes: Vec<VolumeKeyframe>,
    /// Linear fade-in length, ms
    #[serde(default)]
    pub fade_in_ms: i64,
    /// Linear fade-out length, ms
    #[serde(default)]
    pub fade_out_ms: i64,
}

impl AudioClip {
    /// Create a unity-gain clip covering `[start_time, end_time)` of `source`.
    pub fn new(
        source: impl Into<String>,
        source_type: AudioSourceType,
        start_time: i64,
        end_time: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            source_type,
            start_time,
            end_time,
            position: 0,
            volume: 1.0,
            muted: false,
            volume_keyframes: Vec::new(),
            fade_in_ms: 0,
            fade_out_ms: 0,
        }
    }

    /// The embedded-audio companion of a video clip.
    pub fn embedded_in(video: &VideoClip) -> Self {
        let mut clip = Self::new(
            video.source.clone(),
            AudioSourceType::VideoEmbedded,
            video.start_time,
            video.end_time,
        );
        clip.position = video.position;
        clip
    }

    /// Clip length in source time, ms.
    #[inline]
    pub fn duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }

    /// Check the clip invariants.
    pub fn validate(&self) -> Result<()> {
        check_window(self.start_time, self.end_time)?;
        check_position(self.position)?;
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(ReelError::Timeline(format!(
                "volume must be a non-negative number, got {}",
                self.volume
            )));
        }
        if self.fade_in_ms < 0 || self.fade_out_ms < 0 {
            return Err(ReelError::Timeline("fade lengths must not be negative".into()));
        }
        if self.fade_in_ms > MAX_TIMELINE_MS || self.fade_out_ms > MAX_TIMELINE_MS {
            return Err(ReelError::Timeline(format!(
                "fade lengths are limited to {} ms",
                MAX_TIMELINE_MS
            )));
        }
        let duration = self.duration_ms();
        let mut prev = i64::MIN;
        for kf in &self.volume_keyframes {
            if kf.time < 0 || kf.time > duration {
                return Err(ReelError::Timeline(format!(
                    "keyframe at {} ms is outside the clip (0..={} ms)",
                    kf.time, duration
                )));
            }
            if kf.time <= prev {
                return Err(ReelError::Timeline(
                    "keyframes must be sorted by time without duplicates".into(),
                ));
            }
            if !kf.value.is_finite() || kf.value < 0.0 {
                return Err(ReelError::Timeline(format!(
                    "keyframe value must be a non-negative number, got {}",
                    kf.value
                )));
            }
            prev = kf.time;
        }
        Ok(())
    }

    /// Set the static volume.
    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        if !volume.is_finite() || volume < 0.0 {
            return Err(ReelError::Timeline(format!("invalid volume {}", volume)));
        }
        self.volume = volume;
        Ok(())
    }

    /// Insert a keyframe, keeping the list sorted. A keyframe already at the
    /// same time is replaced.
    pub fn add_keyframe(&mut self, keyframe: VolumeKeyframe) -> Result<()> {
        if keyframe.time < 0 || keyframe.time > self.duration_ms() {
            return Err(ReelError::Timeline(format!(
                "keyframe at {} ms is outside the clip",
                keyframe.time
            )));
        }
        match self
            .volume_keyframes
            .binary_search_by_key(&keyframe.time, |k| k.time)
        {
            Ok(i) => self.volume_keyframes[i] = keyframe,
            Err(i) => self.volume_keyframes.insert(i, keyframe),
        }
        Ok(())
    }

    /// Remove the keyframe at `time`, returning it.
    pub fn remove_keyframe(&mut self, time: i64) -> Option<VolumeKeyframe> {
        let i = self
            .volume_keyframes
            .binary_search_by_key(&time, |k| k.time)
            .ok()?;
        Some(self.volume_keyframes.remove(i))
    }

    /// Set the fade lengths, ms.
    pub fn set_fades(&mut self, fade_in_ms: i64, fade_out_ms: i64) -> Result<()> {
        if fade_in_ms < 0 || fade_out_ms < 0 {
            return Err(ReelError::Timeline("fade lengths must not be negative".into()));
        }
        self.fade_in_ms = fade_in_ms;
        self.fade_out_ms = fade_out_ms;
        Ok(())
    }
}
