//! Gain envelopes resolved from an audio clip's volume settings.

use reelcut_core::time::ms_to_us;
use reelcut_timeline::{AudioClip, VolumeKeyframe};

/// The gain curve of one clip, in clip-relative microseconds.
///
/// `t = 0` is the clip's trim start. Keyframes replace the static volume when
/// present; fades multiply whatever the base gain is.
#[derive(Debug, Clone, PartialEq)]
pub struct GainEnvelope {
    muted: bool,
    volume: f32,
    /// (time_us, value), sorted by time
    keyframes: Vec<(i64, f32)>,
    fade_in_us: i64,
    fade_out_us: i64,
    duration_us: i64,
}

impl GainEnvelope {
    /// Unity gain everywhere.
    pub fn unity() -> Self {
        Self {
            muted: false,
            volume: 1.0,
            keyframes: Vec::new(),
            fade_in_us: 0,
            fade_out_us: 0,
            duration_us: i64::MAX,
        }
    }

    /// Build the envelope of an audio clip.
    pub fn from_clip(clip: &AudioClip) -> Self {
        let mut keyframes: Vec<(i64, f32)> = clip
            .volume_keyframes
            .iter()
            .map(|k: &VolumeKeyframe| (ms_to_us(k.time), k.value))
            .collect();
        keyframes.sort_by_key(|&(t, _)| t);
        Self {
            muted: clip.muted,
            volume: clip.volume,
            keyframes,
            fade_in_us: ms_to_us(clip.fade_in_ms.max(0)),
            fade_out_us: ms_to_us(clip.fade_out_ms.max(0)),
            duration_us: ms_to_us(clip.duration_ms()),
        }
    }

    /// Envelope for an optional clip; no clip means unity.
    pub fn for_clip(clip: Option<&AudioClip>) -> Self {
        clip.map_or_else(Self::unity, Self::from_clip)
    }

    /// Whether the gain is the same at every instant.
    pub fn is_constant(&self) -> bool {
        self.muted || (self.keyframes.is_empty() && self.fade_in_us == 0 && self.fade_out_us == 0)
    }

    /// Gain at clip-relative time `t_us`.
    pub fn gain_at(&self, t_us: i64) -> f32 {
        if self.muted {
            return 0.0;
        }
        let base = self.base_gain(t_us);
        base * self.fade_factor(t_us)
    }

    fn base_gain(&self, t_us: i64) -> f32 {
        let (first, last) = match (self.keyframes.first(), self.keyframes.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return self.volume,
        };
        if t_us <= first.0 {
            return first.1;
        }
        if t_us >= last.0 {
            return last.1;
        }
        let idx = self
            .keyframes
            .partition_point(|&(t, _)| t <= t_us)
            .saturating_sub(1);
        let (t0, v0) = self.keyframes[idx];
        let (t1, v1) = self.keyframes[idx + 1];
        let span = (t1 - t0) as f64;
        if span <= 0.0 {
            return v0;
        }
        let frac = ((t_us - t0) as f64 / span).clamp(0.0, 1.0);
        (v0 as f64 + (v1 as f64 - v0 as f64) * frac) as f32
    }

    fn fade_factor(&self, t_us: i64) -> f32 {
        let mut factor = 1.0f64;
        if self.fade_in_us > 0 && t_us < self.fade_in_us {
            factor *= (t_us.max(0) as f64 / self.fade_in_us as f64).clamp(0.0, 1.0);
        }
        if self.fade_out_us > 0 && self.duration_us != i64::MAX {
            let remaining = self.duration_us - t_us;
            if remaining < self.fade_out_us {
                factor *= (remaining.max(0) as f64 / self.fade_out_us as f64).clamp(0.0, 1.0);
            }
        }
        factor as f32
    }
}

impl Default for GainEnvelope {
    fn default() -> Self {
        Self::unity()
    }
}
