//! Time representation for the export pipeline.
//!
//! Timeline values (clip trim windows, positions, keyframes) are integer
//! milliseconds. Codec and muxer timestamps are integer microseconds, and the
//! encoder input surface is stamped in nanoseconds. Frame rates stay rational
//! so frame-count estimates do not drift for NTSC rates.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Microseconds per millisecond.
pub const US_PER_MS: i64 = 1_000;
/// Microseconds per second.
pub const US_PER_SEC: i64 = 1_000_000;

/// Largest timeline value, in milliseconds. Anything up to this converts to
/// microseconds and nanoseconds without leaving `i64`.
pub const MAX_TIMELINE_MS: i64 = i64::MAX / 1_000_000;

/// Convert timeline milliseconds to microseconds, saturating.
#[inline]
pub fn ms_to_us(ms: i64) -> i64 {
    ms.saturating_mul(US_PER_MS)
}

/// Convert microseconds to (fractional) milliseconds.
#[inline]
pub fn us_to_ms_f64(us: i64) -> f64 {
    us as f64 / US_PER_MS as f64
}

/// Convert microseconds to nanoseconds, saturating.
#[inline]
pub fn us_to_ns(us: i64) -> i64 {
    us.saturating_mul(1_000)
}

/// Convert nanoseconds to microseconds (truncating).
#[inline]
pub fn ns_to_us(ns: i64) -> i64 {
    ns / 1_000
}

/// Scale a source-time delta by a playback speed factor.
///
/// A clip played at speed 2.0 covers one second of source in half a second
/// of output. The result is rounded to the nearest microsecond.
#[inline]
pub fn scale_by_speed(delta_us: i64, speed: f64) -> i64 {
    (delta_us as f64 / speed).round() as i64
}

/// Frame rate as a rational number (e.g., 30000/1001 for 29.97 fps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    /// Numerator (e.g., 30000)
    pub numerator: u32,
    /// Denominator (e.g., 1001)
    pub denominator: u32,
}

impl FrameRate {
    /// Create a new frame rate.
    #[inline]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Parse an ffprobe-style rate such as `"30000/1001"` or `"25"`.
    pub fn parse(value: &str) -> Option<Self> {
        let (num, den) = match value.split_once('/') {
            Some((n, d)) => (n.trim().parse().ok()?, d.trim().parse().ok()?),
            None => (value.trim().parse().ok()?, 1),
        };
        if num == 0 || den == 0 {
            return None;
        }
        Some(Self::new(num, den))
    }

    /// Convert to frames per second as f64.
    #[inline]
    pub fn to_fps_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// `num/den` form accepted by ffmpeg's `-r`.
    pub fn as_ratio(self) -> String {
        format!("{}/{}", self.numerator, self.denominator)
    }

    /// Duration of a single frame in microseconds (rounded).
    #[inline]
    pub fn frame_interval_us(self) -> i64 {
        (US_PER_SEC as f64 * self.denominator as f64 / self.numerator as f64).round() as i64
    }

    /// Number of frames needed to cover `duration_us`, rounded up.
    pub fn frames_in(self, duration_us: i64) -> u64 {
        if duration_us <= 0 {
            return 0;
        }
        let frames = Rational64::new(duration_us, US_PER_SEC)
            * Rational64::new(self.numerator as i64, self.denominator as i64);
        frames.ceil().to_integer() as u64
    }

    /// Timestamp of frame `index` in microseconds.
    pub fn frame_time_us(self, index: u64) -> i64 {
        let t = Rational64::new(index as i64 * US_PER_SEC, 1)
            * Rational64::new(self.denominator as i64, self.numerator as i64);
        t.round().to_integer()
    }

    /// Common frame rates
    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_25: Self = Self::new(25, 1);
    pub const FPS_29_97: Self = Self::new(30000, 1001);
    pub const FPS_30: Self = Self::new(30, 1);
    pub const FPS_60: Self = Self::new(60, 1);
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_30
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fps = self.to_fps_f64();
        if (fps - fps.round()).abs() < 0.001 {
            write!(f, "{} fps", fps.round() as u32)
        } else {
            write!(f, "{:.3} fps", fps)
        }
    }
}
