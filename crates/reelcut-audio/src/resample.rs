//! Streaming linear resampler.
//!
//! Converts decoded PCM from a source rate and channel count to the export
//! rate and channel count. A clip played at `speed` is handled by reading the
//! source `speed` times faster, so audio keeps pace with the video (pitch
//! shifts accordingly). State carries across `process` calls so buffer
//! boundaries do not click.

use reelcut_core::{ReelError, Result};
use tracing::debug;

/// Linear-interpolating resampler with channel remapping.
#[derive(Debug, Clone)]
pub struct Resampler {
    in_rate: u32,
    in_channels: u16,
    out_rate: u32,
    out_channels: u16,
    /// Input frames consumed per output frame.
    step: f64,
    /// Input frames already dropped from the front of `pending`.
    dropped: u64,
    /// Remapped input frames not yet fully consumed, interleaved at
    /// `out_channels`.
    pending: Vec<f32>,
    frames_out: u64,
}

impl Resampler {
    /// Create a resampler reading `in_rate` audio at `speed` and producing
    /// `out_rate` audio.
    pub fn new(
        in_rate: u32,
        in_channels: u16,
        out_rate: u32,
        out_channels: u16,
        speed: f64,
    ) -> Result<Self> {
        if in_rate == 0 || out_rate == 0 || in_channels == 0 || out_channels == 0 {
            return Err(ReelError::Audio(format!(
                "invalid resampler format {} Hz/{} ch -> {} Hz/{} ch",
                in_rate, in_channels, out_rate, out_channels
            )));
        }
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ReelError::Audio(format!("invalid playback speed {}", speed)));
        }
        debug!(in_rate, out_rate, speed, "resampler configured");
        Ok(Self {
            in_rate,
            in_channels,
            out_rate,
            out_channels,
            step: in_rate as f64 * speed / out_rate as f64,
            dropped: 0,
            pending: Vec::new(),
            frames_out: 0,
        })
    }

    /// Whether input passes through unchanged.
    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0 && self.in_channels == self.out_channels
    }

    /// Output sample rate.
    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }

    /// Output channel count.
    pub fn out_channels(&self) -> u16 {
        self.out_channels
    }

    /// Input sample rate.
    pub fn in_rate(&self) -> u32 {
        self.in_rate
    }

    /// Total output frames produced so far.
    pub fn frames_out(&self) -> u64 {
        self.frames_out
    }

    /// Feed interleaved input samples, returning the interleaved output that
    /// became available.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        self.push_remapped(input);
        self.produce(false)
    }

    /// Emit whatever remains, holding the last input frame for the final
    /// interpolation step.
    pub fn flush(&mut self) -> Vec<i16> {
        let out = self.produce(true);
        self.pending.clear();
        // Realign so a following stream starts under the read head.
        self.dropped = (self.frames_out as f64 * self.step).floor() as u64;
        out
    }

    fn push_remapped(&mut self, input: &[i16]) {
        let in_ch = self.in_channels as usize;
        let out_ch = self.out_channels as usize;
        self.pending.reserve(input.len() / in_ch * out_ch);
        for frame in input.chunks_exact(in_ch) {
            if out_ch == 1 {
                let sum: f32 = frame.iter().map(|&s| s as f32).sum();
                self.pending.push(sum / in_ch as f32);
            } else {
                for c in 0..out_ch {
                    self.pending.push(frame[c % in_ch] as f32);
                }
            }
        }
    }

    fn produce(&mut self, flushing: bool) -> Vec<i16> {
        let ch = self.out_channels as usize;
        let available = self.pending.len() / ch;
        let mut out = Vec::new();
        if available == 0 {
            return out;
        }
        let last = available - 1;

        loop {
            // Derived from the absolute output count so that splitting the
            // input differently never changes the read positions.
            let pos = self.frames_out as f64 * self.step - self.dropped as f64;
            if pos > last as f64 {
                break;
            }
            let i0 = pos.floor() as usize;
            if i0 >= last && !flushing {
                break;
            }
            let i1 = (i0 + 1).min(last);
            let frac = (pos - i0 as f64) as f32;
            for c in 0..ch {
                let a = self.pending[i0 * ch + c];
                let b = self.pending[i1 * ch + c];
                let v = (a + (b - a) * frac).round();
                out.push(v.clamp(i16::MIN as f32, i16::MAX as f32) as i16);
            }
            self.frames_out += 1;
        }

        // Drop fully consumed frames, keeping the one under the read head.
        let pos = self.frames_out as f64 * self.step - self.dropped as f64;
        let consumed = (pos.floor().max(0.0) as usize).min(available);
        if consumed > 0 {
            self.pending.drain(..consumed * ch);
            self.dropped += consumed as u64;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_passthrough_is_exact() {
        let mut r = Resampler::new(48_000, 2, 48_000, 2, 1.0).unwrap();
        assert!(r.is_passthrough());
        let input: Vec<i16> = (0..20).collect();
        let mut out = r.process(&input);
        out.extend(r.flush());
        assert_eq!(out, input);
        assert_eq!(r.frames_out(), 10);
    }

    #[test]
    fn test_double_speed_halves_frames() {
        let mut r = Resampler::new(1000, 1, 1000, 1, 2.0).unwrap();
        let input: Vec<i16> = (0..100).collect();
        let mut out = r.process(&input);
        out.extend(r.flush());
        assert_eq!(out.len(), 50);
        assert_eq!(&out[..4], &[0, 2, 4, 6]);
    }

    #[test]
    fn test_upsample_interpolates() {
        let mut r = Resampler::new(1000, 1, 2000, 1, 1.0).unwrap();
        let out = r.process(&[0, 100, 200]);
        assert_eq!(out, vec![0, 50, 100, 150]);
        assert_eq!(r.flush(), vec![200]);
    }

    #[test]
    fn test_state_carries_across_buffers() {
        let mut whole = Resampler::new(44_100, 1, 48_000, 1, 1.0).unwrap();
        let mut split = Resampler::new(44_100, 1, 48_000, 1, 1.0).unwrap();
        let input: Vec<i16> = (0..441).map(|i| ((i * 37) % 2000) as i16).collect();

        let mut a = whole.process(&input);
        a.extend(whole.flush());
        let mut b = split.process(&input[..200]);
        b.extend(split.process(&input[200..]));
        b.extend(split.flush());
        assert_eq!(a, b);
    }

    #[test]
    fn test_channel_remap() {
        let mut to_mono = Resampler::new(8000, 2, 8000, 1, 1.0).unwrap();
        let mut out = to_mono.process(&[100, 300, -50, 50]);
        out.extend(to_mono.flush());
        assert_eq!(out, vec![200, 0]);

        let mut to_stereo = Resampler::new(8000, 1, 8000, 2, 1.0).unwrap();
        let mut out = to_stereo.process(&[7, 9]);
        out.extend(to_stereo.flush());
        assert_eq!(out, vec![7, 7, 9, 9]);
    }

    #[test]
    fn test_invalid_format_rejected() {
        assert!(Resampler::new(0, 2, 48_000, 2, 1.0).is_err());
        assert!(Resampler::new(48_000, 2, 48_000, 0, 1.0).is_err());
        assert!(Resampler::new(48_000, 2, 48_000, 2, 0.0).is_err());
    }

    proptest! {
        #[test]
        fn prop_output_length_tracks_ratio(
            in_rate in prop::sample::select(vec![8000u32, 22_050, 44_100, 48_000]),
            out_rate in prop::sample::select(vec![8000u32, 44_100, 48_000]),
            speed in prop::sample::select(vec![0.5f64, 1.0, 1.5, 2.0]),
            frames in 1usize..2000,
        ) {
            let mut r = Resampler::new(in_rate, 1, out_rate, 1, speed).unwrap();
            let input = vec![0i16; frames];
            let produced = r.process(&input).len() + r.flush().len();
            let ratio = out_rate as f64 / (in_rate as f64 * speed);
            let expected = frames as f64 * ratio;
            prop_assert!((produced as f64 - expected).abs() <= ratio + 1.0,
                "produced {} expected {}", produced, expected);
        }

        #[test]
        fn prop_output_stays_within_input_range(
            input in prop::collection::vec(any::<i16>(), 2..400),
            speed in 0.25f64..4.0,
        ) {
            let mut r = Resampler::new(44_100, 1, 48_000, 1, speed).unwrap();
            let lo = *input.iter().min().unwrap();
            let hi = *input.iter().max().unwrap();
            let mut out = r.process(&input);
            out.extend(r.flush());
            prop_assert!(out.iter().all(|&s| s >= lo && s <= hi));
        }
    }
}
