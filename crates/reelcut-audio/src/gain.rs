//! Gain application on interleaved 16-bit PCM.

use reelcut_core::PcmBuffer;

use crate::automation::GainEnvelope;

/// Scale one sample, hard-clamping to the `i16` range.
#[inline]
pub fn scale_sample(sample: i16, gain: f32) -> i16 {
    let scaled = (sample as f32 * gain).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Apply `envelope` to every frame of `buffer`.
///
/// `clip_start_us` is the source time of the clip's trim start; frame times
/// are taken from the buffer's `pts_us` and sample rate so the gain is
/// resolved per frame, not per buffer. All channels of a frame share the
/// frame's gain.
pub fn apply_gain(buffer: &mut PcmBuffer, envelope: &GainEnvelope, clip_start_us: i64) {
    let channels = buffer.channels.max(1) as usize;

    if envelope.is_constant() {
        let gain = envelope.gain_at(buffer.pts_us - clip_start_us);
        if gain == 1.0 {
            return;
        }
        for s in buffer.samples.iter_mut() {
            *s = scale_sample(*s, gain);
        }
        return;
    }

    let pts_us = buffer.pts_us;
    let rate = buffer.sample_rate;
    for (i, frame) in buffer.samples.chunks_mut(channels).enumerate() {
        let t = pts_us + reelcut_core::pcm::frames_to_us(i as u64, rate) - clip_start_us;
        let gain = envelope.gain_at(t);
        for s in frame.iter_mut() {
            *s = scale_sample(*s, gain);
        }
    }
}
