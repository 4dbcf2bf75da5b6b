//! Show stream information for a media file.

use std::path::PathBuf;

use anyhow::Context;
use reelcut_media::MediaProbe;

pub fn run(file: PathBuf, json: bool) -> anyhow::Result<()> {
    let probe =
        MediaProbe::probe(&file).with_context(|| format!("probing {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&probe)?);
        return Ok(());
    }

    println!("{}", probe.path);
    println!("  Container: {}", probe.format);
    println!("  Duration: {} ms", probe.duration_ms());
    for v in &probe.video_streams {
        println!(
            "  Video #{}: {} {}x{} @ {} ({})",
            v.index, v.codec, v.width, v.height, v.frame_rate, v.pixel_format
        );
    }
    for a in &probe.audio_streams {
        println!(
            "  Audio #{}: {} {} Hz, {} ch",
            a.index, a.codec, a.sample_rate, a.channels
        );
    }
    if !probe.has_audio() {
        println!("  (no audio; exported clips from this file are silent)");
    }
    Ok(())
}
