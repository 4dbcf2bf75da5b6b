//! List export presets.

use reelcut_media::ExportPreset;

pub fn run() -> anyhow::Result<()> {
    println!(
        "{:<14} {:>11} {:>8} {:>10} {:>14}",
        "NAME", "RESOLUTION", "FPS", "VIDEO", "AUDIO"
    );
    for p in ExportPreset::ALL {
        println!(
            "{:<14} {:>11} {:>8.2} {:>7} kb {:>5} Hz/{}ch {} kb",
            p.name,
            format!("{}x{}", p.width, p.height),
            p.frame_rate.to_fps_f64(),
            p.video_bitrate / 1000,
            p.audio_sample_rate,
            p.audio_channels,
            p.audio_bitrate / 1000
        );
    }
    Ok(())
}
