//! Export a session file.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use reelcut_core::ReelcutConfig;
use reelcut_export::{software_devices, wgpu_devices, ExportPipeline};
use reelcut_media::ffmpeg::ffmpeg_available;
use reelcut_media::{ExportPreset, FfmpegProvider};
use reelcut_timeline::SessionFile;

pub fn run(
    session_path: PathBuf,
    output: PathBuf,
    preset: Option<String>,
    software: bool,
    config: &ReelcutConfig,
) -> anyhow::Result<()> {
    let file = SessionFile::load_from_file(&session_path)
        .with_context(|| format!("loading {}", session_path.display()))?;

    let preset_name = preset
        .or_else(|| config.default_preset.clone())
        .unwrap_or_else(|| ExportPreset::default().name.to_string());
    let preset = ExportPreset::by_name(&preset_name).ok_or_else(|| {
        let names: Vec<&str> = ExportPreset::ALL.iter().map(|p| p.name).collect();
        anyhow::anyhow!("Unknown preset: {preset_name}. Use: {}", names.join(", "))
    })?;

    if !ffmpeg_available() {
        anyhow::bail!("ffmpeg was not found; install it or put it on PATH");
    }

    println!("Exporting {}", session_path.display());
    println!("  Output: {}", output.display());
    println!(
        "  Preset: {} ({}x{} @ {})",
        preset.name, preset.width, preset.height, preset.frame_rate
    );
    println!("  Clips: {}", file.session.video_clips.len());

    let devices = if software {
        software_devices()
    } else {
        wgpu_devices()
    };
    let pipeline = ExportPipeline::new(Arc::new(FfmpegProvider::new()), devices)
        .with_config(config.pipeline.clone());
    let handle = pipeline.spawn(file.session, preset, output)?;

    for p in handle.progress().iter() {
        print!(
            "\r  Progress: {:5.1}% ({}/{} frames, {})    ",
            p.percentage, p.frames_processed, p.total_frames, p.stage
        );
        std::io::stdout().flush().ok();
    }
    println!();

    let summary = handle.join().context("export failed")?;
    println!("Export complete: {}", summary.output.display());
    println!(
        "  {} frames, {:.2} s{}",
        summary.video_frames,
        summary.duration_us as f64 / 1_000_000.0,
        if summary.has_audio { ", with audio" } else { ", video only" }
    );
    if summary.frames_skipped > 0 {
        println!("  {} frames skipped (non-increasing timestamps)", summary.frames_skipped);
    }
    Ok(())
}
