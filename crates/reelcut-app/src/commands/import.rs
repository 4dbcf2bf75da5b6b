//! Build a session from media files.

use std::path::PathBuf;

use anyhow::Context;
use reelcut_media::MediaProbe;
use reelcut_timeline::{AudioClip, AudioTrack, EditorSession, SessionFile, VideoClip};
use tracing::info;

pub fn run(files: Vec<PathBuf>, output: PathBuf) -> anyhow::Result<()> {
    let mut session = EditorSession::new();
    let mut embedded = AudioTrack::new("Embedded audio");

    for path in &files {
        let probe =
            MediaProbe::probe(path).with_context(|| format!("probing {}", path.display()))?;
        if !probe.has_video() {
            anyhow::bail!("{} has no video stream", path.display());
        }
        let source = path.to_string_lossy().into_owned();
        let clip = VideoClip::from_source(source, probe.duration_ms())
            .with_context(|| format!("{} has no usable duration", path.display()))?;
        session.append_sequential(clip);

        if let Some(clip) = session.video_clips.last() {
            if probe.has_audio() {
                embedded.add_clip(AudioClip::embedded_in(clip));
            }
            info!(source = %clip.source, position = clip.position, "clip added");
            println!(
                "  + {} ({} ms at {} ms)",
                clip.source,
                clip.source_duration_ms(),
                clip.position
            );
        }
    }
    if !embedded.clips.is_empty() {
        session.push_audio_track(embedded);
    }

    let duration = session.duration_ms();
    SessionFile::new(session)
        .save_to_file(&output)
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "Wrote {} ({} clips, {} ms)",
        output.display(),
        files.len(),
        duration
    );
    Ok(())
}
