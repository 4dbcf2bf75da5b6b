//! Exports written through the real MP4 muxer, checked by walking the box
//! tree of the output file.

use reelcut_core::PipelineConfig;
use reelcut_export::{ExportCancel, ExportPipeline, ExportSummary, ProgressReporter};
use reelcut_media::mp4::boxes::{parse_boxes, BoxRef};
use reelcut_timeline::{EditorSession, VideoClip};
use std::path::PathBuf;
use std::sync::Arc;

use crate::synthetic::{
    temp_output, test_preset, tracked_devices, Faults, SourceSpec, SyntheticProvider,
};

// ── Helpers ────────────────────────────────────────────────────

struct Output {
    path: PathBuf,
    summary: ExportSummary,
    bytes: Vec<u8>,
}

impl Drop for Output {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn export_mp4(clips: Vec<VideoClip>, faults: Faults) -> Output {
    let provider = SyntheticProvider::new()
        .with_source("a.mp4", SourceSpec::av(3000))
        .with_source("silent.mp4", SourceSpec::video_only(3000))
        .with_faults(faults)
        .writing_mp4();
    let pipeline = ExportPipeline::new(Arc::new(provider), tracked_devices(None).0)
        .with_config(PipelineConfig::default());

    let mut session = EditorSession::new();
    for clip in clips {
        session.append_sequential(clip);
    }
    let path = temp_output("export.mp4");
    let mut progress = ProgressReporter::silent(ExportCancel::new());
    let summary = pipeline
        .run(&session, &test_preset(), &path, &mut progress)
        .unwrap();
    let bytes = std::fs::read(&path).unwrap();
    Output {
        path,
        summary,
        bytes,
    }
}

fn handler(trak: &BoxRef<'_>) -> String {
    let hdlr = trak.find(&[b"mdia", b"hdlr"]).unwrap().expect("hdlr");
    String::from_utf8_lossy(&hdlr.body[8..12]).into_owned()
}

fn stbl<'a>(trak: &BoxRef<'a>) -> BoxRef<'a> {
    trak.find(&[b"mdia", b"minf", b"stbl"]).unwrap().expect("stbl")
}

fn sample_count(trak: &BoxRef<'_>) -> u32 {
    let stsz = stbl(trak).child(b"stsz").unwrap().expect("stsz");
    stsz.u32_at(8).unwrap()
}

fn tracks<'a>(moov: &BoxRef<'a>) -> Vec<BoxRef<'a>> {
    moov.children()
        .unwrap()
        .into_iter()
        .filter(|b| &b.kind == b"trak")
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────

#[test]
fn box_tree_has_both_tracks_with_sample_counts() {
    let out = export_mp4(vec![VideoClip::new("a.mp4", 0, 2000)], Faults::default());

    let top = parse_boxes(&out.bytes).unwrap();
    let kinds: Vec<String> = top.iter().map(|b| b.kind_str()).collect();
    assert_eq!(kinds, vec!["ftyp", "mdat", "moov"]);

    let moov = top[2];
    assert!(moov.child(b"mvhd").unwrap().is_some());
    let traks = tracks(&moov);
    assert_eq!(traks.len(), 2);

    let video = traks.iter().find(|t| handler(t) == "vide").expect("video trak");
    let audio = traks.iter().find(|t| handler(t) == "soun").expect("audio trak");
    assert_eq!(sample_count(video) as u64, out.summary.video_samples);
    assert_eq!(sample_count(audio) as u64, out.summary.audio_samples);
    assert_eq!(out.summary.video_samples, 60);

    // One sample per chunk.
    let stco = stbl(video).child(b"stco").unwrap().expect("stco");
    assert_eq!(stco.u32_at(4), Some(60));
    assert!(stbl(video).child(b"stss").unwrap().is_some());
    assert!(stbl(audio).child(b"stss").unwrap().is_none());

    let stsd = stbl(video).child(b"stsd").unwrap().expect("stsd");
    let entry = stsd.children_after(8).unwrap();
    assert_eq!(entry[0].kind_str(), "avc1");
    let stsd = stbl(audio).child(b"stsd").unwrap().expect("stsd");
    assert_eq!(stsd.children_after(8).unwrap()[0].kind_str(), "mp4a");
}

#[test]
fn video_only_export_has_one_track() {
    let faults = Faults {
        fail_audio_encoder: true,
        ..Faults::default()
    };
    let out = export_mp4(vec![VideoClip::new("a.mp4", 0, 1000)], faults);
    let top = parse_boxes(&out.bytes).unwrap();
    let moov = top
        .iter()
        .find(|b| &b.kind == b"moov")
        .copied()
        .expect("moov");
    let traks = tracks(&moov);
    assert_eq!(traks.len(), 1);
    assert_eq!(handler(&traks[0]), "vide");
    assert_eq!(sample_count(&traks[0]), 30);
}

#[test]
fn late_audio_track_gets_edit_list() {
    let out = export_mp4(
        vec![
            VideoClip::new("silent.mp4", 0, 1000),
            VideoClip::new("a.mp4", 0, 1000),
        ],
        Faults::default(),
    );
    let top = parse_boxes(&out.bytes).unwrap();
    let moov = top
        .iter()
        .find(|b| &b.kind == b"moov")
        .copied()
        .expect("moov");
    let traks = tracks(&moov);
    let video = traks.iter().find(|t| handler(t) == "vide").expect("video trak");
    let audio = traks.iter().find(|t| handler(t) == "soun").expect("audio trak");

    assert!(video.child(b"edts").unwrap().is_none());
    let elst = audio.find(&[b"edts", b"elst"]).unwrap().expect("elst");
    assert_eq!(elst.u32_at(4), Some(2));
    // Empty edit of 1 s in the 1 kHz movie timescale.
    assert_eq!(elst.u32_at(8), Some(1000));
}
