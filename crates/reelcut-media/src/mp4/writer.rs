//! Progressive MP4 writer.
//!
//! Layout: `ftyp`, one `mdat` holding every sample in write order, then
//! `moov` written on stop. Each sample is its own chunk, so the sample tables
//! stay trivial and samples from different tracks may interleave freely.

use reelcut_core::{ReelError, Result};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::bitstream::{adts, annexb};
use crate::buffer::BufferInfo;
use crate::codec::Muxer;
use crate::format::{CodecConfig, MediaFormat, Mime, TrackKind};
use crate::mp4::boxes::BoxWriter;

/// Movie timescale (mvhd, tkhd, elst).
const MOVIE_TIMESCALE: u32 = 1000;
/// Media timescale of video tracks.
const VIDEO_TIMESCALE: u32 = 90_000;
/// `und` packed as ISO-639-2/T.
const LANGUAGE_UND: u16 = 0x55c4;

#[derive(Debug, Clone, Copy)]
struct SampleEntry {
    offset: u64,
    size: u32,
    pts_us: i64,
    sync: bool,
}

#[derive(Debug)]
struct Track {
    format: MediaFormat,
    timescale: u32,
    samples: Vec<SampleEntry>,
}

impl Track {
    fn kind(&self) -> TrackKind {
        self.format.kind()
    }

    fn to_media_time(&self, us: i64) -> u64 {
        ((us.max(0) as i128 * self.timescale as i128 + 500_000) / 1_000_000) as u64
    }

    /// Duration of the final sample, in media timescale.
    fn last_sample_delta(&self, deltas: &[u32]) -> u32 {
        if let Some(&d) = deltas.last() {
            return d;
        }
        match self.kind() {
            TrackKind::Audio => adts::SAMPLES_PER_FRAME,
            TrackKind::Video => self
                .format
                .frame_rate
                .map(|r| self.to_media_time(r.frame_interval_us()) as u32)
                .unwrap_or(self.timescale / 30)
                .max(1),
        }
    }

    /// Per-sample durations (stts input).
    fn sample_deltas(&self) -> Vec<u32> {
        let times: Vec<u64> = self
            .samples
            .iter()
            .map(|s| self.to_media_time(s.pts_us))
            .collect();
        let mut deltas: Vec<u32> = times
            .windows(2)
            .map(|w| w[1].saturating_sub(w[0]).max(1) as u32)
            .collect();
        if !self.samples.is_empty() {
            let last = self.last_sample_delta(&deltas);
            deltas.push(last);
        }
        deltas
    }
}

/// MP4 muxer over any seekable writer.
pub struct Mp4Muxer<W: Write + Seek + Send> {
    out: Option<W>,
    tracks: Vec<Track>,
    started: bool,
    stopped: bool,
    /// Offset of the mdat box header
    mdat_start: u64,
    position: u64,
}

impl Mp4Muxer<BufWriter<File>> {
    /// Create (truncate) the output file.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            ReelError::Muxer(format!("cannot open output {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "mp4 output opened");
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Seek + Send> Mp4Muxer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Some(out),
            tracks: Vec::new(),
            started: false,
            stopped: false,
            mdat_start: 0,
            position: 0,
        }
    }

    /// Give back the writer after `release`/`stop`; `None` if already taken.
    pub fn into_inner(mut self) -> Option<W> {
        self.out.take()
    }

    fn writer(&mut self) -> Result<&mut W> {
        self.out
            .as_mut()
            .ok_or_else(|| ReelError::InvalidState("muxer already released".into()))
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer()?.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn write_ftyp(&mut self) -> Result<()> {
        let mut w = BoxWriter::new();
        w.begin(b"ftyp");
        w.bytes(b"isom");
        w.u32(0x200);
        for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
            w.bytes(brand);
        }
        w.end();
        self.write_all(&w.into_bytes())
    }

    fn build_moov(&self) -> Result<Vec<u8>> {
        let movie_duration = self
            .tracks
            .iter()
            .map(|t| self.track_movie_duration(t))
            .max()
            .unwrap_or(0);

        let mut w = BoxWriter::new();
        w.begin(b"moov");

        w.begin_full(b"mvhd", 0, 0);
        w.u32(0); // creation_time
        w.u32(0); // modification_time
        w.u32(MOVIE_TIMESCALE);
        w.u32(movie_duration as u32);
        w.u32(0x0001_0000); // rate 1.0
        w.u16(0x0100); // volume 1.0
        w.zeros(10);
        w.unity_matrix();
        w.zeros(24); // pre_defined
        w.u32(self.tracks.len() as u32 + 1); // next_track_ID
        w.end();

        for (index, track) in self.tracks.iter().enumerate() {
            self.write_trak(&mut w, index as u32 + 1, track)?;
        }

        w.end();
        Ok(w.into_bytes())
    }

    /// Track duration in movie timescale including any initial empty edit.
    fn track_movie_duration(&self, track: &Track) -> u64 {
        let media: u64 = track.sample_deltas().iter().map(|&d| d as u64).sum();
        let first_pts = track.samples.first().map_or(0, |s| s.pts_us.max(0));
        let media_us = media as i128 * 1_000_000 / track.timescale as i128;
        ((first_pts as i128 + media_us) * MOVIE_TIMESCALE as i128 / 1_000_000) as u64
    }

    fn write_trak(&self, w: &mut BoxWriter, track_id: u32, track: &Track) -> Result<()> {
        let deltas = track.sample_deltas();
        let media_duration: u64 = deltas.iter().map(|&d| d as u64).sum();
        let movie_duration = self.track_movie_duration(track);
        let first_pts = track.samples.first().map_or(0, |s| s.pts_us.max(0));
        let is_video = track.kind() == TrackKind::Video;

        w.begin(b"trak");

        w.begin_full(b"tkhd", 0, 0x3); // enabled | in_movie
        w.u32(0);
        w.u32(0);
        w.u32(track_id);
        w.u32(0);
        w.u32(movie_duration as u32);
        w.zeros(8);
        w.i16(0); // layer
        w.i16(if is_video { 0 } else { 1 }); // alternate_group
        w.u16(if is_video { 0 } else { 0x0100 });
        w.u16(0);
        w.unity_matrix();
        w.u32(track.format.width << 16);
        w.u32(track.format.height << 16);
        w.end();

        if first_pts > 0 {
            let empty = first_pts as i128 * MOVIE_TIMESCALE as i128 / 1_000_000;
            let media_in_movie =
                media_duration as i128 * MOVIE_TIMESCALE as i128 / track.timescale as i128;
            w.begin(b"edts");
            w.begin_full(b"elst", 0, 0);
            w.u32(2);
            w.u32(empty as u32);
            w.i32(-1); // empty edit
            w.u32(0x0001_0000);
            w.u32(media_in_movie as u32);
            w.i32(0);
            w.u32(0x0001_0000);
            w.end();
            w.end();
        }

        w.begin(b"mdia");

        w.begin_full(b"mdhd", 0, 0);
        w.u32(0);
        w.u32(0);
        w.u32(track.timescale);
        w.u32(media_duration as u32);
        w.u16(LANGUAGE_UND);
        w.u16(0);
        w.end();

        w.begin_full(b"hdlr", 0, 0);
        w.u32(0);
        w.bytes(if is_video { b"vide" } else { b"soun" });
        w.zeros(12);
        w.bytes(if is_video {
            b"VideoHandler\0"
        } else {
            b"SoundHandler\0"
        });
        w.end();

        w.begin(b"minf");
        if is_video {
            w.begin_full(b"vmhd", 0, 1);
            w.zeros(8);
            w.end();
        } else {
            w.begin_full(b"smhd", 0, 0);
            w.zeros(4);
            w.end();
        }

        w.begin(b"dinf");
        w.begin_full(b"dref", 0, 0);
        w.u32(1);
        w.begin_full(b"url ", 0, 1); // self-contained
        w.end();
        w.end();
        w.end();

        w.begin(b"stbl");
        self.write_stsd(w, track)?;
        write_stts(w, &deltas);
        if is_video {
            w.begin_full(b"stss", 0, 0);
            let syncs: Vec<u32> = track
                .samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.sync)
                .map(|(i, _)| i as u32 + 1)
                .collect();
            w.u32(syncs.len() as u32);
            for s in syncs {
                w.u32(s);
            }
            w.end();
        }

        w.begin_full(b"stsc", 0, 0);
        if track.samples.is_empty() {
            w.u32(0);
        } else {
            w.u32(1);
            w.u32(1); // first_chunk
            w.u32(1); // samples_per_chunk
            w.u32(1); // sample_description_index
        }
        w.end();

        w.begin_full(b"stsz", 0, 0);
        w.u32(0); // sizes vary
        w.u32(track.samples.len() as u32);
        for s in &track.samples {
            w.u32(s.size);
        }
        w.end();

        let needs_co64 = track.samples.iter().any(|s| s.offset > u32::MAX as u64);
        if needs_co64 {
            w.begin_full(b"co64", 0, 0);
            w.u32(track.samples.len() as u32);
            for s in &track.samples {
                w.u64(s.offset);
            }
        } else {
            w.begin_full(b"stco", 0, 0);
            w.u32(track.samples.len() as u32);
            for s in &track.samples {
                w.u32(s.offset as u32);
            }
        }
        w.end();

        w.end(); // stbl
        w.end(); // minf
        w.end(); // mdia
        w.end(); // trak
        Ok(())
    }

    fn write_stsd(&self, w: &mut BoxWriter, track: &Track) -> Result<()> {
        w.begin_full(b"stsd", 0, 0);
        w.u32(1);
        match (&track.format.mime, &track.format.codec_config) {
            (Mime::H264, Some(CodecConfig::Avc { sps, pps })) => {
                w.begin(b"avc1");
                w.zeros(6);
                w.u16(1); // data_reference_index
                w.zeros(16);
                w.u16(track.format.width as u16);
                w.u16(track.format.height as u16);
                w.u32(0x0048_0000); // 72 dpi
                w.u32(0x0048_0000);
                w.u32(0);
                w.u16(1); // frame_count
                w.zeros(32); // compressorname
                w.u16(0x0018);
                w.i16(-1);

                w.begin(b"avcC");
                w.u8(1);
                w.u8(sps.get(1).copied().unwrap_or(0x42));
                w.u8(sps.get(2).copied().unwrap_or(0));
                w.u8(sps.get(3).copied().unwrap_or(0x1f));
                w.u8(0xff); // 4-byte NAL lengths
                w.u8(0xe1); // one SPS
                w.u16(sps.len() as u16);
                w.bytes(sps);
                w.u8(1);
                w.u16(pps.len() as u16);
                w.bytes(pps);
                w.end();

                w.end();
            }
            (Mime::Aac, Some(CodecConfig::Aac { audio_specific_config })) => {
                w.begin(b"mp4a");
                w.zeros(6);
                w.u16(1);
                w.zeros(8);
                w.u16(track.format.channels);
                w.u16(16);
                w.u16(0);
                w.u16(0);
                w.u32(track.format.sample_rate << 16);
                write_esds(w, audio_specific_config, track.format.bit_rate.unwrap_or(0));
                w.end();
            }
            (mime, _) => {
                return Err(ReelError::Muxer(format!(
                    "cannot describe {} track without codec config",
                    mime
                )));
            }
        }
        w.end();
        Ok(())
    }
}

fn write_stts(w: &mut BoxWriter, deltas: &[u32]) {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &d in deltas {
        match runs.last_mut() {
            Some((count, delta)) if *delta == d => *count += 1,
            _ => runs.push((1, d)),
        }
    }
    w.begin_full(b"stts", 0, 0);
    w.u32(runs.len() as u32);
    for (count, delta) in runs {
        w.u32(count);
        w.u32(delta);
    }
    w.end();
}

fn write_descriptor(w: &mut BoxWriter, tag: u8, body: &[u8]) {
    w.u8(tag);
    w.u8(body.len() as u8);
    w.bytes(body);
}

fn write_esds(w: &mut BoxWriter, asc: &[u8], bit_rate: u32) {
    let mut dsi = Vec::new();
    dsi.push(0x05);
    dsi.push(asc.len() as u8);
    dsi.extend_from_slice(asc);

    let mut dcd = vec![0x40, 0x15, 0, 0, 0]; // AAC, audio stream, bufferSizeDB
    dcd.extend_from_slice(&bit_rate.to_be_bytes());
    dcd.extend_from_slice(&bit_rate.to_be_bytes());
    dcd.extend_from_slice(&dsi);

    let mut es = vec![0, 0, 0]; // ES_ID, flags
    es.push(0x04);
    es.push(dcd.len() as u8);
    es.extend_from_slice(&dcd);
    es.extend_from_slice(&[0x06, 0x01, 0x02]); // SLConfig

    w.begin_full(b"esds", 0, 0);
    write_descriptor(w, 0x03, &es);
    w.end();
}

impl<W: Write + Seek + Send> Muxer for Mp4Muxer<W> {
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize> {
        if self.started {
            return Err(ReelError::InvalidState(
                "cannot add a track after the muxer started".into(),
            ));
        }
        let timescale = match format.mime {
            Mime::H264 => VIDEO_TIMESCALE,
            Mime::Aac if format.sample_rate > 0 => format.sample_rate,
            other => {
                return Err(ReelError::UnsupportedFormat(format!(
                    "MP4 track of type {}",
                    other
                )))
            }
        };
        if format.codec_config.is_none() {
            return Err(ReelError::Muxer(format!(
                "{} track format carries no codec config",
                format.mime
            )));
        }
        self.tracks.push(Track {
            format: format.clone(),
            timescale,
            samples: Vec::new(),
        });
        debug!(index = self.tracks.len() - 1, mime = %format.mime, "mp4 track added");
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ReelError::InvalidState("muxer already started".into()));
        }
        if self.tracks.is_empty() {
            return Err(ReelError::InvalidState("muxer has no tracks".into()));
        }
        self.write_ftyp()?;
        self.mdat_start = self.position;
        let mut header = Vec::with_capacity(16);
        header.extend_from_slice(&1u32.to_be_bytes());
        header.extend_from_slice(b"mdat");
        header.extend_from_slice(&0u64.to_be_bytes());
        self.write_all(&header)?;
        self.started = true;
        Ok(())
    }

    fn write_sample_data(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<()> {
        if !self.started || self.stopped {
            return Err(ReelError::InvalidState(
                "write_sample_data outside started state".into(),
            ));
        }
        if info.flags.codec_config {
            return Ok(());
        }
        let mime = self
            .tracks
            .get(track)
            .map(|t| t.format.mime)
            .ok_or_else(|| ReelError::InvalidParameter(format!("no track {}", track)))?;
        if let Some(last) = self.tracks[track].samples.last() {
            if info.presentation_time_us <= last.pts_us {
                return Err(ReelError::InvalidParameter(format!(
                    "track {} timestamp {} us does not follow {} us",
                    track, info.presentation_time_us, last.pts_us
                )));
            }
        }

        let payload = &data[..info.size.min(data.len())];
        let converted;
        let sample: &[u8] = match mime {
            Mime::H264 => {
                converted = annexb::to_avcc(payload);
                &converted
            }
            Mime::Aac => match adts::AdtsHeader::parse(payload) {
                Ok(h) if h.frame_length == payload.len() => &payload[h.header_length..],
                _ => payload,
            },
            _ => payload,
        };

        let offset = self.position;
        self.write_all(sample)?;
        self.tracks[track].samples.push(SampleEntry {
            offset,
            size: sample.len() as u32,
            pts_us: info.presentation_time_us,
            sync: info.flags.key_frame || mime == Mime::Aac,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Err(ReelError::InvalidState("muxer was never started".into()));
        }
        if self.stopped {
            return Err(ReelError::InvalidState("muxer already stopped".into()));
        }
        let mdat_size = self.position - self.mdat_start;
        let mdat_start = self.mdat_start;
        let moov = self.build_moov()?;
        let end = self.position;
        {
            let out = self.writer()?;
            out.seek(SeekFrom::Start(mdat_start + 8))?;
            out.write_all(&mdat_size.to_be_bytes())?;
            out.seek(SeekFrom::Start(end))?;
        }
        self.write_all(&moov)?;
        self.writer()?.flush()?;
        self.stopped = true;
        info!(
            tracks = self.tracks.len(),
            samples = self.tracks.iter().map(|t| t.samples.len()).sum::<usize>(),
            bytes = self.position,
            "mp4 finalized"
        );
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut out) = self.out.take() {
            if let Err(e) = out.flush() {
                tracing::warn!("flushing mp4 output on release failed: {}", e);
            }
        }
    }
}
