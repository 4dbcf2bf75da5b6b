//! Session files.
//!
//! A session is stored as a JSON envelope carrying the schema version and
//! the writer's version. Files written before the envelope existed hold a
//! bare session object and are upgraded on read. Loading always validates
//! the session, so a file that parses but could never export is rejected up
//! front with a timeline error naming the offending clip.

use reelcut_core::{ReelError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

use crate::session::EditorSession;

/// Schema version written by this build.
pub const CURRENT_VERSION: u32 = 1;

/// `app_version` recorded for files read from the bare, pre-envelope layout.
const LEGACY_APP_VERSION: &str = "0.0.0";

/// A session together with the envelope it is stored in.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionFile {
    pub version: u32,
    pub session: EditorSession,
    /// Version of the program that wrote the file
    #[serde(default)]
    pub app_version: String,
}

fn parse_error(what: &str, e: serde_json::Error) -> ReelError {
    ReelError::Serialization(format!(
        "{} (line {}, column {}): {}",
        what,
        e.line(),
        e.column(),
        e
    ))
}

impl SessionFile {
    pub fn new(session: EditorSession) -> Self {
        Self {
            version: CURRENT_VERSION,
            session,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| parse_error("cannot encode session", e))
    }

    /// Read an envelope or a bare legacy session, then validate it.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let raw: Value =
            serde_json::from_slice(data).map_err(|e| parse_error("session file is not JSON", e))?;
        let Value::Object(fields) = &raw else {
            return Err(ReelError::Serialization(
                "session file must hold a JSON object".into(),
            ));
        };

        let file = if fields.contains_key("session") {
            let version = fields
                .get("version")
                .and_then(Value::as_u64)
                .ok_or_else(|| ReelError::Serialization("session file has no version".into()))?;
            if version > u64::from(CURRENT_VERSION) {
                return Err(ReelError::Serialization(format!(
                    "session file version {} is newer than supported version {}",
                    version, CURRENT_VERSION
                )));
            }
            serde_json::from_value::<SessionFile>(raw)
                .map_err(|e| parse_error("malformed session", e))?
        } else {
            let session = serde_json::from_value::<EditorSession>(raw)
                .map_err(|e| parse_error("malformed legacy session", e))?;
            debug!("read a legacy session without envelope");
            Self {
                version: CURRENT_VERSION,
                session,
                app_version: LEGACY_APP_VERSION.to_string(),
            }
        };

        file.session.validate()?;
        Ok(file)
    }

    /// Write the file through a sibling temporary, so an interrupted save
    /// leaves the previous session intact.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let data = self.to_json()?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::write(&tmp, data)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(
            path = %path.display(),
            clips = self.session.video_clips.len(),
            audio_tracks = self.session.audio_tracks.len(),
            "session saved"
        );
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                ReelError::NotFound(format!("session file {}", path.display()))
            }
            _ => e.into(),
        })?;
        let file = Self::from_json(&data)?;
        debug!(
            path = %path.display(),
            version = file.version,
            written_by = %file.app_version,
            clips = file.session.video_clips.len(),
            "session loaded"
        );
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{AudioClip, AudioSourceType, VideoClip, VolumeKeyframe};
    use crate::track::AudioTrack;

    fn sample_session() -> EditorSession {
        let mut session = EditorSession::new();
        let video = VideoClip::new("clip.mp4", 0, 2000).with_speed(1.5);
        let mut audio = AudioClip::embedded_in(&video);
        audio.volume_keyframes = vec![VolumeKeyframe::new(0, 0.0), VolumeKeyframe::new(1000, 1.0)];
        audio.fade_out_ms = 250;
        let mut track = AudioTrack::new("A1");
        track.add_clip(audio);
        session.push_video(video);
        session.push_audio_track(track);
        session
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("reelcut-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_session_roundtrip() {
        let session = sample_session();
        let json = SessionFile::new(session.clone()).to_json().unwrap();
        let loaded = SessionFile::from_json(&json).unwrap();

        assert_eq!(loaded.version, CURRENT_VERSION);
        assert_eq!(loaded.session, session);
    }

    #[test]
    fn test_bare_session_reads_as_legacy() {
        let raw_json = serde_json::to_vec(&sample_session()).unwrap();
        let loaded = SessionFile::from_json(&raw_json).unwrap();
        assert_eq!(loaded.version, CURRENT_VERSION);
        assert_eq!(loaded.app_version, LEGACY_APP_VERSION);
        assert_eq!(loaded.session.video_clips.len(), 1);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let json = serde_json::json!({
            "video_clips": [{
                "id": "67e55044-10b1-426f-9247-bb680e5fe0c7",
                "source": "v.mp4",
                "start_time": 0,
                "end_time": 1000,
                "position": 0,
                "speed": 1.0
            }],
            "audio_tracks": [{
                "id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
                "name": "A1",
                "clips": [{
                    "id": "67e55044-10b1-426f-9247-bb680e5fe0c9",
                    "source": "m.mp3",
                    "source_type": "Music",
                    "start_time": 0,
                    "end_time": 1000,
                    "position": 0,
                    "volume": 0.5,
                    "muted": false
                }]
            }]
        });
        let loaded = SessionFile::from_json(&serde_json::to_vec(&json).unwrap()).unwrap();
        let clip = &loaded.session.audio_tracks[0].clips[0];
        assert_eq!(clip.source_type, AudioSourceType::Music);
        assert!(clip.volume_keyframes.is_empty());
        assert_eq!(clip.fade_in_ms, 0);
    }

    #[test]
    fn test_invalid_session_rejected_at_load() {
        let mut session = sample_session();
        session.video_clips[0].end_time = session.video_clips[0].start_time;
        let json = SessionFile::new(session).to_json().unwrap();
        assert!(matches!(
            SessionFile::from_json(&json),
            Err(ReelError::Timeline(_))
        ));

        let mut session = sample_session();
        session.video_clips[0].end_time = i64::MAX;
        let json = SessionFile::new(session).to_json().unwrap();
        assert!(matches!(
            SessionFile::from_json(&json),
            Err(ReelError::Timeline(_))
        ));

        let empty = SessionFile::new(EditorSession::new()).to_json().unwrap();
        assert!(matches!(
            SessionFile::from_json(&empty),
            Err(ReelError::Timeline(_))
        ));
    }

    #[test]
    fn test_future_version_rejected() {
        let json = serde_json::json!({
            "version": 999,
            "session": {},
            "app_version": "99.0.0",
        });
        let data = serde_json::to_vec(&json).unwrap();
        assert!(matches!(
            SessionFile::from_json(&data),
            Err(ReelError::Serialization(_))
        ));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(SessionFile::from_json(b"[1, 2, 3]").is_err());
        assert!(SessionFile::from_json(b"{ not json").is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let path = temp_path("session");
        SessionFile::new(sample_session()).save_to_file(&path).unwrap();
        let loaded = SessionFile::load_from_file(&path).unwrap();
        assert_eq!(loaded.session.audio_tracks[0].clips[0].fade_out_ms, 250);

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        assert!(!std::path::Path::new(&tmp).exists());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let path = temp_path("absent");
        assert!(matches!(
            SessionFile::load_from_file(&path),
            Err(ReelError::NotFound(_))
        ));
    }
}
