//! Encoder output draining, shared by both track processors.

use reelcut_core::{ReelError, Result};
use reelcut_media::{CodecOutput, EncodedPacket, Encoder, TrackKind};
use std::time::Duration;
use tracing::{debug, trace};

use crate::deadline::StallWatch;
use crate::gate::MuxerGate;

/// Per-track encoder bookkeeping across the whole run.
#[derive(Debug)]
pub struct EncoderDrain {
    kind: TrackKind,
    registered: bool,
    /// Registered from the export preset before the encoder reported
    preregistered: bool,
    submitted: u64,
    emitted: u64,
    end_of_stream: bool,
}

impl EncoderDrain {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            registered: false,
            preregistered: false,
            submitted: 0,
            emitted: 0,
            end_of_stream: false,
        }
    }

    /// Count one input unit (frame or PCM buffer) handed to the encoder.
    pub fn submitted(&mut self) {
        self.submitted += 1;
    }

    /// Packets written to the gate so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn in_flight(&self) -> u64 {
        self.submitted.saturating_sub(self.emitted)
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// The track was added to the gate up front; the encoder's first
    /// format report is checked against it instead of registering again.
    pub fn mark_preregistered(&mut self) {
        self.registered = true;
        self.preregistered = true;
    }

    pub fn reached_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Handle one dequeued output. Returns `false` when nothing was ready.
    fn handle(
        &mut self,
        output: CodecOutput<EncodedPacket>,
        gate: &MuxerGate,
    ) -> Result<bool> {
        match output {
            CodecOutput::Buffer(packet) => {
                if packet.info.flags.codec_config {
                    trace!(kind = %self.kind, "codec config buffer skipped");
                    return Ok(true);
                }
                if !self.registered {
                    return Err(ReelError::Encoder(format!(
                        "{} encoder produced a sample before its format",
                        self.kind
                    )));
                }
                gate.write(self.kind, &packet.data, &packet.info)?;
                self.emitted += 1;
                trace!(
                    kind = %self.kind,
                    pts = packet.info.presentation_time_us,
                    size = packet.info.size,
                    "sample written"
                );
                Ok(true)
            }
            CodecOutput::FormatChanged(format) if self.preregistered => {
                self.preregistered = false;
                let expected = gate.track_format(self.kind).ok_or_else(|| {
                    ReelError::InvalidState(format!("{} track missing from the gate", self.kind))
                })?;
                if (format.mime, format.sample_rate, format.channels)
                    != (expected.mime, expected.sample_rate, expected.channels)
                {
                    return Err(ReelError::Encoder(format!(
                        "{} encoder reported {} {} Hz/{} ch, track was set up as {} {} Hz/{} ch",
                        self.kind,
                        format.mime,
                        format.sample_rate,
                        format.channels,
                        expected.mime,
                        expected.sample_rate,
                        expected.channels
                    )));
                }
                debug!(kind = %self.kind, "encoder format matches the registered track");
                Ok(true)
            }
            CodecOutput::FormatChanged(format) => {
                gate.register_track(self.kind, &format)?;
                self.registered = true;
                Ok(true)
            }
            CodecOutput::TryAgainLater => Ok(false),
            CodecOutput::EndOfStream => {
                debug!(kind = %self.kind, emitted = self.emitted, "encoder reached end of stream");
                self.end_of_stream = true;
                Ok(true)
            }
        }
    }

    /// Take whatever the encoder has ready without waiting. If more than
    /// `max_in_flight` inputs are still un-emitted, block on the encoder
    /// until that drops or `stall_timeout` passes without output.
    pub fn drain_ready<E: Encoder + ?Sized>(
        &mut self,
        encoder: &mut E,
        gate: &MuxerGate,
        max_in_flight: u64,
        poll: Duration,
        stall_timeout: Duration,
    ) -> Result<()> {
        let mut watch = StallWatch::new("encoder", stall_timeout);
        while !self.end_of_stream {
            let backed_up = self.in_flight() > max_in_flight;
            let timeout = if backed_up { poll } else { Duration::ZERO };
            if self.handle(encoder.dequeue_output(timeout)?, gate)? {
                watch.progress();
                continue;
            }
            if !backed_up {
                break;
            }
            trace!(kind = %self.kind, in_flight = self.in_flight(), "waiting for encoder");
            watch.check()?;
        }
        Ok(())
    }

    /// Drain until the encoder reports end of stream, failing if it stays
    /// silent for `limit`.
    pub fn drain_to_end<E: Encoder + ?Sized>(
        &mut self,
        encoder: &mut E,
        gate: &MuxerGate,
        poll: Duration,
        limit: Duration,
    ) -> Result<()> {
        let mut watch = StallWatch::new("encoder drain", limit);
        while !self.end_of_stream {
            if self.handle(encoder.dequeue_output(poll)?, gate)? {
                watch.progress();
            } else {
                watch.check()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use reelcut_media::{BufferFlags, BufferInfo, MediaFormat, Mime, Muxer};
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct ScriptedEncoder {
        outputs: VecDeque<CodecOutput<EncodedPacket>>,
    }

    impl Encoder for ScriptedEncoder {
        fn dequeue_output(&mut self, _: Duration) -> Result<CodecOutput<EncodedPacket>> {
            Ok(self.outputs.pop_front().unwrap_or(CodecOutput::TryAgainLater))
        }
        fn signal_end_of_input_stream(&mut self) -> Result<()> {
            Ok(())
        }
        fn release(&mut self) {}
    }

    #[derive(Default)]
    struct CountingMuxer {
        writes: Arc<Mutex<Vec<i64>>>,
    }

    impl Muxer for CountingMuxer {
        fn add_track(&mut self, _: &MediaFormat) -> Result<usize> {
            Ok(0)
        }
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn write_sample_data(&mut self, _: usize, _: &[u8], info: &BufferInfo) -> Result<()> {
            self.writes.lock().push(info.presentation_time_us);
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        fn release(&mut self) {}
    }

    fn packet(pts: i64, flags: BufferFlags) -> CodecOutput<EncodedPacket> {
        CodecOutput::Buffer(EncodedPacket::new(vec![0; 4], pts, flags))
    }

    fn setup() -> (MuxerGate, Arc<Mutex<Vec<i64>>>) {
        let muxer = CountingMuxer::default();
        let writes = Arc::clone(&muxer.writes);
        (MuxerGate::new(Box::new(muxer), false), writes)
    }

    #[test]
    fn test_registers_and_skips_config() {
        let (gate, writes) = setup();
        let mut encoder = ScriptedEncoder {
            outputs: VecDeque::from(vec![
                CodecOutput::FormatChanged(MediaFormat::video(Mime::H264, 2, 2)),
                packet(0, BufferFlags::CODEC_CONFIG),
                packet(0, BufferFlags::KEY_FRAME),
                packet(33_333, BufferFlags::default()),
            ]),
        };
        let mut drain = EncoderDrain::new(TrackKind::Video);
        drain.submitted();
        drain.submitted();
        drain
            .drain_ready(&mut encoder, &gate, 8, Duration::ZERO, Duration::from_secs(1))
            .unwrap();
        assert!(drain.is_registered());
        assert_eq!(drain.emitted(), 2);
        assert_eq!(drain.in_flight(), 0);
        assert_eq!(*writes.lock(), vec![0, 33_333]);
    }

    #[test]
    fn test_sample_before_format_is_error() {
        let (gate, _) = setup();
        let mut encoder = ScriptedEncoder {
            outputs: VecDeque::from(vec![packet(0, BufferFlags::default())]),
        };
        let mut drain = EncoderDrain::new(TrackKind::Video);
        assert!(drain
            .drain_ready(&mut encoder, &gate, 8, Duration::ZERO, Duration::from_secs(1))
            .is_err());
    }

    #[test]
    fn test_backpressure_times_out() {
        let (gate, _) = setup();
        let mut encoder = ScriptedEncoder {
            outputs: VecDeque::new(),
        };
        let mut drain = EncoderDrain::new(TrackKind::Video);
        for _ in 0..3 {
            drain.submitted();
        }
        let err = drain
            .drain_ready(
                &mut encoder,
                &gate,
                2,
                Duration::from_millis(1),
                Duration::from_millis(20),
            )
            .unwrap_err();
        assert!(matches!(err, ReelError::Timeout(_)));
    }

    #[test]
    fn test_drain_to_end() {
        let (gate, writes) = setup();
        let mut encoder = ScriptedEncoder {
            outputs: VecDeque::from(vec![
                CodecOutput::FormatChanged(MediaFormat::audio(Mime::Aac, 48_000, 2)),
                CodecOutput::TryAgainLater,
                packet(0, BufferFlags::default()),
                CodecOutput::EndOfStream,
            ]),
        };
        let mut drain = EncoderDrain::new(TrackKind::Audio);
        drain
            .drain_to_end(&mut encoder, &gate, Duration::ZERO, Duration::from_secs(1))
            .unwrap();
        assert!(drain.reached_end_of_stream());
        assert_eq!(writes.lock().len(), 1);
    }

    #[test]
    fn test_drain_to_end_times_out() {
        let (gate, _) = setup();
        let mut encoder = ScriptedEncoder {
            outputs: VecDeque::new(),
        };
        let mut drain = EncoderDrain::new(TrackKind::Audio);
        let err = drain
            .drain_to_end(
                &mut encoder,
                &gate,
                Duration::from_millis(1),
                Duration::from_millis(10),
            )
            .unwrap_err();
        assert!(matches!(err, ReelError::Timeout(_)));
    }

    #[test]
    fn test_preregistered_track_checks_reported_format() {
        let (gate, writes) = setup();
        gate.register_track(TrackKind::Audio, &MediaFormat::audio(Mime::Aac, 48_000, 2))
            .unwrap();
        let mut drain = EncoderDrain::new(TrackKind::Audio);
        drain.mark_preregistered();
        let mut encoder = ScriptedEncoder {
            outputs: VecDeque::from(vec![
                CodecOutput::FormatChanged(MediaFormat::audio(Mime::Aac, 48_000, 2)),
                packet(0, BufferFlags::default()),
                CodecOutput::EndOfStream,
            ]),
        };
        drain
            .drain_to_end(&mut encoder, &gate, Duration::ZERO, Duration::from_secs(1))
            .unwrap();
        assert_eq!(*writes.lock(), vec![0]);

        let (gate, _) = setup();
        gate.register_track(TrackKind::Audio, &MediaFormat::audio(Mime::Aac, 48_000, 2))
            .unwrap();
        let mut drain = EncoderDrain::new(TrackKind::Audio);
        drain.mark_preregistered();
        let mut encoder = ScriptedEncoder {
            outputs: VecDeque::from(vec![CodecOutput::FormatChanged(MediaFormat::audio(
                Mime::Aac,
                44_100,
                2,
            ))]),
        };
        let err = drain
            .drain_ready(&mut encoder, &gate, 8, Duration::ZERO, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ReelError::Encoder(_)));
    }
}
