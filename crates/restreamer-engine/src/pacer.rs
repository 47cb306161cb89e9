//! Real-time packet pacing.
//!
//! Reads packets from a media source, normalizes their timestamps
//! against the first-seen timestamp of each stream, and hands them to
//! the sink at wall-clock rate. Handles resume skipping, forced
//! keyframes, early-end detection and periodic checkpointing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use restreamer_media::{MediaError, MediaPacket, MediaSource};
use restreamer_transport::{RtmpSink, TransportError};

use crate::bitrate::BitrateMeter;
use crate::checkpoint::{CheckpointStore, SharedCheckpoint};
use crate::config::StreamSettings;
use crate::error::EngineError;
use crate::EngineResult;
use crate::{
    EARLY_END_MIN_ELAPSED, FILE_METER_WINDOW, MAX_PACING_DELAY, PRELOAD_NEXT_FILE_TIME,
    SAVE_STATE_INTERVAL, STATUS_INTERVAL,
};

/// Source of timed packets.
pub trait PacketSource {
    /// Next packet in file order, or `None` at end of stream.
    fn read_packet(&mut self) -> Result<Option<MediaPacket>, MediaError>;
}

impl PacketSource for MediaSource {
    fn read_packet(&mut self) -> Result<Option<MediaPacket>, MediaError> {
        MediaSource::read_packet(self)
    }
}

/// Destination for paced packets.
pub trait PacketSink {
    /// Send one packet immediately.
    fn write_packet(&mut self, packet: &MediaPacket) -> Result<(), TransportError>;
}

impl PacketSink for RtmpSink {
    fn write_packet(&mut self, packet: &MediaPacket) -> Result<(), TransportError> {
        RtmpSink::write_packet(self, packet)
    }
}

/// How a file's send loop ended.
#[derive(Debug, Clone, Default)]
pub struct StreamOutcome {
    /// The demuxer reached end of stream.
    pub end_of_file: bool,

    /// The file was ended early to overlap the next file's startup.
    pub prepare_next: bool,

    /// Packets sent to the sink.
    pub total_packets: u64,

    /// Highest relative position observed (approximate file duration).
    pub video_duration: Duration,

    /// Wall-clock spent in the loop.
    pub elapsed: Duration,

    /// File bitrate at exit.
    pub bitrate: u64,
}

/// The per-file send loop.
pub struct Pacer<'a> {
    video_stream: Option<usize>,
    audio_stream: Option<usize>,
    session_meter: &'a mut BitrateMeter,
    file_meter: BitrateMeter,
    target_bitrate: u64,
    settings: StreamSettings,
    min_play_time: Duration,
    start_position: Duration,
    checkpoint: SharedCheckpoint,
    store: CheckpointStore,
    preload_threshold: Duration,
    early_end_min_elapsed: Duration,
    max_pacing_delay: Duration,
    status_interval: Duration,
    save_interval: Duration,
}

impl<'a> Pacer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        video_stream: Option<usize>,
        audio_stream: Option<usize>,
        session_meter: &'a mut BitrateMeter,
        target_bitrate: u64,
        settings: StreamSettings,
        min_play_time: Duration,
        start_position: Duration,
        checkpoint: SharedCheckpoint,
        store: CheckpointStore,
    ) -> Self {
        Self {
            video_stream,
            audio_stream,
            session_meter,
            file_meter: BitrateMeter::new(FILE_METER_WINDOW),
            target_bitrate,
            settings,
            min_play_time,
            start_position,
            checkpoint,
            store,
            preload_threshold: PRELOAD_NEXT_FILE_TIME,
            early_end_min_elapsed: EARLY_END_MIN_ELAPSED,
            max_pacing_delay: MAX_PACING_DELAY,
            status_interval: STATUS_INTERVAL,
            save_interval: SAVE_STATE_INTERVAL,
        }
    }

    /// Drive the send loop until end of stream, early end, or error.
    pub fn run(
        &mut self,
        source: &mut dyn PacketSource,
        sink: &mut dyn PacketSink,
    ) -> EngineResult<StreamOutcome> {
        let mut outcome = StreamOutcome::default();

        let start = Instant::now();
        let mut total_packets: u64 = 0;
        let mut total_bytes: u64 = 0;

        let mut first_video_ts: Option<Duration> = None;
        let mut first_audio_ts: Option<Duration> = None;
        let mut last_video_ts = Duration::ZERO;
        let mut last_audio_ts = Duration::ZERO;

        // Highest relative position seen so far, the running estimate of
        // the file's duration.
        let mut video_duration = Duration::ZERO;
        let mut end_detected = false;

        let mut resume_pending = self.start_position > Duration::ZERO;
        let mut skip_until: Option<Duration> = None;

        // Wall-clock anchor: the packet at `base_pos` was due at
        // `base_instant`; later packets are due at the anchor plus their
        // distance from it.
        let mut base_instant = Instant::now();
        let mut base_pos = Duration::ZERO;

        let mut last_keyframe = Instant::now();
        let mut last_status = Instant::now();
        let mut last_save = Instant::now();

        let min_time_reached = Arc::new(AtomicBool::new(false));
        {
            let flag = Arc::clone(&min_time_reached);
            let min_play_time = self.min_play_time;
            thread::spawn(move || {
                thread::sleep(min_play_time);
                flag.store(true, Ordering::Release);
                debug!("minimum play time of {:?} reached", min_play_time);
            });
        }

        loop {
            let mut packet = match source.read_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    info!("end of file reached");
                    outcome.end_of_file = true;
                    break;
                }
                Err(e) => return Err(EngineError::Media(e)),
            };

            let packet_bytes = packet.data.len() as u64;
            total_bytes += packet_bytes;
            self.file_meter.add(packet_bytes);
            self.session_meter.add(packet_bytes);

            let is_video = Some(packet.stream_index) == self.video_stream;
            let is_audio = Some(packet.stream_index) == self.audio_stream;

            if is_video && first_video_ts.is_none() {
                first_video_ts = Some(packet.time);
                last_video_ts = packet.time;
                debug!("first video timestamp: {:?}", packet.time);
                if resume_pending {
                    let until = packet.time + self.start_position;
                    info!("skipping packets up to {:?}", until);
                    skip_until = Some(until);
                    resume_pending = false;
                }
            } else if is_audio && first_audio_ts.is_none() {
                first_audio_ts = Some(packet.time);
                last_audio_ts = packet.time;
                debug!("first audio timestamp: {:?}", packet.time);
            }

            // Relative position within this packet's own stream.
            let mut stream_pos = Duration::ZERO;
            if is_video {
                if let Some(first) = first_video_ts {
                    stream_pos = packet.time.saturating_sub(first);
                }
                last_video_ts = packet.time;

                if self.settings.force_keyframe
                    && last_keyframe.elapsed() >= Duration::from_secs(self.settings.keyframe_seconds)
                {
                    packet.is_keyframe = true;
                    last_keyframe = Instant::now();
                }

                self.checkpoint.lock().position = stream_pos;

                // Only video positions grow the duration estimate; audio
                // runs on its own timebase.
                if stream_pos > video_duration {
                    video_duration = stream_pos;
                }
            } else if is_audio {
                if let Some(first) = first_audio_ts {
                    stream_pos = packet.time.saturating_sub(first);
                }
                last_audio_ts = packet.time;
            } else if let Some(first) = first_video_ts {
                // Other streams ride the video timebase.
                stream_pos = packet.time.saturating_sub(first);
            }

            // Discard everything before the resume point. Nothing is sent
            // while skipping, the bootstrap below included.
            if let Some(until) = skip_until {
                if packet.time < until {
                    continue;
                }
                skip_until = None;
                info!("resume position {:?} reached, starting transmission", stream_pos);
                base_instant = Instant::now();
                base_pos = stream_pos;
            }

            // Until the first timestamp of every present stream is known,
            // forward packets unpaced.
            let video_ready = self.video_stream.is_none() || first_video_ts.is_some();
            let audio_ready = self.audio_stream.is_none() || first_audio_ts.is_some();
            if !(video_ready && audio_ready) {
                sink.write_packet(&packet)?;
                total_packets += 1;
                continue;
            }

            let due = base_instant + stream_pos.saturating_sub(base_pos);
            let now = Instant::now();
            if due > now {
                let delay = due - now;
                if delay <= self.max_pacing_delay {
                    thread::sleep(delay);
                } else {
                    // A stream timestamp jumped ahead; rebase the clock
                    // instead of sleeping it off.
                    warn!("pacing delay of {:?} detected, rebasing clock", delay);
                    base_instant = Instant::now();
                    base_pos = stream_pos;
                }
            }

            sink.write_packet(&packet)?;
            total_packets += 1;

            if last_save.elapsed() >= self.save_interval {
                last_save = Instant::now();
                let snapshot = self.checkpoint.lock().clone();
                if let Err(e) = self.store.save(&snapshot) {
                    warn!("could not save checkpoint: {e}");
                }
            }

            // Early end: on a video keyframe, past the minimum play time,
            // estimate the remaining time from the elapsed/position ratio
            // rather than trusting container duration metadata.
            if is_video
                && !end_detected
                && min_time_reached.load(Ordering::Acquire)
                && !self.settings.disable_early_end
                && packet.is_keyframe
                && video_duration > self.preload_threshold
            {
                let elapsed = start.elapsed();
                if elapsed >= self.early_end_min_elapsed && stream_pos > Duration::ZERO {
                    let ratio = elapsed.as_secs_f64() / stream_pos.as_secs_f64();
                    let remaining_secs =
                        video_duration.saturating_sub(stream_pos).as_secs_f64() * ratio;
                    if remaining_secs < self.preload_threshold.as_secs_f64() {
                        info!(
                            "end of file approaching: elapsed {:?}, position {:?}, about {:.1}s left",
                            elapsed, stream_pos, remaining_secs
                        );
                        outcome.prepare_next = true;
                        end_detected = true;
                    }
                }
            }

            if outcome.prepare_next && start.elapsed() >= self.min_play_time {
                info!(
                    "ending file early after {:?} to prepare the next one",
                    start.elapsed()
                );
                break;
            }

            if last_status.elapsed() >= self.status_interval {
                last_status = Instant::now();
                let bitrate = self.file_meter.bitrate();
                let video_pos = first_video_ts
                    .map(|first| last_video_ts.saturating_sub(first))
                    .unwrap_or_default();
                let audio_pos = first_audio_ts
                    .map(|first| last_audio_ts.saturating_sub(first))
                    .unwrap_or_default();
                info!(
                    "sent {} packets | {} kbps | elapsed {:?} | video {:?} | audio {:?}",
                    total_packets,
                    bitrate / 1000,
                    start.elapsed(),
                    video_pos,
                    audio_pos
                );
                if bitrate < self.target_bitrate {
                    warn!(
                        "current bitrate ({} kbps) is below the recommended minimum ({} kbps)",
                        bitrate / 1000,
                        self.target_bitrate / 1000
                    );
                }
            }
        }

        outcome.total_packets = total_packets;
        outcome.elapsed = start.elapsed();
        outcome.video_duration = video_duration;
        outcome.bitrate = self.file_meter.bitrate();

        // Checkpoint at the file boundary, whether natural or early end.
        let snapshot = self.checkpoint.lock().clone();
        if let Err(e) = self.store.save(&snapshot) {
            warn!("could not save checkpoint: {e}");
        }

        let avg_bitrate = if outcome.elapsed.as_secs_f64() > 0.0 {
            (total_bytes as f64 * 8.0 / outcome.elapsed.as_secs_f64()) as u64
        } else {
            0
        };
        info!(
            "transmission finished: {} packets | duration {:?} | average {} kbps",
            total_packets,
            outcome.elapsed,
            avg_bitrate / 1000
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::StreamCheckpoint;

    use std::collections::VecDeque;

    use bytes::Bytes;
    use parking_lot::Mutex;

    struct VecSource {
        packets: VecDeque<MediaPacket>,
        fail_after: Option<usize>,
        read: usize,
    }

    impl VecSource {
        fn new(packets: Vec<MediaPacket>) -> Self {
            Self {
                packets: packets.into(),
                fail_after: None,
                read: 0,
            }
        }
    }

    impl PacketSource for VecSource {
        fn read_packet(&mut self) -> Result<Option<MediaPacket>, MediaError> {
            if let Some(limit) = self.fail_after {
                if self.read >= limit {
                    return Err(MediaError::Demux("bad sample table".to_string()));
                }
            }
            self.read += 1;
            Ok(self.packets.pop_front())
        }
    }

    #[derive(Default)]
    struct VecSink {
        sent: Vec<MediaPacket>,
        fail_after: Option<usize>,
    }

    impl PacketSink for VecSink {
        fn write_packet(&mut self, packet: &MediaPacket) -> Result<(), TransportError> {
            if let Some(limit) = self.fail_after {
                if self.sent.len() >= limit {
                    return Err(TransportError::WriteFailed("connection reset".to_string()));
                }
            }
            self.sent.push(packet.clone());
            Ok(())
        }
    }

    fn packet(stream_index: usize, ms: u64, keyframe: bool) -> MediaPacket {
        MediaPacket {
            stream_index,
            time: Duration::from_millis(ms),
            is_keyframe: keyframe,
            data: Bytes::from_static(b"payload"),
        }
    }

    /// Video packets every 10 ms with a keyframe on each multiple of
    /// `keyframe_ms`.
    fn video_stream_ms(up_to_ms: u64, keyframe_ms: u64) -> Vec<MediaPacket> {
        (0..=up_to_ms)
            .step_by(10)
            .map(|ms| packet(0, ms, keyframe_ms > 0 && ms % keyframe_ms == 0))
            .collect()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: CheckpointStore,
        checkpoint: SharedCheckpoint,
        meter: BitrateMeter,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = CheckpointStore::new(dir.path().join("stream_state.json"));
            Self {
                _dir: dir,
                store,
                checkpoint: Arc::new(Mutex::new(StreamCheckpoint::default())),
                meter: BitrateMeter::new(10),
            }
        }

        /// A pacer with thresholds shrunk to test scale.
        fn pacer(
            &mut self,
            settings: StreamSettings,
            min_play_time: Duration,
            start_position: Duration,
        ) -> Pacer<'_> {
            Pacer {
                video_stream: Some(0),
                audio_stream: None,
                session_meter: &mut self.meter,
                file_meter: BitrateMeter::new(FILE_METER_WINDOW),
                target_bitrate: 0,
                settings,
                min_play_time,
                start_position,
                checkpoint: Arc::clone(&self.checkpoint),
                store: self.store.clone(),
                preload_threshold: Duration::from_millis(40),
                early_end_min_elapsed: Duration::from_millis(80),
                max_pacing_delay: MAX_PACING_DELAY,
                status_interval: Duration::from_secs(5),
                save_interval: Duration::from_secs(30),
            }
        }
    }

    fn no_early_end() -> StreamSettings {
        StreamSettings {
            disable_early_end: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_all_packets_sent_in_order() {
        let mut fixture = Fixture::new();
        let packets = video_stream_ms(190, 50);
        let expected: Vec<Duration> = packets.iter().map(|p| p.time).collect();

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        let outcome = fixture
            .pacer(no_early_end(), Duration::ZERO, Duration::ZERO)
            .run(&mut source, &mut sink)
            .unwrap();

        assert!(outcome.end_of_file);
        assert!(!outcome.prepare_next);
        assert_eq!(outcome.total_packets, expected.len() as u64);
        let sent: Vec<Duration> = sink.sent.iter().map(|p| p.time).collect();
        assert_eq!(sent, expected);
    }

    #[test]
    fn test_pacing_tracks_wall_clock() {
        let mut fixture = Fixture::new();
        let packets = vec![
            packet(0, 0, true),
            packet(0, 50, false),
            packet(0, 100, false),
            packet(0, 150, false),
        ];

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        let started = Instant::now();
        let outcome = fixture
            .pacer(no_early_end(), Duration::ZERO, Duration::ZERO)
            .run(&mut source, &mut sink)
            .unwrap();

        // The file spans 150 ms of stream time; sending must take at
        // least roughly that long.
        assert!(started.elapsed() >= Duration::from_millis(120));
        assert_eq!(outcome.total_packets, 4);
        assert_eq!(outcome.video_duration, Duration::from_millis(150));
    }

    #[test]
    fn test_large_timestamp_gap_rebases_instead_of_sleeping() {
        let mut fixture = Fixture::new();
        let packets = vec![
            packet(0, 0, true),
            packet(0, 10, false),
            packet(0, 5000, false),
            packet(0, 5010, false),
        ];

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        let started = Instant::now();
        let outcome = fixture
            .pacer(no_early_end(), Duration::ZERO, Duration::ZERO)
            .run(&mut source, &mut sink)
            .unwrap();

        assert_eq!(outcome.total_packets, 4);
        // Five seconds of stream time crossed in well under one second.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_skip_to_position_discards_early_packets() {
        let mut fixture = Fixture::new();
        let packets = video_stream_ms(200, 50);

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        let outcome = fixture
            .pacer(no_early_end(), Duration::ZERO, Duration::from_millis(100))
            .run(&mut source, &mut sink)
            .unwrap();

        assert!(outcome.end_of_file);
        assert_eq!(sink.sent.len(), 11); // 100..=200 ms
        assert!(sink.sent[0].time >= Duration::from_millis(100));
        let times: Vec<Duration> = sink.sent.iter().map(|p| p.time).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn test_skip_past_end_sends_nothing() {
        let mut fixture = Fixture::new();
        let packets = video_stream_ms(200, 50);

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        let outcome = fixture
            .pacer(no_early_end(), Duration::ZERO, Duration::from_secs(10))
            .run(&mut source, &mut sink)
            .unwrap();

        assert!(outcome.end_of_file);
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn test_audio_only_file_plays() {
        let mut fixture = Fixture::new();
        let packets: Vec<MediaPacket> = (0..=100).step_by(20).map(|ms| packet(0, ms, false)).collect();

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        let mut pacer = fixture.pacer(no_early_end(), Duration::ZERO, Duration::ZERO);
        pacer.video_stream = None;
        pacer.audio_stream = Some(0);
        let outcome = pacer.run(&mut source, &mut sink).unwrap();

        assert!(outcome.end_of_file);
        assert_eq!(sink.sent.len(), 6);
    }

    #[test]
    fn test_interleaved_streams_keep_read_order() {
        let mut fixture = Fixture::new();
        let packets = vec![
            packet(0, 0, true),
            packet(1, 5, false),
            packet(0, 40, false),
            packet(1, 45, false),
            packet(0, 80, false),
            packet(1, 85, false),
        ];
        let expected: Vec<(usize, Duration)> =
            packets.iter().map(|p| (p.stream_index, p.time)).collect();

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        let mut pacer = fixture.pacer(no_early_end(), Duration::ZERO, Duration::ZERO);
        pacer.audio_stream = Some(1);
        let outcome = pacer.run(&mut source, &mut sink).unwrap();

        assert!(outcome.end_of_file);
        let sent: Vec<(usize, Duration)> =
            sink.sent.iter().map(|p| (p.stream_index, p.time)).collect();
        assert_eq!(sent, expected);
    }

    #[test]
    fn test_audio_ahead_does_not_grow_video_duration() {
        let mut fixture = Fixture::new();
        // The audio track runs well past the last video packet.
        let packets = vec![
            packet(0, 0, true),
            packet(1, 0, false),
            packet(0, 40, false),
            packet(1, 100, false),
            packet(1, 200, false),
        ];

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        let mut pacer = fixture.pacer(no_early_end(), Duration::ZERO, Duration::ZERO);
        pacer.audio_stream = Some(1);
        let outcome = pacer.run(&mut source, &mut sink).unwrap();

        assert!(outcome.end_of_file);
        assert_eq!(outcome.video_duration, Duration::from_millis(40));
    }

    #[test]
    fn test_single_packet_file() {
        let mut fixture = Fixture::new();
        let mut source = VecSource::new(vec![packet(0, 0, true)]);
        let mut sink = VecSink::default();
        let outcome = fixture
            .pacer(no_early_end(), Duration::ZERO, Duration::ZERO)
            .run(&mut source, &mut sink)
            .unwrap();

        assert!(outcome.end_of_file);
        assert_eq!(outcome.total_packets, 1);
    }

    #[test]
    fn test_forced_keyframes_marked() {
        let mut fixture = Fixture::new();
        let packets = video_stream_ms(100, 0); // no natural keyframes
        let settings = StreamSettings {
            force_keyframe: true,
            keyframe_seconds: 0, // every check is due
            disable_early_end: true,
            ..Default::default()
        };

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        fixture
            .pacer(settings, Duration::ZERO, Duration::ZERO)
            .run(&mut source, &mut sink)
            .unwrap();

        assert!(sink.sent.iter().all(|p| p.is_keyframe));
    }

    #[test]
    fn test_keyframes_untouched_below_cadence() {
        let mut fixture = Fixture::new();
        let packets = video_stream_ms(100, 0);
        let settings = StreamSettings {
            force_keyframe: true,
            keyframe_seconds: 60, // cadence far beyond the file
            disable_early_end: true,
            ..Default::default()
        };

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        fixture
            .pacer(settings, Duration::ZERO, Duration::ZERO)
            .run(&mut source, &mut sink)
            .unwrap();

        assert!(sink.sent.iter().all(|p| !p.is_keyframe));
    }

    #[test]
    fn test_early_end_triggers_on_keyframe() {
        let mut fixture = Fixture::new();
        let packets = video_stream_ms(400, 50);

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        let outcome = fixture
            .pacer(StreamSettings::default(), Duration::from_millis(50), Duration::ZERO)
            .run(&mut source, &mut sink)
            .unwrap();

        assert!(outcome.prepare_next);
        assert!(!outcome.end_of_file);
        // The loop stopped well before the end of the file, on a keyframe.
        assert!(sink.sent.len() < 41);
        assert!(sink.sent.last().unwrap().is_keyframe);
    }

    #[test]
    fn test_disable_early_end_plays_to_eof() {
        let mut fixture = Fixture::new();
        let packets = video_stream_ms(400, 50);
        let count = packets.len();

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        let outcome = fixture
            .pacer(no_early_end(), Duration::from_millis(50), Duration::ZERO)
            .run(&mut source, &mut sink)
            .unwrap();

        assert!(outcome.end_of_file);
        assert!(!outcome.prepare_next);
        assert_eq!(sink.sent.len(), count);
    }

    #[test]
    fn test_min_play_time_delays_early_end() {
        let mut fixture = Fixture::new();
        let packets = video_stream_ms(400, 50);
        let min_play_time = Duration::from_millis(150);

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        let started = Instant::now();
        let mut pacer = fixture.pacer(StreamSettings::default(), min_play_time, Duration::ZERO);
        pacer.early_end_min_elapsed = Duration::from_millis(20);
        pacer.preload_threshold = Duration::from_millis(10);
        let outcome = pacer.run(&mut source, &mut sink).unwrap();

        assert!(outcome.prepare_next);
        assert!(started.elapsed() >= min_play_time);
    }

    #[test]
    fn test_write_error_propagates() {
        let mut fixture = Fixture::new();
        let packets = video_stream_ms(100, 50);

        let mut source = VecSource::new(packets);
        let mut sink = VecSink {
            fail_after: Some(5),
            ..Default::default()
        };
        let result = fixture
            .pacer(no_early_end(), Duration::ZERO, Duration::ZERO)
            .run(&mut source, &mut sink);

        assert!(matches!(
            result,
            Err(EngineError::Transport(TransportError::WriteFailed(_)))
        ));
    }

    #[test]
    fn test_demux_error_propagates() {
        let mut fixture = Fixture::new();
        let mut source = VecSource::new(video_stream_ms(100, 50));
        source.fail_after = Some(3);
        let mut sink = VecSink::default();
        let result = fixture
            .pacer(no_early_end(), Duration::ZERO, Duration::ZERO)
            .run(&mut source, &mut sink);

        assert!(matches!(
            result,
            Err(EngineError::Media(MediaError::Demux(_)))
        ));
    }

    #[test]
    fn test_checkpoint_position_follows_video() {
        let mut fixture = Fixture::new();
        let packets = video_stream_ms(100, 50);

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        fixture
            .pacer(no_early_end(), Duration::ZERO, Duration::ZERO)
            .run(&mut source, &mut sink)
            .unwrap();

        assert_eq!(
            fixture.checkpoint.lock().position,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_meters_accumulate_bytes() {
        let mut fixture = Fixture::new();
        let packets = video_stream_ms(50, 50);
        let expected: u64 = packets.iter().map(|p| p.data.len() as u64).sum();

        let mut source = VecSource::new(packets);
        let mut sink = VecSink::default();
        fixture
            .pacer(no_early_end(), Duration::ZERO, Duration::ZERO)
            .run(&mut source, &mut sink)
            .unwrap();

        assert_eq!(fixture.meter.total_bytes(), expected);
    }
}
