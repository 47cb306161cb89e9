//! Sequential MP4 demuxing on top of the `mp4` crate.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use mp4::{Mp4Reader, Mp4Sample, TrackType};
use tracing::debug;

use crate::error::MediaError;
use crate::packet::{MediaPacket, StreamInfo, StreamKind};
use crate::MediaResult;

/// Read cursor over one track, holding the next undelivered sample.
struct TrackCursor {
    track_id: u32,
    timescale: u32,
    next_sample_id: u32,
    sample_count: u32,
    pending: Option<Mp4Sample>,
}

/// An opened MP4 file, demuxed as one interleaved packet sequence.
///
/// The container is random-access per track; this merges the per-track
/// sample cursors by timestamp so `read_packet` yields packets in
/// presentation order, the way a live demuxer would.
pub struct MediaSource {
    reader: Mp4Reader<BufReader<File>>,
    streams: Vec<StreamInfo>,
    cursors: Vec<TrackCursor>,
}

impl MediaSource {
    /// Open a file and list its streams.
    ///
    /// An unreachable container index surfaces as
    /// [`MediaError::InvalidStructure`]; any other demuxer failure as
    /// [`MediaError::Demux`].
    pub fn open(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let reader =
            Mp4Reader::read_header(BufReader::new(file), size).map_err(normalize_error)?;

        let mut track_ids: Vec<u32> = reader.tracks().keys().copied().collect();
        track_ids.sort_unstable();

        let mut streams = Vec::with_capacity(track_ids.len());
        let mut cursors = Vec::with_capacity(track_ids.len());
        for (index, &track_id) in track_ids.iter().enumerate() {
            let track = &reader.tracks()[&track_id];
            let kind = describe_track(track);
            debug!(track_id, ?kind, "found track");
            cursors.push(TrackCursor {
                track_id,
                timescale: track.timescale().max(1),
                next_sample_id: 1,
                sample_count: track.sample_count(),
                pending: None,
            });
            streams.push(StreamInfo { index, kind });
        }

        let mut source = Self {
            reader,
            streams,
            cursors,
        };
        for index in 0..source.cursors.len() {
            source.advance(index)?;
        }
        Ok(source)
    }

    /// Stream descriptors in read order.
    pub fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    /// Next packet in presentation order, or `None` at end of stream.
    pub fn read_packet(&mut self) -> MediaResult<Option<MediaPacket>> {
        // Pick the cursor whose pending sample has the earliest timestamp.
        let mut best: Option<(usize, u64, u32)> = None;
        for (index, cursor) in self.cursors.iter().enumerate() {
            let Some(sample) = &cursor.pending else {
                continue;
            };
            let candidate = (index, sample.start_time, cursor.timescale);
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    let lhs = candidate.1 as u128 * current.2 as u128;
                    let rhs = current.1 as u128 * candidate.2 as u128;
                    if lhs < rhs {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }

        let Some((index, start_time, timescale)) = best else {
            return Ok(None);
        };
        let Some(sample) = self.cursors[index].pending.take() else {
            return Ok(None);
        };

        let nanos = start_time as u128 * 1_000_000_000 / timescale as u128;
        let packet = MediaPacket {
            stream_index: index,
            time: Duration::from_nanos(nanos as u64),
            is_keyframe: sample.is_sync,
            data: sample.bytes,
        };
        self.advance(index)?;
        Ok(Some(packet))
    }

    /// Refill the cursor's pending sample from the container.
    fn advance(&mut self, index: usize) -> MediaResult<()> {
        self.cursors[index].pending = None;
        loop {
            let (track_id, sample_id, count) = {
                let cursor = &self.cursors[index];
                (cursor.track_id, cursor.next_sample_id, cursor.sample_count)
            };
            if sample_id > count {
                return Ok(());
            }
            self.cursors[index].next_sample_id += 1;
            match self.reader.read_sample(track_id, sample_id) {
                Ok(Some(sample)) if !sample.bytes.is_empty() => {
                    self.cursors[index].pending = Some(sample);
                    return Ok(());
                }
                // Empty or absent samples (edit-list gaps) are skipped.
                Ok(_) => continue,
                Err(e) => return Err(MediaError::Demux(e.to_string())),
            }
        }
    }
}

/// Map an `mp4` crate error onto the media error taxonomy.
///
/// The demuxer reports a missing container index by naming the "moov"
/// box in its message; that is the one failure the repair path can fix.
fn normalize_error(err: mp4::Error) -> MediaError {
    let message = err.to_string();
    if message.contains("moov") {
        MediaError::InvalidStructure(message)
    } else {
        MediaError::Demux(message)
    }
}

fn describe_track(track: &mp4::Mp4Track) -> StreamKind {
    match track.track_type() {
        Ok(TrackType::Video) => StreamKind::Video {
            width: u32::from(track.width()),
            height: u32::from(track.height()),
        },
        Ok(TrackType::Audio) => StreamKind::Audio {
            sample_rate: track
                .sample_freq_index()
                .map(|index| index.freq())
                .unwrap_or(0),
            channels: track
                .channel_config()
                .map(channel_count)
                .unwrap_or(0),
        },
        _ => StreamKind::Other,
    }
}

fn channel_count(config: mp4::ChannelConfig) -> u8 {
    match config {
        mp4::ChannelConfig::Mono => 1,
        mp4::ChannelConfig::Stereo => 2,
        mp4::ChannelConfig::Three => 3,
        mp4::ChannelConfig::Four => 4,
        mp4::ChannelConfig::Five => 5,
        mp4::ChannelConfig::FiveOne => 6,
        mp4::ChannelConfig::SevenOne => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_moov_is_invalid_structure() {
        let err = normalize_error(mp4::Error::BoxNotFound(mp4::BoxType::MoovBox));
        assert!(matches!(err, MediaError::InvalidStructure(_)));
        assert!(err.to_string().contains("moov"));
    }

    #[test]
    fn test_other_errors_are_demux_failures() {
        let err = normalize_error(mp4::Error::InvalidData("truncated box"));
        assert!(matches!(err, MediaError::Demux(_)));
    }

    #[test]
    fn test_channel_counts() {
        assert_eq!(channel_count(mp4::ChannelConfig::Mono), 1);
        assert_eq!(channel_count(mp4::ChannelConfig::Stereo), 2);
        assert_eq!(channel_count(mp4::ChannelConfig::SevenOne), 8);
    }
}
