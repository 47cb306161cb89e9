//! Continuous session supervision: file cycling, retries, resume.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use restreamer_media::{repair_file, MediaError, MediaSource, StreamInfo};
use restreamer_transport::RtmpSink;

use crate::bitrate::BitrateMeter;
use crate::checkpoint::{CheckpointStore, SharedCheckpoint, StreamCheckpoint};
use crate::config::Config;
use crate::error::EngineError;
use crate::pacer::{Pacer, StreamOutcome};
use crate::playlist::{scan_directory, FileEntry};
use crate::EngineResult;
use crate::{
    EMPTY_DIRECTORY_RETRY, MAX_CONSECUTIVE_ERRORS, MAX_RETRIES, MIN_BITRATE, RECONNECT_TIMEOUT,
    RETRY_DELAY, SAVE_STATE_INTERVAL, SESSION_METER_WINDOW, STATE_FILE_PATH,
};

/// Drives the endless broadcast: scans the directory, plays each file
/// through the send loop, retries failures and persists resume state.
pub struct Supervisor {
    config: Config,
    publish_url: String,
    video_dir: PathBuf,
    min_play_time: Duration,
    target_bitrate: u64,
    session_meter: BitrateMeter,
    store: CheckpointStore,
    checkpoint: SharedCheckpoint,
    resume: Option<StreamCheckpoint>,
    consecutive_errors: u32,
}

impl Supervisor {
    /// Build a supervisor from the loaded configuration, restoring saved
    /// state when enabled.
    pub fn new(config: Config) -> Self {
        let store = CheckpointStore::new(STATE_FILE_PATH);
        let resume = if config.settings.restore_state {
            match store.load() {
                Ok(state) => state,
                Err(e) => {
                    warn!("could not load saved state: {e}; starting from the beginning");
                    None
                }
            }
        } else {
            None
        };
        if let Some(state) = &resume {
            info!(
                "loaded saved state: file {} at {:?}",
                state.current_file, state.position
            );
        }

        Self {
            publish_url: config.publish_url(),
            video_dir: PathBuf::from(&config.video.directory),
            min_play_time: config.min_play_time(),
            target_bitrate: config.target_bitrate(),
            session_meter: BitrateMeter::new(SESSION_METER_WINDOW),
            store,
            checkpoint: Arc::new(Mutex::new(StreamCheckpoint::default())),
            resume,
            consecutive_errors: 0,
            config,
        }
    }

    /// Run the broadcast forever.
    pub fn run(&mut self) -> ! {
        self.log_startup();
        self.spawn_checkpoint_saver();

        let mut files = self.wait_for_files();
        let mut file_index = self.resume_index(&files);
        let mut cycle: u64 = 0;

        loop {
            cycle += 1;
            info!("=== streaming cycle #{cycle} ===");

            files = self.wait_for_files();

            loop {
                if file_index >= files.len() {
                    file_index = 0;
                }
                let entry = files[file_index].clone();
                info!(
                    "[{}/{}] streaming {} (session bitrate {} kbps)",
                    file_index + 1,
                    files.len(),
                    entry.name,
                    self.session_meter.bitrate() / 1000
                );

                {
                    let mut record = self.checkpoint.lock();
                    record.current_file = entry.name.clone();
                    record.file_index = file_index;
                }

                let start_position = self.take_resume_position(&entry);

                let mut last_outcome = StreamOutcome::default();
                let mut failed = false;
                for attempt in 1..=MAX_RETRIES {
                    if attempt > 1 {
                        warn!("retry {attempt} of {MAX_RETRIES}");
                        thread::sleep(RETRY_DELAY);
                    }
                    match self.stream_file(&entry, start_position) {
                        Ok(outcome) => {
                            if outcome.prepare_next {
                                info!(
                                    "{} almost finished after {:?}, preparing the next file",
                                    entry.name, outcome.elapsed
                                );
                            } else {
                                info!("{} finished after {:?}", entry.name, outcome.elapsed);
                            }
                            self.consecutive_errors = 0;
                            last_outcome = outcome;
                            failed = false;
                            break;
                        }
                        Err(e) => {
                            error!("attempt {attempt}: streaming failed: {e}");
                            self.consecutive_errors += 1;
                            failed = true;
                        }
                    }
                }

                if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!(
                        "{} consecutive errors, pausing for {:?} before reconnecting",
                        self.consecutive_errors, RECONNECT_TIMEOUT
                    );
                    thread::sleep(RECONNECT_TIMEOUT);
                    self.consecutive_errors = 0;
                }

                if failed {
                    error!(
                        "all attempts for {} failed, moving to the next file",
                        entry.name
                    );
                } else {
                    info!(
                        "file bitrate {} kbps, session total {:.2} MB",
                        last_outcome.bitrate / 1000,
                        self.session_meter.total_bytes() as f64 / (1024.0 * 1024.0)
                    );
                }

                let snapshot = self.checkpoint.lock().clone();
                if let Err(e) = self.store.save(&snapshot) {
                    warn!("could not save checkpoint: {e}");
                }

                if last_outcome.prepare_next {
                    info!("rescanning directory for new files");
                    let rescanned = scan_directory(&self.video_dir);
                    if rescanned.len() > files.len() {
                        info!("new files found: {} -> {}", files.len(), rescanned.len());
                        files = rescanned;
                    }
                }

                file_index += 1;
                // A new file starts from zero.
                self.checkpoint.lock().position = Duration::ZERO;

                if file_index >= files.len() {
                    file_index = 0;
                    info!("all files played, starting over");
                    thread::sleep(Duration::from_secs(1));
                    break;
                }
            }
        }
    }

    /// One streaming attempt: open the file (with repair fallback), dial
    /// the sink, publish the header, then hand over to the send loop.
    fn stream_file(
        &mut self,
        entry: &FileEntry,
        start_position: Duration,
    ) -> EngineResult<StreamOutcome> {
        let mut repair_attempts = 0;
        let mut source = loop {
            match MediaSource::open(&entry.path) {
                Ok(source) => break source,
                Err(MediaError::InvalidStructure(message)) if repair_attempts < 2 => {
                    repair_attempts += 1;
                    warn!(
                        "MP4 structure error ({message}), attempting repair ({repair_attempts}/2)"
                    );
                    match repair_file(&entry.path) {
                        Ok(()) => {
                            info!("MP4 structure repaired, reopening");
                            thread::sleep(Duration::from_secs(1));
                        }
                        Err(e) => {
                            error!("could not repair {}: {e}", entry.name);
                            return Err(EngineError::Media(MediaError::Demux(message)));
                        }
                    }
                }
                // Still broken with no repairs left: from here on the file
                // is just another demux failure.
                Err(MediaError::InvalidStructure(message)) => {
                    return Err(EngineError::Media(MediaError::Demux(message)));
                }
                Err(e) => return Err(e.into()),
            }
        };

        let streams: Vec<StreamInfo> = source.streams().to_vec();
        for stream in &streams {
            info!("stream #{}: {:?}", stream.index, stream.kind);
        }
        let video_stream = streams.iter().find(|s| s.is_video()).map(|s| s.index);
        let audio_stream = streams.iter().find(|s| s.is_audio()).map(|s| s.index);
        if video_stream.is_none() && audio_stream.is_none() {
            return Err(EngineError::NoStreams(entry.name.clone()));
        }
        info!(video = ?video_stream, audio = ?audio_stream, "streams detected");

        if start_position > Duration::ZERO {
            info!("resuming playback at {:?}", start_position);
        }

        info!("connecting to RTMP server");
        let mut sink = RtmpSink::dial(&self.publish_url)?;
        sink.write_header(&streams)?;

        let mut pacer = Pacer::new(
            video_stream,
            audio_stream,
            &mut self.session_meter,
            self.target_bitrate,
            self.config.settings.clone(),
            self.min_play_time,
            start_position,
            Arc::clone(&self.checkpoint),
            self.store.clone(),
        );
        let outcome = pacer.run(&mut source, &mut sink)?;
        sink.close();
        Ok(outcome)
    }

    /// Block until the directory yields at least one file.
    fn wait_for_files(&self) -> Vec<FileEntry> {
        loop {
            let files = scan_directory(&self.video_dir);
            if !files.is_empty() {
                return files;
            }
            warn!(
                "no MP4 files found in {}, checking again in {:?}",
                self.video_dir.display(),
                EMPTY_DIRECTORY_RETRY
            );
            thread::sleep(EMPTY_DIRECTORY_RETRY);
        }
    }

    /// Find the saved file in the list; fall back to the first file.
    fn resume_index(&mut self, files: &[FileEntry]) -> usize {
        let Some(state) = &self.resume else {
            return 0;
        };
        match files.iter().position(|f| f.name == state.current_file) {
            Some(index) => {
                info!(
                    "resuming from file #{}: {} at {:?}",
                    index + 1,
                    state.current_file,
                    state.position
                );
                index
            }
            None => {
                warn!(
                    "saved file {} not found, starting from the first file",
                    state.current_file
                );
                self.resume = None;
                0
            }
        }
    }

    /// Consume the saved position if it belongs to this file. Only the
    /// first attempt of the restored file resumes mid-way.
    fn take_resume_position(&mut self, entry: &FileEntry) -> Duration {
        match &self.resume {
            Some(state) if state.current_file == entry.name => {
                let position = state.position;
                self.resume = None;
                position
            }
            _ => Duration::ZERO,
        }
    }

    fn spawn_checkpoint_saver(&self) {
        let store = self.store.clone();
        let checkpoint = Arc::clone(&self.checkpoint);
        thread::spawn(move || {
            let ticker = crossbeam_channel::tick(SAVE_STATE_INTERVAL);
            for _ in ticker {
                let snapshot = checkpoint.lock().clone();
                if snapshot.current_file.is_empty() {
                    continue;
                }
                if let Err(e) = store.save(&snapshot) {
                    warn!("periodic checkpoint save failed: {e}");
                }
            }
        });
    }

    fn log_startup(&self) {
        info!("=== MP4 RTMP restreamer ===");
        info!("publish URL: {}", self.publish_url);
        info!("video directory: {}", self.video_dir.display());
        if self.config.settings.force_bitrate > 0 {
            info!(
                "forced bitrate: {} kbps",
                self.config.settings.force_bitrate / 1000
            );
        } else {
            info!("minimum bitrate: {} kbps", MIN_BITRATE / 1000);
        }
        if self.config.settings.force_keyframe {
            info!(
                "forcing keyframes every {} s",
                self.config.settings.keyframe_seconds
            );
        }
        if self.config.settings.disable_early_end {
            info!("early end disabled, every file plays to its natural end");
        }
        if self.config.settings.restore_state {
            info!("state restoration from previous sessions enabled");
        }
        info!("minimum play time per file: {:?}", self.min_play_time);
    }
}
