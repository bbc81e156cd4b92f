//! Playback engine: walks the archive by wall-clock minute, paces packet
//! emission by direction and rate, and drives a single output socket that a
//! WebRTC adapter consumes.
//!
//! Grounded on the canonical `app/playback/playback.go` variant (direction
//! constants `Forward = 1` / `Backward = -1`, `socketChanSize = 1024`,
//! corrected minute-truncation on a missing minute) rather than the older
//! `app/rtsp/playback.go` variant, which used a buggy nanosecond-based
//! truncation (see design notes).

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;
use uuid::Uuid;

use crate::archive::{self, RecordScanner};
use crate::model::CodecData;
use crate::model::Packet;
use crate::timing;

const SOCKET_CHAN_SIZE: usize = 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum PlaybackError {
    NotFound(String),
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackError::NotFound(id) => write!(f, "playback session not found: {}", id),
        }
    }
}

impl StdError for PlaybackError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }

    /// Whether a record observed at `record_time` is stale relative to
    /// `playhead` and should be skipped rather than emitted.
    fn is_stale(self, record_time: SystemTime, playhead: SystemTime) -> bool {
        match self {
            Direction::Forward => record_time < playhead,
            Direction::Backward => record_time > playhead,
        }
    }
}

struct SessionState {
    camera_id: String,
    direction: Direction,
    rate: RwLock<f64>,
    current_time: RwLock<SystemTime>,
    codecs: RwLock<Option<Vec<CodecData>>>,
    running: AtomicBool,
    closed: AtomicBool,
}

pub struct PlaybackManager {
    root: PathBuf,
    sessions: RwLock<std::collections::HashMap<String, Arc<SessionState>>>,
}

impl PlaybackManager {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            sessions: RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Start a new playback session and return its id plus the socket the
    /// caller (typically a WebRTC adapter) should consume.
    pub async fn new_playback(
        self: &Arc<Self>,
        camera_id: &str,
        start: SystemTime,
        direction: Direction,
        rate: f64,
    ) -> (String, mpsc::Receiver<Arc<Packet>>) {
        let id = Uuid::new_v4().to_string();
        let state = Arc::new(SessionState {
            camera_id: camera_id.to_string(),
            direction,
            rate: RwLock::new(if rate > 0.0 { rate } else { 1.0 }),
            current_time: RwLock::new(start),
            codecs: RwLock::new(None),
            running: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });

        self.sessions.write().await.insert(id.clone(), state.clone());

        let (tx, rx) = mpsc::channel(SOCKET_CHAN_SIZE);
        let manager = self.clone();
        let id_for_worker = id.clone();
        tokio::spawn(async move {
            manager.worker(id_for_worker, state, tx).await;
        });

        (id, rx)
    }

    pub async fn get_rate(&self, id: &str) -> Option<f64> {
        let sessions = self.sessions.read().await;
        let state = sessions.get(id)?;
        Some(*state.rate.read().await)
    }

    pub async fn set_rate(&self, id: &str, rate: f64) {
        if let Some(state) = self.sessions.read().await.get(id) {
            *state.rate.write().await = if rate > 0.0 { rate } else { 1.0 };
        }
    }

    pub async fn current_time(&self, id: &str) -> Option<SystemTime> {
        let sessions = self.sessions.read().await;
        let state = sessions.get(id)?;
        Some(*state.current_time.read().await)
    }

    /// Poll for codecs up to `connect_timeout * 10` attempts at 100ms,
    /// mirroring the live-path polling contract.
    pub async fn get_codecs(&self, id: &str, connect_timeout: Duration) -> Option<Vec<CodecData>> {
        let attempts = (connect_timeout.as_secs() * 10).max(1);
        for _ in 0..attempts {
            if let Some(state) = self.sessions.read().await.get(id).cloned() {
                if let Some(codecs) = state.codecs.read().await.clone() {
                    return Some(codecs);
                }
                if state.closed.load(Ordering::SeqCst) && !state.running.load(Ordering::SeqCst) {
                    return None;
                }
            } else {
                return None;
            }
            sleep(POLL_INTERVAL).await;
        }
        None
    }

    /// Two-phase close: request stop, wait for `running` to clear, then
    /// remove the session record.
    pub async fn delete(&self, id: &str) -> Result<(), PlaybackError> {
        let state = self
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PlaybackError::NotFound(id.to_string()))?;

        state.closed.store(true, Ordering::SeqCst);
        while state.running.load(Ordering::SeqCst) {
            sleep(POLL_INTERVAL).await;
        }
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn worker(
        self: Arc<Self>,
        id: String,
        state: Arc<SessionState>,
        sender: mpsc::Sender<Arc<Packet>>,
    ) {
        while !state.closed.load(Ordering::SeqCst) {
            let current = *state.current_time.read().await;
            let folder = archive::minute_folder(&self.root, &state.camera_id, current);
            let codecs_path = archive::codecs_file(&folder, current);

            let codecs = match archive::read_codecs(&codecs_path) {
                Ok(codecs) => codecs,
                Err(_) => {
                    advance_minute(&state).await;
                    continue;
                }
            };

            let mut scanners = Vec::with_capacity(codecs.len());
            let mut missing = false;
            for idx in 0..codecs.len() {
                let path = archive::packets_file(&folder, current, idx);
                match RecordScanner::open(&path) {
                    Ok(scanner) => scanners.push(scanner),
                    Err(_) => {
                        missing = true;
                        break;
                    }
                }
            }
            if missing {
                advance_minute(&state).await;
                continue;
            }

            *state.codecs.write().await = Some(codecs.clone());

            let tasks = scanners.into_iter().enumerate().map(|(idx, scanner)| {
                let state = state.clone();
                let sender = sender.clone();
                let is_video = codecs[idx].is_video();
                tokio::spawn(async move { sub_pacer(state, sender, scanner, is_video).await })
            });
            join_all(tasks).await;

            if state.closed.load(Ordering::SeqCst) {
                break;
            }
            advance_minute(&state).await;
        }

        state.running.store(false, Ordering::SeqCst);
        log::info!("playback {id}: worker exited");
    }
}

async fn advance_minute(state: &Arc<SessionState>) {
    let mut current = state.current_time.write().await;
    let step = Duration::from_secs(60);
    let truncated = timing::truncate_to_minute(*current);
    *current = match state.direction {
        Direction::Forward => truncated + step,
        Direction::Backward => truncated.checked_sub(step).unwrap_or(truncated),
    };
}

async fn sub_pacer(
    state: Arc<SessionState>,
    sender: mpsc::Sender<Arc<Packet>>,
    mut scanner: RecordScanner,
    is_video: bool,
) {
    let mut initial_seen = !is_video;

    loop {
        if state.closed.load(Ordering::SeqCst) {
            return;
        }

        let record = match scanner.next() {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                log::warn!("playback: archive scan error: {e}");
                return;
            }
        };

        let playhead = *state.current_time.read().await;
        let direction = state.direction;
        let rate = *state.rate.read().await;

        let stale = direction.is_stale(record.record_time, playhead);

        if !initial_seen {
            if record.packet.is_keyframe {
                initial_seen = true;
            }
        }

        if initial_seen && !stale {
            if sender.send(Arc::new(record.packet.clone())).await.is_err() {
                return;
            }
            if is_video {
                *state.current_time.write().await = record.record_time;
            }
        }

        let sleep_for = record.packet.duration.div_f64(rate.max(f64::MIN_POSITIVE));
        sleep(sleep_for).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{RecordPacket, RecordWriter};
    use std::time::UNIX_EPOCH;

    fn write_minute(root: &std::path::Path, camera_id: &str, time: SystemTime, count: u32) {
        let folder = archive::minute_folder(root, camera_id, time);
        std::fs::create_dir_all(&folder).unwrap();
        let codecs = vec![CodecData::H264 {
            sps: vec![1],
            pps: vec![2],
        }];
        archive::write_codecs(&archive::codecs_file(&folder, time), &codecs).unwrap();

        let mut writer = RecordWriter::create(&archive::packets_file(&folder, time, 0)).unwrap();
        for i in 0..count {
            let t = time + Duration::from_millis(i as u64 * 40);
            writer
                .write(&RecordPacket {
                    packet: Packet {
                        substream: 0,
                        is_keyframe: i == 0,
                        duration: Duration::from_millis(1),
                        time: t,
                        payload: vec![i as u8],
                    },
                    record_time: t,
                })
                .unwrap();
        }
    }

    #[tokio::test]
    async fn plays_back_a_written_minute_forward() {
        let dir = std::env::temp_dir().join(format!("gw-playback-test-{}", std::process::id()));
        let start = UNIX_EPOCH + Duration::from_secs(1_700_000_000 - (1_700_000_000 % 60));
        write_minute(&dir, "cam1", start, 10);

        let manager = Arc::new(PlaybackManager::new(dir.clone()));
        let (id, mut rx) = manager
            .clone()
            .new_playback("cam1", start, Direction::Forward, 1000.0)
            .await;

        let mut count = 0;
        for _ in 0..10 {
            if tokio::time::timeout(Duration::from_millis(500), rx.recv())
                .await
                .ok()
                .flatten()
                .is_some()
            {
                count += 1;
            } else {
                break;
            }
        }
        assert!(count > 0);

        manager.delete(&id).await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_minute_advances_and_is_reported_as_not_found() {
        let dir = std::env::temp_dir().join(format!("gw-playback-missing-{}", std::process::id()));
        std::fs::create_dir_all(&dir).ok();
        let start = UNIX_EPOCH + Duration::from_secs(1_700_000_000 - (1_700_000_000 % 60));

        let manager = Arc::new(PlaybackManager::new(dir.clone()));
        let (id, _rx) = manager
            .clone()
            .new_playback("cam1", start, Direction::Forward, 1.0)
            .await;

        let codecs = manager.get_codecs(&id, Duration::from_millis(50)).await;
        assert!(codecs.is_none());

        manager.delete(&id).await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }
}
