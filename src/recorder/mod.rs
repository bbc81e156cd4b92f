//! Per-camera recorder: a privileged viewer whose packets are persisted to
//! the archive, rotating files on each minute boundary.
//!
//! Grounded on the original's `addRecorder`/`startRecording`/`runRecord`. The
//! Updated-event handling here intentionally differs from one observed
//! variant of `runRecord`, which removed the recorder on *any* update that
//! did not toggle recording from false to true — including, for example, a
//! camera rename while recording was already on. That is treated here as a
//! bug: only a recording-flag toggle to false, or camera deletion, removes a
//! recorder.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::archive::{self, RecordPacket, RecordWriter};
use crate::camera::CameraRegistry;
use crate::model::CameraEvent;
use crate::rtsp::Supervisor;
use crate::timing;

const ROLLOVER_PERIOD: Duration = Duration::from_secs(60);

struct RecorderHandle {
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

/// Owns every camera's recorder task.
pub struct RecorderManager {
    root: PathBuf,
    supervisor: Arc<Supervisor>,
    recorders: RwLock<HashMap<String, RecorderHandle>>,
}

impl RecorderManager {
    pub fn new(root: PathBuf, supervisor: Arc<Supervisor>) -> Self {
        Self {
            root,
            supervisor,
            recorders: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_recording(&self, camera_id: &str) -> bool {
        self.recorders
            .read()
            .await
            .get(camera_id)
            .map(|r| r.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Create a recorder for `camera_id` if one is not already running,
    /// waiting for the RTSP supervisor to be connected first.
    pub async fn add_recorder(self: &Arc<Self>, camera_id: &str) {
        if self.recorders.read().await.contains_key(camera_id) {
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));
        self.recorders.write().await.insert(
            camera_id.to_string(),
            RecorderHandle {
                running: running.clone(),
                stop: stop.clone(),
            },
        );

        let manager = self.clone();
        let camera_id = camera_id.to_string();
        tokio::spawn(async move {
            manager.supervisor.wait_until_running(&camera_id).await;
            manager.record_loop(camera_id, running, stop).await;
        });
    }

    /// Stop a camera's recorder and wait for its loop to exit.
    pub async fn remove_recorder(&self, camera_id: &str) {
        let handle = self.recorders.read().await.get(camera_id).map(|h| {
            (h.running.clone(), h.stop.clone())
        });
        let Some((running, stop)) = handle else { return };

        stop.store(true, Ordering::SeqCst);
        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.recorders.write().await.remove(camera_id);
    }

    async fn record_loop(
        self: Arc<Self>,
        camera_id: String,
        running: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
    ) {
        let mut viewer = self.supervisor.add_viewer(&camera_id).await;

        'rollover: while !stop.load(Ordering::SeqCst) {
            let Some(codecs) = self.supervisor.wait_for_codecs(&camera_id).await else {
                continue;
            };

            let start = timing::now();
            let folder = archive::minute_folder(&self.root, &camera_id, start);
            if let Err(e) = std::fs::create_dir_all(&folder) {
                log::warn!("camera {camera_id}: failed to create recording folder: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            let codecs_path = archive::codecs_file(&folder, start);
            if let Err(e) = archive::write_codecs(&codecs_path, &codecs) {
                log::warn!("camera {camera_id}: failed to write codec descriptor: {e}");
            }

            let mut writers: Vec<Option<RecordWriter>> = Vec::with_capacity(codecs.len());
            for idx in 0..codecs.len() {
                let path = archive::packets_file(&folder, start, idx);
                match RecordWriter::create(&path) {
                    Ok(w) => writers.push(Some(w)),
                    Err(e) => {
                        log::warn!("camera {camera_id}: failed to open packet file {idx}: {e}");
                        writers.push(None);
                    }
                }
            }

            let deadline = Instant::now() + ROLLOVER_PERIOD;
            loop {
                if stop.load(Ordering::SeqCst) {
                    break 'rollover;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }

                let packet = tokio::time::timeout(remaining, viewer.receiver.recv()).await;
                let Ok(Some(packet)) = packet else {
                    continue;
                };

                let idx = packet.substream as usize;
                if let Some(Some(writer)) = writers.get_mut(idx) {
                    let record = RecordPacket {
                        packet: (*packet).clone(),
                        record_time: timing::now(),
                    };
                    if let Err(e) = writer.write(&record) {
                        log::warn!("camera {camera_id}: packet write failed: {e}");
                    }
                }
            }
        }

        self.supervisor
            .viewers()
            .delete_viewer(&camera_id, &viewer.id)
            .await;
        running.store(false, Ordering::SeqCst);
    }

    /// React to a camera event: create/remove a recorder per the corrected
    /// rule described above.
    pub async fn handle_event(self: &Arc<Self>, event: Arc<CameraEvent>) {
        match &*event {
            CameraEvent::Added(camera) => {
                if camera.recording && !camera.disabled {
                    self.add_recorder(&camera.id).await;
                }
            }
            CameraEvent::Updated { camera, prev } => {
                if camera.disabled || !camera.recording {
                    if prev.recording {
                        self.remove_recorder(&camera.id).await;
                    }
                } else if camera.recording && !prev.recording {
                    self.add_recorder(&camera.id).await;
                }
                // Any other update (rename, URL change) with recording
                // already on leaves the recorder running untouched.
            }
            CameraEvent::Deleted(camera) => {
                self.remove_recorder(&camera.id).await;
            }
        }
    }

    pub fn spawn_reconciler(self: Arc<Self>, registry: Arc<CameraRegistry>) {
        tokio::spawn(async move {
            let mut sub = registry.subscribe().await;
            while let Some(event) = sub.recv().await {
                self.handle_event(event).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraCreate, CameraRegistry, CameraUpdate};
    use crate::rtsp::StubRtspSource;

    async fn setup() -> (Arc<CameraRegistry>, Arc<Supervisor>, Arc<RecorderManager>, PathBuf) {
        let dir = std::env::temp_dir().join(format!("gw-recorder-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cameras_dir = dir.join("cameras");
        let recordings_dir = dir.join("recordings");

        let registry = Arc::new(CameraRegistry::load(cameras_dir).await.unwrap());
        let supervisor = Arc::new(Supervisor::new(
            Arc::new(StubRtspSource::default()),
            Duration::from_secs(2),
            Duration::from_secs(2),
        ));
        supervisor.clone().spawn_reconciler(registry.clone());
        let recorder = Arc::new(RecorderManager::new(recordings_dir, supervisor.clone()));
        recorder.clone().spawn_reconciler(registry.clone());

        (registry, supervisor, recorder, dir)
    }

    #[tokio::test]
    async fn toggling_recording_on_creates_a_recorder() {
        let (registry, _sup, recorder, dir) = setup().await;
        let camera = registry
            .create(CameraCreate {
                name: "Cam".into(),
                url: "".into(),
                rtsp_url: "rtsp://test/1".into(),
            })
            .await
            .unwrap();

        registry
            .update(
                &camera.id,
                CameraUpdate {
                    recording: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut seen = false;
        for _ in 0..50 {
            if recorder.is_recording(&camera.id).await {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(seen);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn unrelated_update_does_not_remove_recorder() {
        let (registry, _sup, recorder, dir) = setup().await;
        let camera = registry
            .create(CameraCreate {
                name: "Cam".into(),
                url: "".into(),
                rtsp_url: "rtsp://test/1".into(),
            })
            .await
            .unwrap();
        registry
            .update(
                &camera.id,
                CameraUpdate {
                    recording: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        for _ in 0..50 {
            if recorder.is_recording(&camera.id).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(recorder.is_recording(&camera.id).await);

        // A rename while recording is already on must not stop the recorder.
        registry
            .update(
                &camera.id,
                CameraUpdate {
                    name: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(recorder.is_recording(&camera.id).await);

        std::fs::remove_dir_all(&dir).ok();
    }
}
