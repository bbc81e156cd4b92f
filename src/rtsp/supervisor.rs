//! Per-camera RTSP client supervisor.
//!
//! One dial loop per camera with exponential backoff, reconciled against the
//! camera registry's event bus. Grounded on the original `worker_loop`/
//! `worker`/`runIfNotRunning`/`clientSwap` family: a camera supervisor owns
//! its dial handle and viewer set, and is only ever torn down through the
//! two-phase stop-and-wait protocol so no task can keep running after its
//! registry entry has been removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;

use crate::camera::CameraRegistry;
use crate::model::{CameraEvent, CodecData, Packet};
use crate::rtsp::source::{RtspSignal, RtspSource};
use crate::rtsp::viewer::{ViewerHandle, ViewerTable};
use crate::timing;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct ClientState {
    running: AtomicBool,
    closed: AtomicBool,
    rtsp_url: RwLock<String>,
    codecs: RwLock<Vec<CodecData>>,
    close_tx: mpsc::Sender<()>,
}

/// Supervises every camera's RTSP dial loop and viewer set.
pub struct Supervisor {
    source: Arc<dyn RtspSource>,
    viewers: Arc<ViewerTable>,
    clients: RwLock<HashMap<String, Arc<ClientState>>>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl Supervisor {
    pub fn new(source: Arc<dyn RtspSource>, connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            source,
            viewers: Arc::new(ViewerTable::new()),
            clients: RwLock::new(HashMap::new()),
            connect_timeout,
            io_timeout,
        }
    }

    pub fn viewers(&self) -> Arc<ViewerTable> {
        self.viewers.clone()
    }

    pub async fn is_running(&self, camera_id: &str) -> bool {
        self.clients
            .read()
            .await
            .get(camera_id)
            .map(|c| c.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Start a dial loop for `camera_id` if one is not already running
    /// (`runIfNotRunning`).
    pub async fn ensure_running(self: &Arc<Self>, camera_id: &str, rtsp_url: &str) {
        let mut clients = self.clients.write().await;
        if let Some(existing) = clients.get(camera_id) {
            if existing.running.load(Ordering::SeqCst) {
                return;
            }
        }

        let (close_tx, close_rx) = mpsc::channel(1);
        let state = Arc::new(ClientState {
            running: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            rtsp_url: RwLock::new(rtsp_url.to_string()),
            codecs: RwLock::new(Vec::new()),
            close_tx,
        });
        clients.insert(camera_id.to_string(), state.clone());
        drop(clients);

        let sup = self.clone();
        let camera_id = camera_id.to_string();
        tokio::spawn(async move {
            sup.dial_loop(camera_id, state, close_rx).await;
        });
    }

    /// Two-phase stop: flip `closed`, signal the dial loop, then poll
    /// `running` at 100ms until it clears (`clientSendQuitAndWait`).
    pub async fn stop_and_wait(&self, camera_id: &str) {
        let state = self.clients.read().await.get(camera_id).cloned();
        let Some(state) = state else { return };

        state.closed.store(true, Ordering::SeqCst);
        let _ = state.close_tx.try_send(());

        while state.running.load(Ordering::SeqCst) {
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Remove a camera's supervisor record entirely: stops it first if still
    /// running.
    pub async fn remove(&self, camera_id: &str) {
        self.stop_and_wait(camera_id).await;
        self.clients.write().await.remove(camera_id);
    }

    /// Stop-and-wait then restart with a new URL, used when a camera's
    /// `rtsp_url` changes underneath a running supervisor (`clientSwap`).
    pub async fn swap(self: &Arc<Self>, camera_id: &str, new_url: &str) {
        self.stop_and_wait(camera_id).await;
        self.clients.write().await.remove(camera_id);
        self.ensure_running(camera_id, new_url).await;
    }

    /// Poll for a codec list whose H.264 entries (if any) carry non-empty
    /// SPS/PPS, for up to `connect_timeout * 10` attempts at 100ms.
    pub async fn wait_for_codecs(&self, camera_id: &str) -> Option<Vec<CodecData>> {
        let attempts = (self.connect_timeout.as_secs() * 10).max(1);
        for _ in 0..attempts {
            if let Some(state) = self.clients.read().await.get(camera_id).cloned() {
                let codecs = state.codecs.read().await.clone();
                if !codecs.is_empty() && codecs.iter().all(CodecData::is_ready) {
                    return Some(codecs);
                }
            }
            sleep(POLL_INTERVAL).await;
        }
        None
    }

    pub async fn wait_until_running(&self, camera_id: &str) {
        loop {
            if self.is_running(camera_id).await {
                return;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn dial_loop(
        self: Arc<Self>,
        camera_id: String,
        state: Arc<ClientState>,
        mut close_rx: mpsc::Receiver<()>,
    ) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if state.closed.load(Ordering::SeqCst) {
                break;
            }

            let url = state.rtsp_url.read().await.clone();
            let dial = self
                .source
                .dial(&url, self.connect_timeout, self.io_timeout)
                .await;

            let mut session = match dial {
                Ok(session) => {
                    backoff = INITIAL_BACKOFF;
                    session
                }
                Err(e) => {
                    log::warn!("camera {camera_id}: RTSP dial failed: {e}, retrying in {backoff:?}");
                    tokio::select! {
                        _ = sleep(backoff) => {}
                        _ = close_rx.recv() => break,
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            {
                let mut codecs = state.codecs.write().await;
                *codecs = session.codecs();
            }
            log::info!("camera {camera_id}: RTSP connected");

            let mut signals = session.signals();
            let mut packets = session.packets();

            'pump: loop {
                tokio::select! {
                    _ = close_rx.recv() => {
                        log::info!("camera {camera_id}: RTSP session closed by request");
                        break 'pump;
                    }
                    signal = signals.next() => {
                        match signal {
                            Some(RtspSignal::CodecUpdate(codecs)) => {
                                *state.codecs.write().await = codecs;
                            }
                            Some(RtspSignal::StreamRtpStop) | None => {
                                log::warn!("camera {camera_id}: RTSP stream stopped, reconnecting");
                                break 'pump;
                            }
                        }
                    }
                    packet = packets.next() => {
                        match packet {
                            Some(packet) => {
                                let packet = packet.stamp(timing::now());
                                self.viewers.cast(&camera_id, Arc::new(packet)).await;
                            }
                            None => {
                                log::warn!("camera {camera_id}: RTSP packet stream ended, reconnecting");
                                break 'pump;
                            }
                        }
                    }
                }
            }

            if state.closed.load(Ordering::SeqCst) {
                break;
            }
        }

        state.running.store(false, Ordering::SeqCst);
    }

    /// React to a single camera registry event: start/stop/swap supervisors.
    pub async fn handle_event(self: &Arc<Self>, event: Arc<CameraEvent>) {
        match &*event {
            CameraEvent::Added(camera) => {
                if !camera.disabled {
                    self.ensure_running(&camera.id, &camera.rtsp_url).await;
                }
            }
            CameraEvent::Updated { camera, prev } => {
                if camera.disabled {
                    self.remove(&camera.id).await;
                } else if camera.rtsp_url != prev.rtsp_url {
                    self.swap(&camera.id, &camera.rtsp_url).await;
                } else {
                    self.ensure_running(&camera.id, &camera.rtsp_url).await;
                }
            }
            CameraEvent::Deleted(camera) => {
                self.remove(&camera.id).await;
            }
        }
    }

    /// Spawn the task that consumes the registry's event bus and reconciles
    /// supervisor state for as long as the registry lives.
    pub fn spawn_reconciler(self: Arc<Self>, registry: Arc<CameraRegistry>) {
        tokio::spawn(async move {
            let mut sub = registry.subscribe().await;
            while let Some(event) = sub.recv().await {
                self.handle_event(event).await;
            }
        });
    }

    /// Add a live viewer for a camera, registering it only once the camera
    /// has at least one codec ready.
    pub async fn add_viewer(&self, camera_id: &str) -> ViewerHandle {
        self.viewers.add_viewer(camera_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtsp::source::StubRtspSource;

    fn supervisor() -> Arc<Supervisor> {
        Arc::new(Supervisor::new(
            Arc::new(StubRtspSource::default()),
            Duration::from_secs(2),
            Duration::from_secs(2),
        ))
    }

    #[tokio::test]
    async fn ensure_running_is_idempotent() {
        let sup = supervisor();
        sup.ensure_running("cam1", "rtsp://test/1").await;
        sup.wait_until_running("cam1").await;
        sup.ensure_running("cam1", "rtsp://test/1").await;
        assert!(sup.is_running("cam1").await);
        sup.remove("cam1").await;
    }

    #[tokio::test]
    async fn codecs_become_ready_after_connect() {
        let sup = supervisor();
        sup.ensure_running("cam1", "rtsp://test/1").await;
        let codecs = sup.wait_for_codecs("cam1").await;
        assert!(codecs.is_some());
        sup.remove("cam1").await;
    }

    #[tokio::test]
    async fn remove_stops_dial_loop() {
        let sup = supervisor();
        sup.ensure_running("cam1", "rtsp://test/1").await;
        sup.wait_until_running("cam1").await;
        sup.remove("cam1").await;
        assert!(!sup.is_running("cam1").await);
    }
}
