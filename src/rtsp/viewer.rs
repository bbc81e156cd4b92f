//! Per-camera viewer fan-out: the set of bounded-channel subscribers that
//! receive a camera's live packet stream, plus the non-blocking cast used by
//! the supervisor's packet pump.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::model::Packet;

const VIEWER_SOCKET_CAPACITY: usize = 1024;

/// A single viewer's packet inbox.
pub struct Viewer {
    pub id: String,
    pub camera_id: String,
    sender: mpsc::Sender<Arc<Packet>>,
}

pub struct ViewerHandle {
    pub id: String,
    pub receiver: mpsc::Receiver<Arc<Packet>>,
}

#[derive(Default)]
pub struct ViewerTable {
    viewers: RwLock<HashMap<String, Viewer>>,
    by_camera: RwLock<HashMap<String, HashSet<String>>>,
}

impl ViewerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new viewer for `camera_id`. The caller is responsible for
    /// having confirmed the camera has an active supervisor; this table does
    /// not check.
    pub async fn add_viewer(&self, camera_id: &str) -> ViewerHandle {
        let (tx, rx) = mpsc::channel(VIEWER_SOCKET_CAPACITY);
        let id = Uuid::new_v4().to_string();

        let viewer = Viewer {
            id: id.clone(),
            camera_id: camera_id.to_string(),
            sender: tx,
        };

        self.viewers.write().await.insert(id.clone(), viewer);
        self.by_camera
            .write()
            .await
            .entry(camera_id.to_string())
            .or_default()
            .insert(id.clone());

        ViewerHandle { id, receiver: rx }
    }

    /// Remove a viewer from both the global table and its camera's set. The
    /// receiving side observes end-of-stream once `sender` is dropped here.
    pub async fn delete_viewer(&self, camera_id: &str, viewer_id: &str) {
        self.viewers.write().await.remove(viewer_id);
        if let Some(set) = self.by_camera.write().await.get_mut(camera_id) {
            set.remove(viewer_id);
        }
    }

    /// Deliver `packet` to every viewer of `camera_id`, dropping it for any
    /// viewer whose socket is currently full.
    pub async fn cast(&self, camera_id: &str, packet: Arc<Packet>) {
        let by_camera = self.by_camera.read().await;
        let Some(ids) = by_camera.get(camera_id) else {
            return;
        };
        if ids.is_empty() {
            return;
        }
        let viewers = self.viewers.read().await;
        for id in ids {
            if let Some(viewer) = viewers.get(id) {
                let _ = viewer.sender.try_send(packet.clone());
            }
        }
    }

    pub async fn viewer_count(&self, camera_id: &str) -> usize {
        self.by_camera
            .read()
            .await
            .get(camera_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn packet() -> Packet {
        Packet {
            substream: 0,
            is_keyframe: true,
            duration: Duration::from_millis(40),
            time: std::time::SystemTime::now(),
            payload: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn cast_reaches_all_viewers_of_the_camera_only() {
        let table = ViewerTable::new();
        let mut a = table.add_viewer("cam1").await;
        let mut b = table.add_viewer("cam2").await;

        table.cast("cam1", Arc::new(packet())).await;

        assert!(a.receiver.try_recv().is_ok());
        assert!(b.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_viewer_drops_without_blocking_cast() {
        let table = ViewerTable::new();
        let _handle = table.add_viewer("cam1").await;

        for _ in 0..(VIEWER_SOCKET_CAPACITY + 100) {
            table.cast("cam1", Arc::new(packet())).await;
        }
        // No panic, no hang: drop-on-full held.
        assert_eq!(table.viewer_count("cam1").await, 1);
    }

    #[tokio::test]
    async fn delete_viewer_closes_its_socket() {
        let table = ViewerTable::new();
        let handle = table.add_viewer("cam1").await;
        table.delete_viewer("cam1", &handle.id).await;
        assert_eq!(table.viewer_count("cam1").await, 0);

        let mut receiver = handle.receiver;
        assert_eq!(receiver.recv().await, None);
    }
}
