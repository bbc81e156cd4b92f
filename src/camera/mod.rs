//! Camera registry: the in-memory, JSON-file-backed catalogue of cameras plus
//! the event bus announcing their lifecycle to the RTSP supervisor and
//! recorder.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{Camera, CameraEvent};
use crate::pubsub::{PubSub, Subscription};

#[derive(Debug)]
pub enum CameraError {
    NotFound(String),
    Io(String),
    Serde(String),
    InvalidField(&'static str),
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::NotFound(id) => write!(f, "camera not found: {}", id),
            CameraError::Io(msg) => write!(f, "camera storage I/O error: {}", msg),
            CameraError::Serde(msg) => write!(f, "camera descriptor decode error: {}", msg),
            CameraError::InvalidField(name) => write!(f, "invalid camera field: {}", name),
        }
    }
}

impl StdError for CameraError {}

impl From<std::io::Error> for CameraError {
    fn from(e: std::io::Error) -> Self {
        CameraError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CameraError {
    fn from(e: serde_json::Error) -> Self {
        CameraError::Serde(e.to_string())
    }
}

/// Fields accepted when creating a camera. `rtsp_url` and `name` are required;
/// everything else defaults.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CameraCreate {
    pub name: String,
    #[serde(default)]
    pub url: String,
    pub rtsp_url: String,
}

/// Fields accepted when partially updating a camera; absent fields are left
/// unchanged.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CameraUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub rtsp_url: Option<String>,
    pub disabled: Option<bool>,
    pub recording: Option<bool>,
}

/// The camera registry: one JSON file per camera under `folder`, mirrored in
/// memory, with lifecycle events fanned out via [`PubSub`].
pub struct CameraRegistry {
    folder: PathBuf,
    cameras: RwLock<HashMap<String, Camera>>,
    events: PubSub<CameraEvent>,
}

impl CameraRegistry {
    /// Load every `<id>.json` file under `folder` into memory. The folder is
    /// created if absent.
    pub async fn load(folder: PathBuf) -> Result<Self, CameraError> {
        std::fs::create_dir_all(&folder)?;
        let mut cameras = HashMap::new();

        for entry in std::fs::read_dir(&folder)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Camera>(&content) {
                Ok(camera) => {
                    cameras.insert(camera.id.clone(), camera);
                }
                Err(e) => {
                    log::warn!("skipping unreadable camera descriptor {:?}: {}", path, e);
                }
            }
        }

        Ok(Self {
            folder,
            cameras: RwLock::new(cameras),
            events: PubSub::new(),
        })
    }

    pub async fn subscribe(&self) -> Subscription<CameraEvent> {
        self.events.subscribe().await
    }

    pub async fn list(&self) -> Vec<Camera> {
        self.cameras.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Result<Camera, CameraError> {
        self.cameras
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CameraError::NotFound(id.to_string()))
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.folder.join(format!("{id}.json"))
    }

    fn write_to_disk(path: &Path, camera: &Camera) -> Result<(), CameraError> {
        let content = serde_json::to_string_pretty(camera)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create a camera with a fresh UUID, retrying on a (vanishingly rare)
    /// UUID collision, mirroring the original service's bounded retry loop.
    pub async fn create(&self, fields: CameraCreate) -> Result<Camera, CameraError> {
        if fields.name.trim().is_empty() {
            return Err(CameraError::InvalidField("name"));
        }
        if fields.rtsp_url.trim().is_empty() {
            return Err(CameraError::InvalidField("rtsp_url"));
        }

        let now = now_ts();
        let mut cameras = self.cameras.write().await;

        let mut id = Uuid::new_v4().to_string();
        for _ in 0..100 {
            if !cameras.contains_key(&id) {
                break;
            }
            id = Uuid::new_v4().to_string();
        }

        let camera = Camera {
            id: id.clone(),
            name: fields.name,
            url: fields.url,
            rtsp_url: fields.rtsp_url,
            disabled: false,
            recording: false,
            created_ts: now,
            updated_ts: now,
        };

        Self::write_to_disk(&self.path_for(&id), &camera)?;
        cameras.insert(id, camera.clone());
        drop(cameras);

        self.events.publish(CameraEvent::Added(camera.clone())).await;
        Ok(camera)
    }

    /// Merge `fields` into the existing camera and publish `Updated`. A
    /// missing id produces `Added` instead, since there was no previous
    /// descriptor to report a transition from.
    pub async fn update(&self, id: &str, fields: CameraUpdate) -> Result<Camera, CameraError> {
        let mut cameras = self.cameras.write().await;

        let prev = cameras.get(id).cloned();
        let mut camera = prev.clone().unwrap_or_else(|| Camera {
            id: id.to_string(),
            name: String::new(),
            url: String::new(),
            rtsp_url: String::new(),
            disabled: false,
            recording: false,
            created_ts: now_ts(),
            updated_ts: now_ts(),
        });

        if let Some(name) = fields.name {
            camera.name = name;
        }
        if let Some(url) = fields.url {
            camera.url = url;
        }
        if let Some(rtsp_url) = fields.rtsp_url {
            camera.rtsp_url = rtsp_url;
        }
        if let Some(disabled) = fields.disabled {
            camera.disabled = disabled;
        }
        if let Some(recording) = fields.recording {
            camera.recording = recording;
        }
        camera.updated_ts = now_ts();

        Self::write_to_disk(&self.path_for(id), &camera)?;
        cameras.insert(id.to_string(), camera.clone());
        drop(cameras);

        match prev {
            Some(prev) => {
                self.events
                    .publish(CameraEvent::Updated {
                        camera: camera.clone(),
                        prev,
                    })
                    .await;
            }
            None => {
                self.events.publish(CameraEvent::Added(camera.clone())).await;
            }
        }

        Ok(camera)
    }

    /// Hard-delete a camera's descriptor file and in-memory entry, publishing
    /// `Deleted`. Not reachable from the HTTP `DELETE` route, which performs a
    /// soft-disable via [`Self::update`] instead (see design notes).
    pub async fn purge(&self, id: &str) -> Result<Camera, CameraError> {
        let mut cameras = self.cameras.write().await;
        let camera = cameras
            .remove(id)
            .ok_or_else(|| CameraError::NotFound(id.to_string()))?;
        drop(cameras);

        let path = self.path_for(id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        self.events.publish(CameraEvent::Deleted(camera.clone())).await;
        Ok(camera)
    }
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A process-wide handle to the registry.
pub type SharedCameraRegistry = Arc<CameraRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gw-camera-test-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn create_persists_and_publishes_added() {
        let dir = tmp_dir("create");
        let registry = CameraRegistry::load(dir.clone()).await.unwrap();
        let mut sub = registry.subscribe().await;

        let camera = registry
            .create(CameraCreate {
                name: "Front door".into(),
                url: "http://cam.local".into(),
                rtsp_url: "rtsp://cam.local/stream".into(),
            })
            .await
            .unwrap();

        let event = sub.recv().await.unwrap();
        assert!(matches!(&*event, CameraEvent::Added(c) if c.id == camera.id));
        assert!(dir.join(format!("{}.json", camera.id)).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn update_toggling_recording_reports_prev() {
        let dir = tmp_dir("update");
        let registry = CameraRegistry::load(dir.clone()).await.unwrap();
        let camera = registry
            .create(CameraCreate {
                name: "Cam".into(),
                url: "".into(),
                rtsp_url: "rtsp://cam.local".into(),
            })
            .await
            .unwrap();

        let mut sub = registry.subscribe().await;
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

        let event = sub.recv().await.unwrap();
        match &*event {
            CameraEvent::Updated { camera, prev } => {
                assert!(camera.recording);
                assert!(!prev.recording);
            }
            _ => panic!("expected Updated"),
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn create_rejects_missing_rtsp_url() {
        let dir = tmp_dir("invalid");
        let registry = CameraRegistry::load(dir.clone()).await.unwrap();
        let result = registry
            .create(CameraCreate {
                name: "Cam".into(),
                url: "".into(),
                rtsp_url: "".into(),
            })
            .await;
        assert!(result.is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
