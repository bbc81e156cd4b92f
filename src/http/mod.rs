//! HTTP surface: a thin `axum` adapter over the engine's public API.
//!
//! Every handler here does validation and response shaping only; all of the
//! actual camera/viewer/recorder/playback logic lives in the engine modules.
//! Grounded on the teacher's `web/http_server.rs` router/handler shapes
//! (state extraction, middleware layering, JSON response bodies).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, RwLock};

use crate::camera::{CameraCreate, CameraError, CameraRegistry, CameraUpdate};
use crate::config::Config;
use crate::model::{CodecData, Packet};
use crate::playback::{Direction, PlaybackError, PlaybackManager};
use crate::recorder::RecorderManager;
use crate::rtsp::Supervisor;
use crate::webrtc_adapter::{self, WebRtcSink};

/// Everything a handler needs: the engine's registries plus the process
/// start time (for `/health`) and the config path (for `POST /config`).
pub struct AppState {
    pub cameras: Arc<CameraRegistry>,
    pub supervisor: Arc<Supervisor>,
    pub recorder: Arc<RecorderManager>,
    pub playback: Arc<PlaybackManager>,
    pub webrtc: Arc<dyn WebRtcSink>,
    pub config: RwLock<Config>,
    pub config_path: PathBuf,
    pub started_at: Instant,
    /// Playback sockets awaiting their one `POST /playback/:id/sdp` call.
    /// `new_playback` hands back a receiver that the session creation
    /// endpoint cannot itself consume; it is parked here until negotiation.
    sockets: RwLock<HashMap<String, mpsc::Receiver<Arc<Packet>>>>,
}

impl AppState {
    pub fn new(
        cameras: Arc<CameraRegistry>,
        supervisor: Arc<Supervisor>,
        recorder: Arc<RecorderManager>,
        playback: Arc<PlaybackManager>,
        webrtc: Arc<dyn WebRtcSink>,
        config: Config,
        config_path: PathBuf,
    ) -> Self {
        Self {
            cameras,
            supervisor,
            recorder,
            playback,
            webrtc,
            config: RwLock::new(config),
            config_path,
            started_at: Instant::now(),
            sockets: RwLock::new(HashMap::new()),
        }
    }

    async fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.read().await.rtsp_connect_timeout_secs)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let auth_state = state.clone();
    Router::new()
        .route("/cameras", get(list_cameras).post(create_camera))
        .route(
            "/cameras/{id}",
            get(get_camera).patch(update_camera).delete(delete_camera),
        )
        .route("/cameras/{id}/live/codecs", get(live_codecs))
        .route("/cameras/{id}/live/sdp", post(live_sdp))
        .route("/cameras/{id}/playback", post(create_playback))
        .route("/playback/{id}/codecs", get(playback_codecs))
        .route("/playback/{id}/sdp", post(playback_sdp))
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/config", post(reload_config))
        .with_state(state)
        .layer(middleware::from_fn_with_state(auth_state, basic_auth_middleware))
}

/// Gate every route but `/health` behind HTTP basic auth when the config
/// enables it. Grounded on the teacher's `web/http_server.rs` middleware of
/// the same name.
async fn basic_auth_middleware(State(state): State<Arc<AppState>>, req: Request<Body>, next: Next) -> Response {
    let config = state.config.read().await;
    if !config.basic_auth_enabled {
        return next.run(req).await;
    }
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    if let Some(value) = req.headers().get(header::AUTHORIZATION) {
        if let Ok(value_str) = value.to_str() {
            if let Some(encoded) = value_str.strip_prefix("Basic ") {
                if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) {
                    if let Ok(decoded_str) = String::from_utf8(decoded) {
                        if let Some((user, pass)) = decoded_str.split_once(':') {
                            if user == config.basic_auth_user && pass == config.basic_auth_password {
                                drop(config);
                                return next.run(req).await;
                            }
                        }
                    }
                }
            }
        }
    }
    drop(config);

    let mut response = Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .body(Body::from("Unauthorized"))
        .unwrap_or_else(|_| Response::new(Body::empty()));
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Basic realm=\"camera-gateway\""));
    response
}

/// `{ error: string }`, the uniform error body the spec requires.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<CameraError> for ApiError {
    fn from(e: CameraError) -> Self {
        match &e {
            CameraError::NotFound(_) => ApiError::not_found(e.to_string()),
            CameraError::InvalidField(_) => ApiError::bad_request(e.to_string()),
            CameraError::Io(_) | CameraError::Serde(_) => ApiError::internal(e.to_string()),
        }
    }
}

impl From<PlaybackError> for ApiError {
    fn from(e: PlaybackError) -> Self {
        ApiError::not_found(e.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn list_cameras(State(state): State<Arc<AppState>>) -> Json<Vec<crate::model::Camera>> {
    Json(state.cameras.list().await)
}

async fn create_camera(
    State(state): State<Arc<AppState>>,
    Json(fields): Json<CameraCreate>,
) -> ApiResult<Json<crate::model::Camera>> {
    Ok(Json(state.cameras.create(fields).await?))
}

async fn get_camera(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<crate::model::Camera>> {
    Ok(Json(state.cameras.get(&id).await?))
}

async fn update_camera(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(fields): Json<CameraUpdate>,
) -> ApiResult<Json<crate::model::Camera>> {
    Ok(Json(state.cameras.update(&id, fields).await?))
}

/// Soft-disable only: sets `disabled=true` rather than removing the
/// descriptor file. See design notes for why a hard delete is not wired here.
async fn delete_camera(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<crate::model::Camera>> {
    let fields = CameraUpdate {
        disabled: Some(true),
        ..Default::default()
    };
    Ok(Json(state.cameras.update(&id, fields).await?))
}

fn codec_kinds(codecs: &[CodecData]) -> Vec<&'static str> {
    codecs.iter().map(CodecData::kind).collect()
}

async fn live_codecs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<&'static str>>> {
    state.cameras.get(&id).await?;
    match state.supervisor.wait_for_codecs(&id).await {
        Some(codecs) => Ok(Json(codec_kinds(&codecs))),
        None => Err(ApiError::internal("Stream Codec Not Found")),
    }
}

#[derive(Deserialize)]
struct SdpOffer {
    offer_base64: String,
}

#[derive(Serialize)]
struct SdpAnswer {
    answer_base64: String,
}

async fn live_sdp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SdpOffer>,
) -> ApiResult<Json<SdpAnswer>> {
    let camera = state.cameras.get(&id).await?;
    if camera.disabled {
        return Err(ApiError::bad_request("camera is disabled"));
    }

    let codecs = state
        .supervisor
        .wait_for_codecs(&id)
        .await
        .ok_or_else(|| ApiError::internal("Stream Codec Not Found"))?;

    let handle = state.supervisor.add_viewer(&id).await;
    let viewer_id = handle.id.clone();

    let (answer_base64, writer) = state
        .webrtc
        .negotiate(&body.offer_base64, &codecs)
        .await
        .map_err(|_| ApiError::internal("Failed to start local rtsp"))?;

    let audio_only = codecs.iter().all(|c| !c.is_video());
    let supervisor = state.supervisor.clone();
    let camera_id = id.clone();
    tokio::spawn(async move {
        webrtc_adapter::relay(handle.receiver, writer, audio_only, || async move {
            supervisor.viewers().delete_viewer(&camera_id, &viewer_id).await;
        })
        .await;
    });

    Ok(Json(SdpAnswer { answer_base64 }))
}

#[derive(Deserialize)]
struct PlaybackQuery {
    start: i64,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    rate: Option<f64>,
}

#[derive(Serialize)]
struct PlaybackCreated {
    id: String,
}

async fn create_playback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PlaybackQuery>,
) -> ApiResult<Json<PlaybackCreated>> {
    state.cameras.get(&id).await?;

    if query.start < 0 {
        return Err(ApiError::bad_request("start must be a non-negative unix millisecond timestamp"));
    }
    let start = UNIX_EPOCH + Duration::from_millis(query.start as u64);

    let direction = match query.direction.as_deref() {
        None | Some("forward") => Direction::Forward,
        Some("backward") => Direction::Backward,
        Some(other) => return Err(ApiError::bad_request(format!("invalid direction: {other}"))),
    };
    let rate = query.rate.unwrap_or(1.0);

    let (session_id, receiver) = state.playback.new_playback(&id, start, direction, rate).await;
    state.sockets.write().await.insert(session_id.clone(), receiver);

    Ok(Json(PlaybackCreated { id: session_id }))
}

async fn playback_codecs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<&'static str>>> {
    let timeout = state.connect_timeout().await;
    match state.playback.get_codecs(&id, timeout).await {
        Some(codecs) => Ok(Json(codec_kinds(&codecs))),
        None => Err(ApiError::internal("Stream Codec Not Found")),
    }
}

async fn playback_sdp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SdpOffer>,
) -> ApiResult<Json<SdpAnswer>> {
    let receiver = state
        .sockets
        .write()
        .await
        .remove(&id)
        .ok_or_else(|| ApiError::not_found(format!("playback session not found: {id}")))?;

    let timeout = state.connect_timeout().await;
    let codecs = state
        .playback
        .get_codecs(&id, timeout)
        .await
        .ok_or_else(|| ApiError::internal("Stream Codec Not Found"))?;

    let (answer_base64, writer) = state
        .webrtc
        .negotiate(&body.offer_base64, &codecs)
        .await
        .map_err(|_| ApiError::internal("Failed to start local rtsp"))?;

    let audio_only = codecs.iter().all(|c| !c.is_video());
    let playback = state.playback.clone();
    let session_id = id.clone();
    tokio::spawn(async move {
        webrtc_adapter::relay(receiver, writer, audio_only, || async move {
            let _ = playback.delete(&session_id).await;
        })
        .await;
    });

    Ok(Json(SdpAnswer { answer_base64 }))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    uptime_seconds: f64,
    version: &'static str,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

async fn reload_config(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let reloaded = Config::load(&state.config_path).map_err(|e| ApiError::internal(e.to_string()))?;
    reloaded.validate().map_err(|e| ApiError::bad_request(e.to_string()))?;

    *state.config.write().await = reloaded;
    Ok(Json(json!({ "status": "reloaded" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtsp::StubRtspSource;
    use crate::webrtc_adapter::NullWebRtcSink;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_state() -> (Arc<AppState>, PathBuf) {
        let dir = std::env::temp_dir().join(format!("gw-http-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cameras = Arc::new(CameraRegistry::load(dir.join("cameras")).await.unwrap());
        let supervisor = Arc::new(Supervisor::new(
            Arc::new(StubRtspSource::default()),
            Duration::from_secs(2),
            Duration::from_secs(2),
        ));
        supervisor.clone().spawn_reconciler(cameras.clone());
        let recorder = Arc::new(RecorderManager::new(dir.join("recordings"), supervisor.clone()));
        recorder.clone().spawn_reconciler(cameras.clone());
        let playback = Arc::new(PlaybackManager::new(dir.join("recordings")));
        let webrtc: Arc<dyn WebRtcSink> = Arc::new(NullWebRtcSink::default());

        let state = Arc::new(AppState::new(
            cameras,
            supervisor,
            recorder,
            playback,
            webrtc,
            Config::default(),
            dir.join("config.properties"),
        ));
        (state, dir)
    }

    #[tokio::test]
    async fn create_then_list_camera() {
        let (state, dir) = test_state().await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/cameras")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&json!({
                            "name": "Front door",
                            "rtsp_url": "rtsp://cam.local/1",
                        }))
                        .unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/cameras").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_missing_camera_is_404() {
        let (state, dir) = test_state().await;
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/cameras/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, dir) = test_state().await;
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        std::fs::remove_dir_all(&dir).ok();
    }
}
