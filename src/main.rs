mod args;

use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use args::Args;
use camera_gateway::camera::CameraRegistry;
use camera_gateway::config::Config;
use camera_gateway::http::{self, AppState};
use camera_gateway::playback::PlaybackManager;
use camera_gateway::recorder::RecorderManager;
use camera_gateway::rtsp::{Supervisor, StubRtspSource};
use camera_gateway::webrtc_adapter::{RealWebRtcSink, WebRtcSink};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::new()
        .parse_filters(&format!(
            "camera_gateway={},webrtc=warn,webrtc_ice=warn,webrtc_dtls=warn",
            log_level
        ))
        .init();

    info!("camera-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = args.resolve_config_path();
    let mut config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config from {:?}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    if let Some(port) = args.port {
        config.port = port;
    }

    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config, config_path).await {
        error!("fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config, config_path: std::path::PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let cameras = Arc::new(CameraRegistry::load(config.cameras_folder.clone()).await?);

    // The real RTSP protocol client is out of scope for this crate (see
    // design notes): the supervisor runs against `StubRtspSource` until a
    // real adapter is wired in by the embedding application.
    warn!("no RTSP client adapter configured; running against the built-in stub source");
    let source: Arc<dyn camera_gateway::rtsp::RtspSource> = Arc::new(StubRtspSource::default());

    let supervisor = Arc::new(Supervisor::new(
        source,
        std::time::Duration::from_secs(config.rtsp_connect_timeout_secs),
        std::time::Duration::from_secs(config.rtsp_io_timeout_secs),
    ));
    supervisor.clone().spawn_reconciler(cameras.clone());

    let recorder = Arc::new(RecorderManager::new(
        config.recordings_folder.clone(),
        supervisor.clone(),
    ));
    recorder.clone().spawn_reconciler(cameras.clone());

    let playback = Arc::new(PlaybackManager::new(config.recordings_folder.clone()));

    let webrtc: Arc<dyn WebRtcSink> = Arc::new(RealWebRtcSink::new(config.ice_server_configs()));

    // Reconcile supervisors/recorders against cameras that already existed
    // on disk at startup (the registry does not replay its own history).
    for camera in cameras.list().await {
        if !camera.disabled {
            supervisor.ensure_running(&camera.id, &camera.rtsp_url).await;
        }
        if camera.recording && !camera.disabled {
            recorder.add_recorder(&camera.id).await;
        }
    }

    let host = config.host.clone();
    let port = config.port;
    let state = Arc::new(AppState::new(
        cameras, supervisor, recorder, playback, webrtc, config, config_path,
    ));

    let addr = format!("{}:{}", if host.is_empty() { "0.0.0.0" } else { &host }, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, http::router(state)).await?;

    Ok(())
}
