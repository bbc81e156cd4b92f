//! Multi-camera RTSP/WebRTC video gateway.
//!
//! For each configured camera the engine maintains a long-lived RTSP ingest
//! session (see [`rtsp`]), fans the live packet stream out to WebRTC viewers
//! and a recorder (see [`rtsp::viewer`], [`recorder`]), persists the stream
//! to an on-disk archive (see [`archive`]), and serves time-based playback
//! from that archive (see [`playback`]). [`http`] is the thin `axum` adapter
//! wiring all of this to the outside world.

pub mod archive;
pub mod camera;
pub mod config;
pub mod http;
pub mod model;
pub mod playback;
pub mod pubsub;
pub mod recorder;
pub mod rtsp;
pub mod timing;
pub mod webrtc_adapter;

pub use camera::CameraRegistry;
pub use config::Config;
pub use model::{Camera, CameraEvent, CodecData, Packet};
pub use playback::PlaybackManager;
pub use recorder::RecorderManager;
pub use rtsp::Supervisor;
