//! RTSP ingest: the protocol boundary, the per-camera dial supervisor, and
//! the live-viewer fan-out.

pub mod source;
pub mod supervisor;
pub mod viewer;

pub use source::{RtspError, RtspSession, RtspSignal, RtspSource, StubRtspSource};
pub use supervisor::Supervisor;
pub use viewer::{Viewer, ViewerHandle, ViewerTable};
