//! Core data model shared by the RTSP supervisor, fan-out, recorder, archive,
//! and playback engine.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::timing;

/// A single elementary-stream codec carried by a camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecData {
    H264 { sps: Vec<u8>, pps: Vec<u8> },
    PcmAlaw { sample_rate: u32, channels: u8 },
    PcmMulaw { sample_rate: u32, channels: u8 },
    Opus { sample_rate: u32, channels: u8 },
}

impl CodecData {
    /// Front-end kind string, filtered to the set the HTTP surface exposes.
    /// Mirrors `util.CodecsToStrings` from the original implementation.
    pub fn kind(&self) -> &'static str {
        match self {
            CodecData::H264 { .. } => "video",
            CodecData::PcmAlaw { .. } | CodecData::PcmMulaw { .. } | CodecData::Opus { .. } => "audio",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, CodecData::H264 { .. })
    }

    /// A codec is "ready" once any codec-specific parameter sets required to
    /// decode it are present. For H.264 that means non-empty SPS/PPS.
    pub fn is_ready(&self) -> bool {
        match self {
            CodecData::H264 { sps, pps } => !sps.is_empty() && !pps.is_empty(),
            _ => true,
        }
    }
}

/// One packet of elementary-stream data, tagged with the substream it belongs
/// to and the wall-clock instant it was stamped at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    /// Index into the camera's codec list.
    pub substream: u8,
    pub is_keyframe: bool,
    pub duration: std::time::Duration,
    #[serde(with = "micros")]
    pub time: SystemTime,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn stamp(mut self, at: SystemTime) -> Self {
        self.time = at;
        self
    }
}

mod micros {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(timing::to_micros(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let micros = u64::deserialize(d)?;
        Ok(timing::from_micros(micros))
    }
}

/// A persisted camera descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    pub name: String,
    pub url: String,
    pub rtsp_url: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub recording: bool,
    pub created_ts: i64,
    pub updated_ts: i64,
}

/// A lifecycle transition published on the camera event bus.
#[derive(Debug, Clone)]
pub enum CameraEvent {
    Added(Camera),
    Updated { camera: Camera, prev: Camera },
    Deleted(Camera),
}

impl CameraEvent {
    pub fn camera(&self) -> &Camera {
        match self {
            CameraEvent::Added(c) | CameraEvent::Deleted(c) => c,
            CameraEvent::Updated { camera, .. } => camera,
        }
    }
}
