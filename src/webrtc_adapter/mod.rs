//! WebRTC adapter: SDP negotiation plus the per-session relay task that
//! drives a live viewer's or playback session's packet socket into a
//! negotiated peer connection.
//!
//! Split into `PeerConnectionFactory` (connection/track construction) and the
//! per-session relay here, mirroring the teacher's
//! `PeerConnectionManager`/`WebRTCSession` split. A [`NullWebRtcSink`] stand-in
//! is provided so the relay's keyframe-gating and watchdog behaviour can be
//! exercised without a browser on the other end.

pub mod peer_connection;

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::model::{CodecData, Packet};
use crate::webrtc_adapter::peer_connection::PeerConnectionFactory;

const NO_PACKET_WATCHDOG: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum WebRtcAdapterError {
    Connection(String),
    Sdp(String),
    Media(String),
    Codec(String),
}

impl fmt::Display for WebRtcAdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebRtcAdapterError::Connection(msg) => write!(f, "WebRTC connection error: {}", msg),
            WebRtcAdapterError::Sdp(msg) => write!(f, "SDP error: {}", msg),
            WebRtcAdapterError::Media(msg) => write!(f, "media error: {}", msg),
            WebRtcAdapterError::Codec(msg) => write!(f, "codec error: {}", msg),
        }
    }
}

impl StdError for WebRtcAdapterError {}

/// Accepts packets for one negotiated session, already split by substream.
#[async_trait]
pub trait PacketWriter: Send + Sync {
    async fn write(&self, packet: &Packet) -> Result<(), WebRtcAdapterError>;
}

/// Negotiates a session and returns the writer the relay task should drive.
#[async_trait]
pub trait WebRtcSink: Send + Sync {
    async fn negotiate(
        &self,
        offer_sdp_b64: &str,
        codecs: &[CodecData],
    ) -> Result<(String, Box<dyn PacketWriter>), WebRtcAdapterError>;
}

/// The real, `webrtc`-crate-backed sink.
pub struct RealWebRtcSink {
    factory: PeerConnectionFactory,
}

impl RealWebRtcSink {
    pub fn new(ice_servers: Vec<crate::config::IceServerConfig>) -> Self {
        Self {
            factory: PeerConnectionFactory::new(ice_servers),
        }
    }
}

#[async_trait]
impl WebRtcSink for RealWebRtcSink {
    async fn negotiate(
        &self,
        offer_sdp_b64: &str,
        codecs: &[CodecData],
    ) -> Result<(String, Box<dyn PacketWriter>), WebRtcAdapterError> {
        let offer_sdp = base64::engine::general_purpose::STANDARD
            .decode(offer_sdp_b64)
            .map_err(|e| WebRtcAdapterError::Sdp(format!("invalid base64 offer: {e}")))?;
        let offer_sdp = String::from_utf8(offer_sdp)
            .map_err(|e| WebRtcAdapterError::Sdp(format!("offer is not utf8: {e}")))?;

        let pc = self.factory.create_peer_connection().await?;
        let tracks = self.factory.add_tracks(&pc, codecs).await?;
        let answer_sdp = PeerConnectionFactory::handle_offer(&pc, &offer_sdp).await?;
        let answer_b64 = base64::engine::general_purpose::STANDARD.encode(answer_sdp);

        Ok((answer_b64, Box::new(TrackPacketWriter { _pc: pc, tracks })))
    }
}

struct TrackPacketWriter {
    _pc: Arc<webrtc::peer_connection::RTCPeerConnection>,
    tracks: Vec<Arc<webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP>>,
}

#[async_trait]
impl PacketWriter for TrackPacketWriter {
    async fn write(&self, packet: &Packet) -> Result<(), WebRtcAdapterError> {
        let Some(track) = self.tracks.get(packet.substream as usize) else {
            return Ok(());
        };
        let rtp_packet = rtp::packet::Packet::unmarshal(&mut packet.payload.as_slice())
            .map_err(|e| WebRtcAdapterError::Media(format!("unmarshal RTP: {e}")))?;
        track
            .write_rtp(&rtp_packet)
            .await
            .map_err(|e| WebRtcAdapterError::Media(format!("write_rtp: {e}")))?;
        Ok(())
    }
}

/// A no-network stand-in sink, used by tests to exercise the relay's
/// keyframe-gating and watchdog behaviour. Counts packets and keyframes
/// rather than negotiating anything real.
#[derive(Default)]
pub struct NullWebRtcSink {
    pub writer: Arc<CountingPacketWriter>,
}

#[derive(Default)]
pub struct CountingPacketWriter {
    pub packets: std::sync::atomic::AtomicU64,
    pub keyframes: std::sync::atomic::AtomicU64,
}

#[async_trait]
impl PacketWriter for CountingPacketWriter {
    async fn write(&self, packet: &Packet) -> Result<(), WebRtcAdapterError> {
        self.packets.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if packet.is_keyframe {
            self.keyframes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        Ok(())
    }
}

struct ArcPacketWriter(Arc<CountingPacketWriter>);

#[async_trait]
impl PacketWriter for ArcPacketWriter {
    async fn write(&self, packet: &Packet) -> Result<(), WebRtcAdapterError> {
        self.0.write(packet).await
    }
}

#[async_trait]
impl WebRtcSink for NullWebRtcSink {
    async fn negotiate(
        &self,
        _offer_sdp_b64: &str,
        _codecs: &[CodecData],
    ) -> Result<(String, Box<dyn PacketWriter>), WebRtcAdapterError> {
        Ok((String::new(), Box::new(ArcPacketWriter(self.writer.clone()))))
    }
}

/// Relay a packet socket into a negotiated writer, applying the gating rule:
/// before the first video keyframe, drop packets unless the whole codec set
/// is audio-only; reset the no-packet watchdog on every keyframe (or on any
/// packet for audio-only streams); tear down on expiry or on any write error.
///
/// `on_teardown` is invoked exactly once, whether the relay ends because the
/// socket closed, the watchdog expired, or a write failed — callers use it to
/// call `delete_viewer`/`playback_delete`.
pub async fn relay<F, Fut>(
    mut receiver: mpsc::Receiver<Arc<Packet>>,
    writer: Box<dyn PacketWriter>,
    audio_only: bool,
    on_teardown: F,
) where
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = ()> + Send,
{
    let mut keyframe_seen = audio_only;
    let mut last_activity = Instant::now();

    loop {
        let remaining = NO_PACKET_WATCHDOG.saturating_sub(last_activity.elapsed());
        let packet = tokio::time::timeout(remaining, receiver.recv()).await;

        let packet = match packet {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(_) => {
                log::warn!("webrtc relay: no packets for {:?}, tearing down", NO_PACKET_WATCHDOG);
                break;
            }
        };

        if !keyframe_seen {
            if packet.is_keyframe {
                keyframe_seen = true;
            } else {
                continue;
            }
        }

        if packet.is_keyframe || audio_only {
            last_activity = Instant::now();
        }

        if writer.write(&packet).await.is_err() {
            break;
        }
    }

    on_teardown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration as StdDuration;

    fn packet(is_keyframe: bool) -> Arc<Packet> {
        Arc::new(Packet {
            substream: 0,
            is_keyframe,
            duration: StdDuration::from_millis(40),
            time: std::time::SystemTime::now(),
            payload: vec![1, 2, 3],
        })
    }

    #[tokio::test]
    async fn drops_packets_before_first_keyframe() {
        let (tx, rx) = mpsc::channel(16);
        let counter = Arc::new(CountingPacketWriter::default());
        tx.send(packet(false)).await.unwrap();
        tx.send(packet(false)).await.unwrap();
        tx.send(packet(true)).await.unwrap();
        tx.send(packet(false)).await.unwrap();
        drop(tx);

        let torn_down = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let torn_down_clone = torn_down.clone();
        relay(rx, Box::new(ArcPacketWriter(counter.clone())), false, || async move {
            torn_down_clone.store(true, Ordering::SeqCst);
        })
        .await;

        assert_eq!(counter.packets.load(Ordering::SeqCst), 2);
        assert_eq!(counter.keyframes.load(Ordering::SeqCst), 1);
        assert!(torn_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn audio_only_accepts_immediately() {
        let (tx, rx) = mpsc::channel(16);
        let counter = Arc::new(CountingPacketWriter::default());
        tx.send(packet(false)).await.unwrap();
        drop(tx);

        relay(rx, Box::new(ArcPacketWriter(counter.clone())), true, || async {}).await;

        assert_eq!(counter.packets.load(Ordering::SeqCst), 1);
    }
}
