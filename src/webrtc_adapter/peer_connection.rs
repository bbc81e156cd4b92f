//! Peer connection construction: media engine, ICE servers, and track
//! creation. Adapted from the teacher's `webrtc::peer_connection` module,
//! trimmed of NAT1:1/UDP-mux desktop-capture plumbing this gateway has no use
//! for, and retargeted at the gateway's codec set (H.264 video, PCMU/PCMA/
//! Opus audio) instead of the desktop core's H.264/VP8/VP9 screen-share set.

use std::sync::Arc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_PCMA, MIME_TYPE_PCMU};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::config::IceServerConfig;
use crate::model::CodecData;
use crate::webrtc_adapter::WebRtcAdapterError;

pub struct PeerConnectionFactory {
    ice_servers: Vec<IceServerConfig>,
}

impl PeerConnectionFactory {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Self {
        Self { ice_servers }
    }

    pub async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, WebRtcAdapterError> {
        let setting_engine = SettingEngine::default();

        let mut media_engine = MediaEngine::default();
        register_codecs(&mut media_engine)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| WebRtcAdapterError::Connection(format!("interceptor registry: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let ice_servers = self
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(config)
            .await
            .map_err(|e| WebRtcAdapterError::Connection(format!("create peer connection: {e}")))?;

        Ok(Arc::new(pc))
    }

    /// Build one `TrackLocalStaticRTP` per codec in the camera's codec list,
    /// in declaration order, and add each to the peer connection.
    pub async fn add_tracks(
        &self,
        pc: &Arc<RTCPeerConnection>,
        codecs: &[CodecData],
    ) -> Result<Vec<Arc<TrackLocalStaticRTP>>, WebRtcAdapterError> {
        let mut tracks = Vec::with_capacity(codecs.len());
        for (idx, codec) in codecs.iter().enumerate() {
            let capability = capability_for(codec);
            let kind = if codec.is_video() { "video" } else { "audio" };
            let track = Arc::new(TrackLocalStaticRTP::new(
                capability,
                format!("{kind}-{idx}"),
                "gateway".to_string(),
            ));
            pc.add_track(track.clone())
                .await
                .map_err(|e| WebRtcAdapterError::Media(format!("add track {idx}: {e}")))?;
            tracks.push(track);
        }
        Ok(tracks)
    }

    pub async fn handle_offer(
        pc: &Arc<RTCPeerConnection>,
        offer_sdp: &str,
    ) -> Result<String, WebRtcAdapterError> {
        let offer = RTCSessionDescription::offer(offer_sdp.to_string())
            .map_err(|e| WebRtcAdapterError::Sdp(format!("invalid offer: {e}")))?;

        pc.set_remote_description(offer)
            .await
            .map_err(|e| WebRtcAdapterError::Sdp(format!("set remote description: {e}")))?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| WebRtcAdapterError::Sdp(format!("create answer: {e}")))?;

        let mut gather_complete = pc.gathering_complete_promise().await;

        pc.set_local_description(answer.clone())
            .await
            .map_err(|e| WebRtcAdapterError::Sdp(format!("set local description: {e}")))?;

        let _ = gather_complete.recv().await;

        Ok(pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .unwrap_or(answer.sdp))
    }
}

fn register_codecs(media_engine: &mut MediaEngine) -> Result<(), WebRtcAdapterError> {
    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_H264.to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                        .to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .map_err(|e| WebRtcAdapterError::Connection(format!("register H264: {e}")))?;

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_PCMU.to_string(),
                    clock_rate: 8000,
                    channels: 1,
                    sdp_fmtp_line: "".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 0,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .map_err(|e| WebRtcAdapterError::Connection(format!("register PCMU: {e}")))?;

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_PCMA.to_string(),
                    clock_rate: 8000,
                    channels: 1,
                    sdp_fmtp_line: "".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 8,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .map_err(|e| WebRtcAdapterError::Connection(format!("register PCMA: {e}")))?;

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .map_err(|e| WebRtcAdapterError::Connection(format!("register Opus: {e}")))?;

    Ok(())
}

fn capability_for(codec: &CodecData) -> RTCRtpCodecCapability {
    match codec {
        CodecData::H264 { .. } => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                .to_string(),
            rtcp_feedback: vec![],
        },
        CodecData::PcmMulaw { sample_rate, channels } => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_PCMU.to_string(),
            clock_rate: *sample_rate,
            channels: *channels as u16,
            sdp_fmtp_line: "".to_string(),
            rtcp_feedback: vec![],
        },
        CodecData::PcmAlaw { sample_rate, channels } => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_PCMA.to_string(),
            clock_rate: *sample_rate,
            channels: *channels as u16,
            sdp_fmtp_line: "".to_string(),
            rtcp_feedback: vec![],
        },
        CodecData::Opus { sample_rate, channels } => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: *sample_rate,
            channels: *channels as u16,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
            rtcp_feedback: vec![],
        },
    }
}
