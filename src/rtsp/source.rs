//! The RTSP protocol boundary.
//!
//! The real RTSP client is out of scope for this crate (see the top-level
//! design notes); the supervisor is built against this trait so the rest of
//! the engine — fan-out, recorder, HTTP surface — runs end to end against
//! [`StubRtspSource`] without any live camera hardware.

use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use futures::stream::Stream;

use crate::model::{CodecData, Packet};

#[derive(Debug)]
pub enum RtspError {
    DialFailed(String),
    Closed,
}

impl fmt::Display for RtspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtspError::DialFailed(msg) => write!(f, "RTSP dial failed: {}", msg),
            RtspError::Closed => write!(f, "RTSP session closed"),
        }
    }
}

impl StdError for RtspError {}

/// Out-of-band signals emitted alongside the packet stream.
#[derive(Debug, Clone)]
pub enum RtspSignal {
    CodecUpdate(Vec<CodecData>),
    StreamRtpStop,
}

pub type PacketStream = Pin<Box<dyn Stream<Item = Packet> + Send>>;
pub type SignalStream = Pin<Box<dyn Stream<Item = RtspSignal> + Send>>;

/// A live, dialed RTSP session.
pub trait RtspSession: Send {
    fn codecs(&self) -> Vec<CodecData>;
    fn signals(&mut self) -> SignalStream;
    fn packets(&mut self) -> PacketStream;
}

/// Dials RTSP sources. Implemented for real cameras by an adapter this crate
/// does not provide; implemented here by [`StubRtspSource`] for tests and for
/// running the gateway without hardware.
#[async_trait::async_trait]
pub trait RtspSource: Send + Sync {
    async fn dial(
        &self,
        url: &str,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Box<dyn RtspSession>, RtspError>;
}

pub mod stub {
    use super::*;
    use async_stream::stream;
    use std::time::Duration as StdDuration;
    use tokio::time::interval;

    /// Synthesizes an H.264 + PCMU stream: an IDR-tagged video packet every
    /// `idr_every`th frame at 25fps, and 50fps audio, so the supervisor,
    /// fan-out, and recorder can be exercised without real hardware.
    #[derive(Clone)]
    pub struct StubRtspSource {
        pub fail_urls: Vec<String>,
    }

    impl Default for StubRtspSource {
        fn default() -> Self {
            Self { fail_urls: Vec::new() }
        }
    }

    struct StubSession {
        codecs: Vec<CodecData>,
    }

    impl RtspSession for StubSession {
        fn codecs(&self) -> Vec<CodecData> {
            self.codecs.clone()
        }

        fn signals(&mut self) -> SignalStream {
            let codecs = self.codecs.clone();
            Box::pin(stream! {
                yield RtspSignal::CodecUpdate(codecs);
            })
        }

        fn packets(&mut self) -> PacketStream {
            Box::pin(stream! {
                let mut video_tick = interval(StdDuration::from_millis(40));
                let mut audio_tick = interval(StdDuration::from_millis(20));
                let mut frame: u64 = 0;
                loop {
                    tokio::select! {
                        _ = video_tick.tick() => {
                            let is_keyframe = frame % 50 == 0;
                            yield Packet {
                                substream: 0,
                                is_keyframe,
                                duration: StdDuration::from_millis(40),
                                time: std::time::SystemTime::now(),
                                payload: vec![0u8; 16],
                            };
                            frame += 1;
                        }
                        _ = audio_tick.tick() => {
                            yield Packet {
                                substream: 1,
                                is_keyframe: false,
                                duration: StdDuration::from_millis(20),
                                time: std::time::SystemTime::now(),
                                payload: vec![0u8; 8],
                            };
                        }
                    }
                }
            })
        }
    }

    #[async_trait::async_trait]
    impl RtspSource for StubRtspSource {
        async fn dial(
            &self,
            url: &str,
            _connect_timeout: Duration,
            _io_timeout: Duration,
        ) -> Result<Box<dyn RtspSession>, RtspError> {
            if self.fail_urls.iter().any(|u| u == url) {
                return Err(RtspError::DialFailed(format!("no route to {url}")));
            }
            Ok(Box::new(StubSession {
                codecs: vec![
                    CodecData::H264 {
                        sps: vec![0x67, 0x42],
                        pps: vec![0x68, 0xce],
                    },
                    CodecData::PcmMulaw {
                        sample_rate: 8000,
                        channels: 1,
                    },
                ],
            }))
        }
    }
}

pub use stub::StubRtspSource;
