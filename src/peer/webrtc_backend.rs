//! webrtc-rs implementation of the peer connection seams

use crate::error::{Result, SessionError};
use crate::peer::{DataChannel, MediaKind, PeerConnection, PeerConnector, PeerEvent, PlaybackProbe, SessionDescription};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

fn peer_err(e: webrtc::Error) -> SessionError {
    SessionError::Peer(e.to_string())
}

pub struct WebRtcConnector {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(peer_err)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(peer_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn create(&self) -> Result<Box<dyn PeerConnection>> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await.map_err(peer_err)?);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let state_tx = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!("Peer connection state: {}", state);
            let event = match state {
                RTCPeerConnectionState::Failed => Some(PeerEvent::ConnectionFailed("ICE failed".into())),
                RTCPeerConnectionState::Disconnected => Some(PeerEvent::Disconnected),
                _ => None,
            };
            if let Some(event) = event {
                let _ = state_tx.send(event);
            }
            Box::pin(async {})
        }));

        let track_tx = events_tx.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = track_tx.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Video => MediaKind::Video,
                        _ => MediaKind::Audio,
                    };
                    info!("Inbound {:?} track attached ({})", kind, track.codec().capability.mime_type);

                    let probe = if kind == MediaKind::Video {
                        let probe = Arc::new(RtpClockProbe::new(track.codec().capability.clock_rate));
                        tokio::spawn(follow_track(track, probe.clone()));
                        Some(probe as Arc<dyn PlaybackProbe>)
                    } else {
                        // Audio still has to be read or the receive buffer fills
                        tokio::spawn(drain_track(track));
                        None
                    };
                    let _ = tx.send(PeerEvent::TrackAttached { kind, probe });
                })
            },
        ));

        Ok(Box::new(WebRtcConnection {
            pc,
            events_tx,
            events_rx: Some(events_rx),
        }))
    }
}

struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    events_tx: UnboundedSender<PeerEvent>,
    events_rx: Option<UnboundedReceiver<PeerEvent>>,
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn add_recv_transceiver(&mut self, kind: MediaKind) -> Result<()> {
        let codec = match kind {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        };
        self.pc
            .add_transceiver_from_kind(
                codec,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(peer_err)?;
        Ok(())
    }

    async fn create_data_channel(&mut self, label: &str) -> Result<Box<dyn DataChannel>> {
        let dc = self
            .pc
            .create_data_channel(
                label,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(peer_err)?;

        let open_tx = self.events_tx.clone();
        dc.on_open(Box::new(move || {
            let _ = open_tx.send(PeerEvent::DataChannelOpen);
            Box::pin(async {})
        }));

        let message_tx = self.events_tx.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = message_tx.send(PeerEvent::DataChannelMessage(text));
                }
                Err(_) => warn!("Dropping non-UTF-8 data channel message"),
            }
            Box::pin(async {})
        }));

        let close_tx = self.events_tx.clone();
        dc.on_close(Box::new(move || {
            let _ = close_tx.send(PeerEvent::DataChannelClosed);
            Box::pin(async {})
        }));

        Ok(Box::new(WebRtcDataChannel::spawn(dc)))
    }

    async fn create_offer(&mut self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await.map_err(peer_err)?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await.map_err(peer_err)?;
        let _ = gathered.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| SessionError::Peer("no local description after gathering".into()))?;
        Ok(SessionDescription::offer(local.sdp))
    }

    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<()> {
        let answer = RTCSessionDescription::answer(answer.sdp).map_err(peer_err)?;
        self.pc.set_remote_description(answer).await.map_err(peer_err)
    }

    fn take_events(&mut self) -> Option<UnboundedReceiver<PeerEvent>> {
        self.events_rx.take()
    }

    async fn close(&mut self) -> Result<()> {
        self.pc.close().await.map_err(peer_err)
    }
}

/// Sends go through one task so they leave in call order
struct WebRtcDataChannel {
    dc: Arc<RTCDataChannel>,
    tx: UnboundedSender<String>,
}

impl WebRtcDataChannel {
    fn spawn(dc: Arc<RTCDataChannel>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer = dc.clone();
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = writer.send_text(text).await {
                    warn!("Data channel send failed: {}", e);
                }
            }
        });
        Self { dc, tx }
    }
}

impl DataChannel for WebRtcDataChannel {
    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn send_text(&self, text: String) -> Result<()> {
        self.tx.send(text).map_err(|_| SessionError::ChannelClosed)
    }
}

/// Playback position derived from RTP timestamps of received packets
struct RtpClockProbe {
    clock_rate: u32,
    ticks: AtomicU64,
    started: AtomicBool,
}

impl RtpClockProbe {
    fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate: clock_rate.max(1),
            ticks: AtomicU64::new(0),
            started: AtomicBool::new(false),
        }
    }
}

impl PlaybackProbe for RtpClockProbe {
    fn position(&self) -> Option<f64> {
        if !self.started.load(Ordering::Acquire) {
            return None;
        }
        Some(self.ticks.load(Ordering::Acquire) as f64 / self.clock_rate as f64)
    }
}

async fn follow_track(track: Arc<TrackRemote>, probe: Arc<RtpClockProbe>) {
    let mut previous: Option<u32> = None;
    while let Ok((packet, _)) = track.read_rtp().await {
        let timestamp = packet.header.timestamp;
        if let Some(prev) = previous {
            let delta = timestamp.wrapping_sub(prev);
            // Reordered packets show up as huge forward jumps
            if delta < u32::MAX / 2 {
                probe.ticks.fetch_add(delta as u64, Ordering::AcqRel);
                previous = Some(timestamp);
            }
        } else {
            previous = Some(timestamp);
            probe.started.store(true, Ordering::Release);
        }
    }
    debug!("Video track ended");
}

async fn drain_track(track: Arc<TrackRemote>) {
    while track.read_rtp().await.is_ok() {}
    debug!("Audio track ended");
}
