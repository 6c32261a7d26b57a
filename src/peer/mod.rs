//! Peer media session: connection seams, signaling and lifecycle management

pub mod manager;
pub mod negotiation;
#[cfg(feature = "webrtc")]
pub mod webrtc_backend;

pub use manager::{PeerOpened, PeerSessionManager};
pub use negotiation::{HttpSignaling, NegotiationAnswer, NegotiationRequest, Signaling};

use crate::error::{Result, SessionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpType::Answer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Read-only view of how far an inbound track has played, in seconds.
pub trait PlaybackProbe: Send + Sync {
    fn position(&self) -> Option<f64>;
}

pub enum PeerEvent {
    DataChannelOpen,
    DataChannelMessage(String),
    DataChannelClosed,
    TrackAttached {
        kind: MediaKind,
        probe: Option<Arc<dyn PlaybackProbe>>,
    },
    ConnectionFailed(String),
    Disconnected,
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::DataChannelOpen => write!(f, "DataChannelOpen"),
            PeerEvent::DataChannelMessage(text) => write!(f, "DataChannelMessage({text:?})"),
            PeerEvent::DataChannelClosed => write!(f, "DataChannelClosed"),
            PeerEvent::TrackAttached { kind, probe } => {
                write!(f, "TrackAttached({kind:?}, probe: {})", probe.is_some())
            }
            PeerEvent::ConnectionFailed(reason) => write!(f, "ConnectionFailed({reason:?})"),
            PeerEvent::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Ordered outbound channel created alongside the connection
pub trait DataChannel: Send + Sync {
    fn is_open(&self) -> bool;
    fn send_text(&self, text: String) -> Result<()>;
}

#[async_trait]
pub trait PeerConnection: Send {
    async fn add_recv_transceiver(&mut self, kind: MediaKind) -> Result<()>;

    async fn create_data_channel(&mut self, label: &str) -> Result<Box<dyn DataChannel>>;

    /// Create the offer, apply it locally and wait for candidate gathering.
    async fn create_offer(&mut self) -> Result<SessionDescription>;

    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<()>;

    /// Event stream for this connection. Yields `Some` once.
    fn take_events(&mut self) -> Option<UnboundedReceiver<PeerEvent>>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(&self) -> Result<Box<dyn PeerConnection>>;
}

/// Connector for builds without a media backend
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledConnector;

#[async_trait]
impl PeerConnector for DisabledConnector {
    async fn create(&self) -> Result<Box<dyn PeerConnection>> {
        Err(SessionError::Peer("peer media support is not compiled in".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_wire_format() {
        let json = serde_json::to_value(SessionDescription::offer("v=0")).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0");

        let parsed: SessionDescription = serde_json::from_str(r#"{"sdp":"v=0","type":"answer"}"#).unwrap();
        assert_eq!(parsed.kind, SdpType::Answer);
    }

    #[tokio::test]
    async fn test_disabled_connector_refuses() {
        assert!(matches!(DisabledConnector.create().await, Err(SessionError::Peer(_))));
    }
}
