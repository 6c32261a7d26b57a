//! Error taxonomy shared by every realtime component

use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every candidate negotiation endpoint rejected the offer or timed out.
    #[error("Negotiation failed after {attempts} candidate endpoint(s): {last_error}")]
    NegotiationFailure { attempts: usize, last_error: String },

    /// A synthesis request found no open channel.
    #[error("No synthesis channel is ready")]
    ChannelUnready,

    /// The voice socket exhausted its reconnect budget.
    #[error("Voice channel gave up after {attempts} reconnect attempt(s)")]
    ChannelTerminalFailure { attempts: u32 },

    #[error("Inbound video stalled {stalls} times within {window:?}")]
    PlaybackStall { stalls: usize, window: Duration },

    #[error("Insufficient credits: {balance} available, {required} required")]
    CreditExhaustion { balance: u64, required: u64 },

    #[error("Unsupported audio format: {0}")]
    InvalidFormat(String),

    #[error("Peer connection error: {0}")]
    Peer(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout")]
    Timeout,

    #[error("Other error: {0}")]
    Other(String),
}

impl SessionError {
    /// Failures the UI must hear about. Everything else is recovered locally.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            SessionError::NegotiationFailure { .. }
                | SessionError::ChannelTerminalFailure { .. }
                | SessionError::PlaybackStall { .. }
                | SessionError::CreditExhaustion { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
