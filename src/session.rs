//! Conversation session identity and mode

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which channels a conversation uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    Text,
    TextVoice,
    Avatar,
    AvatarText,
}

impl ConversationMode {
    /// Needs the standalone voice socket
    pub fn uses_voice(&self) -> bool {
        matches!(self, Self::TextVoice)
    }

    /// Needs a live peer media session
    pub fn uses_avatar(&self) -> bool {
        matches!(self, Self::Avatar | Self::AvatarText)
    }

    pub fn is_realtime(&self) -> bool {
        self.uses_voice() || self.uses_avatar()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::TextVoice => "text+voice",
            Self::Avatar => "avatar",
            Self::AvatarText => "avatar+text",
        }
    }
}

pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// A conversation with the persona.
///
/// `session_id` is stable for the device and never changes. `live_peer_session_id`
/// exists only while a peer session is open, or while one is deliberately suspended.
#[derive(Debug, Clone)]
pub struct Session {
    session_id: String,
    live_peer_session_id: Option<String>,
    mode: ConversationMode,
}

impl Session {
    pub fn new(mode: ConversationMode) -> Self {
        Self::with_id(generate_session_id(), mode)
    }

    pub fn with_id(session_id: impl Into<String>, mode: ConversationMode) -> Self {
        Self {
            session_id: session_id.into(),
            live_peer_session_id: None,
            mode,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn live_peer_session_id(&self) -> Option<&str> {
        self.live_peer_session_id.as_deref()
    }

    pub fn mode(&self) -> ConversationMode {
        self.mode
    }

    /// Identifier synthesis requests are addressed to
    pub fn destination_id(&self) -> &str {
        self.live_peer_session_id.as_deref().unwrap_or(&self.session_id)
    }

    pub(crate) fn set_mode(&mut self, mode: ConversationMode) {
        self.mode = mode;
    }

    pub(crate) fn set_live_peer_session_id(&mut self, id: String) {
        self.live_peer_session_id = Some(id);
    }

    pub(crate) fn clear_live_peer_session_id(&mut self) -> Option<String> {
        self.live_peer_session_id.take()
    }
}
