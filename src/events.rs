//! Wire messages for both synthesis channels and the events surfaced to the UI

use crate::error::Result;
use crate::session::ConversationMode;
use serde::{Deserialize, Serialize};

/// `{ sessionId }`: first voice-socket message and data-channel registration
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration<'a> {
    pub session_id: &'a str,
}

/// `{ text, lang, sessionId }`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisMessage<'a> {
    pub text: &'a str,
    pub lang: &'a str,
    pub session_id: &'a str,
}

pub fn registration_json(session_id: &str) -> Result<String> {
    Ok(serde_json::to_string(&Registration { session_id })?)
}

pub fn synthesis_json(text: &str, lang: &str, session_id: &str) -> Result<String> {
    Ok(serde_json::to_string(&SynthesisMessage { text, lang, session_id })?)
}

#[derive(Debug, Deserialize)]
struct RawControl {
    #[serde(rename = "type")]
    kind: Option<String>,
    sample_rate: Option<u32>,
    channels: Option<u16>,
    error: Option<serde_json::Value>,
}

/// JSON control frames from the voice socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceControl {
    /// Format announcement preceding PCM frames
    Start {
        sample_rate: Option<u32>,
        channels: Option<u16>,
    },
    /// Synthesis of the current request finished
    End,
    Error(String),
    Unknown(String),
}

impl VoiceControl {
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawControl = serde_json::from_str(text)?;
        if let Some(error) = raw.error {
            let message = match error {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            return Ok(VoiceControl::Error(message));
        }
        Ok(match raw.kind.as_deref() {
            Some("start") => VoiceControl::Start {
                sample_rate: raw.sample_rate,
                channels: raw.channels,
            },
            Some("end") => VoiceControl::End,
            Some(other) => VoiceControl::Unknown(other.to_string()),
            None => VoiceControl::Unknown(String::new()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawPeerMessage {
    event: Option<String>,
}

/// JSON messages arriving on the peer data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Done,
    Other(String),
}

impl PeerMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawPeerMessage = serde_json::from_str(text)?;
        Ok(match raw.event.as_deref() {
            Some("done") => PeerMessage::Done,
            Some(other) => PeerMessage::Other(other.to_string()),
            None => PeerMessage::Other(String::new()),
        })
    }
}

/// Signals for the surrounding application
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ModeChanged(ConversationMode),
    /// Peer session negotiated and its data channel registered
    AvatarReady { session_id: String },
    StreamAttached,
    SpeechStarted,
    SpeechEnded,
    /// A realtime channel failed; the UI should offer a cheaper mode
    ConnectionError { reason: String },
    NegotiationFailed { reason: String },
    /// Idle threshold reached; the live session was suspended
    SuspendPrompt,
    Resumed,
    CreditsChanged { balance: u64 },
    CreditsExhausted { balance: u64, required: u64 },
    /// Realtime subsystems unavailable, continuing in a cheaper mode
    Degraded {
        from: ConversationMode,
        to: ConversationMode,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_serialization() {
        let json = synthesis_json("hello", "en", "abc").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["text"], "hello");
        assert_eq!(parsed["lang"], "en");
        assert_eq!(parsed["sessionId"], "abc");

        let json = registration_json("abc").unwrap();
        assert_eq!(json, r#"{"sessionId":"abc"}"#);
    }

    #[test]
    fn test_voice_control_parsing() {
        assert_eq!(
            VoiceControl::parse(r#"{"type":"start","sample_rate":16000,"channels":2}"#).unwrap(),
            VoiceControl::Start { sample_rate: Some(16000), channels: Some(2) }
        );
        assert_eq!(VoiceControl::parse(r#"{"type":"end"}"#).unwrap(), VoiceControl::End);
        assert_eq!(
            VoiceControl::parse(r#"{"error":"quota"}"#).unwrap(),
            VoiceControl::Error("quota".into())
        );
        assert_eq!(
            VoiceControl::parse(r#"{"error":{"code":5}}"#).unwrap(),
            VoiceControl::Error(r#"{"code":5}"#.into())
        );
        assert!(VoiceControl::parse("not json").is_err());
    }

    #[test]
    fn test_peer_message_parsing() {
        assert_eq!(PeerMessage::parse(r#"{"event":"done"}"#).unwrap(), PeerMessage::Done);
        assert_eq!(
            PeerMessage::parse(r#"{"event":"speaking"}"#).unwrap(),
            PeerMessage::Other("speaking".into())
        );
    }
}
