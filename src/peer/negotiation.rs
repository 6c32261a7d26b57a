//! Offer/answer exchange with the negotiation endpoints

use crate::error::Result;
use crate::peer::{SdpType, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Body posted to a negotiation endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpType,
    /// Client-generated id both sides key the session on
    #[serde(rename = "sessionid")]
    pub session_id: String,
    pub auth_token: Option<String>,
}

impl NegotiationRequest {
    pub fn new(offer: SessionDescription, session_id: &str, auth_token: Option<String>) -> Self {
        Self {
            sdp: offer.sdp,
            kind: offer.kind,
            session_id: session_id.to_string(),
            auth_token,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NegotiationAnswer {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpType,
    /// Some servers echo or invent an id; it is never adopted
    #[serde(default, rename = "sessionid")]
    pub session_id: Option<String>,
}

impl NegotiationAnswer {
    pub fn description(&self) -> SessionDescription {
        SessionDescription {
            sdp: self.sdp.clone(),
            kind: self.kind,
        }
    }
}

#[async_trait]
pub trait Signaling: Send + Sync {
    async fn exchange(&self, endpoint: &str, request: &NegotiationRequest) -> Result<NegotiationAnswer>;
}

/// Plain HTTP POST signaling
#[derive(Debug, Clone, Default)]
pub struct HttpSignaling {
    client: reqwest::Client,
}

impl HttpSignaling {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Signaling for HttpSignaling {
    async fn exchange(&self, endpoint: &str, request: &NegotiationRequest) -> Result<NegotiationAnswer> {
        debug!("Posting offer to {}", endpoint);
        let answer = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json::<NegotiationAnswer>()
            .await?;
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_field_names() {
        let request = NegotiationRequest::new(SessionDescription::offer("v=0"), "abc", Some("tok".into()));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["sdp"], "v=0");
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sessionid"], "abc");
        assert_eq!(json["authToken"], "tok");
    }

    #[test]
    fn test_answer_without_session_id() {
        let answer: NegotiationAnswer = serde_json::from_str(r#"{"sdp":"v=0","type":"answer"}"#).unwrap();
        assert!(answer.session_id.is_none());
        assert_eq!(answer.description(), SessionDescription::answer("v=0"));
    }
}
