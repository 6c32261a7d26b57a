//! Lifecycle owner of the live peer session
//!
//! Only this type creates or destroys a peer connection. A connection, its data
//! channel and the event receiver live and die together; `close` releases all of
//! them before a new `open` may build another.

use crate::config::NegotiationConfig;
use crate::error::{Result, SessionError};
use crate::events::{registration_json, synthesis_json};
use crate::peer::negotiation::{NegotiationRequest, Signaling};
use crate::peer::{DataChannel, MediaKind, PeerConnection, PeerConnector, PeerEvent};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Result of a successful `open`
#[derive(Debug)]
pub struct PeerOpened {
    /// Always the id passed to `open`
    pub session_id: String,
    pub endpoint: String,
    pub events: UnboundedReceiver<PeerEvent>,
}

struct ActivePeer {
    connection: Box<dyn PeerConnection>,
    data_channel: Box<dyn DataChannel>,
    session_id: String,
    endpoint: String,
    registered: bool,
}

pub struct PeerSessionManager {
    connector: Arc<dyn PeerConnector>,
    signaling: Arc<dyn Signaling>,
    config: NegotiationConfig,
    active: Option<ActivePeer>,
    resume_session_id: Option<String>,
    avatar_enabled: bool,
}

impl PeerSessionManager {
    pub fn new(connector: Arc<dyn PeerConnector>, signaling: Arc<dyn Signaling>, config: NegotiationConfig) -> Self {
        Self {
            connector,
            signaling,
            config,
            active: None,
            resume_session_id: None,
            avatar_enabled: false,
        }
    }

    /// Build a fresh connection and negotiate it against the candidate endpoints in order.
    pub async fn open(&mut self, session_id: &str) -> Result<PeerOpened> {
        if self.active.is_some() {
            debug!("Discarding previous peer connection before reopening");
            self.release().await;
        }

        let mut connection = self.connector.create().await?;
        match negotiate(self.signaling.as_ref(), &self.config, connection.as_mut(), session_id).await {
            Ok((data_channel, endpoint, events)) => {
                info!("Peer session {} negotiated via {}", session_id, endpoint);
                self.active = Some(ActivePeer {
                    connection,
                    data_channel,
                    session_id: session_id.to_string(),
                    endpoint: endpoint.clone(),
                    registered: false,
                });
                self.avatar_enabled = true;
                self.resume_session_id = Some(session_id.to_string());
                Ok(PeerOpened {
                    session_id: session_id.to_string(),
                    endpoint,
                    events,
                })
            }
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    debug!("Closing failed peer connection: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Announce the session id on a newly opened data channel.
    ///
    /// Must run before any synthesis request goes out on that channel.
    pub fn on_data_channel_open(&mut self) -> Result<()> {
        let active = self.active.as_mut().ok_or(SessionError::ChannelUnready)?;
        active.data_channel.send_text(registration_json(&active.session_id)?)?;
        active.registered = true;
        info!("Registered session {} on data channel", active.session_id);
        Ok(())
    }

    pub fn on_data_channel_closed(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.registered = false;
        }
    }

    pub fn is_channel_ready(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.registered && active.data_channel.is_open())
    }

    pub fn send_synthesis(&self, text: &str, lang: &str, target_session_id: &str) -> Result<()> {
        let active = self.active.as_ref().ok_or(SessionError::ChannelUnready)?;
        if !active.registered || !active.data_channel.is_open() {
            return Err(SessionError::ChannelUnready);
        }
        active
            .data_channel
            .send_text(synthesis_json(text, lang, target_session_id)?)
    }

    /// Release the connection and its tracks.
    ///
    /// The avatar flag is always cleared. With `preserve_identity` the resume id survives.
    pub async fn close(&mut self, preserve_identity: bool) {
        self.release().await;
        self.avatar_enabled = false;
        if !preserve_identity {
            self.resume_session_id = None;
        }
    }

    async fn release(&mut self) {
        if let Some(mut active) = self.active.take() {
            info!("Closing peer session {} ({})", active.session_id, active.endpoint);
            if let Err(e) = active.connection.close().await {
                warn!("Peer connection close failed: {}", e);
            }
        }
    }

    pub fn resume_session_id(&self) -> Option<&str> {
        self.resume_session_id.as_deref()
    }

    pub fn avatar_enabled(&self) -> bool {
        self.avatar_enabled
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.endpoint.as_str())
    }
}

async fn negotiate(
    signaling: &dyn Signaling,
    config: &NegotiationConfig,
    connection: &mut dyn PeerConnection,
    session_id: &str,
) -> Result<(Box<dyn DataChannel>, String, UnboundedReceiver<PeerEvent>)> {
    connection.add_recv_transceiver(MediaKind::Audio).await?;
    connection.add_recv_transceiver(MediaKind::Video).await?;
    let data_channel = connection.create_data_channel(&config.data_channel_label).await?;
    let events = connection
        .take_events()
        .ok_or_else(|| SessionError::Peer("peer events already taken".into()))?;

    let offer = connection.create_offer().await?;
    let request = NegotiationRequest::new(offer, session_id, config.auth_token.clone());

    if config.endpoints.is_empty() {
        return Err(SessionError::NegotiationFailure {
            attempts: 0,
            last_error: "no negotiation endpoints configured".into(),
        });
    }

    let mut last_error = String::new();
    for (index, endpoint) in config.endpoints.iter().enumerate() {
        debug!(
            "Negotiation attempt {}/{} against {}",
            index + 1,
            config.endpoints.len(),
            endpoint
        );

        let answer = match timeout(config.attempt_timeout, signaling.exchange(endpoint, &request)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                warn!("Negotiation with {} failed: {}", endpoint, e);
                last_error = e.to_string();
                continue;
            }
            Err(_) => {
                warn!("Negotiation with {} timed out after {:?}", endpoint, config.attempt_timeout);
                last_error = format!("{endpoint} timed out");
                continue;
            }
        };

        if let Some(server_id) = answer.session_id.as_deref() {
            if server_id != session_id {
                warn!("Ignoring server-assigned session id {} (keeping {})", server_id, session_id);
            }
        }

        // A remote description that fails to apply leaves the local offer pending
        if let Err(e) = connection.apply_answer(answer.description()).await {
            warn!("Answer from {} could not be applied: {}", endpoint, e);
            last_error = e.to_string();
            continue;
        }
        return Ok((data_channel, endpoint.clone(), events));
    }

    Err(SessionError::NegotiationFailure {
        attempts: config.endpoints.len(),
        last_error,
    })
}
