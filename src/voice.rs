//! Voice socket client
//!
//! One supervisor task per `connect()` owns the socket. Each connection is split
//! into a read loop and a writer task fed over mpsc, so synthesis requests from the
//! controller never contend with inbound audio. Unexpected closes are retried a
//! bounded number of times; `close()` disables that path before tearing down.

use crate::config::VoiceChannelConfig;
use crate::error::{Result, SessionError};
use crate::events::{registration_json, synthesis_json, VoiceControl};
use crate::playback::PlaybackHandle;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WriterSlot = watch::Sender<Option<mpsc::UnboundedSender<Message>>>;

/// What the voice socket reports to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    Opened,
    Format {
        sample_rate: Option<u32>,
        channels: Option<u16>,
    },
    /// Completion marker for the request in flight
    Done,
    Error(String),
    /// Connection dropped; a retry may follow
    Closed,
    /// Reconnect budget exhausted, no further retries
    TerminalFailure { attempts: u32 },
}

/// Port/path assignment returned by the setup call
#[derive(Debug, Deserialize)]
struct VoiceSetup {
    port: u16,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    host: Option<String>,
}

pub struct VoiceChannelClient {
    config: VoiceChannelConfig,
    session_id: String,
    generation: u64,
    http: reqwest::Client,
    playback: PlaybackHandle,
    events: mpsc::UnboundedSender<(u64, VoiceEvent)>,
    writer: Arc<WriterSlot>,
    reconnect: Arc<AtomicBool>,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl VoiceChannelClient {
    /// Events are tagged with `generation` so a torn-down client's leftovers can be told apart.
    pub fn new(
        config: VoiceChannelConfig,
        session_id: impl Into<String>,
        generation: u64,
        playback: PlaybackHandle,
        events: mpsc::UnboundedSender<(u64, VoiceEvent)>,
    ) -> Self {
        let (writer, _) = watch::channel(None);
        Self {
            config,
            session_id: session_id.into(),
            generation,
            http: reqwest::Client::new(),
            playback,
            events,
            writer: Arc::new(writer),
            reconnect: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            supervisor: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start (or restart after a terminal failure) the connection supervisor.
    pub fn connect(&mut self) {
        if let Some(task) = &self.supervisor {
            if !task.is_finished() {
                debug!("Voice channel supervisor already running");
                return;
            }
        }

        self.cancel = CancellationToken::new();
        self.reconnect.store(true, Ordering::SeqCst);

        let supervisor = Supervisor {
            config: self.config.clone(),
            session_id: self.session_id.clone(),
            generation: self.generation,
            http: self.http.clone(),
            playback: self.playback.clone(),
            events: self.events.clone(),
            writer: self.writer.clone(),
            reconnect: self.reconnect.clone(),
            cancel: self.cancel.clone(),
        };
        self.supervisor = Some(tokio::spawn(supervisor.run()));
    }

    pub fn is_open(&self) -> bool {
        self.writer.borrow().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Send a synthesis request. Fails fast when the socket is not open.
    pub fn synthesize(&self, text: &str, lang: &str, target_session_id: &str) -> Result<()> {
        let payload = synthesis_json(text, lang, target_session_id)?;
        let slot = self.writer.borrow();
        let tx = slot.as_ref().ok_or(SessionError::ChannelUnready)?;
        tx.send(Message::Text(payload.into()))
            .map_err(|_| SessionError::ChannelUnready)?;
        debug!("Voice synthesis request sent ({} chars)", text.len());
        Ok(())
    }

    /// Intentional close. Disables reconnects first so the close is never retried.
    pub async fn close(&mut self) {
        self.reconnect.store(false, Ordering::SeqCst);

        if let Some(tx) = self.writer.send_replace(None) {
            let _ = tx.send(Message::Close(None));
        }
        self.cancel.cancel();

        if let Some(mut task) = self.supervisor.take() {
            if tokio::time::timeout(Duration::from_secs(2), &mut task).await.is_err() {
                warn!("Voice channel supervisor did not stop in time, aborting");
                task.abort();
            }
        }
        info!("Voice channel closed");
    }
}

impl Drop for VoiceChannelClient {
    fn drop(&mut self) {
        self.reconnect.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(task) = self.supervisor.take() {
            task.abort();
        }
    }
}

struct Supervisor {
    config: VoiceChannelConfig,
    session_id: String,
    generation: u64,
    http: reqwest::Client,
    playback: PlaybackHandle,
    events: mpsc::UnboundedSender<(u64, VoiceEvent)>,
    writer: Arc<WriterSlot>,
    reconnect: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self) {
        let max = self.config.max_reconnect_attempts;
        let mut failures: u32 = 0;

        loop {
            if !self.wants_reconnect() {
                break;
            }

            match self.connect_once().await {
                Ok(ws) => {
                    failures = 0;
                    self.serve(ws).await;
                    self.writer.send_replace(None);
                    self.emit(VoiceEvent::Closed);
                }
                Err(e) => warn!("Voice channel connect failed: {}", e),
            }

            if !self.wants_reconnect() {
                debug!("Voice channel closed intentionally, not retrying");
                break;
            }

            failures += 1;
            if failures > max {
                error!("Voice channel gave up after {} reconnect attempts", max);
                self.reconnect.store(false, Ordering::SeqCst);
                self.emit(VoiceEvent::TerminalFailure { attempts: max });
                break;
            }

            info!(
                "Voice channel reconnecting in {:?} (attempt {}/{})",
                self.config.reconnect_delay, failures, max
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    fn wants_reconnect(&self) -> bool {
        self.reconnect.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    fn emit(&self, event: VoiceEvent) {
        if self.events.send((self.generation, event)).is_err() {
            debug!("Voice event receiver dropped");
        }
    }

    async fn resolve_endpoint(&self) -> Result<String> {
        if let Some(url) = &self.config.fixed_url {
            return Ok(url.clone());
        }
        let setup_url = self
            .config
            .setup_url
            .as_deref()
            .ok_or_else(|| SessionError::Other("No voice endpoint configured".into()))?;

        let setup: VoiceSetup = self
            .http
            .get(setup_url)
            .query(&[("sessionId", self.session_id.as_str())])
            .timeout(self.config.connect_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(socket_url(&self.config, &setup))
    }

    async fn connect_once(&self) -> Result<WsStream> {
        let url = self.resolve_endpoint().await?;
        info!("Connecting voice channel at {}", url);

        let (mut ws, _resp) = tokio::time::timeout(self.config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| SessionError::Timeout)??;

        // The session id must be the first message on every connection
        ws.send(Message::Text(registration_json(&self.session_id)?.into())).await?;
        Ok(ws)
    }

    async fn serve(&self, ws: WsStream) {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    error!("Voice channel write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        self.writer.send_replace(Some(tx));
        self.emit(VoiceEvent::Opened);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                frame = stream.next() => match frame {
                    Some(Ok(Message::Binary(data))) => self.playback.enqueue_bytes(&data),
                    Some(Ok(Message::Text(text))) => self.handle_control(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        info!("Voice channel closed by server: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Voice channel read error: {}", e);
                        break;
                    }
                    None => break,
                },
            }
        }

        // Dropping the published sender lets the writer drain and exit
        self.writer.send_replace(None);
        if tokio::time::timeout(Duration::from_secs(1), writer_task).await.is_err() {
            debug!("Voice writer still busy at close");
        }
    }

    fn handle_control(&self, text: &str) {
        match VoiceControl::parse(text) {
            Ok(VoiceControl::Start { sample_rate, channels }) => {
                self.playback.announce_format(sample_rate, channels);
                self.emit(VoiceEvent::Format { sample_rate, channels });
            }
            Ok(VoiceControl::End) => self.emit(VoiceEvent::Done),
            Ok(VoiceControl::Error(message)) => {
                warn!("Voice service error: {}", message);
                self.emit(VoiceEvent::Error(message));
            }
            Ok(VoiceControl::Unknown(kind)) => debug!("Ignoring voice control frame {:?}", kind),
            Err(e) => warn!("Malformed voice control frame: {}", e),
        }
    }
}

fn socket_url(config: &VoiceChannelConfig, setup: &VoiceSetup) -> String {
    let scheme = if config.secure { "wss" } else { "ws" };
    let host = setup.host.as_deref().unwrap_or(&config.host);
    let path = setup.path.as_deref().unwrap_or("");
    let separator = if path.is_empty() || path.starts_with('/') { "" } else { "/" };
    format!("{scheme}://{host}:{}{separator}{path}", setup.port)
}
