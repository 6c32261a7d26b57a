//! Session controller - the single owner of every realtime component
//!
//! One task runs [`SessionController::run`], selecting over commands from
//! [`ControllerHandle`]s, timer inputs, peer and voice events, playback edges and
//! the dispatch retry/watchdog deadlines. Every teardown cancels the session's
//! timers and releases the voice socket and peer connection before anything new
//! is built.

use crate::config::RealtimeConfig;
use crate::credits::{BillingApi, CreditLedger};
use crate::dispatch::{Destination, DispatchTargets, DrainOutcome, OutboundDispatchQueue, OutboundRequest};
use crate::error::{Result, SessionError};
use crate::events::{PeerMessage, SessionEvent};
use crate::health::{ConnectionHealthMonitor, HealthVerdict};
use crate::inactivity::{ActivitySignal, InactivityMonitor, InactivityPhase, TickOutcome};
use crate::peer::{MediaKind, PeerConnector, PeerEvent, PeerSessionManager, PlaybackProbe, Signaling};
use crate::playback::{OutputDevice, PlaybackEdge, PlaybackHandle};
use crate::recorder::PlaybackRecorder;
use crate::session::{generate_session_id, ConversationMode, Session};
use crate::timer::{spawn_once, spawn_periodic};
use crate::voice::{VoiceChannelClient, VoiceEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
enum Command {
    SetMode(ConversationMode),
    SendMessage { text: String, language: String },
    Typing(String),
    RecordingStarted,
    UserGesture,
    Resume,
    EndSession,
    Logout,
    RefreshCredits,
    PurchaseCredits(u64),
    Shutdown,
}

#[derive(Debug)]
enum Input {
    Command(Command),
    Tick(u64),
    HealthSample { generation: u64, position: Option<f64> },
    Rearm,
}

/// Clonable front door to a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: UnboundedSender<Input>,
}

impl ControllerHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(Input::Command(command))
            .map_err(|_| SessionError::ChannelClosed)
    }

    pub fn set_mode(&self, mode: ConversationMode) -> Result<()> {
        self.send(Command::SetMode(mode))
    }

    /// Queue text for synthesis on whichever channel the current mode provides.
    pub fn send_message(&self, text: impl Into<String>, language: impl Into<String>) -> Result<()> {
        self.send(Command::SendMessage {
            text: text.into(),
            language: language.into(),
        })
    }

    /// Current contents of the input box. Non-empty text counts as activity.
    pub fn typing(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::Typing(text.into()))
    }

    pub fn recording_started(&self) -> Result<()> {
        self.send(Command::RecordingStarted)
    }

    pub fn user_gesture(&self) -> Result<()> {
        self.send(Command::UserGesture)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    pub fn end_session(&self) -> Result<()> {
        self.send(Command::EndSession)
    }

    pub fn logout(&self) -> Result<()> {
        self.send(Command::Logout)
    }

    pub fn refresh_credits(&self) -> Result<()> {
        self.send(Command::RefreshCredits)
    }

    pub fn purchase_credits(&self, credits: u64) -> Result<()> {
        self.send(Command::PurchaseCredits(credits))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}

/// External collaborators the controller is built from
pub struct ControllerDeps<D> {
    pub connector: Arc<dyn PeerConnector>,
    pub signaling: Arc<dyn Signaling>,
    pub billing: Arc<dyn BillingApi>,
    pub device: D,
    pub initial_balance: u64,
}

pub struct SessionController {
    config: RealtimeConfig,
    session: Session,
    dispatch: OutboundDispatchQueue,
    dispatch_retry_at: Option<Instant>,
    playback: PlaybackHandle,
    edges: UnboundedReceiver<PlaybackEdge>,
    gesture_armed: bool,
    peer: PeerSessionManager,
    peer_events: Option<UnboundedReceiver<PeerEvent>>,
    voice: Option<VoiceChannelClient>,
    voice_generation: u64,
    voice_events_tx: UnboundedSender<(u64, VoiceEvent)>,
    voice_events: UnboundedReceiver<(u64, VoiceEvent)>,
    inactivity: InactivityMonitor,
    health: ConnectionHealthMonitor,
    health_generation: u64,
    credits: CreditLedger,
    events: UnboundedSender<SessionEvent>,
    inbox: UnboundedReceiver<Input>,
    timers_tx: WeakUnboundedSender<Input>,
    tick_timer: Option<CancellationToken>,
    health_timer: Option<CancellationToken>,
    rearm_timer: Option<CancellationToken>,
}

/// Channel view handed to the dispatch queue's drain step
struct Targets<'a> {
    peer: &'a PeerSessionManager,
    voice: Option<&'a VoiceChannelClient>,
}

impl DispatchTargets for Targets<'_> {
    fn peer_ready(&self) -> bool {
        self.peer.is_channel_ready()
    }

    fn avatar_active(&self) -> bool {
        self.peer.avatar_enabled()
    }

    fn voice_ready(&self) -> bool {
        self.voice.is_some_and(|voice| voice.is_open())
    }

    fn send(&mut self, destination: Destination, request: &OutboundRequest) -> Result<()> {
        match destination {
            Destination::PeerDataChannel => {
                self.peer
                    .send_synthesis(&request.text, &request.language, &request.destination_session_id)
            }
            Destination::VoiceChannel => self
                .voice
                .ok_or(SessionError::ChannelUnready)?
                .synthesize(&request.text, &request.language, &request.destination_session_id),
        }
    }
}

async fn next_peer_event(events: &mut Option<UnboundedReceiver<PeerEvent>>) -> Option<PeerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400)
}

impl SessionController {
    /// Build a controller in text mode. Drive it with `run`.
    pub fn new<D>(
        config: RealtimeConfig,
        mut session: Session,
        deps: ControllerDeps<D>,
    ) -> (Self, ControllerHandle, UnboundedReceiver<SessionEvent>)
    where
        D: OutputDevice + 'static,
    {
        session.set_mode(ConversationMode::Text);
        let recorder = config.record_dir.as_deref().and_then(PlaybackRecorder::new);
        let (playback, edges, _playback_task) = PlaybackHandle::spawn(deps.device, config.playback.clone(), recorder);

        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (voice_events_tx, voice_events) = mpsc::unbounded_channel();

        let credits = CreditLedger::new(session.session_id(), deps.initial_balance, deps.billing);
        let peer = PeerSessionManager::new(deps.connector, deps.signaling, config.negotiation.clone());

        let controller = Self {
            dispatch: OutboundDispatchQueue::new(config.dispatch.clone()),
            dispatch_retry_at: None,
            playback,
            edges,
            gesture_armed: false,
            peer,
            peer_events: None,
            voice: None,
            voice_generation: 0,
            voice_events_tx,
            voice_events,
            inactivity: InactivityMonitor::new(config.inactivity.clone()),
            health: ConnectionHealthMonitor::new(config.health.clone()),
            health_generation: 0,
            credits,
            events: events_tx,
            inbox,
            timers_tx: inbox_tx.downgrade(),
            tick_timer: None,
            health_timer: None,
            rearm_timer: None,
            session,
            config,
        };
        (controller, ControllerHandle { tx: inbox_tx }, events_rx)
    }

    pub fn credits(&self) -> CreditLedger {
        self.credits.clone()
    }

    pub async fn run(mut self) {
        info!(
            "Session controller started for {} in {} mode",
            self.session.session_id(),
            self.session.mode().as_str()
        );

        loop {
            let retry_at = self.dispatch_retry_at;
            let watchdog = self.dispatch.fallback_deadline();

            tokio::select! {
                input = self.inbox.recv() => {
                    match input {
                        Some(Input::Command(Command::Shutdown)) | None => break,
                        Some(input) => self.handle_input(input).await,
                    }
                }
                event = next_peer_event(&mut self.peer_events) => {
                    match event {
                        Some(event) => self.handle_peer_event(event).await,
                        None => {
                            debug!("Peer event stream ended");
                            self.peer_events = None;
                        }
                    }
                }
                Some((generation, event)) = self.voice_events.recv() => {
                    self.handle_voice_event(generation, event).await;
                }
                Some(edge) = self.edges.recv() => {
                    self.handle_edge(edge);
                }
                _ = sleep_until(retry_at.unwrap_or_else(far_future)), if retry_at.is_some() => {
                    self.dispatch_retry_at = None;
                    self.pump();
                }
                _ = sleep_until(watchdog.unwrap_or_else(far_future)), if watchdog.is_some() => {
                    if self.dispatch.expire_in_flight(Instant::now()).is_some() {
                        self.pump();
                    }
                }
            }
        }

        info!("Session controller shutting down");
        self.teardown(false).await;
        self.inactivity.reset();
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Command(command) => self.handle_command(command).await,
            Input::Tick(generation) => self.on_tick(generation).await,
            Input::HealthSample { generation, position } => self.on_health_sample(generation, position).await,
            Input::Rearm => {
                // A busy queue re-arms from its completion marker instead
                if !self.peer.avatar_enabled() || self.dispatch.is_busy() {
                    return;
                }
                if let Some(generation) = self.inactivity.poll_rearm(Instant::now()) {
                    self.start_ticker(generation);
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        debug!("Controller command: {:?}", command);
        match command {
            Command::SetMode(mode) => self.set_mode(mode).await,
            Command::SendMessage { text, language } => self.send_message(text, language).await,
            Command::Typing(text) => {
                if !text.trim().is_empty() {
                    self.on_activity(ActivitySignal::TextTyped);
                }
            }
            Command::RecordingStarted => self.on_activity(ActivitySignal::RecordingStarted),
            Command::UserGesture => self.playback.user_gesture(),
            Command::Resume => self.resume().await,
            Command::EndSession => self.end_session().await,
            Command::Logout => {
                info!("Logout, releasing every realtime resource");
                self.teardown(false).await;
                self.inactivity.reset();
                self.dispatch.clear();
                self.session.set_mode(ConversationMode::Text);
                self.emit(SessionEvent::ModeChanged(ConversationMode::Text));
            }
            Command::RefreshCredits => match self.credits.refresh().await {
                Ok(balance) => self.emit(SessionEvent::CreditsChanged { balance }),
                Err(e) => warn!("Credit refresh failed: {}", e),
            },
            Command::PurchaseCredits(amount) => match self.credits.purchase(amount).await {
                Ok(balance) => self.emit(SessionEvent::CreditsChanged { balance }),
                Err(e) => error!("Credit purchase failed: {}", e),
            },
            Command::Shutdown => {}
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }

    async fn set_mode(&mut self, mode: ConversationMode) {
        let previous = self.session.mode();
        info!("Mode change {} -> {}", previous.as_str(), mode.as_str());

        self.teardown(false).await;
        self.inactivity.reset();
        if !mode.is_realtime() {
            self.dispatch.clear();
        }
        self.session.set_mode(mode);
        self.emit(SessionEvent::ModeChanged(mode));

        if !mode.is_realtime() {
            return;
        }

        let required = self.config.credits.required_for(mode);
        if let Err(e) = self.credits.ensure_covers(required).await {
            self.refuse_for_credits(e);
            self.degrade(mode).await;
            return;
        }

        if mode.uses_voice() {
            self.open_voice();
        }
        if mode.uses_avatar() {
            if let Err(e) = self.open_peer(generate_session_id()).await {
                error!("Peer session failed to open: {}", e);
                self.emit(SessionEvent::NegotiationFailed { reason: e.to_string() });
                self.degrade(mode).await;
            }
        }
    }

    fn refuse_for_credits(&self, e: SessionError) {
        match e {
            SessionError::CreditExhaustion { balance, required } => {
                warn!("Balance {} cannot cover {}", balance, required);
                self.emit(SessionEvent::CreditsExhausted { balance, required });
            }
            other => warn!("Credit check failed: {}", other),
        }
    }

    /// Fall back to text after a surfaced failure. The UI stays usable.
    async fn degrade(&mut self, from: ConversationMode) {
        self.teardown(false).await;
        self.inactivity.reset();
        self.dispatch.clear();
        self.session.set_mode(ConversationMode::Text);
        warn!("Degraded from {} to text", from.as_str());
        self.emit(SessionEvent::Degraded {
            from,
            to: ConversationMode::Text,
        });
    }

    fn open_voice(&mut self) {
        self.voice_generation += 1;
        let mut client = VoiceChannelClient::new(
            self.config.voice.clone(),
            self.session.session_id(),
            self.voice_generation,
            self.playback.clone(),
            self.voice_events_tx.clone(),
        );
        client.connect();
        self.voice = Some(client);
    }

    async fn open_peer(&mut self, peer_session_id: String) -> Result<()> {
        let opened = self.peer.open(&peer_session_id).await?;
        self.health.clear_intentional_disconnect();
        self.session.set_live_peer_session_id(opened.session_id);
        self.peer_events = Some(opened.events);
        Ok(())
    }

    /// Release everything the current session owns.
    ///
    /// Timers go first so nothing stale fires into the next session.
    async fn teardown(&mut self, preserve_identity: bool) {
        let had_resources = self.voice.is_some() || self.peer.is_open() || self.session.live_peer_session_id().is_some();

        if had_resources {
            self.health.mark_intentional_disconnect();
        }
        self.cancel_timers();

        if let Some(mut voice) = self.voice.take() {
            voice.close().await;
        }
        self.peer.close(preserve_identity).await;
        self.peer_events = None;
        self.health.detach();
        self.playback.reset();
        self.dispatch.abandon_in_flight();
        self.dispatch_retry_at = None;

        let release_id = self.session.destination_id().to_string();
        if !preserve_identity {
            self.session.clear_live_peer_session_id();
        }
        if had_resources || self.session.mode().is_realtime() {
            self.credits.release_resources(&release_id);
        }
    }

    fn cancel_timers(&mut self) {
        for timer in [self.tick_timer.take(), self.health_timer.take(), self.rearm_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.cancel();
        }
        self.health_generation += 1;
    }

    async fn send_message(&mut self, text: String, language: String) {
        let mode = self.session.mode();
        if !mode.is_realtime() {
            debug!("Text mode, nothing to synthesize");
            return;
        }
        if let Err(e) = self.credits.ensure_covers(self.config.credits.required_for(mode)).await {
            self.refuse_for_credits(e);
            return;
        }

        let request = OutboundRequest::new(text, language, self.session.destination_id());
        self.dispatch.enqueue(request);
        self.pump();
    }

    /// One drain step of the dispatch queue.
    fn pump(&mut self) {
        if !self.session.mode().is_realtime() || self.inactivity.phase() == InactivityPhase::Suspended {
            return;
        }

        let mut targets = Targets {
            peer: &self.peer,
            voice: self.voice.as_ref(),
        };
        match self.dispatch.drain(&mut targets) {
            DrainOutcome::Dispatched(Destination::PeerDataChannel) => {
                self.on_activity(ActivitySignal::ResponseStarted);
            }
            DrainOutcome::Dispatched(Destination::VoiceChannel) | DrainOutcome::Idle | DrainOutcome::Busy => {}
            DrainOutcome::RetryAfter(delay) => {
                self.dispatch_retry_at = Some(Instant::now() + delay);
            }
        }
    }

    fn on_activity(&mut self, signal: ActivitySignal) {
        if self.inactivity.on_activity(signal, Instant::now()) {
            if let Some(timer) = self.tick_timer.take() {
                timer.cancel();
            }
        }
        match self.inactivity.rearm_at() {
            Some(at) if self.peer.avatar_enabled() => self.schedule_rearm(at),
            _ => {
                if let Some(timer) = self.rearm_timer.take() {
                    timer.cancel();
                }
            }
        }
    }

    /// Deliver `Input::Rearm` at `at`, replacing any pending one.
    fn schedule_rearm(&mut self, at: Instant) {
        if let Some(previous) = self.rearm_timer.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        let tx = self.timers_tx.clone();
        spawn_once(at.saturating_duration_since(Instant::now()), cancel.clone(), move || {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Input::Rearm);
            }
        });
        self.rearm_timer = Some(cancel);
    }

    fn try_arm(&mut self) {
        if !self.peer.avatar_enabled() || self.dispatch.is_busy() {
            return;
        }
        if let Some(generation) = self.inactivity.arm(Instant::now()) {
            self.start_ticker(generation);
        }
    }

    fn start_ticker(&mut self, generation: u64) {
        if let Some(previous) = self.tick_timer.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        let tx = self.timers_tx.clone();
        spawn_periodic(
            "inactivity",
            Duration::ZERO,
            self.config.inactivity.tick_interval,
            cancel.clone(),
            move || tx.upgrade().is_some_and(|tx| tx.send(Input::Tick(generation)).is_ok()),
        );
        self.tick_timer = Some(cancel);
    }

    async fn on_tick(&mut self, generation: u64) {
        let (cost, last) = match self.inactivity.on_tick(generation) {
            TickOutcome::Stale => {
                debug!("Dropping stale inactivity tick");
                return;
            }
            TickOutcome::Metered { cost, .. } => (cost, false),
            TickOutcome::Suspend { cost, .. } => (cost, true),
        };

        let balance = self.credits.meter(cost).await;
        self.emit(SessionEvent::CreditsChanged { balance });

        let required = self.config.credits.required_for(self.session.mode());
        let exhausted = balance < required;
        if exhausted {
            warn!("Idle charge left {} credits, {} needed to stay live", balance, required);
            self.emit(SessionEvent::CreditsExhausted { balance, required });
            self.inactivity.force_suspend();
        }
        if last || exhausted {
            self.suspend().await;
        }
    }

    async fn suspend(&mut self) {
        info!("Suspending idle avatar session");
        self.teardown(true).await;
        self.emit(SessionEvent::SuspendPrompt);
    }

    async fn resume(&mut self) {
        if self.inactivity.phase() != InactivityPhase::Suspended {
            debug!("Resume requested while not suspended");
            return;
        }
        let mode = self.session.mode();

        if let Err(e) = self.credits.ensure_covers(self.config.credits.required_for(mode)).await {
            self.refuse_for_credits(e);
            self.degrade(mode).await;
            return;
        }

        let peer_session_id = self
            .peer
            .resume_session_id()
            .map(str::to_string)
            .unwrap_or_else(generate_session_id);
        if let Err(e) = self.open_peer(peer_session_id).await {
            error!("Resume failed: {}", e);
            self.emit(SessionEvent::NegotiationFailed { reason: e.to_string() });
            self.degrade(mode).await;
            return;
        }

        self.inactivity.resume(Instant::now());
        if let Some(at) = self.inactivity.rearm_at() {
            self.schedule_rearm(at);
        }
        self.emit(SessionEvent::Resumed);
        self.pump();
    }

    async fn end_session(&mut self) {
        info!("Ending session on user request");
        self.set_mode(ConversationMode::Text).await;
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::DataChannelOpen => {
                if let Err(e) = self.peer.on_data_channel_open() {
                    warn!("Data channel registration failed: {}", e);
                    return;
                }
                if !self.gesture_armed {
                    self.playback.arm_gesture_unlock();
                    self.gesture_armed = true;
                }
                if let Some(session_id) = self.session.live_peer_session_id() {
                    self.emit(SessionEvent::AvatarReady {
                        session_id: session_id.to_string(),
                    });
                }
                self.pump();
            }
            PeerEvent::DataChannelMessage(text) => match PeerMessage::parse(&text) {
                Ok(PeerMessage::Done) => {
                    self.dispatch.complete(Destination::PeerDataChannel);
                    self.pump();
                    self.try_arm();
                }
                Ok(PeerMessage::Other(kind)) => debug!("Ignoring data channel event {:?}", kind),
                Err(e) => warn!("Malformed data channel message: {}", e),
            },
            PeerEvent::DataChannelClosed => {
                self.peer.on_data_channel_closed();
                if self.dispatch.abandon_if_on(Destination::PeerDataChannel).is_some() {
                    warn!("Data channel closed with a request in flight");
                }
            }
            PeerEvent::TrackAttached { kind: MediaKind::Video, probe } => {
                self.emit(SessionEvent::StreamAttached);
                if let Some(probe) = probe {
                    self.start_health_sampling(probe);
                }
                self.try_arm();
            }
            PeerEvent::TrackAttached { kind: MediaKind::Audio, .. } => debug!("Inbound audio track attached"),
            PeerEvent::ConnectionFailed(reason) => {
                if self.health.is_intentional() {
                    info!("Peer connection ended during intentional disconnect: {}", reason);
                } else {
                    error!("Peer connection failed: {}", reason);
                    self.emit(SessionEvent::ConnectionError { reason });
                }
                let mode = self.session.mode();
                self.degrade(mode).await;
            }
            PeerEvent::Disconnected => warn!("Peer connection disconnected, waiting for recovery"),
        }
    }

    fn start_health_sampling(&mut self, probe: Arc<dyn PlaybackProbe>) {
        if let Some(previous) = self.health_timer.take() {
            previous.cancel();
        }
        self.health_generation += 1;
        self.health.on_stream_attached(Instant::now());

        let generation = self.health_generation;
        let cancel = CancellationToken::new();
        let tx = self.timers_tx.clone();
        spawn_periodic(
            "health",
            self.config.health.startup_grace,
            self.config.health.sample_interval,
            cancel.clone(),
            move || {
                tx.upgrade().is_some_and(|tx| {
                    tx.send(Input::HealthSample {
                        generation,
                        position: probe.position(),
                    })
                    .is_ok()
                })
            },
        );
        self.health_timer = Some(cancel);
    }

    async fn on_health_sample(&mut self, generation: u64, position: Option<f64>) {
        if generation != self.health_generation {
            return;
        }
        match self.health.sample(Instant::now(), position) {
            HealthVerdict::Teardown { surface_error: true } => {
                let stall = SessionError::PlaybackStall {
                    stalls: self.health.window().count(),
                    window: self.health.window().window(),
                };
                error!("{}", stall);
                self.emit(SessionEvent::ConnectionError {
                    reason: stall.to_string(),
                });
                let mode = self.session.mode();
                self.degrade(mode).await;
            }
            HealthVerdict::Teardown { surface_error: false } => {
                info!("Stalled stream torn down without reporting");
                let mode = self.session.mode();
                self.degrade(mode).await;
            }
            HealthVerdict::Tripped => {
                if let Some(timer) = self.health_timer.take() {
                    timer.cancel();
                }
            }
            HealthVerdict::Warming | HealthVerdict::Fine | HealthVerdict::Stalled { .. } => {}
        }
    }

    async fn handle_voice_event(&mut self, generation: u64, event: VoiceEvent) {
        if generation != self.voice_generation || self.voice.is_none() {
            debug!("Dropping voice event from torn-down client: {:?}", event);
            return;
        }
        match event {
            VoiceEvent::Opened => {
                if !self.gesture_armed {
                    self.playback.arm_gesture_unlock();
                    self.gesture_armed = true;
                }
                self.pump();
            }
            VoiceEvent::Format { sample_rate, channels } => {
                debug!("Voice format {:?} Hz, {:?} channel(s)", sample_rate, channels);
            }
            VoiceEvent::Done => {
                self.dispatch.complete(Destination::VoiceChannel);
                self.pump();
            }
            VoiceEvent::Error(message) => {
                warn!("Voice synthesis error: {}", message);
                self.dispatch.complete(Destination::VoiceChannel);
                self.pump();
            }
            VoiceEvent::Closed => {
                if self.dispatch.abandon_if_on(Destination::VoiceChannel).is_some() {
                    warn!("Voice channel closed with a request in flight");
                }
            }
            VoiceEvent::TerminalFailure { attempts } => {
                let failure = SessionError::ChannelTerminalFailure { attempts };
                error!("{}", failure);
                self.emit(SessionEvent::ConnectionError {
                    reason: failure.to_string(),
                });
                let mode = self.session.mode();
                self.degrade(mode).await;
            }
        }
    }

    fn handle_edge(&mut self, edge: PlaybackEdge) {
        match edge {
            PlaybackEdge::SpeechStarted => {
                self.emit(SessionEvent::SpeechStarted);
                self.on_activity(ActivitySignal::SpeechStarted);
            }
            PlaybackEdge::SpeechEnded => {
                self.emit(SessionEvent::SpeechEnded);
                self.try_arm();
            }
        }
    }
}
