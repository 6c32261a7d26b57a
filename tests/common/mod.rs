//! In-process fakes for the controller's external seams
#![allow(dead_code)]

use async_trait::async_trait;
use livepersona::credits::BillingApi;
use livepersona::peer::negotiation::{NegotiationAnswer, NegotiationRequest, Signaling};
use livepersona::peer::{
    DataChannel, MediaKind, PeerConnection, PeerConnector, PeerEvent, PlaybackProbe, SdpType, SessionDescription,
};
use livepersona::{Result, SessionError, SessionEvent};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

#[derive(Default)]
pub struct PeerState {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub channel_open: AtomicBool,
    pub sent: Mutex<Vec<String>>,
    senders: Mutex<Vec<UnboundedSender<PeerEvent>>>,
}

impl PeerState {
    /// Push an event into the most recently created connection.
    pub fn emit(&self, event: PeerEvent) {
        let senders = self.senders.lock().unwrap();
        senders.last().expect("no connection created").send(event).unwrap();
    }

    pub fn open_channel(&self) {
        self.channel_open.store(true, Ordering::SeqCst);
        self.emit(PeerEvent::DataChannelOpen);
    }

    pub fn attach_video(&self, probe: Arc<dyn PlaybackProbe>) {
        self.emit(PeerEvent::TrackAttached {
            kind: MediaKind::Video,
            probe: Some(probe),
        });
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }
}

struct FakeChannel(Arc<PeerState>);

impl DataChannel for FakeChannel {
    fn is_open(&self) -> bool {
        self.0.channel_open.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: String) -> Result<()> {
        self.0.sent.lock().unwrap().push(text);
        Ok(())
    }
}

struct FakeConnection {
    state: Arc<PeerState>,
    events: Option<UnboundedReceiver<PeerEvent>>,
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn add_recv_transceiver(&mut self, _kind: MediaKind) -> Result<()> {
        Ok(())
    }

    async fn create_data_channel(&mut self, _label: &str) -> Result<Box<dyn DataChannel>> {
        Ok(Box::new(FakeChannel(self.state.clone())))
    }

    async fn create_offer(&mut self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer("v=0 fake offer"))
    }

    async fn apply_answer(&mut self, _answer: SessionDescription) -> Result<()> {
        Ok(())
    }

    fn take_events(&mut self) -> Option<UnboundedReceiver<PeerEvent>> {
        self.events.take()
    }

    async fn close(&mut self) -> Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.state.channel_open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeConnector(pub Arc<PeerState>);

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn create(&self) -> Result<Box<dyn PeerConnection>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.0.senders.lock().unwrap().push(tx);
        self.0.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            state: self.0.clone(),
            events: Some(rx),
        }))
    }
}

/// Answers every offer, always proposing its own session id
#[derive(Default)]
pub struct FakeSignaling {
    pub session_ids: Mutex<Vec<String>>,
}

#[async_trait]
impl Signaling for FakeSignaling {
    async fn exchange(&self, _endpoint: &str, request: &NegotiationRequest) -> Result<NegotiationAnswer> {
        self.session_ids.lock().unwrap().push(request.session_id.clone());
        Ok(NegotiationAnswer {
            sdp: "v=0 fake answer".into(),
            kind: SdpType::Answer,
            session_id: Some("server-chosen".into()),
        })
    }
}

#[derive(Default)]
pub struct FakeBilling {
    pub deductions: AtomicUsize,
    pub deducted: AtomicU64,
    pub releases: Mutex<Vec<String>>,
}

#[async_trait]
impl BillingApi for FakeBilling {
    async fn deduct(&self, _device_id: &str, credits: u64) -> Result<()> {
        self.deductions.fetch_add(1, Ordering::SeqCst);
        self.deducted.fetch_add(credits, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_balance(&self, _device_id: &str) -> Result<u64> {
        Err(SessionError::Other("status endpoint not faked".into()))
    }

    async fn purchase(&self, _device_id: &str, credits: u64) -> Result<u64> {
        Ok(credits)
    }

    async fn release_resources(&self, session_id: &str) -> Result<()> {
        self.releases.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}

/// Video that keeps playing in step with the clock
pub struct SteadyProbe {
    origin: Instant,
}

impl SteadyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { origin: Instant::now() })
    }
}

impl PlaybackProbe for SteadyProbe {
    fn position(&self) -> Option<f64> {
        Some(self.origin.elapsed().as_secs_f64())
    }
}

/// Video frozen on one frame
pub struct FrozenProbe;

impl PlaybackProbe for FrozenProbe {
    fn position(&self) -> Option<f64> {
        Some(3.0)
    }
}

/// Next event matching `pred`, skipping others, or panic after `within`.
pub async fn wait_for<F>(
    events: &mut UnboundedReceiver<SessionEvent>,
    within: Duration,
    mut pred: F,
) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    let deadline = Instant::now() + within;
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("controller stopped");
        if pred(&event) {
            return event;
        }
    }
}

/// Drain everything currently queued without waiting.
pub fn drain(events: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
