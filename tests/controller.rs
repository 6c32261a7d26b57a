mod common;

use common::{drain, wait_for, FakeBilling, FakeConnector, FakeSignaling, FrozenProbe, PeerState, SteadyProbe};
use livepersona::peer::PeerEvent;
use livepersona::playback::VirtualOutput;
use livepersona::{
    ConversationMode, ControllerDeps, ControllerHandle, RealtimeConfig, Session, SessionController, SessionEvent,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Harness {
    handle: ControllerHandle,
    events: UnboundedReceiver<SessionEvent>,
    peer: Arc<PeerState>,
    signaling: Arc<FakeSignaling>,
    billing: Arc<FakeBilling>,
    task: JoinHandle<()>,
}

impl Harness {
    fn start(balance: u64) -> Self {
        let mut config = RealtimeConfig::default();
        config.negotiation.endpoints = vec!["http://signaling.test/offer".into()];

        let peer = Arc::new(PeerState::default());
        let signaling = Arc::new(FakeSignaling::default());
        let billing = Arc::new(FakeBilling::default());

        let (controller, handle, events) = SessionController::new(
            config,
            Session::with_id("device-1", ConversationMode::Text),
            ControllerDeps {
                connector: Arc::new(FakeConnector(peer.clone())),
                signaling: signaling.clone(),
                billing: billing.clone(),
                device: VirtualOutput::new(48_000),
                initial_balance: balance,
            },
        );
        let task = tokio::spawn(controller.run());

        Self {
            handle,
            events,
            peer,
            signaling,
            billing,
            task,
        }
    }

    /// Avatar mode with a registered data channel
    async fn open_avatar(&mut self) -> String {
        self.handle.set_mode(ConversationMode::Avatar).unwrap();
        wait_for(&mut self.events, Duration::from_secs(1), |e| {
            *e == SessionEvent::ModeChanged(ConversationMode::Avatar)
        })
        .await;
        settle().await;

        self.peer.open_channel();
        match wait_for(&mut self.events, Duration::from_secs(1), |e| {
            matches!(e, SessionEvent::AvatarReady { .. })
        })
        .await
        {
            SessionEvent::AvatarReady { session_id } => session_id,
            _ => unreachable!(),
        }
    }

    async fn next_charge_or_suspend(&mut self, within: Duration) -> SessionEvent {
        wait_for(&mut self.events, within, |e| {
            matches!(e, SessionEvent::CreditsChanged { .. } | SessionEvent::SuspendPrompt)
        })
        .await
    }

    async fn stop(self) {
        self.handle.shutdown().unwrap();
        self.task.await.unwrap();
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_avatar_registration_precedes_synthesis() {
    let mut h = Harness::start(100);
    let session_id = h.open_avatar().await;

    assert_ne!(session_id, "server-chosen");
    assert_eq!(*h.signaling.session_ids.lock().unwrap(), vec![session_id.clone()]);

    h.handle.send_message("hello", "en").unwrap();
    h.handle.send_message("again", "en").unwrap();
    settle().await;

    let sent = h.peer.sent_json();
    assert_eq!(sent.len(), 2, "second request must wait for completion");
    assert_eq!(sent[0], serde_json::json!({"sessionId": session_id}));
    assert_eq!(sent[1]["text"], "hello");
    assert_eq!(sent[1]["sessionId"], session_id.as_str());

    h.peer.emit(PeerEvent::DataChannelMessage(r#"{"event":"done"}"#.into()));
    settle().await;
    let sent = h.peer.sent_json();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2]["text"], "again");

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_avatar_meters_six_ticks_then_suspends() {
    let mut h = Harness::start(100);
    let session_id = h.open_avatar().await;

    h.peer.attach_video(SteadyProbe::new());
    let attached = Instant::now();

    let mut charges = Vec::new();
    loop {
        let event = wait_for(&mut h.events, Duration::from_secs(120), |e| {
            matches!(e, SessionEvent::CreditsChanged { .. } | SessionEvent::SuspendPrompt)
        })
        .await;
        match event {
            SessionEvent::CreditsChanged { balance } => charges.push((balance, attached.elapsed())),
            _ => break,
        }
    }

    let suspended_after = attached.elapsed();
    assert_eq!(charges.len(), 6);
    assert_eq!(charges.last().unwrap().0, 94);
    for (i, (_, at)) in charges.iter().enumerate() {
        let expected = Duration::from_secs(10 * i as u64);
        assert!(*at >= expected && *at < expected + Duration::from_millis(100), "tick {i} at {at:?}");
    }
    assert!(suspended_after < Duration::from_secs(51));

    settle().await;
    assert_eq!(h.billing.deductions.load(Ordering::SeqCst), 6);
    assert_eq!(h.peer.closed.load(Ordering::SeqCst), 1);
    assert!(h.billing.releases.lock().unwrap().contains(&session_id));

    // Nothing meters once suspended
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, SessionEvent::CreditsChanged { .. })));
    assert_eq!(h.billing.deductions.load(Ordering::SeqCst), 6);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_resume_reuses_identity_and_waits_out_grace() {
    let mut h = Harness::start(100);
    let session_id = h.open_avatar().await;
    h.peer.attach_video(SteadyProbe::new());
    wait_for(&mut h.events, Duration::from_secs(120), |e| *e == SessionEvent::SuspendPrompt).await;

    h.handle.resume().unwrap();
    wait_for(&mut h.events, Duration::from_secs(1), |e| *e == SessionEvent::Resumed).await;
    let resumed = Instant::now();
    assert_eq!(h.peer.created.load(Ordering::SeqCst), 2);
    assert_eq!(
        *h.signaling.session_ids.lock().unwrap(),
        vec![session_id.clone(), session_id.clone()]
    );

    h.peer.open_channel();
    h.peer.attach_video(SteadyProbe::new());
    wait_for(&mut h.events, Duration::from_secs(30), |e| {
        matches!(e, SessionEvent::CreditsChanged { .. })
    })
    .await;
    assert!(resumed.elapsed() >= Duration::from_secs(5), "re-armed inside the grace window");

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_metering_restarts_after_typing() {
    let mut h = Harness::start(100);
    h.open_avatar().await;
    h.peer.attach_video(SteadyProbe::new());

    // Three charges at 0s, 10s, 20s, then the user types once and walks away
    for _ in 0..3 {
        wait_for(&mut h.events, Duration::from_secs(30), |e| {
            matches!(e, SessionEvent::CreditsChanged { .. })
        })
        .await;
    }
    h.handle.typing("h").unwrap();
    let typed = Instant::now();

    let mut charges = Vec::new();
    loop {
        match h.next_charge_or_suspend(Duration::from_secs(120)).await {
            SessionEvent::CreditsChanged { .. } => charges.push(typed.elapsed()),
            _ => break,
        }
    }
    let suspended_after = typed.elapsed();

    // Counting restarts from one once input has settled
    assert_eq!(charges.len(), 6);
    assert!(charges[0] >= Duration::from_secs(5), "re-armed {:?} after typing", charges[0]);
    assert!(charges[0] < Duration::from_millis(5_100));
    assert!(suspended_after >= Duration::from_secs(55) && suspended_after < Duration::from_millis(55_100));

    settle().await;
    assert_eq!(h.billing.deductions.load(Ordering::SeqCst), 9);
    assert_eq!(h.peer.closed.load(Ordering::SeqCst), 1);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_input_during_resume_grace_defers_rearm() {
    let mut h = Harness::start(100);
    h.open_avatar().await;
    h.peer.attach_video(SteadyProbe::new());
    wait_for(&mut h.events, Duration::from_secs(120), |e| *e == SessionEvent::SuspendPrompt).await;

    h.handle.resume().unwrap();
    wait_for(&mut h.events, Duration::from_secs(1), |e| *e == SessionEvent::Resumed).await;
    let resumed = Instant::now();

    tokio::time::sleep(Duration::from_secs(3)).await;
    h.handle.recording_started().unwrap();

    wait_for(&mut h.events, Duration::from_secs(30), |e| {
        matches!(e, SessionEvent::CreditsChanged { .. })
    })
    .await;
    let rearmed_after = resumed.elapsed();
    assert!(rearmed_after >= Duration::from_secs(8), "re-armed after {rearmed_after:?}");
    assert!(rearmed_after < Duration::from_millis(8_100));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stall_after_resume_tears_down() {
    let mut h = Harness::start(100);
    h.open_avatar().await;
    h.peer.attach_video(SteadyProbe::new());
    wait_for(&mut h.events, Duration::from_secs(120), |e| *e == SessionEvent::SuspendPrompt).await;

    h.handle.resume().unwrap();
    wait_for(&mut h.events, Duration::from_secs(1), |e| *e == SessionEvent::Resumed).await;
    h.peer.open_channel();
    h.peer.attach_video(Arc::new(FrozenProbe));

    match wait_for(&mut h.events, Duration::from_secs(30), |e| {
        matches!(e, SessionEvent::ConnectionError { .. })
    })
    .await
    {
        SessionEvent::ConnectionError { reason } => assert!(reason.contains("stalled"), "{reason}"),
        _ => unreachable!(),
    }
    wait_for(&mut h.events, Duration::from_secs(1), |e| matches!(e, SessionEvent::Degraded { .. })).await;
    assert_eq!(h.peer.created.load(Ordering::SeqCst), 2);
    assert_eq!(h.peer.closed.load(Ordering::SeqCst), 2);

    // Nothing left running to charge for
    let charged = h.billing.deductions.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.billing.deductions.load(Ordering::SeqCst), charged);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failure_after_mode_switch_is_reported() {
    let mut h = Harness::start(100);
    h.open_avatar().await;

    h.handle.set_mode(ConversationMode::AvatarText).unwrap();
    wait_for(&mut h.events, Duration::from_secs(1), |e| {
        *e == SessionEvent::ModeChanged(ConversationMode::AvatarText)
    })
    .await;
    settle().await;
    assert_eq!(h.peer.created.load(Ordering::SeqCst), 2);

    h.peer.emit(PeerEvent::ConnectionFailed("ice failed".into()));
    match wait_for(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, SessionEvent::ConnectionError { .. })
    })
    .await
    {
        SessionEvent::ConnectionError { reason } => assert_eq!(reason, "ice failed"),
        _ => unreachable!(),
    }
    assert_eq!(
        wait_for(&mut h.events, Duration::from_secs(1), |e| matches!(e, SessionEvent::Degraded { .. })).await,
        SessionEvent::Degraded {
            from: ConversationMode::AvatarText,
            to: ConversationMode::Text
        }
    );

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_frozen_video_tears_down_with_error() {
    let mut h = Harness::start(100);
    h.open_avatar().await;
    h.peer.attach_video(Arc::new(FrozenProbe));

    match wait_for(&mut h.events, Duration::from_secs(20), |e| {
        matches!(e, SessionEvent::ConnectionError { .. })
    })
    .await
    {
        SessionEvent::ConnectionError { reason } => assert!(reason.contains("stalled"), "{reason}"),
        _ => unreachable!(),
    }
    assert_eq!(
        wait_for(&mut h.events, Duration::from_secs(1), |e| matches!(e, SessionEvent::Degraded { .. })).await,
        SessionEvent::Degraded {
            from: ConversationMode::Avatar,
            to: ConversationMode::Text
        }
    );
    assert_eq!(h.peer.closed.load(Ordering::SeqCst), 1);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_mode_change_is_a_quiet_teardown() {
    let mut h = Harness::start(100);
    let session_id = h.open_avatar().await;
    h.peer.attach_video(Arc::new(FrozenProbe));

    h.handle.set_mode(ConversationMode::Text).unwrap();
    wait_for(&mut h.events, Duration::from_secs(1), |e| {
        *e == SessionEvent::ModeChanged(ConversationMode::Text)
    })
    .await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    let later = drain(&mut h.events);
    assert!(!later.iter().any(|e| matches!(e, SessionEvent::ConnectionError { .. })));
    assert!(!later.iter().any(|e| matches!(e, SessionEvent::CreditsChanged { .. })));
    assert_eq!(h.peer.closed.load(Ordering::SeqCst), 1);
    assert!(h.billing.releases.lock().unwrap().contains(&session_id));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_draining_charge_suspends_and_refuses_dispatch() {
    let mut h = Harness::start(1);
    h.open_avatar().await;
    h.peer.attach_video(SteadyProbe::new());
    assert_eq!(
        h.next_charge_or_suspend(Duration::from_secs(1)).await,
        SessionEvent::CreditsChanged { balance: 0 }
    );
    assert_eq!(
        wait_for(&mut h.events, Duration::from_secs(1), |e| {
            matches!(e, SessionEvent::CreditsExhausted { .. })
        })
        .await,
        SessionEvent::CreditsExhausted { balance: 0, required: 1 }
    );
    wait_for(&mut h.events, Duration::from_secs(1), |e| *e == SessionEvent::SuspendPrompt).await;
    settle().await;
    assert_eq!(h.peer.closed.load(Ordering::SeqCst), 1);

    h.handle.send_message("hello", "en").unwrap();
    assert_eq!(
        wait_for(&mut h.events, Duration::from_secs(1), |e| {
            matches!(e, SessionEvent::CreditsExhausted { .. })
        })
        .await,
        SessionEvent::CreditsExhausted { balance: 0, required: 1 }
    );
    assert_eq!(h.peer.sent_json().len(), 1, "only the registration went out");

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.billing.deductions.load(Ordering::SeqCst), 1);

    h.stop().await;
}
