use futures_util::{SinkExt, StreamExt};
use livepersona::config::{PlaybackConfig, VoiceChannelConfig};
use livepersona::playback::{PlaybackHandle, VirtualOutput};
use livepersona::voice::{VoiceChannelClient, VoiceEvent};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

fn config_for(port: u16) -> VoiceChannelConfig {
    VoiceChannelConfig {
        fixed_url: Some(format!("ws://127.0.0.1:{port}")),
        reconnect_delay: Duration::from_millis(20),
        connect_timeout: Duration::from_secs(2),
        ..VoiceChannelConfig::default()
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<(u64, VoiceEvent)>) -> VoiceEvent {
    let (generation, event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for voice event")
        .expect("event channel closed");
    assert_eq!(generation, 7);
    event
}

#[tokio::test]
async fn test_registration_audio_and_completion() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let registration: serde_json::Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(registration, serde_json::json!({"sessionId": "sess-1"}));

        ws.send(Message::Text(r#"{"type":"start","sample_rate":16000,"channels":1}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Binary(vec![0u8; 3200].into())).await.unwrap();

        let request = ws.next().await.unwrap().unwrap();
        let request: serde_json::Value = serde_json::from_str(request.to_text().unwrap()).unwrap();
        assert_eq!(request["text"], "hello");
        assert_eq!(request["lang"], "en");
        assert_eq!(request["sessionId"], "sess-1");

        ws.send(Message::Text(r#"{"type":"end"}"#.into())).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    });

    let device = VirtualOutput::new(48_000);
    let (playback, _edges, _task) = PlaybackHandle::spawn(device.clone(), PlaybackConfig::default(), None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = VoiceChannelClient::new(config_for(port), "sess-1", 7, playback, tx);
    client.connect();

    assert_eq!(next_event(&mut rx).await, VoiceEvent::Opened);
    assert!(client.is_open());
    client.synthesize("hello", "en", "sess-1").unwrap();

    let mut saw_format = false;
    loop {
        match next_event(&mut rx).await {
            VoiceEvent::Format { sample_rate, channels } => {
                assert_eq!(sample_rate, Some(16_000));
                assert_eq!(channels, Some(1));
                saw_format = true;
            }
            VoiceEvent::Done => break,
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(saw_format);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let scheduled = device.scheduled();
    assert_eq!(scheduled.len(), 1);
    // 1600 samples at 16 kHz resampled to 48 kHz
    assert_eq!(scheduled[0].samples, 4800);

    client.close().await;
    assert!(!client.is_open());
    server.await.unwrap();
}

#[tokio::test]
async fn test_gives_up_after_bounded_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Accept one connection, drop it, then stop listening
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _ = ws.next().await;
        drop(ws);
        drop(listener);
    });

    let (playback, _edges, _task) = PlaybackHandle::spawn(VirtualOutput::new(48_000), PlaybackConfig::default(), None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = VoiceChannelClient::new(config_for(port), "sess-1", 7, playback, tx);
    client.connect();

    assert_eq!(next_event(&mut rx).await, VoiceEvent::Opened);
    assert_eq!(next_event(&mut rx).await, VoiceEvent::Closed);
    assert_eq!(next_event(&mut rx).await, VoiceEvent::TerminalFailure { attempts: 3 });
    assert!(client.synthesize("late", "en", "sess-1").is_err());
}

#[tokio::test]
async fn test_intentional_close_is_not_retried() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (playback, _edges, _task) = PlaybackHandle::spawn(VirtualOutput::new(48_000), PlaybackConfig::default(), None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = VoiceChannelClient::new(config_for(port), "sess-1", 7, playback, tx);
    client.connect();

    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    let _registration = ws.next().await;
    assert_eq!(next_event(&mut rx).await, VoiceEvent::Opened);

    client.close().await;

    let reconnect = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(reconnect.is_err(), "client reconnected after an intentional close");

    while let Ok(Some((_, event))) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
        assert!(!matches!(event, VoiceEvent::TerminalFailure { .. }));
    }
}
