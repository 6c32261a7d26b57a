/// Voice channel probe
/// Opens text+voice mode against the configured backend and speaks one line
use anyhow::{bail, Context, Result};
use livepersona::peer::{HttpSignaling, PeerConnector};
use livepersona::{
    ConversationMode, ControllerDeps, HttpBillingApi, RealtimeConfig, Session, SessionController, SessionEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "pulse")]
fn output_device(sample_rate: u32) -> Result<livepersona::playback::pulse::PulseOutput> {
    livepersona::playback::pulse::PulseOutput::new(sample_rate).context("opening PulseAudio output")
}

#[cfg(not(feature = "pulse"))]
fn output_device(sample_rate: u32) -> Result<livepersona::playback::VirtualOutput> {
    warn!("Built without the pulse feature, audio is scheduled on a virtual device");
    Ok(livepersona::playback::VirtualOutput::new(sample_rate))
}

#[cfg(feature = "webrtc")]
fn connector() -> Result<Arc<dyn PeerConnector>> {
    let connector = livepersona::peer::webrtc_backend::WebRtcConnector::new(vec![
        "stun:stun.l.google.com:19302".to_string(),
    ])
    .context("building WebRTC connector")?;
    Ok(Arc::new(connector))
}

#[cfg(not(feature = "webrtc"))]
fn connector() -> Result<Arc<dyn PeerConnector>> {
    Ok(Arc::new(livepersona::peer::DisabledConnector))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let text = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if text.trim().is_empty() {
        bail!("usage: voice_probe <text to speak>");
    }

    let config = RealtimeConfig::from_env().context("reading LIVEPERSONA_* configuration")?;
    info!("Using API base {}", config.api_base_url);

    let billing = Arc::new(HttpBillingApi::new(config.api_base_url.clone(), config.auth_token.clone()));
    let deps = ControllerDeps {
        connector: connector()?,
        signaling: Arc::new(HttpSignaling::new()),
        billing,
        device: output_device(48_000)?,
        initial_balance: 0,
    };

    let (controller, handle, mut events) = SessionController::new(config, Session::new(ConversationMode::Text), deps);
    let task = tokio::spawn(controller.run());

    handle.refresh_credits()?;
    handle.set_mode(ConversationMode::TextVoice)?;
    handle.user_gesture()?;
    handle.send_message(text, "en")?;

    let outcome = tokio::time::timeout(Duration::from_secs(120), async {
        while let Some(event) = events.recv().await {
            info!("Event: {:?}", event);
            match event {
                SessionEvent::SpeechEnded => return Ok(()),
                SessionEvent::Degraded { .. } => bail!("voice mode unavailable"),
                SessionEvent::CreditsExhausted { balance, required } => {
                    bail!("not enough credits ({balance} < {required})")
                }
                _ => {}
            }
        }
        bail!("controller stopped unexpectedly")
    })
    .await;

    handle.shutdown()?;
    if let Err(e) = task.await {
        error!("Controller task failed: {}", e);
    }

    match outcome {
        Ok(result) => result,
        Err(_) => bail!("no speech within 120s"),
    }
}
