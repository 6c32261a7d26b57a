//! Playback task - owns the scheduler and turns its silence deadline into a timer

use crate::config::PlaybackConfig;
use crate::playback::output::OutputDevice;
use crate::playback::resample::decode_pcm16le;
use crate::playback::scheduler::{PlaybackEdge, PlaybackScheduler};
use crate::recorder::PlaybackRecorder;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

#[derive(Debug)]
enum PlaybackCommand {
    Format {
        sample_rate: Option<u32>,
        channels: Option<u16>,
    },
    Pcm {
        samples: Vec<i16>,
        channels: Option<u16>,
        sample_rate: Option<u32>,
    },
    ArmGestureUnlock,
    UserGesture,
    Reset,
}

/// Cheap clonable sender side of the playback task
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    tx: UnboundedSender<PlaybackCommand>,
}

impl PlaybackHandle {
    /// Spawn the playback task. Edges are delivered on the returned receiver.
    pub fn spawn<D>(
        device: D,
        config: PlaybackConfig,
        recorder: Option<PlaybackRecorder>,
    ) -> (Self, UnboundedReceiver<PlaybackEdge>, JoinHandle<()>)
    where
        D: OutputDevice + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (edge_tx, edge_rx) = mpsc::unbounded_channel();
        let scheduler = PlaybackScheduler::new(device, config).with_recorder(recorder);
        let task = tokio::spawn(run(scheduler, rx, edge_tx));
        (Self { tx }, edge_rx, task)
    }

    pub fn configure_format(&self, sample_rate: u32, channels: u16) {
        self.announce_format(Some(sample_rate), Some(channels));
    }

    /// Format announcement where missing fields keep the current value
    pub fn announce_format(&self, sample_rate: Option<u32>, channels: Option<u16>) {
        self.send(PlaybackCommand::Format { sample_rate, channels });
    }

    pub fn enqueue_pcm(&self, samples: Vec<i16>, channels: Option<u16>, sample_rate: Option<u32>) {
        self.send(PlaybackCommand::Pcm {
            samples,
            channels,
            sample_rate,
        });
    }

    /// Raw little-endian 16-bit frame from the wire, in the announced format
    pub fn enqueue_bytes(&self, bytes: &[u8]) {
        self.enqueue_pcm(decode_pcm16le(bytes), None, None);
    }

    pub fn arm_gesture_unlock(&self) {
        self.send(PlaybackCommand::ArmGestureUnlock);
    }

    pub fn user_gesture(&self) {
        self.send(PlaybackCommand::UserGesture);
    }

    pub fn reset(&self) {
        self.send(PlaybackCommand::Reset);
    }

    fn send(&self, command: PlaybackCommand) {
        if self.tx.send(command).is_err() {
            warn!("Playback task has stopped, dropping command");
        }
    }
}

async fn run<D: OutputDevice>(
    mut scheduler: PlaybackScheduler<D>,
    mut rx: UnboundedReceiver<PlaybackCommand>,
    edge_tx: UnboundedSender<PlaybackEdge>,
) {
    info!("Playback task started");

    loop {
        let deadline = scheduler.silence_deadline().map(|at| {
            let wait = (at - scheduler.device_time()).max(0.0);
            Instant::now() + Duration::from_secs_f64(wait)
        });

        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else {
                    break;
                };
                handle_command(&mut scheduler, command);
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                scheduler.check_silence();
            }
        }

        for edge in scheduler.drain_edges() {
            if edge_tx.send(edge).is_err() {
                debug!("Edge receiver dropped");
            }
        }
    }

    info!("Playback task shutting down");
}

fn handle_command<D: OutputDevice>(scheduler: &mut PlaybackScheduler<D>, command: PlaybackCommand) {
    match command {
        PlaybackCommand::Format { sample_rate, channels } => {
            let current = scheduler.format();
            let sample_rate = sample_rate.unwrap_or(current.sample_rate);
            let channels = channels.unwrap_or(current.channels);
            if let Err(e) = scheduler.configure_format(sample_rate, channels) {
                warn!("Ignoring format announcement: {}", e);
            }
        }
        PlaybackCommand::Pcm {
            samples,
            channels,
            sample_rate,
        } => {
            if let Err(e) = scheduler.enqueue_pcm(&samples, channels, sample_rate) {
                warn!("Dropping audio chunk: {}", e);
            }
        }
        PlaybackCommand::ArmGestureUnlock => scheduler.arm_gesture_unlock(),
        PlaybackCommand::UserGesture => {
            if let Err(e) = scheduler.on_user_gesture() {
                warn!("Failed to unlock playback: {}", e);
            }
        }
        PlaybackCommand::Reset => scheduler.reset(),
    }
}
