//! PulseAudio playback device
//!
//! PulseAudio's simple API blocks on write, so the device runs its own OS thread
//! (like the capture threads) and pads silence to honour scheduled start times.

use crate::error::{Result, SessionError};
use crate::playback::output::OutputDevice;
use libpulse_binding as pulse;
use libpulse_simple_binding as psimple;
use std::sync::mpsc;
use std::time::Instant;
use tracing::{error, info, warn};

const APP_NAME: &str = "livepersona";

enum PulseCommand {
    Play { start_at: f64, samples: Vec<i16> },
    Flush,
}

pub struct PulseOutput {
    sample_rate: u32,
    origin: Instant,
    tx: mpsc::Sender<PulseCommand>,
    _handle: std::thread::JoinHandle<()>,
}

impl PulseOutput {
    pub fn new(sample_rate: u32) -> Result<Self> {
        let spec = pulse::sample::Spec {
            format: pulse::sample::Format::S16le,
            channels: 1,
            rate: sample_rate,
        };
        if !spec.is_valid() {
            return Err(SessionError::InvalidFormat(format!("PulseAudio rejects {sample_rate} Hz")));
        }

        let origin = Instant::now();
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        // The connection is created on the thread that writes to it
        let handle = std::thread::spawn(move || {
            let simple = match psimple::Simple::new(
                None,                           // Use default server
                APP_NAME,                       // Application name
                pulse::stream::Direction::Playback,
                None,                           // Use default sink
                "persona voice",                // Stream description
                &spec,
                None,                           // Use default channel map
                None,                           // Use default buffering attributes
            ) {
                Ok(simple) => {
                    let _ = ready_tx.send(Ok(()));
                    simple
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("Failed to open PulseAudio playback: {e}")));
                    return;
                }
            };
            playback_thread(simple, rx, origin, sample_rate);
        });

        ready_rx
            .recv()
            .map_err(|_| SessionError::Other("PulseAudio thread exited during setup".into()))?
            .map_err(SessionError::Other)?;
        info!("PulseAudio playback connected at {} Hz", sample_rate);

        Ok(Self {
            sample_rate,
            origin,
            tx,
            _handle: handle,
        })
    }
}

impl OutputDevice for PulseOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, samples: Vec<i16>, start_at: f64) -> Result<()> {
        self.tx
            .send(PulseCommand::Play { start_at, samples })
            .map_err(|_| SessionError::ChannelClosed)
    }

    fn stop_all(&mut self) {
        if self.tx.send(PulseCommand::Flush).is_err() {
            warn!("PulseAudio playback thread has exited");
        }
    }
}

fn playback_thread(
    simple: psimple::Simple,
    rx: mpsc::Receiver<PulseCommand>,
    origin: Instant,
    sample_rate: u32,
) {
    // Frames handed to PulseAudio since the device opened
    let mut written: u64 = 0;

    while let Ok(command) = rx.recv() {
        match command {
            PulseCommand::Play { start_at, samples } => {
                let now_frames = (origin.elapsed().as_secs_f64() * sample_rate as f64) as u64;
                let head = written.max(now_frames);
                let target = (start_at * sample_rate as f64) as u64;
                if target > head {
                    let gap = (target - head) as usize;
                    if let Err(e) = simple.write(&vec![0u8; gap * 2]) {
                        error!("PulseAudio silence write failed: {}", e);
                        break;
                    }
                }

                let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                if let Err(e) = simple.write(&bytes) {
                    error!("PulseAudio write failed: {}", e);
                    break;
                }
                written = target.max(head) + samples.len() as u64;
            }
            PulseCommand::Flush => {
                if let Err(e) = simple.flush() {
                    warn!("PulseAudio flush failed: {}", e);
                }
                written = (origin.elapsed().as_secs_f64() * sample_rate as f64) as u64;
            }
        }
    }

    if let Err(e) = simple.drain() {
        warn!("PulseAudio drain failed: {}", e);
    }
    info!("PulseAudio playback thread stopped");
}
