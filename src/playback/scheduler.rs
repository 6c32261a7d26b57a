//! Gapless playback scheduling on a monotonic play head
//!
//! Every chunk is converted to mono, resampled to the device rate and placed at
//! `max(play_head, now + lookahead)`, so successive chunks butt against each other
//! without gaps or overlap. The scheduler raises one start-of-speech edge per
//! utterance and one end-of-speech edge once the silence grace has elapsed past the
//! last scheduled chunk.

use crate::config::PlaybackConfig;
use crate::error::{Result, SessionError};
use crate::playback::output::OutputDevice;
use crate::playback::resample::{downmix_to_mono, resample_linear};
use crate::recorder::PlaybackRecorder;
use tracing::{debug, info, warn};

/// Utterance boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEdge {
    SpeechStarted,
    SpeechEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Where the next chunk goes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackCursor {
    pub play_head: f64,
    pub device_sample_rate: u32,
    pub speaking: bool,
}

/// Placement of one enqueued chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub sequence: u64,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GestureGate {
    /// Nothing to unlock yet
    Dormant,
    /// First channel opened; waiting for a click/touch
    Armed,
    /// Unlocked once, never re-armed
    Released,
}

pub struct PlaybackScheduler<D: OutputDevice> {
    device: D,
    config: PlaybackConfig,
    format: SourceFormat,
    cursor: PlaybackCursor,
    next_sequence: u64,
    gesture: GestureGate,
    recorder: Option<PlaybackRecorder>,
    edges: Vec<PlaybackEdge>,
}

impl<D: OutputDevice> PlaybackScheduler<D> {
    pub fn new(device: D, config: PlaybackConfig) -> Self {
        let device_sample_rate = device.sample_rate();
        let play_head = device.current_time();
        Self {
            format: SourceFormat {
                sample_rate: config.default_sample_rate,
                channels: config.default_channels,
            },
            cursor: PlaybackCursor {
                play_head,
                device_sample_rate,
                speaking: false,
            },
            device,
            config,
            next_sequence: 0,
            gesture: GestureGate::Dormant,
            recorder: None,
            edges: Vec::new(),
        }
    }

    pub fn with_recorder(mut self, recorder: Option<PlaybackRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn is_speaking(&self) -> bool {
        self.cursor.speaking
    }

    pub fn device_time(&self) -> f64 {
        self.device.current_time()
    }

    /// Update the assumed source format for subsequent chunks.
    pub fn configure_format(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        if sample_rate == 0 {
            return Err(SessionError::InvalidFormat("sample rate 0".into()));
        }
        if !(1..=2).contains(&channels) {
            return Err(SessionError::InvalidFormat(format!(
                "{channels} channels (expected 1 or 2)"
            )));
        }
        debug!("Source format set to {} Hz, {} channel(s)", sample_rate, channels);
        self.format = SourceFormat { sample_rate, channels };
        Ok(())
    }

    /// Convert, resample and schedule a chunk right after the previous one.
    pub fn enqueue_pcm(
        &mut self,
        samples: &[i16],
        channels: Option<u16>,
        sample_rate: Option<u32>,
    ) -> Result<Option<ScheduledChunk>> {
        let channels = channels.unwrap_or(self.format.channels);
        let source_rate = sample_rate.unwrap_or(self.format.sample_rate);

        let mono = downmix_to_mono(samples, channels)?;
        let resampled = resample_linear(&mono, source_rate, self.cursor.device_sample_rate);
        if resampled.is_empty() {
            return Ok(None);
        }

        let duration = resampled.len() as f64 / self.cursor.device_sample_rate as f64;
        let earliest = self.device.current_time() + self.config.lookahead.as_secs_f64();
        let start = self.cursor.play_head.max(earliest);
        let end = start + duration;

        if !self.cursor.speaking {
            self.cursor.speaking = true;
            info!("🔊 Speech started");
            self.edges.push(PlaybackEdge::SpeechStarted);
            if let Some(recorder) = self.recorder.as_mut() {
                recorder.on_speech_start(self.cursor.device_sample_rate);
            }
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.on_samples(&resampled);
        }

        self.device.schedule(resampled, start)?;
        self.cursor.play_head = end;

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!("Scheduled chunk {} at {:.3}s for {:.3}s", sequence, start, duration);

        Ok(Some(ScheduledChunk { sequence, start, end }))
    }

    /// Device time at which end-of-speech fires if no further chunk arrives
    pub fn silence_deadline(&self) -> Option<f64> {
        self.cursor
            .speaking
            .then(|| self.cursor.play_head + self.config.silence_grace.as_secs_f64())
    }

    /// Raise end-of-speech once the grace period past the last chunk has elapsed.
    pub fn check_silence(&mut self) -> bool {
        match self.silence_deadline() {
            Some(deadline) if self.device.current_time() >= deadline => {
                self.end_utterance();
                true
            }
            _ => false,
        }
    }

    fn end_utterance(&mut self) {
        self.cursor.speaking = false;
        info!("🔇 Speech ended");
        self.edges.push(PlaybackEdge::SpeechEnded);
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.on_speech_end();
        }
    }

    /// Called on the first channel-open event: the next user gesture unlocks the device.
    pub fn arm_gesture_unlock(&mut self) {
        if self.gesture == GestureGate::Dormant {
            if self.device.requires_gesture() {
                debug!("Playback locked, waiting for a user gesture");
                self.gesture = GestureGate::Armed;
            } else {
                self.gesture = GestureGate::Released;
            }
        }
    }

    /// A click or touch happened. Unlocks the device at most once.
    pub fn on_user_gesture(&mut self) -> Result<bool> {
        if self.gesture != GestureGate::Armed {
            return Ok(false);
        }
        self.resume()?;
        self.gesture = GestureGate::Released;
        Ok(true)
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.device.requires_gesture() {
            info!("Unlocking playback device");
            self.device.resume()?;
        }
        Ok(())
    }

    /// Stop queued audio and forget the play head. Closes an open utterance.
    pub fn reset(&mut self) {
        self.device.stop_all();
        if self.cursor.speaking {
            self.end_utterance();
        }
        let now = self.device.current_time();
        if now > self.cursor.play_head {
            self.cursor.play_head = now;
        } else {
            // Play head never moves backwards; stopped audio leaves a silent gap.
            warn!("Reset with {:.3}s still scheduled", self.cursor.play_head - now);
        }
    }

    pub fn drain_edges(&mut self) -> Vec<PlaybackEdge> {
        std::mem::take(&mut self.edges)
    }
}
