//! Output devices the playback scheduler places buffers on

use crate::error::Result;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

/// An audio sink with its own clock, measured in seconds.
pub trait OutputDevice: Send {
    /// Native output rate buffers must be resampled to
    fn sample_rate(&self) -> u32;

    /// Current device time in seconds
    fn current_time(&self) -> f64;

    /// Queue mono samples to start at `start_at` device seconds.
    fn schedule(&mut self, samples: Vec<i16>, start_at: f64) -> Result<()>;

    /// True while the device refuses to produce sound until a user gesture.
    fn requires_gesture(&self) -> bool {
        false
    }

    /// Unlock a gesture-gated device.
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    /// Drop everything queued but not yet played.
    fn stop_all(&mut self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    pub start: f64,
    pub duration: f64,
    pub samples: usize,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug)]
struct VirtualState {
    scheduled: Vec<ScheduledBuffer>,
    locked: bool,
    resumes: u32,
    stops: u32,
}

/// Clock-driven device that keeps a log of what was scheduled.
///
/// Time follows the tokio clock, so paused-time tests see deterministic device time.
/// Clones share the same log.
#[derive(Debug, Clone)]
pub struct VirtualOutput {
    sample_rate: u32,
    origin: Instant,
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self::build(sample_rate, false)
    }

    /// Device that stays silent until `resume()` is called
    pub fn gesture_locked(sample_rate: u32) -> Self {
        Self::build(sample_rate, true)
    }

    fn build(sample_rate: u32, locked: bool) -> Self {
        Self {
            sample_rate,
            origin: Instant::now(),
            state: Arc::new(Mutex::new(VirtualState {
                scheduled: Vec::new(),
                locked,
                resumes: 0,
                stops: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn scheduled(&self) -> Vec<ScheduledBuffer> {
        self.state().scheduled.clone()
    }

    pub fn resume_count(&self) -> u32 {
        self.state().resumes
    }

    pub fn stop_count(&self) -> u32 {
        self.state().stops
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked
    }
}

impl OutputDevice for VirtualOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, samples: Vec<i16>, start_at: f64) -> Result<()> {
        let duration = samples.len() as f64 / self.sample_rate as f64;
        self.state().scheduled.push(ScheduledBuffer {
            start: start_at,
            duration,
            samples: samples.len(),
        });
        Ok(())
    }

    fn requires_gesture(&self) -> bool {
        self.state().locked
    }

    fn resume(&mut self) -> Result<()> {
        let mut state = self.state();
        state.locked = false;
        state.resumes += 1;
        Ok(())
    }

    fn stop_all(&mut self) {
        self.state().stops += 1;
    }
}
