//! Inbound video continuity monitor

use crate::config::HealthConfig;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Stall timestamps inside a sliding time window
#[derive(Debug, Clone)]
pub struct ConnectionHealthWindow {
    stalls: VecDeque<Instant>,
    window: Duration,
}

impl ConnectionHealthWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            stalls: VecDeque::new(),
            window,
        }
    }

    pub fn record(&mut self, at: Instant) {
        self.stalls.push_back(at);
    }

    /// Drop entries older than the window.
    pub fn purge(&mut self, now: Instant) {
        while let Some(&oldest) = self.stalls.front() {
            if now.duration_since(oldest) > self.window {
                self.stalls.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.stalls.len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn clear(&mut self) {
        self.stalls.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// No stream, or still inside the startup grace period
    Warming,
    Fine,
    Stalled { count: usize },
    /// Threshold crossed: tear the session down. `surface_error` is false for intentional disconnects.
    Teardown { surface_error: bool },
    /// Already torn down for this stream
    Tripped,
}

#[derive(Debug)]
pub struct ConnectionHealthMonitor {
    config: HealthConfig,
    window: ConnectionHealthWindow,
    attached_at: Option<Instant>,
    last_position: Option<f64>,
    tripped: bool,
    intentional: bool,
    clear_intentional_at: Option<Instant>,
}

impl ConnectionHealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            window: ConnectionHealthWindow::new(config.window),
            config,
            attached_at: None,
            last_position: None,
            tripped: false,
            intentional: false,
            clear_intentional_at: None,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn window(&self) -> &ConnectionHealthWindow {
        &self.window
    }

    pub fn on_stream_attached(&mut self, now: Instant) {
        info!("Video stream attached, sampling after {:?}", self.config.startup_grace);
        self.attached_at = Some(now);
        self.last_position = None;
        self.tripped = false;
        self.window.clear();
    }

    pub fn detach(&mut self) {
        self.attached_at = None;
        self.last_position = None;
        self.window.clear();
    }

    pub fn is_attached(&self) -> bool {
        self.attached_at.is_some()
    }

    /// Flag the coming disconnect as deliberate so it is not reported.
    pub fn mark_intentional_disconnect(&mut self) {
        self.intentional = true;
        self.clear_intentional_at = None;
    }

    /// A new peer session starts with no flag inherited from the one torn down before it.
    pub fn clear_intentional_disconnect(&mut self) {
        if self.intentional {
            debug!("New peer session, dropping intentional disconnect flag");
        }
        self.intentional = false;
        self.clear_intentional_at = None;
    }

    pub fn is_intentional(&self) -> bool {
        self.intentional
    }

    /// Classify one playback position sample.
    pub fn sample(&mut self, now: Instant, position: Option<f64>) -> HealthVerdict {
        let Some(attached_at) = self.attached_at else {
            return HealthVerdict::Warming;
        };
        if self.tripped {
            return HealthVerdict::Tripped;
        }
        if now.duration_since(attached_at) < self.config.startup_grace {
            if position.is_some() {
                self.last_position = position;
            }
            return HealthVerdict::Warming;
        }

        self.window.purge(now);

        let min_advance = self.config.stall_fraction * self.config.sample_interval.as_secs_f64();
        let stalled = match (self.last_position, position) {
            (_, None) => true,
            (Some(previous), Some(current)) => current - previous < min_advance,
            (None, Some(_)) => false,
        };
        if position.is_some() {
            self.last_position = position;
        }

        if !stalled {
            self.observe_healthy(now);
            return HealthVerdict::Fine;
        }

        self.window.record(now);
        let count = self.window.count();
        if count >= self.config.stall_threshold {
            self.tripped = true;
            let surface_error = !self.intentional;
            if surface_error {
                warn!("{} stalls within {:?}, tearing down", count, self.window.window());
            } else {
                info!("Stall threshold crossed during intentional disconnect, not reporting");
            }
            return HealthVerdict::Teardown { surface_error };
        }

        debug!("Video stall {} of {}", count, self.config.stall_threshold);
        HealthVerdict::Stalled { count }
    }

    fn observe_healthy(&mut self, now: Instant) {
        if !self.intentional {
            return;
        }
        match self.clear_intentional_at {
            None => self.clear_intentional_at = Some(now + self.config.intentional_clear_delay),
            Some(at) if now >= at => {
                debug!("Stream healthy again, clearing intentional disconnect flag");
                self.intentional = false;
                self.clear_intentional_at = None;
            }
            Some(_) => {}
        }
    }
}
