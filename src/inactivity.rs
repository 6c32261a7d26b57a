//! Idle metering while the avatar session is live
//!
//! `Idle -> Armed` starts the recurring tick; the first tick is charged
//! immediately for the lead-in period. Activity returns to `Idle` and resets the
//! count. Speech and responses re-arm on their end edge; typing and recording have
//! no end edge, so they leave a pending re-arm `input_settle` after the last one. The tick that reaches `max_ticks` moves to `Suspended`, after which no
//! tick is ever accepted. Every transition bumps a generation number and ticks
//! carry the generation they were scheduled under, so a tick from a cancelled
//! timer can never meter or suspend.

use crate::config::InactivityConfig;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactivityPhase {
    Idle,
    Armed,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    RecordingStarted,
    TextTyped,
    SpeechStarted,
    ResponseStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InactivityState {
    pub elapsed_ticks: u32,
    pub max_ticks: u32,
    pub cost_per_tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tick from a timer that no longer applies
    Stale,
    Metered { cost: u64, tick: u32 },
    /// Final tick: charge it, then suspend the session
    Suspend { cost: u64, tick: u32 },
}

#[derive(Debug)]
pub struct InactivityMonitor {
    phase: InactivityPhase,
    state: InactivityState,
    generation: u64,
    rearm_at: Option<Instant>,
    config: InactivityConfig,
}

impl InactivityMonitor {
    pub fn new(config: InactivityConfig) -> Self {
        Self {
            phase: InactivityPhase::Idle,
            state: InactivityState {
                elapsed_ticks: 0,
                max_ticks: config.max_ticks,
                cost_per_tick: config.cost_per_tick,
            },
            generation: 0,
            rearm_at: None,
            config,
        }
    }

    pub fn phase(&self) -> InactivityPhase {
        self.phase
    }

    pub fn state(&self) -> InactivityState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn rearm_at(&self) -> Option<Instant> {
        self.rearm_at
    }

    pub fn config(&self) -> &InactivityConfig {
        &self.config
    }

    /// Start metering. Returns the generation the new ticker must carry.
    ///
    /// Refused while suspended, while already armed, and inside a resume grace window.
    pub fn arm(&mut self, now: Instant) -> Option<u64> {
        match self.phase {
            InactivityPhase::Suspended => {
                debug!("Not arming inactivity timer while suspended");
                None
            }
            InactivityPhase::Armed => None,
            InactivityPhase::Idle => {
                if self.rearm_at.is_some_and(|at| now < at) {
                    debug!("Inside resume grace window, not arming yet");
                    return None;
                }
                self.rearm_at = None;
                self.state.elapsed_ticks = 0;
                self.phase = InactivityPhase::Armed;
                self.generation += 1;
                info!("Inactivity timer armed (generation {})", self.generation);
                Some(self.generation)
            }
        }
    }

    /// Any user or system activity. Returns true if a running timer was cancelled.
    ///
    /// User input pushes the pending re-arm (including a resume grace window) back to
    /// `now + input_settle`. Speech and responses drop it until their end edge arms again.
    pub fn on_activity(&mut self, signal: ActivitySignal, now: Instant) -> bool {
        self.rearm_at = match (self.phase, signal) {
            (InactivityPhase::Suspended, _) => self.rearm_at,
            (_, ActivitySignal::TextTyped | ActivitySignal::RecordingStarted) => {
                let settled = now + self.config.input_settle;
                Some(self.rearm_at.map_or(settled, |at| at.max(settled)))
            }
            (_, ActivitySignal::SpeechStarted | ActivitySignal::ResponseStarted) => None,
        };
        match self.phase {
            InactivityPhase::Armed => {
                debug!("Activity {:?} after {} idle tick(s)", signal, self.state.elapsed_ticks);
                self.phase = InactivityPhase::Idle;
                self.state.elapsed_ticks = 0;
                self.generation += 1;
                true
            }
            InactivityPhase::Idle => {
                self.state.elapsed_ticks = 0;
                false
            }
            InactivityPhase::Suspended => false,
        }
    }

    pub fn on_tick(&mut self, generation: u64) -> TickOutcome {
        if self.phase != InactivityPhase::Armed || generation != self.generation {
            return TickOutcome::Stale;
        }

        self.state.elapsed_ticks += 1;
        let tick = self.state.elapsed_ticks;
        let cost = self.state.cost_per_tick;

        if tick >= self.state.max_ticks {
            info!("Idle threshold reached after {} ticks, suspending", tick);
            self.phase = InactivityPhase::Suspended;
            self.generation += 1;
            TickOutcome::Suspend { cost, tick }
        } else {
            debug!("Idle tick {}/{}", tick, self.state.max_ticks);
            TickOutcome::Metered { cost, tick }
        }
    }

    /// Suspend outside the tick count, e.g. when a charge empties the balance.
    pub fn force_suspend(&mut self) {
        if self.phase == InactivityPhase::Suspended {
            return;
        }
        info!("Forcing suspension from {:?}", self.phase);
        self.phase = InactivityPhase::Suspended;
        self.rearm_at = None;
        self.generation += 1;
    }

    /// Leave `Suspended` and open the grace window before the next arm.
    pub fn resume(&mut self, now: Instant) -> bool {
        if self.phase != InactivityPhase::Suspended {
            return false;
        }
        self.phase = InactivityPhase::Idle;
        self.state.elapsed_ticks = 0;
        self.generation += 1;
        self.rearm_at = Some(now + self.config.resume_grace);
        info!("Resumed, re-arming no earlier than {:?} from now", self.config.resume_grace);
        true
    }

    /// Arm if the resume grace window has passed without new activity.
    pub fn poll_rearm(&mut self, now: Instant) -> Option<u64> {
        match self.rearm_at {
            Some(at) if now >= at && self.phase == InactivityPhase::Idle => self.arm(now),
            _ => None,
        }
    }

    /// Back to `Idle` with nothing pending, used on teardown.
    pub fn reset(&mut self) {
        if self.phase != InactivityPhase::Idle || self.rearm_at.is_some() {
            debug!("Inactivity monitor reset from {:?}", self.phase);
        }
        self.phase = InactivityPhase::Idle;
        self.state.elapsed_ticks = 0;
        self.rearm_at = None;
        self.generation += 1;
    }
}
