//! Outbound synthesis multiplexer
//!
//! A strict FIFO with a single in-flight slot. The drain step picks the peer data
//! channel when the avatar is live and its channel registered, otherwise the voice
//! socket. When nothing is ready the head goes back to the front and the caller is
//! told when to try again. Busy is only cleared by a completion marker from the
//! channel that carried the request, or by the watchdog.

use crate::config::DispatchConfig;
use crate::error::Result;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub text: String,
    pub language: String,
    pub destination_session_id: String,
    pub enqueued_at: Instant,
}

impl OutboundRequest {
    pub fn new(text: impl Into<String>, language: impl Into<String>, destination_session_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
            destination_session_id: destination_session_id.into(),
            enqueued_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    PeerDataChannel,
    VoiceChannel,
}

/// Channel state as seen by the drain step
pub trait DispatchTargets {
    fn peer_ready(&self) -> bool;
    fn avatar_active(&self) -> bool;
    fn voice_ready(&self) -> bool;
    fn send(&mut self, destination: Destination, request: &OutboundRequest) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing queued
    Idle,
    /// A request is already in flight
    Busy,
    Dispatched(Destination),
    /// Head was requeued; drain again after the delay
    RetryAfter(Duration),
}

#[derive(Debug)]
struct InFlight {
    request: OutboundRequest,
    destination: Destination,
    sent_at: Instant,
}

#[derive(Debug)]
pub struct OutboundDispatchQueue {
    queue: VecDeque<OutboundRequest>,
    in_flight: Option<InFlight>,
    config: DispatchConfig,
}

impl OutboundDispatchQueue {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: None,
            config,
        }
    }

    pub fn enqueue(&mut self, request: OutboundRequest) {
        debug!("Queued synthesis request ({} pending)", self.queue.len() + 1);
        self.queue.push_back(request);
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn in_flight_destination(&self) -> Option<Destination> {
        self.in_flight.as_ref().map(|f| f.destination)
    }

    /// Try to move the head of the queue onto a channel.
    pub fn drain(&mut self, targets: &mut impl DispatchTargets) -> DrainOutcome {
        if self.in_flight.is_some() {
            return DrainOutcome::Busy;
        }
        let Some(request) = self.queue.pop_front() else {
            return DrainOutcome::Idle;
        };

        let destination = if targets.peer_ready() && targets.avatar_active() {
            Destination::PeerDataChannel
        } else if targets.voice_ready() {
            Destination::VoiceChannel
        } else {
            debug!("No synthesis channel ready, retrying in {:?}", self.config.no_channel_retry);
            self.queue.push_front(request);
            return DrainOutcome::RetryAfter(self.config.no_channel_retry);
        };

        if let Err(e) = targets.send(destination, &request) {
            warn!("Sending on {:?} failed: {}", destination, e);
            self.queue.push_front(request);
            return DrainOutcome::RetryAfter(self.config.send_error_retry);
        }

        info!(
            "Dispatched request via {:?} after {:?} in queue",
            destination,
            request.enqueued_at.elapsed()
        );
        self.in_flight = Some(InFlight {
            request,
            destination,
            sent_at: Instant::now(),
        });
        DrainOutcome::Dispatched(destination)
    }

    /// Completion marker from `from`. Markers from another channel are ignored.
    pub fn complete(&mut self, from: Destination) -> Option<OutboundRequest> {
        match &self.in_flight {
            Some(in_flight) if in_flight.destination == from => {
                let done = self.in_flight.take().map(|f| f.request);
                debug!("Request completed via {:?}", from);
                done
            }
            Some(in_flight) => {
                debug!(
                    "Ignoring completion from {:?} while {:?} is in flight",
                    from, in_flight.destination
                );
                None
            }
            None => None,
        }
    }

    /// Last-resort deadline for a request whose completion marker never arrives
    pub fn fallback_deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().map(|f| {
            f.sent_at + estimate_playback_duration(&f.request.text, &self.config) + self.config.watchdog_margin
        })
    }

    /// Clear busy if the watchdog deadline has passed.
    pub fn expire_in_flight(&mut self, now: Instant) -> Option<OutboundRequest> {
        match self.fallback_deadline() {
            Some(deadline) if now >= deadline => {
                warn!("No completion marker before watchdog deadline, releasing channel");
                self.in_flight.take().map(|f| f.request)
            }
            _ => None,
        }
    }

    /// Drop the in-flight request because its channel went away.
    pub fn abandon_in_flight(&mut self) -> Option<OutboundRequest> {
        self.in_flight.take().map(|f| f.request)
    }

    pub fn abandon_if_on(&mut self, destination: Destination) -> Option<OutboundRequest> {
        if self.in_flight_destination() == Some(destination) {
            self.abandon_in_flight()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.in_flight = None;
    }
}

/// Character-count estimate of spoken length
pub fn estimate_playback_duration(text: &str, config: &DispatchConfig) -> Duration {
    let chars = text.chars().count() as u32;
    (config.estimate_per_char * chars).max(config.estimate_floor)
}
