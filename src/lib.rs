//! Realtime session core for talking to a remote persona
//!
//! Text, text plus synthesized voice, or a live avatar feed. The
//! [`controller::SessionController`] owns the voice socket, the peer media session,
//! the outbound dispatch queue, gapless audio playback, idle credit metering and the
//! video health monitor, and tears them down together.

#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod credits;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod health;
pub mod inactivity;
pub mod peer;
pub mod playback;
pub mod recorder;
pub mod session;
pub mod timer;
pub mod voice;

pub use config::RealtimeConfig;
pub use controller::{ControllerDeps, ControllerHandle, SessionController};
pub use credits::{BillingApi, CreditLedger, HttpBillingApi};
pub use error::{Result, SessionError};
pub use events::SessionEvent;
pub use session::{ConversationMode, Session};
