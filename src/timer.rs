//! Periodic timer tasks with cooperative cancellation

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Call `on_tick` every `period` until the token is cancelled or `on_tick` returns false.
///
/// The first tick fires after `first_delay`.
pub fn spawn_periodic<F>(
    name: &'static str,
    first_delay: Duration,
    period: Duration,
    cancel: CancellationToken,
    mut on_tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + first_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("{} timer cancelled", name);
                    break;
                }
                _ = ticker.tick() => {
                    if !on_tick() {
                        debug!("{} timer receiver gone", name);
                        break;
                    }
                }
            }
        }
    })
}

/// Call `on_fire` once after `delay` unless cancelled first.
pub fn spawn_once<F>(delay: Duration, cancel: CancellationToken, on_fire: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => on_fire(),
        }
    })
}
