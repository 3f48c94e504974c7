//! Client-side heartbeat timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::Connection;
use crate::liveness::LivenessAction;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No heartbeat reply arrived within the grace window.
    TimedOut,
    /// The connection reached `Disconnected` some other way.
    Closed,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Drive a connection's liveness timers until it expires, closes, or `cancel`
/// fires.
///
/// Every `check_interval` the state machine is polled; when it asks for a
/// probe a `Heartbeat` is sent. The caller owns the teardown for every
/// outcome.
pub async fn run_heartbeat(
    connection: Arc<Connection>,
    check_interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match connection.poll_liveness() {
                    LivenessAction::Expired => return HeartbeatResult::TimedOut,
                    LivenessAction::SendProbe => {
                        if !connection.probe_liveness().await {
                            debug!(conn_id = %connection.id(), "heartbeat probe not sent");
                        }
                    }
                    LivenessAction::None => {
                        if connection.is_disconnected() {
                            return HeartbeatResult::Closed;
                        }
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
