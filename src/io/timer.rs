//! ARTIM (Association Request/Reject/Release Timer)
//!
//! Bounds every wait for a resolving PDU from the peer. The state machine
//! polls [`ArtimTimer::expired`] as one of its event sources; an unarmed
//! timer never fires.

use super::state::State;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Sleep};
use tracing::trace;

/// Default ARTIM timeout
pub const DEFAULT_ARTIM_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ArtimTimer {
    timeout: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
    armed_in: State,
}

impl ArtimTimer {
    pub fn new(timeout: Duration) -> Self {
        ArtimTimer {
            timeout,
            deadline: None,
            armed_in: State::Idle,
        }
    }

    /// Arm (or re-arm) the timer; `state` is reported on expiry
    pub fn start(&mut self, state: State) {
        trace!(state = %state, timeout = ?self.timeout, "ARTIM started");
        self.deadline = Some(Box::pin(sleep(self.timeout)));
        self.armed_in = state;
    }

    pub fn stop(&mut self) {
        if self.deadline.take().is_some() {
            trace!(state = %self.armed_in, "ARTIM stopped");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve when the armed timer fires, yielding the state it was armed in
    ///
    /// Pending forever while unarmed. Cancel safe: dropping the future leaves
    /// the deadline in place.
    pub async fn expired(&mut self) -> State {
        match self.deadline.as_mut() {
            Some(deadline) => {
                deadline.as_mut().await;
                self.deadline = None;
                self.armed_in
            }
            None => std::future::pending().await,
        }
    }
}
