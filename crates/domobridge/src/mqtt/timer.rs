use std::time::Duration;

use tokio::time::Instant;

use crate::bus::ReconnectTimer;

/// Reconnect timer backed by a tokio deadline.
///
/// The timer only stores the deadline; the runtime loop sleeps until it and
/// then calls [`TokioTimer::fire`]. Disarming clears the deadline, so a
/// cancelled timer never fires.
#[derive(Debug, Default)]
pub struct TokioTimer {
    deadline: Option<Instant>,
}

impl TokioTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Clear an elapsed deadline. Returns false if the timer was not armed
    /// or is not yet due.
    pub fn fire(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

impl ReconnectTimer for TokioTimer {
    fn arm_once(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    fn disarm(&mut self) {
        self.deadline = None;
    }
}

/// Sleep until `deadline`, or forever if there is none
pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
