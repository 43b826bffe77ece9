use std::time::Duration;
use tokio::time::Instant;

/// Tracks listener activity for a session.
///
/// A session stays up while anyone is connected to its mount or a control
/// message arrived within the heartbeat timeout.
#[derive(Debug, Clone)]
pub struct Watchdog {
    heartbeat_timeout: Duration,
    last_activity: Instant,
}

impl Watchdog {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            heartbeat_timeout,
            last_activity: Instant::now(),
        }
    }

    /// Record client activity.
    pub fn heartbeat(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn is_alive(&self, listeners: u32) -> bool {
        listeners > 0 || self.idle_for() < self.heartbeat_timeout
    }
}
