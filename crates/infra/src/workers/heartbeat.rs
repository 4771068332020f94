//! Poll-loop liveness.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use aic_core::{SharedClock, SystemClock};

/// Default maximum age of the last poll for a loop to count as alive.
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessStatus {
    Ok,
    Unhealthy,
}

/// Result of a liveness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Liveness {
    pub status: LivenessStatus,
    /// Completion time of the most recent poll, if any happened.
    pub last_poll_at: Option<DateTime<Utc>>,
    pub checked_at: DateTime<Utc>,
}

impl Liveness {
    pub fn is_healthy(&self) -> bool {
        self.status == LivenessStatus::Ok
    }
}

/// Anything that can report whether a loop is still making progress.
pub trait LivenessProbe: Send + Sync {
    fn check(&self) -> Liveness;
}

impl<P> LivenessProbe for Arc<P>
where
    P: LivenessProbe + ?Sized,
{
    fn check(&self) -> Liveness {
        (**self).check()
    }
}

/// Liveness signal shared between a poll loop and its health probe.
///
/// The loop calls [`Heartbeat::beat`] after every poll; the probe reports
/// healthy only while the last beat is younger than the window. The heartbeat
/// outlives any single worker, so a restarted worker restores health.
#[derive(Debug)]
pub struct Heartbeat {
    clock: SharedClock,
    window: Duration,
    last_beat: Mutex<Option<DateTime<Utc>>>,
}

impl Heartbeat {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, SystemClock::shared())
    }

    pub fn with_clock(window: Duration, clock: SharedClock) -> Self {
        Self {
            clock,
            window,
            last_beat: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn beat(&self) {
        let now = self.clock.now();
        let mut last = self.last_beat.lock().unwrap_or_else(|p| p.into_inner());
        *last = Some(now);
    }

    pub fn last_beat(&self) -> Option<DateTime<Utc>> {
        *self.last_beat.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl LivenessProbe for Heartbeat {
    fn check(&self) -> Liveness {
        let now = self.clock.now();
        let last_poll_at = self.last_beat();
        let window = chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::days(36_500));

        let alive = last_poll_at.is_some_and(|at| now.signed_duration_since(at) <= window);
        Liveness {
            status: if alive {
                LivenessStatus::Ok
            } else {
                LivenessStatus::Unhealthy
            },
            last_poll_at,
            checked_at: now,
        }
    }
}
