use crate::errors::BlinkError;
use std::time::Duration;

/// Periodic timer handle. Dropping the handle deletes the timer.
pub trait PeriodicTimer: Send + 'static {
    /// Arm the timer to fire every `interval`, first after one interval.
    fn every(&self, interval: Duration) -> Result<(), BlinkError>;

    /// Disarm the timer. Returns true if it was armed.
    fn cancel(&self) -> Result<bool, BlinkError>;
}

/// Creates periodic timers whose callbacks run on a dedicated context
/// (the esp_timer task on target).
pub trait TimerService {
    type Timer: PeriodicTimer;

    fn timer<F>(&self, callback: F) -> Result<Self::Timer, BlinkError>
    where
        F: FnMut() + Send + 'static;
}

pub(crate) fn half_period(period_ms: u32) -> Duration {
    Duration::from_millis(u64::from(period_ms / 2))
}
