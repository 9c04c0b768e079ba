//! Host doubles for the GPIO and esp_timer services used by the unit tests.

use crate::errors::BlinkError;
use crate::peripherals::{OutputDriver, OutputId};
use crate::services::{PeriodicTimer, TimerService};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ESP_ERR_INVALID_ARG / ESP_ERR_NO_MEM
const ERR_INVALID_ARG: i32 = 0x102;
const ERR_NO_MEM: i32 = 0x101;

pub fn gpio(n: u8) -> OutputId {
    OutputId::new(n).unwrap()
}

#[derive(Default)]
pub struct RecordingOutputs {
    writes: Mutex<HashMap<OutputId, Vec<bool>>>,
}

impl RecordingOutputs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Last level written to `output`.
    pub fn level(&self, output: OutputId) -> Option<bool> {
        self.history(output).last().copied()
    }

    pub fn history(&self, output: OutputId) -> Vec<bool> {
        self.writes
            .lock()
            .unwrap()
            .get(&output)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }
}

impl OutputDriver for RecordingOutputs {
    fn set_level(&self, output: OutputId, level: bool) {
        self.writes
            .lock()
            .unwrap()
            .entry(output)
            .or_default()
            .push(level);
    }
}

struct Schedule {
    interval_us: u64,
    due_us: u64,
}

struct TimerSlot {
    id: usize,
    callback: Mutex<Box<dyn FnMut() + Send>>,
    schedule: Mutex<Option<Schedule>>,
}

#[derive(Default)]
struct Clock {
    now_us: u64,
    timers: Vec<Arc<TimerSlot>>,
}

/// Simulated esp_timer service: nothing fires until `advance` is called.
#[derive(Clone, Default)]
pub struct ManualTimerService {
    clock: Arc<Mutex<Clock>>,
    next_id: Arc<AtomicUsize>,
    fail_next: Arc<AtomicBool>,
}

impl ManualTimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `timer()` call fail as if the heap were exhausted.
    pub fn fail_next_timer(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Timers created and not yet deleted.
    pub fn live_timers(&self) -> usize {
        self.clock.lock().unwrap().timers.len()
    }

    /// Timers currently scheduled to fire.
    pub fn armed_timers(&self) -> usize {
        let timers = self.clock.lock().unwrap().timers.clone();
        timers
            .iter()
            .filter(|slot| slot.schedule.lock().unwrap().is_some())
            .count()
    }

    pub fn now(&self) -> Duration {
        Duration::from_micros(self.clock.lock().unwrap().now_us)
    }

    /// Move the clock forward, firing every due callback in time order.
    /// Timers due at the same instant fire in creation order.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.lock().unwrap().now_us + by.as_micros() as u64;

        loop {
            let timers = self.clock.lock().unwrap().timers.clone();
            let next = timers
                .iter()
                .filter_map(|slot| {
                    let schedule = slot.schedule.lock().unwrap();
                    schedule
                        .as_ref()
                        .filter(|s| s.due_us <= target)
                        .map(|s| (s.due_us, slot.id, slot.clone()))
                })
                .min_by_key(|(due, id, _)| (*due, *id));

            let Some((due, _, slot)) = next else {
                break;
            };

            self.clock.lock().unwrap().now_us = due;
            if let Some(schedule) = slot.schedule.lock().unwrap().as_mut() {
                schedule.due_us += schedule.interval_us;
            }
            let mut callback = slot.callback.lock().unwrap();
            (&mut **callback)();
        }

        self.clock.lock().unwrap().now_us = target;
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

pub struct ManualTimer {
    slot: Arc<TimerSlot>,
    clock: Arc<Mutex<Clock>>,
}

impl TimerService for ManualTimerService {
    type Timer = ManualTimer;

    fn timer<F>(&self, callback: F) -> Result<Self::Timer, BlinkError>
    where
        F: FnMut() + Send + 'static,
    {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BlinkError::TimerFailure(ERR_NO_MEM));
        }

        let slot = Arc::new(TimerSlot {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            callback: Mutex::new(Box::new(callback)),
            schedule: Mutex::new(None),
        });
        self.clock.lock().unwrap().timers.push(slot.clone());

        Ok(ManualTimer {
            slot,
            clock: self.clock.clone(),
        })
    }
}

impl PeriodicTimer for ManualTimer {
    fn every(&self, interval: Duration) -> Result<(), BlinkError> {
        let interval_us = interval.as_micros() as u64;
        if interval_us == 0 {
            return Err(BlinkError::TimerFailure(ERR_INVALID_ARG));
        }
        let now_us = self.clock.lock().unwrap().now_us;
        *self.slot.schedule.lock().unwrap() = Some(Schedule {
            interval_us,
            due_us: now_us + interval_us,
        });
        Ok(())
    }

    fn cancel(&self) -> Result<bool, BlinkError> {
        Ok(self.slot.schedule.lock().unwrap().take().is_some())
    }
}

impl Drop for ManualTimer {
    fn drop(&mut self) {
        self.slot.schedule.lock().unwrap().take();
        let id = self.slot.id;
        self.clock.lock().unwrap().timers.retain(|slot| slot.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn fires_in_due_order() {
        let service = ManualTimerService::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let h = hits.clone();
        let slow = service.timer(move || h.lock().unwrap().push("slow")).unwrap();
        let h = hits.clone();
        let fast = service.timer(move || h.lock().unwrap().push("fast")).unwrap();

        slow.every(Duration::from_millis(300)).unwrap();
        fast.every(Duration::from_millis(200)).unwrap();
        service.advance_ms(600);

        assert_eq!(
            *hits.lock().unwrap(),
            vec!["fast", "slow", "fast", "slow", "fast"]
        );
        assert_eq!(service.now(), Duration::from_millis(600));
    }

    #[test]
    fn cancel_and_drop_stop_callbacks() {
        let service = ManualTimerService::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let timer = service
            .timer(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        timer.every(Duration::from_millis(10)).unwrap();
        service.advance_ms(30);
        assert_eq!(count.load(Ordering::SeqCst), 3);

        assert_eq!(timer.cancel(), Ok(true));
        assert_eq!(timer.cancel(), Ok(false));
        service.advance_ms(30);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(service.live_timers(), 1);

        drop(timer);
        assert_eq!(service.live_timers(), 0);
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let service = ManualTimerService::new();
        service.fail_next_timer();
        assert!(service.timer(|| {}).is_err());
        assert!(service.timer(|| {}).is_ok());
    }
}
