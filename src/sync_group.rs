/*
 * ESP32 Non-Blocking Blink
 *
 * MIT license
 *
 * Copyright (c) 2021-2023 Michael Zill
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 *
 * Apache license, Version 2.0
 *
 * Copyright (c) 2021-2023 Michael Zill
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */
use crate::configuration::min_period_ms;
use crate::errors::BlinkError;
use crate::global_settings::FOREVER;
use crate::peripherals::{OutputDriver, OutputId};
use crate::registry::{Arbitration, BlinkEntry, Registry, RegistryGuard};
use crate::services::{half_period, PeriodicTimer, TimerService};
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

// Round up to the next multiple of `period_ms`, or down if that would overflow
fn round_up(value_ms: u32, period_ms: u32) -> u32 {
    match value_ms % period_ms {
        0 => value_ms,
        correction => (value_ms - correction)
            .checked_add(period_ms)
            .unwrap_or(value_ms - correction),
    }
}

// Forever is held as the largest whole number of periods below FOREVER, so
// the tick arithmetic never wraps
fn normalize_duration(duration_ms: u32, period_ms: u32) -> u32 {
    if duration_ms == FOREVER {
        round_up(FOREVER - period_ms, period_ms)
    } else {
        round_up(duration_ms, period_ms)
    }
}

// Advance one member by half a timebase. Returns true when its level flips.
fn tick_entry<T>(entry: &mut BlinkEntry<T>, half_timebase_ms: u32) -> bool {
    entry.remaining_ms = entry.remaining_ms.saturating_sub(half_timebase_ms);
    if entry.forever && entry.remaining_ms < entry.period_ms {
        // top up by whole periods, phase is unchanged
        let refill_ms = normalize_duration(FOREVER, entry.period_ms) - entry.period_ms;
        entry.remaining_ms += refill_ms;
    }

    if entry.remaining_ms % entry.half_period_ms() == 0 {
        entry.level = !entry.level;
        true
    } else {
        false
    }
}

fn is_expired<T>(entry: &BlinkEntry<T>) -> bool {
    entry.remaining_ms < entry.half_period_ms()
}

struct GroupShared<D, T> {
    driver: D,
    registry: Registry<T>,
    timebase_ms: u32,
    sync_level: bool,
    terminating: AtomicBool,
    timer: Mutex<Option<T>>,
}

impl<D: OutputDriver, T: PeriodicTimer> GroupShared<D, T> {
    // Runs on the timer task every half timebase
    fn on_tick(&self) {
        if self.registry.is_empty() {
            return;
        }

        let half_timebase_ms = self.timebase_ms / 2;
        let mut expired = Vec::new();
        {
            let mut registry = self.registry.lock();
            for entry in registry.entries_mut() {
                if tick_entry(entry, half_timebase_ms) {
                    self.driver.set_level(entry.output, entry.level);
                    debug!("{} set to {}", entry.output, entry.level as u8);
                }
                if is_expired(entry) {
                    expired.push((entry.output, entry.serial));
                }
            }
        }

        // every toggle of this tick is out before any member is removed
        for (output, serial) in expired {
            let mut registry = self.registry.lock();
            let still_expired = registry
                .get_current_mut(output, serial)
                .is_some_and(|entry| is_expired(entry));
            if still_expired {
                registry.remove(&self.driver, output, None);
            }
        }
    }

    // Force every member to the sync level and align its remaining time to a
    // whole number of its periods
    fn synchronize(&self, registry: &mut RegistryGuard<'_, T>) {
        for entry in registry.entries_mut() {
            self.driver.set_level(entry.output, self.sync_level);
            entry.level = self.sync_level;
            entry.remaining_ms = round_up(entry.remaining_ms, entry.period_ms);
            debug!("{} sync at level {}", entry.output, self.sync_level as u8);
        }
    }

    fn timer(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outputs blinking in phase, all driven by one shared timebase timer.
///
/// Every time a member joins, all members restart from the sync level with
/// their remaining time rounded up to whole periods. Members with the same
/// period therefore toggle together, and members whose periods differ keep a
/// fixed phase relation.
pub struct SyncGroup<D: OutputDriver, T: PeriodicTimer> {
    shared: Arc<GroupShared<D, T>>,
}

impl<D: OutputDriver, T: PeriodicTimer> SyncGroup<D, T> {
    /// Create a group ticking every `timebase_ms / 2`.
    ///
    /// Use the highest common factor of all periods the group will run as
    /// timebase to keep the number of ticks low. The timebase can't be
    /// changed later; delete the group and create a new one instead.
    pub fn create<S>(
        driver: D,
        timers: &S,
        timebase_ms: u32,
        sync_level: bool,
    ) -> Result<Self, BlinkError>
    where
        S: TimerService<Timer = T>,
    {
        if timebase_ms < min_period_ms() {
            error!("Timebase too short. Minimum: {}ms", min_period_ms());
            return Err(BlinkError::InvalidPeriod);
        }

        let shared = Arc::new(GroupShared {
            driver,
            registry: Registry::new(),
            timebase_ms,
            sync_level,
            terminating: AtomicBool::new(false),
            timer: Mutex::new(None),
        });

        let weak = Arc::downgrade(&shared);
        let timer = timers.timer(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_tick();
            }
        })?;
        timer.every(half_period(timebase_ms))?;
        *shared.timer() = Some(timer);

        info!(
            "Sync group created, timebase {}ms sync level {}",
            timebase_ms, sync_level as u8
        );
        Ok(SyncGroup { shared })
    }

    pub fn timebase_ms(&self) -> u32 {
        self.shared.timebase_ms
    }

    pub fn sync_level(&self) -> bool {
        self.shared.sync_level
    }

    /// Join `output` to the group. `period_ms` must be a multiple of the
    /// timebase, `duration_ms` is rounded up to whole periods.
    ///
    /// Arbitration against a blink already on the output is the same as for
    /// [`crate::Blinker::start`]. On success every member is resynchronized.
    pub fn start(
        &self,
        output: OutputId,
        period_ms: u32,
        duration_ms: u32,
        stop_level: bool,
        priority: u8,
    ) -> Result<(), BlinkError> {
        if self.shared.terminating.load(Ordering::Acquire) {
            return Err(BlinkError::GroupTerminating);
        }
        if period_ms < min_period_ms() {
            error!(
                "Blink period too short. {} Minimum: {}ms",
                output,
                min_period_ms()
            );
            return Err(BlinkError::InvalidPeriod);
        }
        if period_ms % self.shared.timebase_ms != 0 {
            error!(
                "Blink period is not multiple of sync group timebase. {}",
                output
            );
            return Err(BlinkError::NotMultipleOfTimebase);
        }

        let remaining_ms = normalize_duration(duration_ms, period_ms);

        let mut registry = self.shared.registry.lock();
        if self.shared.terminating.load(Ordering::Acquire) {
            return Err(BlinkError::GroupTerminating);
        }

        match registry.arbitrate(output, priority, remaining_ms) {
            Arbitration::Reject => {
                debug!("{} busy, start with priority {} rejected", output, priority);
                return Err(BlinkError::Rejected);
            }
            Arbitration::Replace => {
                registry.remove(&self.shared.driver, output, None);
            }
            Arbitration::Vacant => {}
        }

        let serial = registry.next_serial();
        registry.insert(BlinkEntry {
            output,
            period_ms,
            remaining_ms,
            forever: duration_ms == FOREVER,
            level: self.shared.sync_level,
            stop_level,
            priority,
            serial,
            timer: None,
        });
        self.shared.synchronize(&mut registry);
        debug!(
            "{} joined sync group, period {}ms duration {}ms priority {}",
            output, period_ms, remaining_ms, priority
        );

        drop(registry.release());
        Ok(())
    }

    /// Best effort: the blink may expire right after this returns true.
    pub fn is_active(&self, output: OutputId) -> bool {
        self.shared.registry.contains(output)
    }

    pub fn active_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn remaining_ms(&self, output: OutputId) -> Option<u32> {
        self.shared
            .registry
            .lock()
            .get(output)
            .map(|entry| entry.remaining_ms)
    }

    /// Remove `output` from the group and leave it at `stop_level`. The other
    /// members keep their phase.
    pub fn stop(&self, output: OutputId, stop_level: bool) -> Result<(), BlinkError> {
        let mut registry = self.shared.registry.lock();
        debug!("Stopping {}", output);

        let removed = registry.remove(&self.shared.driver, output, Some(stop_level));
        drop(registry.release());

        removed.map(|_| ()).ok_or(BlinkError::NotFound)
    }

    /// Stop the timebase and every member, each at its own stop level.
    /// Later `start` calls fail with [`BlinkError::GroupTerminating`].
    pub fn delete(&self) {
        if self.shared.terminating.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(timer) = self.shared.timer().take() {
            if let Err(err) = timer.cancel() {
                warn!("Cancelling sync group timer failed: {}", err);
            }
        }

        let outputs = self.shared.registry.lock().outputs();
        for output in outputs {
            let mut registry = self.shared.registry.lock();
            registry.remove(&self.shared.driver, output, None);
        }
        info!("Sync group deleted");
    }
}

impl<D: OutputDriver, T: PeriodicTimer> Drop for SyncGroup<D, T> {
    fn drop(&mut self) {
        self.delete();
    }
}
