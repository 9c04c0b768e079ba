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
use crate::registry::{Arbitration, BlinkEntry, Registry};
use crate::services::{half_period, PeriodicTimer, TimerService};
use log::*;
use std::sync::{Arc, Weak};

struct Shared<D, T> {
    driver: D,
    registry: Registry<T>,
}

impl<D: OutputDriver, T: PeriodicTimer> Shared<D, T> {
    // Runs on the timer task, once per half period of the entry
    fn on_tick(&self, output: OutputId, serial: u32) {
        let mut registry = self.registry.lock();

        // stopped or replaced while this tick was pending
        let Some(entry) = registry.get_current_mut(output, serial) else {
            return;
        };

        let half_period_ms = entry.half_period_ms();
        if half_period_ms < entry.remaining_ms {
            if !entry.forever {
                entry.remaining_ms -= half_period_ms;
            }
            entry.level = !entry.level;
            self.driver.set_level(output, entry.level);
            debug!("{} set to {}", output, entry.level as u8);
        } else {
            registry.remove(&self.driver, output, None);
        }
    }
}

/// Blinks outputs independently, each one driven by its own periodic timer.
pub struct Blinker<D: OutputDriver, S: TimerService> {
    shared: Arc<Shared<D, S::Timer>>,
    timers: S,
}

impl<D: OutputDriver, S: TimerService> Blinker<D, S> {
    pub fn new(driver: D, timers: S) -> Self {
        Blinker {
            shared: Arc::new(Shared {
                driver,
                registry: Registry::new(),
            }),
            timers,
        }
    }

    /// Start blinking `output` with a full on/off cycle of `period_ms` for
    /// `duration_ms` (or [`FOREVER`]), then leave it at `stop_level`.
    ///
    /// A blink already running on the output is replaced only by a higher
    /// priority, or by the same priority with a longer duration than what it
    /// has left. Otherwise the request is rejected and nothing changes.
    pub fn start(
        &self,
        output: OutputId,
        period_ms: u32,
        duration_ms: u32,
        stop_level: bool,
        priority: u8,
    ) -> Result<(), BlinkError> {
        if period_ms < min_period_ms() {
            error!(
                "Blink period too short. {} Minimum: {}ms",
                output,
                min_period_ms()
            );
            return Err(BlinkError::InvalidPeriod);
        }
        if duration_ms != FOREVER && duration_ms % period_ms != 0 {
            error!(
                "Blink duration is not multiple of blink period. {}",
                output
            );
            return Err(BlinkError::InvalidDuration);
        }

        let mut registry = self.shared.registry.lock();

        let arbitration = registry.arbitrate(output, priority, duration_ms);
        if arbitration == Arbitration::Reject {
            debug!("{} busy, start with priority {} rejected", output, priority);
            return Err(BlinkError::Rejected);
        }

        // The new timer is armed before the running blink is touched, so a
        // failing timer service leaves the output as it was.
        let serial = registry.next_serial();
        let timer = self.arm_timer(output, serial, period_ms)?;

        if arbitration == Arbitration::Replace {
            registry.remove(&self.shared.driver, output, None);
        }

        registry.insert(BlinkEntry {
            output,
            period_ms,
            remaining_ms: duration_ms,
            forever: duration_ms == FOREVER,
            level: false,
            stop_level,
            priority,
            serial,
            timer: Some(timer),
        });
        self.shared.driver.set_level(output, false);
        debug!(
            "{} blinking, period {}ms duration {}ms priority {}",
            output, period_ms, duration_ms, priority
        );

        drop(registry.release());
        Ok(())
    }

    fn arm_timer(
        &self,
        output: OutputId,
        serial: u32,
        period_ms: u32,
    ) -> Result<S::Timer, BlinkError> {
        let shared: Weak<Shared<D, S::Timer>> = Arc::downgrade(&self.shared);
        let timer = self.timers.timer(move || {
            if let Some(shared) = shared.upgrade() {
                shared.on_tick(output, serial);
            }
        })?;
        timer.every(half_period(period_ms))?;

        Ok(timer)
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

    /// Stop blinking `output` and leave it at `stop_level`.
    pub fn stop(&self, output: OutputId, stop_level: bool) -> Result<(), BlinkError> {
        let mut registry = self.shared.registry.lock();
        debug!("Stopping {}", output);

        let removed = registry.remove(&self.shared.driver, output, Some(stop_level));
        drop(registry.release());

        removed.map(|_| ()).ok_or(BlinkError::NotFound)
    }
}

impl<D: OutputDriver, S: TimerService> Drop for Blinker<D, S> {
    fn drop(&mut self) {
        let mut registry = self.shared.registry.lock();
        for output in registry.outputs() {
            registry.remove(&self.shared.driver, output, None);
        }
        drop(registry.release());
    }
}
