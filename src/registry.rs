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
use crate::peripherals::{OutputDriver, OutputId};
use crate::services::PeriodicTimer;
use log::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One active blink on one output.
#[derive(Debug)]
pub struct BlinkEntry<T> {
    pub output: OutputId,
    pub period_ms: u32,
    pub remaining_ms: u32,
    pub forever: bool,
    pub level: bool,
    pub stop_level: bool,
    pub priority: u8,
    // distinguishes this entry from earlier ones on the same output
    pub(crate) serial: u32,
    pub(crate) timer: Option<T>,
}

impl<T> BlinkEntry<T> {
    pub fn half_period_ms(&self) -> u32 {
        self.period_ms / 2
    }
}

/// Outcome of a start request against the entry currently on its output.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arbitration {
    Vacant,
    Replace,
    Reject,
}

/// Higher priority always wins, equal priority wins only with a strictly
/// longer duration.
pub fn arbitrate<T>(
    existing: Option<&BlinkEntry<T>>,
    priority: u8,
    duration_ms: u32,
) -> Arbitration {
    match existing {
        None => Arbitration::Vacant,
        Some(entry) if priority > entry.priority => Arbitration::Replace,
        Some(entry) if priority == entry.priority && duration_ms > entry.remaining_ms => {
            Arbitration::Replace
        }
        Some(_) => Arbitration::Reject,
    }
}

struct Entries<T> {
    list: Vec<BlinkEntry<T>>,
    // cancelled timers waiting to be dropped outside of their own callback
    retired: Vec<T>,
    serial: u32,
}

/// Blink entries keyed by output, guarded by a single lock.
///
/// Membership is mirrored in an atomic bitmap so `contains` can be answered
/// without waiting for the lock. That answer is a snapshot and may already be
/// stale when the caller acts on it.
pub struct Registry<T> {
    active: AtomicU64,
    entries: Mutex<Entries<T>>,
}

impl<T: PeriodicTimer> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PeriodicTimer> Registry<T> {
    pub fn new() -> Self {
        Registry {
            active: AtomicU64::new(0),
            entries: Mutex::new(Entries {
                list: Vec::new(),
                retired: Vec::new(),
                serial: 0,
            }),
        }
    }

    pub fn contains(&self, output: OutputId) -> bool {
        self.active.load(Ordering::Acquire) & output.mask() != 0
    }

    pub fn len(&self) -> usize {
        self.active.load(Ordering::Acquire).count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lock(&self) -> RegistryGuard<'_, T> {
        RegistryGuard {
            entries: self.entries.lock().unwrap_or_else(PoisonError::into_inner),
            active: &self.active,
        }
    }
}

pub struct RegistryGuard<'a, T> {
    entries: MutexGuard<'a, Entries<T>>,
    active: &'a AtomicU64,
}

impl<T: PeriodicTimer> RegistryGuard<'_, T> {
    pub fn find(&self, output: OutputId) -> Option<usize> {
        self.entries.list.iter().position(|e| e.output == output)
    }

    pub fn get(&self, output: OutputId) -> Option<&BlinkEntry<T>> {
        self.entries.list.iter().find(|e| e.output == output)
    }

    pub fn get_mut(&mut self, output: OutputId) -> Option<&mut BlinkEntry<T>> {
        self.entries.list.iter_mut().find(|e| e.output == output)
    }

    /// Entry on `output` only if it is still the one numbered `serial`.
    pub fn get_current_mut(
        &mut self,
        output: OutputId,
        serial: u32,
    ) -> Option<&mut BlinkEntry<T>> {
        self.get_mut(output).filter(|e| e.serial == serial)
    }

    pub fn arbitrate(&self, output: OutputId, priority: u8, duration_ms: u32) -> Arbitration {
        arbitrate(self.get(output), priority, duration_ms)
    }

    pub fn next_serial(&mut self) -> u32 {
        self.entries.serial = self.entries.serial.wrapping_add(1);
        self.entries.serial
    }

    /// The caller guarantees no entry exists for `entry.output` yet.
    pub fn insert(&mut self, entry: BlinkEntry<T>) {
        debug_assert!(self.find(entry.output).is_none());
        self.active.fetch_or(entry.output.mask(), Ordering::Release);
        self.entries.list.push(entry);
    }

    /// Remove the entry on `output`, driving the line to `stop_level` (or the
    /// entry's own stop level) and cancelling its timer.
    pub fn remove<D: OutputDriver>(
        &mut self,
        driver: &D,
        output: OutputId,
        stop_level: Option<bool>,
    ) -> Option<BlinkEntry<T>> {
        let idx = self.find(output)?;
        let mut entry = self.entries.list.swap_remove(idx);
        self.active.fetch_and(!output.mask(), Ordering::Release);

        let level = stop_level.unwrap_or(entry.stop_level);
        driver.set_level(output, level);
        debug!("{} stopped at level {}", output, level as u8);

        if let Some(timer) = entry.timer.take() {
            if let Err(err) = timer.cancel() {
                warn!("{} cancelling blink timer failed: {}", output, err);
            }
            self.entries.retired.push(timer);
        }
        Some(entry)
    }

    pub fn entries_mut(&mut self) -> &mut [BlinkEntry<T>] {
        &mut self.entries.list
    }

    pub fn outputs(&self) -> Vec<OutputId> {
        self.entries.list.iter().map(|e| e.output).collect()
    }

    /// Unlock, handing back the timers retired so far so the caller can drop
    /// them without holding the lock.
    pub fn release(mut self) -> Vec<T> {
        std::mem::take(&mut self.entries.retired)
    }
}
