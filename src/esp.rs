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
use crate::errors::BlinkError;
use crate::peripherals::{OutputDriver, OutputId};
use crate::services::{PeriodicTimer, TimerService};
use esp_idf_hal::gpio::{AnyOutputPin, Pin};
use esp_idf_svc::timer::{EspTaskTimerService, EspTimer, EspTimerService, Task};
use esp_idf_sys::{
    esp, gpio_mode_t_GPIO_MODE_OUTPUT, gpio_reset_pin, gpio_set_direction, gpio_set_level,
};
use log::*;
use std::time::Duration;

/// GPIOs reserved for blinking. Levels are written straight through the IDF
/// GPIO driver so the outputs can be shared with the esp_timer task.
pub struct EspOutputs {
    outputs: Vec<OutputId>,
}

impl EspOutputs {
    pub fn new(pins: impl IntoIterator<Item = AnyOutputPin>) -> Result<Self, BlinkError> {
        let mut outputs = Vec::new();
        for pin in pins {
            let output = OutputId::try_from(pin.pin())?;
            esp!(unsafe { gpio_reset_pin(pin.pin()) })?;
            esp!(unsafe { gpio_set_direction(pin.pin(), gpio_mode_t_GPIO_MODE_OUTPUT) })?;
            info!("{} configured as blink output", output);
            outputs.push(output);
        }
        Ok(EspOutputs { outputs })
    }

    pub fn outputs(&self) -> &[OutputId] {
        &self.outputs
    }
}

impl OutputDriver for EspOutputs {
    fn set_level(&self, output: OutputId, level: bool) {
        unsafe {
            gpio_set_level(output.gpio() as i32, level as u32);
        }
    }
}

impl TimerService for EspTaskTimerService {
    type Timer = EspTimer;

    fn timer<F>(&self, callback: F) -> Result<Self::Timer, BlinkError>
    where
        F: FnMut() + Send + 'static,
    {
        Ok(EspTimerService::<Task>::timer(self, callback)?)
    }
}

impl PeriodicTimer for EspTimer {
    fn every(&self, interval: Duration) -> Result<(), BlinkError> {
        Ok(EspTimer::every(self, interval)?)
    }

    fn cancel(&self) -> Result<bool, BlinkError> {
        Ok(EspTimer::cancel(self)?)
    }
}
