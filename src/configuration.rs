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
#[toml_cfg::toml_config]
pub struct Config {
    #[default(10)]
    tick_period_ms: u32,
    #[default(2)]
    min_period_ticks: u32,
}

/// Length of one scheduler tick in ms.
pub fn tick_period_ms() -> u32 {
    cfg_if::cfg_if! {
        if #[cfg(feature = "esp-idf")] {
            (1000 / esp_idf_sys::configTICK_RATE_HZ).max(1)
        } else {
            CONFIG.tick_period_ms.max(1)
        }
    }
}

// Half of it must still be a whole, non-zero number of ms
const MIN_PERIOD_FLOOR_MS: u32 = 2;

/// Shortest blink period or group timebase that can be scheduled reliably.
pub fn min_period_ms() -> u32 {
    period_floor(CONFIG.min_period_ticks, tick_period_ms())
}

fn period_floor(min_period_ticks: u32, tick_period_ms: u32) -> u32 {
    min_period_ticks
        .saturating_mul(tick_period_ms)
        .max(MIN_PERIOD_FLOOR_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_period_is_configured_ticks() {
        assert_eq!(
            min_period_ms(),
            period_floor(CONFIG.min_period_ticks, tick_period_ms())
        );
        assert!(min_period_ms() >= MIN_PERIOD_FLOOR_MS);
    }

    #[test]
    fn zero_ticks_still_rejects_zero_period() {
        assert_eq!(period_floor(0, 10), MIN_PERIOD_FLOOR_MS);
        assert_eq!(period_floor(2, 0), MIN_PERIOD_FLOOR_MS);
        assert_eq!(period_floor(2, 10), 20);
        assert_eq!(period_floor(u32::MAX, 10), u32::MAX);
    }
}
