//! Non-blocking blinking of GPIO outputs.
//!
//! [`Blinker`] runs one periodic timer per blinking output. [`SyncGroup`]
//! drives all of its members from one shared timebase and keeps them in
//! phase. Both arbitrate competing requests on the same output by priority
//! and remaining duration. Once started, all level changes happen on the
//! timer context and the caller is never blocked beyond a short lock.

pub mod blinker;
pub mod configuration;
pub mod errors;
pub mod global_settings;
pub mod peripherals;
pub(crate) mod registry;
pub mod services;
pub mod sync_group;

#[cfg(test)]
mod testing;

cfg_if::cfg_if! {
    if #[cfg(feature = "esp-idf")] {
        mod esp;
        pub use esp::EspOutputs;
    }
}

pub use blinker::Blinker;
pub use configuration::min_period_ms;
pub use errors::BlinkError;
pub use global_settings::FOREVER;
pub use peripherals::{OutputDriver, OutputId};
pub use services::{PeriodicTimer, TimerService};
pub use sync_group::SyncGroup;
