use crate::errors::BlinkError;
use crate::global_settings::MAX_OUTPUTS;
use core::fmt;

/// GPIO number of a line driven by a blinker.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(u8);

impl OutputId {
    pub fn new(gpio: u8) -> Result<Self, BlinkError> {
        if gpio < MAX_OUTPUTS {
            Ok(Self(gpio))
        } else {
            Err(BlinkError::InvalidOutput)
        }
    }

    pub fn gpio(self) -> u8 {
        self.0
    }

    // bit of this output in a registry's active set
    pub(crate) fn mask(self) -> u64 {
        1u64 << self.0
    }
}

impl TryFrom<i32> for OutputId {
    type Error = BlinkError;

    fn try_from(gpio: i32) -> Result<Self, Self::Error> {
        u8::try_from(gpio)
            .map_err(|_| BlinkError::InvalidOutput)
            .and_then(Self::new)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

/// Writes logic levels to output lines.
///
/// Called from caller threads and from timer callbacks, so implementations
/// must be usable through a shared reference.
pub trait OutputDriver: Send + Sync + 'static {
    fn set_level(&self, output: OutputId, level: bool);
}

impl<D: OutputDriver> OutputDriver for std::sync::Arc<D> {
    fn set_level(&self, output: OutputId, level: bool) {
        (**self).set_level(output, level)
    }
}
