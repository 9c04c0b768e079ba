use core::fmt;

#[cfg(feature = "esp-idf")]
use esp_idf_sys::EspError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkError {
    InvalidOutput,
    InvalidPeriod,
    InvalidDuration,
    NotMultipleOfTimebase,
    GroupTerminating,
    NotFound,
    Rejected,
    TimerFailure(i32),
}

impl fmt::Display for BlinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOutput => write!(f, "Output id out of range"),
            Self::InvalidPeriod => write!(f, "Blink period or timebase too short"),
            Self::InvalidDuration => {
                write!(f, "Blink duration is not a multiple of blink period")
            }
            Self::NotMultipleOfTimebase => {
                write!(f, "Blink period is not a multiple of sync group timebase")
            }
            Self::GroupTerminating => write!(f, "Sync group is being deleted"),
            Self::NotFound => write!(f, "Output is not blinking"),
            Self::Rejected => write!(f, "Active blink has precedence"),
            Self::TimerFailure(code) => write!(f, "Timer service error {code}"),
        }
    }
}

impl std::error::Error for BlinkError {}

#[cfg(feature = "esp-idf")]
impl From<EspError> for BlinkError {
    fn from(e: EspError) -> Self {
        Self::TimerFailure(e.code())
    }
}
