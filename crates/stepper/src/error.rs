//! Error types for the pulse generation crate.

/// Errors returned when enqueuing a command into a [`crate::StepperQueue`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueueError {
    /// The queue has no free entry; the caller retries on the next refill.
    Full,
    /// The step count was zero or exceeded 127. Programming error.
    StepsError,
    /// The period exceeded [`crate::ABSOLUTE_MAX_TICKS`].
    TicksTooHigh,
}

/// Errors returned by the motion commands of the ramp generator and the
/// stepper.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MoveError {
    /// `move_to`/`move_by` was called before `set_speed`.
    SpeedUndefined,
    /// `move_to`/`move_by` was called before `set_acceleration`.
    AccelUndefined,
    /// A new move was requested while decelerating to a stop; the caller
    /// must wait for the stop to complete.
    StopOngoing,
    /// Negative motion was requested without a direction pin.
    NoDirectionPin,
}

/// Errors returned by [`crate::Stepper::set_delay_to_enable`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DelayError {
    /// The enable delay was below the 1000 µs minimum.
    TooLow,
    /// The enable delay exceeded [`crate::ABSOLUTE_MAX_TICKS`].
    TooHigh,
}

impl core::fmt::Display for QueueError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            QueueError::Full => write!(f, "command queue is full"),
            QueueError::StepsError => write!(f, "step count out of range"),
            QueueError::TicksTooHigh => write!(f, "step period too high"),
        }
    }
}

impl core::fmt::Display for MoveError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MoveError::SpeedUndefined => write!(f, "speed not configured"),
            MoveError::AccelUndefined => write!(f, "acceleration not configured"),
            MoveError::StopOngoing => write!(f, "stop in progress"),
            MoveError::NoDirectionPin => write!(f, "no direction pin configured"),
        }
    }
}

impl core::fmt::Display for DelayError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DelayError::TooLow => write!(f, "enable delay below minimum"),
            DelayError::TooHigh => write!(f, "enable delay above maximum"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for QueueError {}
#[cfg(feature = "std")]
impl std::error::Error for MoveError {}
#[cfg(feature = "std")]
impl std::error::Error for DelayError {}
