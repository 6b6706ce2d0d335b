//! # Stepper Pulse Generation Crate
//!
//! A deterministic step-pulse generator for stepper motors, usable on both
//! host and MCU (`no_std`-friendly).
//!
//! Given a target position (or a free-run command) plus a maximum speed and
//! an acceleration, it emits precisely timed step pulses so that the motor
//! follows a trapezoidal velocity profile and halts exactly on target.
//!
//! ## Key Components
//!
//! - **[`upm`]**: Compact mantissa+exponent arithmetic for the ramp math on
//!   MCUs without an FPU.
//! - **[`queue`]**: A bounded ring of step commands, consumed from a timer
//!   interrupt at pulse rates up to tens of kHz with lock-free discipline
//!   against the foreground producer.
//! - **[`ramp`]**: The planner that reads the queue's tail-state and emits
//!   the next batch of steps for the accelerate / coast / decelerate cycle.
//! - **[`stepper`]**: Glues one ramp generator to one queue, owns the
//!   output pins and exposes the user-facing motion API.
//! - **[`engine`]**: A fixed-capacity registry of steppers driven by a
//!   periodic `manage_steppers()` call.
//!
//! ## Execution model
//!
//! Two contexts share each motor: a cooperative foreground that plans and
//! enqueues (the *refill* path), and a timer-compare interrupt that drains
//! the queue and toggles the step output. The queue's tail-state (position,
//! direction and period after the last queued entry) feeds back into the
//! planner on every refill. The hardware binding is abstracted behind
//! [`StepperChannel`]; platform adapters implement it against their timer
//! peripheral, and the `sim` crate provides a host implementation.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod channel;
pub mod engine;
pub mod error;
pub mod queue;
pub mod ramp;
pub mod stepper;
pub mod upm;

pub use channel::StepperChannel;
pub use engine::{StepperEngine, StepperHandle, PIN_UNDEFINED};
pub use error::{DelayError, MoveError, QueueError};
pub use queue::StepperQueue;
pub use ramp::{RampCommand, RampGenerator};
pub use stepper::Stepper;
pub use upm::UpmFloat;

/// Frequency of the step timer in ticks per second.
pub const TICKS_PER_S: u32 = 16_000_000;

/// Smallest legal period between two steps (50 kSteps/s ceiling).
pub const MIN_DELTA_TICKS: u32 = TICKS_PER_S / 50_000;

/// Largest legal period between two steps. The free-running timer wraps
/// with period `ABSOLUTE_MAX_TICKS + 1`.
pub const ABSOLUTE_MAX_TICKS: u32 = 0x00FF_FFFF;

/// Sentinel period published as the queue's tail period while the queue is
/// empty and the interrupt is disarmed.
pub const TICKS_FOR_STOPPED_MOTOR: u32 = ABSOLUTE_MAX_TICKS;

/// Number of entries in each command queue. Must be a power of two.
pub const QUEUE_LEN: usize = 16;
pub(crate) const QUEUE_LEN_MASK: usize = QUEUE_LEN - 1;

/// Cadence at which [`StepperEngine::manage_steppers`] must be invoked.
/// The refill look-ahead and the auto-disable countdown are scaled by it.
pub const MANAGE_PERIOD_MS: u32 = 10;

/// Converts microseconds to timer ticks, saturating on overflow.
pub const fn us_to_ticks(us: u32) -> u32 {
    us.saturating_mul(TICKS_PER_S / 1_000_000)
}

/// Converts timer ticks to whole microseconds.
pub const fn ticks_to_us(ticks: u32) -> u32 {
    ticks / (TICKS_PER_S / 1_000_000)
}
