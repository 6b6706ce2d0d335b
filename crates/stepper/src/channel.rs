//! Hardware contract between the queue and the platform timer peripheral.

/// Number of ticks between arming a channel and its first compare match.
/// Large enough that the compare value is guaranteed to still be in the
/// future once the arming write completes.
pub const STARTUP_LEAD_TICKS: u32 = 40;

/// Hardware resources of one stepper channel: a compare register on the
/// free-running step timer plus the step and direction outputs.
///
/// Platform adapters implement this against their timer peripheral; the
/// `sim` crate provides a host implementation. The producer side of the
/// queue calls [`arm`](Self::arm) and [`disarm`](Self::disarm); the
/// remaining methods are called from the compare-match interrupt by
/// [`StepperQueue::service`](crate::StepperQueue::service).
///
/// Implementations must be cheap: `step` and `schedule` sit on the
/// interrupt's critical path.
pub trait StepperChannel {
    /// Enable the compare interrupt with the first match scheduled
    /// [`STARTUP_LEAD_TICKS`] ahead of the current counter value.
    fn arm(&mut self);

    /// Disable the compare interrupt and force the step output inactive.
    fn disarm(&mut self);

    /// Schedule the next compare match `delta_ticks` after the current one.
    fn schedule(&mut self, delta_ticks: u32);

    /// Produce one rising edge on the step output.
    fn step(&mut self);

    /// Invert the direction output. Called before the first step of a
    /// queue entry whose direction-toggle flag is set.
    fn toggle_dir(&mut self);
}
