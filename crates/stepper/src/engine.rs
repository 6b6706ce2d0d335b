//! # Stepper Engine
//!
//! A fixed-capacity registry of steppers with the periodic housekeeping
//! entry point. The platform arranges for
//! [`StepperEngine::manage_steppers`] to run every
//! [`MANAGE_PERIOD_MS`](crate::MANAGE_PERIOD_MS) milliseconds — from a
//! cooperative task on targets with a scheduler, or from a timer-overflow
//! interrupt (with step interrupts re-enabled for nesting) on bare metal.
//! Thanks to the queue's 10 ms look-ahead the cadence may drift by up to a
//! full period without the queues draining.

use embedded_hal::digital::OutputPin;
use heapless::Vec;

use crate::channel::StepperChannel;
use crate::queue::StepperQueue;
use crate::stepper::Stepper;

/// Marker for "no pin assigned".
pub const PIN_UNDEFINED: u8 = 0xFF;

/// Handle to a connected stepper, returned by
/// [`StepperEngine::connect_to_pin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StepperHandle(usize);

/// Registry of up to `MAX_STEPPERS` motors sharing one step timer.
///
/// The queues are provided by the caller (typically statics, so the
/// interrupt handlers can reach them); slot `i` of the queue slice backs
/// the `i`-th connected stepper.
pub struct StepperEngine<'a, C: StepperChannel, P: OutputPin, const MAX_STEPPERS: usize> {
    queues: &'a [StepperQueue],
    steppers: Vec<Stepper<'a, C, P>, MAX_STEPPERS>,
}

impl<'a, C: StepperChannel, P: OutputPin, const MAX_STEPPERS: usize>
    StepperEngine<'a, C, P, MAX_STEPPERS>
{
    /// Creates an engine over the given queue storage. At most
    /// `min(queues.len(), MAX_STEPPERS)` motors can be connected.
    pub fn new(queues: &'a [StepperQueue]) -> Self {
        Self {
            queues,
            steppers: Vec::new(),
        }
    }

    /// Connects a stepper on `step_pin`, assigning it the next free queue
    /// slot. Returns `None` if the pin is invalid, already connected, or
    /// all slots are taken.
    pub fn connect_to_pin(&mut self, step_pin: u8, channel: C) -> Option<StepperHandle> {
        if step_pin == PIN_UNDEFINED {
            return None;
        }
        if self.steppers.iter().any(|s| s.step_pin() == step_pin) {
            return None;
        }
        let index = self.steppers.len();
        let queue = self.queues.get(index)?;
        self.steppers
            .push(Stepper::new(queue, channel, step_pin))
            .ok()?;
        Some(StepperHandle(index))
    }

    /// Number of connected steppers.
    pub fn num_steppers(&self) -> usize {
        self.steppers.len()
    }

    /// Access to a connected stepper.
    pub fn stepper(&self, handle: StepperHandle) -> &Stepper<'a, C, P> {
        &self.steppers[handle.0]
    }

    /// Mutable access to a connected stepper.
    pub fn stepper_mut(&mut self, handle: StepperHandle) -> &mut Stepper<'a, C, P> {
        &mut self.steppers[handle.0]
    }

    /// Periodic housekeeping: refills every queue from its ramp generator
    /// and advances the auto-disable countdowns.
    pub fn manage_steppers(&mut self) {
        for stepper in self.steppers.iter_mut() {
            stepper.fill_queue();
            stepper.check_for_auto_disable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::STARTUP_LEAD_TICKS;
    use core::cell::Cell;
    use embedded_hal_mock::eh1::pin::Mock as PinMock;

    #[derive(Debug, Default)]
    struct MockChannel {
        armed: Cell<bool>,
        compare_at: Cell<u64>,
        steps: Cell<u32>,
    }

    impl StepperChannel for &MockChannel {
        fn arm(&mut self) {
            self.armed.set(true);
            self.compare_at.set(STARTUP_LEAD_TICKS as u64);
        }
        fn disarm(&mut self) {
            self.armed.set(false);
        }
        fn schedule(&mut self, delta_ticks: u32) {
            self.compare_at.set(self.compare_at.get() + delta_ticks as u64);
        }
        fn step(&mut self) {
            self.steps.set(self.steps.get() + 1);
        }
        fn toggle_dir(&mut self) {}
    }

    #[test]
    fn test_connect_rejects_duplicates_and_overflow() {
        let queues = [StepperQueue::new(), StepperQueue::new()];
        let channels = [MockChannel::default(), MockChannel::default(), MockChannel::default()];
        let mut engine: StepperEngine<'_, _, PinMock, 2> = StepperEngine::new(&queues);

        let a = engine.connect_to_pin(9, &channels[0]).unwrap();
        assert!(engine.connect_to_pin(9, &channels[1]).is_none());
        assert!(engine.connect_to_pin(PIN_UNDEFINED, &channels[1]).is_none());
        let b = engine.connect_to_pin(10, &channels[1]).unwrap();
        assert_ne!(a, b);
        // All queue slots taken.
        assert!(engine.connect_to_pin(11, &channels[2]).is_none());
        assert_eq!(engine.num_steppers(), 2);
    }

    #[test]
    fn test_connect_limited_by_queue_storage() {
        let queues = [StepperQueue::new()];
        let channels = [MockChannel::default(), MockChannel::default()];
        let mut engine: StepperEngine<'_, _, PinMock, 4> = StepperEngine::new(&queues);
        assert!(engine.connect_to_pin(9, &channels[0]).is_some());
        assert!(engine.connect_to_pin(10, &channels[1]).is_none());
    }

    #[test]
    fn test_manage_refills_all_steppers() {
        let queues = [StepperQueue::new(), StepperQueue::new()];
        let channels = [MockChannel::default(), MockChannel::default()];
        let mut engine: StepperEngine<'_, _, PinMock, 2> = StepperEngine::new(&queues);
        let a = engine.connect_to_pin(9, &channels[0]).unwrap();
        let b = engine.connect_to_pin(10, &channels[1]).unwrap();

        for handle in [a, b] {
            let stepper = engine.stepper_mut(handle);
            stepper.set_speed(100);
            stepper.set_acceleration(1000);
        }
        engine.stepper_mut(a).move_to(500).unwrap();
        engine.stepper_mut(b).move_to(-500).unwrap();
        assert!(engine.stepper(a).is_running());
        // Motor B has no direction pin configured, but `move_to` plans in
        // whatever direction is needed; only `move_by` guards on the pin.
        assert!(engine.stepper(b).is_running());

        // Drain both queues, then let the manage tick refill them.
        for (queue, ch) in queues.iter().zip(&channels) {
            while ch.armed.get() {
                queue.service(&mut &*ch);
            }
        }
        assert!(engine.stepper(a).is_queue_empty());
        engine.manage_steppers();
        assert!(!engine.stepper(a).is_queue_empty());
        assert!(!engine.stepper(b).is_queue_empty());
    }
}
