//! # Stepper
//!
//! Glues one [`RampGenerator`] to one [`StepperQueue`], owns the output
//! pins and exposes the user-facing motion API.
//!
//! The step and direction outputs belong to the platform
//! [`StepperChannel`]; the optional enable outputs are owned here as
//! `embedded-hal` [`OutputPin`]s so the auto-enable machinery can drive
//! them from the refill path.

use embedded_hal::digital::OutputPin;

use crate::channel::StepperChannel;
use crate::error::{DelayError, MoveError, QueueError};
use crate::queue::StepperQueue;
use crate::ramp::RampGenerator;
use crate::{
    ticks_to_us, us_to_ticks, ABSOLUTE_MAX_TICKS, MANAGE_PERIOD_MS, MIN_DELTA_TICKS,
    TICKS_FOR_STOPPED_MOTOR, TICKS_PER_S,
};

/// One motor: ramp planner, command queue, pins and auto-enable state.
///
/// Created through [`crate::StepperEngine::connect_to_pin`]; the engine
/// drives the refill and auto-disable housekeeping from
/// `manage_steppers()`.
pub struct Stepper<'a, C: StepperChannel, P: OutputPin> {
    queue: &'a StepperQueue,
    /// Producer-side handle on the channel hardware, used for arming and
    /// force-stopping. The interrupt holds its own handle.
    channel: C,
    ramp: RampGenerator,
    step_pin: u8,
    dir_pin_available: bool,
    dir_high_counts_up: bool,
    enable_pin_low_active: Option<P>,
    enable_pin_high_active: Option<P>,
    auto_enable: bool,
    /// Extra settle period inserted before the first step after an
    /// auto-enable, in ticks. Zero when unused.
    on_delay_ticks: u32,
    /// Auto-disable countdown reload value, in manage periods.
    off_delay_count: u16,
    auto_disable_delay_counter: u16,
}

impl<'a, C: StepperChannel, P: OutputPin> Stepper<'a, C, P> {
    pub(crate) fn new(queue: &'a StepperQueue, channel: C, step_pin: u8) -> Self {
        Self {
            queue,
            channel,
            ramp: RampGenerator::new(),
            step_pin,
            dir_pin_available: false,
            dir_high_counts_up: true,
            enable_pin_low_active: None,
            enable_pin_high_active: None,
            auto_enable: false,
            on_delay_ticks: 0,
            off_delay_count: 0,
            auto_disable_delay_counter: 0,
        }
    }

    /// The step pin this motor was connected to.
    pub fn step_pin(&self) -> u8 {
        self.step_pin
    }

    /// Declares that the channel drives a direction output, and whether a
    /// high level on it makes the position count up. Without this, only
    /// forward motion is available.
    pub fn set_direction_pin(&mut self, dir_high_counts_up: bool) {
        self.dir_pin_available = true;
        self.dir_high_counts_up = dir_high_counts_up;
        self.queue.set_dir_high_counts_up(dir_high_counts_up);
    }

    /// Attaches an enable output of the given polarity, driving it to its
    /// inactive level. A motor may carry one low-active and one high-active
    /// enable pin at the same time; binding a polarity again replaces that
    /// slot.
    pub fn set_enable_pin(&mut self, mut pin: P, low_active: bool) -> Result<(), P::Error> {
        if low_active {
            pin.set_high()?;
            self.enable_pin_low_active = Some(pin);
        } else {
            pin.set_low()?;
            self.enable_pin_high_active = Some(pin);
        }
        Ok(())
    }

    /// Drives the enable outputs to their active level.
    pub fn enable_outputs(&mut self) {
        // Pin errors cannot be surfaced from the refill path; a failed
        // enable shows up as a motor that does not move.
        if let Some(pin) = self.enable_pin_low_active.as_mut() {
            pin.set_low().ok();
        }
        if let Some(pin) = self.enable_pin_high_active.as_mut() {
            pin.set_high().ok();
        }
    }

    /// Drives the enable outputs to their inactive level.
    pub fn disable_outputs(&mut self) {
        if let Some(pin) = self.enable_pin_low_active.as_mut() {
            pin.set_high().ok();
        }
        if let Some(pin) = self.enable_pin_high_active.as_mut() {
            pin.set_low().ok();
        }
    }

    /// Enables or disables automatic output power management: outputs are
    /// enabled on the first enqueue of a motion and disabled again after
    /// [`set_delay_to_disable`](Self::set_delay_to_disable) once the motor
    /// stops.
    pub fn set_auto_enable(&mut self, auto_enable: bool) {
        self.auto_enable = auto_enable;
    }

    /// Sets the driver settle time between auto-enable and the first step.
    /// At least 1000 µs and at most [`ABSOLUTE_MAX_TICKS`] ticks.
    pub fn set_delay_to_enable(&mut self, delay_us: u32) -> Result<(), DelayError> {
        if delay_us < 1000 {
            return Err(DelayError::TooLow);
        }
        let delay_ticks = us_to_ticks(delay_us);
        if delay_ticks > ABSOLUTE_MAX_TICKS {
            return Err(DelayError::TooHigh);
        }
        self.on_delay_ticks = delay_ticks;
        Ok(())
    }

    /// Sets how long after the motor stops the outputs are auto-disabled.
    /// Rounded down to manage periods, with a minimum of two so a nonzero
    /// request never disables immediately.
    pub fn set_delay_to_disable(&mut self, delay_ms: u16) {
        let mut delay_count = delay_ms / MANAGE_PERIOD_MS as u16;
        if delay_ms > 0 && delay_count < 2 {
            delay_count = 2;
        }
        self.off_delay_count = delay_count;
    }

    /// Sets the speed cap as the shortest allowed step period in µs.
    pub fn set_speed(&mut self, min_step_us: u32) {
        self.ramp.set_speed(min_step_us);
    }

    /// Sets the acceleration in steps/s².
    pub fn set_acceleration(&mut self, accel: u32) {
        self.ramp.set_acceleration(accel);
    }

    /// Applies a speed/acceleration change to a motion already underway.
    pub fn apply_speed_acceleration(&mut self) {
        self.ramp
            .apply_speed_acceleration(self.queue.ticks_at_queue_end());
    }

    /// Moves to an absolute position. The first commands are enqueued
    /// before this returns; the engine's manage cadence keeps the queue
    /// filled afterwards.
    pub fn move_to(&mut self, position: i32) -> Result<(), MoveError> {
        self.ramp.move_to(
            position,
            self.queue.pos_at_queue_end(),
            self.queue.ticks_at_queue_end(),
        )?;
        self.fill_queue();
        Ok(())
    }

    /// Moves relative to the current target (or position, if idle).
    pub fn move_by(&mut self, delta: i32) -> Result<(), MoveError> {
        if delta < 0 && !self.dir_pin_available {
            return Err(MoveError::NoDirectionPin);
        }
        self.ramp.move_by(
            delta,
            self.queue.pos_at_queue_end(),
            self.queue.ticks_at_queue_end(),
        )?;
        self.fill_queue();
        Ok(())
    }

    /// Runs the motor continuously at the speed cap in its current
    /// direction until [`stop_move`](Self::stop_move) or a new move.
    /// Requires speed and acceleration to be configured.
    pub fn keep_running(&mut self) {
        self.ramp
            .apply_speed_acceleration(self.queue.ticks_at_queue_end());
        self.ramp.set_keep_running();
        self.fill_queue();
    }

    /// Initiates a graceful stop: the motor ramps down and halts.
    pub fn stop_move(&mut self) {
        self.ramp.initiate_stop();
        self.fill_queue();
    }

    /// Aborts the ramp, discards the queue and declares `new_pos` to be the
    /// motor's position. The motor stops without deceleration.
    pub fn force_stop_and_new_position(&mut self, new_pos: i32) {
        self.ramp.abort();
        self.queue.force_stop(&mut self.channel);
        self.queue.set_pos_at_queue_end(new_pos);
    }

    /// Position the motor will be at once all queued commands completed.
    pub fn get_position_after_commands_completed(&self) -> i32 {
        self.queue.pos_at_queue_end()
    }

    /// Step period in µs at the end of the queue, or 0 when stopped.
    pub fn get_period_after_commands_completed(&self) -> u32 {
        let ticks = self.queue.ticks_at_queue_end();
        if ticks == TICKS_FOR_STOPPED_MOTOR {
            return 0;
        }
        ticks_to_us(ticks)
    }

    /// Current motor position, reconstructed from the tail position and
    /// the steps still unexecuted in the queue.
    pub fn get_current_position(&self) -> i32 {
        self.queue.current_position()
    }

    /// Declares the current position to be `new_pos`: the coordinate
    /// origin shifts, and the ramp target moves with it.
    pub fn set_current_position(&mut self, new_pos: i32) {
        critical_section::with(|_| {
            let delta = new_pos.wrapping_sub(self.queue.current_position());
            self.queue
                .set_pos_at_queue_end(self.queue.pos_at_queue_end().wrapping_add(delta));
            self.ramp
                .advance_target_position_within_interrupt_disabled_scope(delta);
        });
    }

    /// Declares the queue-end position to be `new_pos`; the ramp target
    /// moves by the same delta.
    pub fn set_position_after_commands_completed(&mut self, new_pos: i32) {
        critical_section::with(|_| {
            let delta = new_pos.wrapping_sub(self.queue.pos_at_queue_end());
            self.queue.set_pos_at_queue_end(new_pos);
            self.ramp
                .advance_target_position_within_interrupt_disabled_scope(delta);
        });
    }

    /// True while the interrupt is emitting pulses.
    pub fn is_running(&self) -> bool {
        self.queue.is_running()
    }

    /// True while the ramp generator produces commands.
    pub fn is_ramp_generator_active(&self) -> bool {
        self.ramp.is_ramp_generator_active()
    }

    pub fn is_queue_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_queue_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Emits a single forward step at the fastest legal period. No-op
    /// while the motor is running. With `blocking`, spins until the step
    /// has been emitted.
    pub fn forward_step(&mut self, blocking: bool) {
        if self.is_running() {
            return;
        }
        self.add_queue_entry(MIN_DELTA_TICKS, 1, self.dir_high_counts_up)
            .ok();
        if blocking {
            while self.is_running() {}
        }
    }

    /// Emits a single backward step. No-op while running or without a
    /// direction pin.
    pub fn backward_step(&mut self, blocking: bool) {
        if self.is_running() || !self.dir_pin_available {
            return;
        }
        self.add_queue_entry(MIN_DELTA_TICKS, 1, !self.dir_high_counts_up)
            .ok();
        if blocking {
            while self.is_running() {}
        }
    }

    /// Raw enqueue of one command run, wrapped with the auto-enable
    /// machinery: if the outputs are powered down, they are re-enabled and
    /// an optional settle entry of
    /// [`set_delay_to_enable`](Self::set_delay_to_enable) ticks replaces
    /// the first step.
    pub fn add_queue_entry(
        &mut self,
        delta_ticks: u32,
        mut steps: u8,
        dir_high: bool,
    ) -> Result<(), QueueError> {
        if steps == 0 || steps >= 128 {
            return Err(QueueError::StepsError);
        }
        if delta_ticks > ABSOLUTE_MAX_TICKS {
            return Err(QueueError::TicksTooHigh);
        }

        let mut result = Ok(());
        if self.auto_enable {
            if self.auto_disable_delay_counter == 0 {
                // Outputs are powered down.
                self.enable_outputs();
                if self.on_delay_ticks > 0 {
                    result = self
                        .queue
                        .add_entry(&mut self.channel, self.on_delay_ticks, 1, dir_high);
                    if result.is_ok() && steps == 1 {
                        // The settle entry consumed the only step; its long
                        // period must not become the planner's tail period.
                        self.queue.set_ticks_at_queue_end(delta_ticks);
                    }
                    steps -= 1;
                }
            }
        }
        if steps > 0 {
            result = self
                .queue
                .add_entry(&mut self.channel, delta_ticks, steps, dir_high);
        }
        if self.auto_enable && result.is_ok() {
            self.auto_disable_delay_counter = self.off_delay_count;
        }
        result
    }

    /// One refill pass: plans and enqueues commands until the queue holds
    /// at least 10 ms of motion or the ramp has nothing further to emit.
    /// Invoked from `manage_steppers()` and after each motion command.
    pub fn fill_queue(&mut self) {
        if !self.ramp.is_ramp_generator_active() || !self.ramp.is_configured() {
            return;
        }
        while !self.queue.is_full() && !self.queue.has_ticks_in_queue(TICKS_PER_S / 100) {
            let Some(cmd) = self.ramp.get_next_command(
                self.queue.ticks_at_queue_end(),
                self.queue.pos_at_queue_end(),
            ) else {
                break;
            };
            let dir_high = cmd.count_up == self.dir_high_counts_up;
            match self.add_queue_entry(cmd.ticks, cmd.steps, dir_high) {
                Ok(()) => {}
                Err(QueueError::Full) => break,
                Err(_) => {
                    // Should not happen while the planner honors the queue
                    // contract.
                    self.ramp.abort();
                    break;
                }
            }
        }
    }

    /// Auto-disable housekeeping, invoked once per manage period: counts
    /// down while the motor is stopped and powers the outputs down when the
    /// delay expires.
    pub fn check_for_auto_disable(&mut self) {
        if self.auto_disable_delay_counter > 0 && !self.queue.is_running() {
            self.auto_disable_delay_counter -= 1;
            if self.auto_disable_delay_counter == 0 {
                self.disable_outputs();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::STARTUP_LEAD_TICKS;
    use core::cell::{Cell, RefCell};
    use embedded_hal_mock::eh1::pin::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };

    /// Interior-mutable channel mock so the stepper (producer side) and the
    /// simulated interrupt can share one handle.
    #[derive(Debug, Default)]
    struct MockChannel {
        armed: Cell<bool>,
        now: Cell<u64>,
        compare_at: Cell<u64>,
        step_edges: RefCell<Vec<u64>>,
    }

    impl StepperChannel for &MockChannel {
        fn arm(&mut self) {
            self.armed.set(true);
            self.compare_at
                .set(self.now.get() + STARTUP_LEAD_TICKS as u64);
        }
        fn disarm(&mut self) {
            self.armed.set(false);
        }
        fn schedule(&mut self, delta_ticks: u32) {
            self.compare_at.set(self.compare_at.get() + delta_ticks as u64);
        }
        fn step(&mut self) {
            self.step_edges.borrow_mut().push(self.compare_at.get());
        }
        fn toggle_dir(&mut self) {}
    }

    impl MockChannel {
        fn steps(&self) -> usize {
            self.step_edges.borrow().len()
        }
    }

    /// Services compare matches until the queue disarms the channel.
    fn run_isr_until_idle(queue: &StepperQueue, ch: &MockChannel) {
        while ch.armed.get() {
            ch.now.set(ch.compare_at.get());
            queue.service(&mut &*ch);
        }
    }

    /// Alternates draining and refilling until the motion completes.
    fn run_to_completion(stepper: &mut Stepper<'_, &MockChannel, PinMock>, ch: &MockChannel) {
        for _ in 0..10_000 {
            run_isr_until_idle(stepper.queue, ch);
            stepper.fill_queue();
            if !ch.armed.get() && !stepper.is_ramp_generator_active() {
                return;
            }
        }
        panic!("motion did not complete");
    }

    #[test]
    fn test_move_needs_direction_pin_for_negative_delta() {
        let queue = StepperQueue::new();
        let ch = MockChannel::default();
        let mut stepper: Stepper<'_, _, PinMock> = Stepper::new(&queue, &ch, 9);
        stepper.set_speed(100);
        stepper.set_acceleration(1000);

        assert_eq!(stepper.move_by(-5), Err(MoveError::NoDirectionPin));
        stepper.set_direction_pin(true);
        assert_eq!(stepper.move_by(-5), Ok(()));
    }

    #[test]
    fn test_move_to_fills_queue_immediately() {
        let queue = StepperQueue::new();
        let ch = MockChannel::default();
        let mut stepper: Stepper<'_, _, PinMock> = Stepper::new(&queue, &ch, 9);
        stepper.set_speed(100);
        stepper.set_acceleration(1000);

        stepper.move_to(1000).unwrap();
        assert!(!queue.is_empty());
        assert!(queue.is_running());
        // The refill stops once 10 ms of motion are queued.
        assert!(queue.has_ticks_in_queue(TICKS_PER_S / 100));
    }

    #[test]
    fn test_delay_to_enable_bounds() {
        let queue = StepperQueue::new();
        let ch = MockChannel::default();
        let mut stepper: Stepper<'_, _, PinMock> = Stepper::new(&queue, &ch, 9);

        assert_eq!(stepper.set_delay_to_enable(999), Err(DelayError::TooLow));
        assert_eq!(stepper.set_delay_to_enable(1000), Ok(()));
        assert_eq!(
            stepper.set_delay_to_enable(u32::MAX),
            Err(DelayError::TooHigh)
        );
    }

    #[test]
    fn test_delay_to_disable_minimum_two_periods() {
        let queue = StepperQueue::new();
        let ch = MockChannel::default();
        let mut stepper: Stepper<'_, _, PinMock> = Stepper::new(&queue, &ch, 9);

        stepper.set_delay_to_disable(0);
        assert_eq!(stepper.off_delay_count, 0);
        stepper.set_delay_to_disable(1);
        assert_eq!(stepper.off_delay_count, 2);
        stepper.set_delay_to_disable(150);
        assert_eq!(stepper.off_delay_count, 15);
    }

    #[test]
    fn test_auto_enable_inserts_settle_entry() {
        let queue = StepperQueue::new();
        let ch = MockChannel::default();
        // Enable pin: driven inactive on bind, active on enqueue, inactive
        // again after the auto-disable delay.
        let pin = PinMock::new(&[
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
        ]);
        let mut stepper: Stepper<'_, _, PinMock> = Stepper::new(&queue, &ch, 9);
        stepper.set_enable_pin(pin.clone(), true).unwrap();
        stepper.set_speed(100);
        stepper.set_acceleration(1000);
        stepper.set_auto_enable(true);
        stepper.set_delay_to_enable(2000).unwrap();
        stepper.set_delay_to_disable(30);

        stepper.move_to(5).unwrap();
        run_to_completion(&mut stepper, &ch);

        // The settle entry leads the train: the first edge comes one
        // enable delay after arming, and it counts as the first of the 5
        // steps.
        let edges = ch.step_edges.borrow();
        assert_eq!(edges.len(), 5);
        assert_eq!(edges[0], STARTUP_LEAD_TICKS as u64 + us_to_ticks(2000) as u64);
        drop(edges);
        assert_eq!(queue.current_position(), 5);

        // Keep managing until the auto-disable countdown expires.
        for _ in 0..3 {
            stepper.fill_queue();
            stepper.check_for_auto_disable();
        }
        let mut pin = pin;
        pin.done();
    }

    #[test]
    fn test_auto_enable_single_step_keeps_tail_period() {
        let queue = StepperQueue::new();
        let ch = MockChannel::default();
        let mut stepper: Stepper<'_, _, PinMock> = Stepper::new(&queue, &ch, 9);
        stepper.set_auto_enable(true);
        stepper.set_delay_to_enable(2000).unwrap();
        stepper.set_delay_to_disable(20);

        // A single-step enqueue is absorbed by the settle entry; the tail
        // period must still read as the requested one.
        stepper.add_queue_entry(MIN_DELTA_TICKS, 1, true).unwrap();
        assert_eq!(queue.ticks_at_queue_end(), MIN_DELTA_TICKS);
        run_isr_until_idle(&queue, &ch);
        assert_eq!(ch.steps(), 1);
        assert_eq!(queue.pos_at_queue_end(), 1);
    }

    #[test]
    fn test_forward_backward_step() {
        let queue = StepperQueue::new();
        let ch = MockChannel::default();
        let mut stepper: Stepper<'_, _, PinMock> = Stepper::new(&queue, &ch, 9);

        stepper.forward_step(false);
        assert_eq!(stepper.get_position_after_commands_completed(), 1);
        run_isr_until_idle(&queue, &ch);

        // Without a direction pin the backward step is refused.
        stepper.backward_step(false);
        assert_eq!(stepper.get_position_after_commands_completed(), 1);

        stepper.set_direction_pin(true);
        stepper.backward_step(false);
        assert_eq!(stepper.get_position_after_commands_completed(), 0);
        run_isr_until_idle(&queue, &ch);
        assert_eq!(stepper.get_current_position(), 0);
    }

    #[test]
    fn test_force_stop_and_new_position() {
        let queue = StepperQueue::new();
        let ch = MockChannel::default();
        let mut stepper: Stepper<'_, _, PinMock> = Stepper::new(&queue, &ch, 9);
        stepper.set_speed(100);
        stepper.set_acceleration(1000);
        stepper.move_to(10_000).unwrap();
        assert!(stepper.is_running());

        stepper.force_stop_and_new_position(42);
        assert!(!stepper.is_running());
        assert!(stepper.is_queue_empty());
        assert!(!stepper.is_ramp_generator_active());
        assert_eq!(stepper.get_current_position(), 42);
        assert_eq!(stepper.get_position_after_commands_completed(), 42);
        assert_eq!(stepper.get_period_after_commands_completed(), 0);
    }

    #[test]
    fn test_set_current_position_shifts_target_too() {
        let queue = StepperQueue::new();
        let ch = MockChannel::default();
        let mut stepper: Stepper<'_, _, PinMock> = Stepper::new(&queue, &ch, 9);
        stepper.set_speed(100);
        stepper.set_acceleration(1000);
        stepper.move_to(100).unwrap();

        stepper.set_current_position(1000);
        run_to_completion(&mut stepper, &ch);
        assert_eq!(stepper.get_current_position(), 1100);
    }
}
