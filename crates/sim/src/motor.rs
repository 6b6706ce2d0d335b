//! The single-motor simulation harness.

use std::cell::Cell;
use std::io::Write;
use std::rc::Rc;

use stepper::{
    Stepper, StepperEngine, StepperHandle, StepperQueue, MANAGE_PERIOD_MS, TICKS_PER_S,
};
use tracing::debug;

use crate::channel::{SimChannel, SimPin};
use crate::{SimError, TraceEntry};

/// Ticks between two `manage_steppers()` invocations.
pub const MANAGE_PERIOD_TICKS: u64 =
    MANAGE_PERIOD_MS as u64 * TICKS_PER_S as u64 / 1000;

/// Step pin number used for the simulated motor.
const STEP_PIN: u8 = 9;

/// One motor wired to a virtual timer, driven tick-accurately.
///
/// The harness replays exactly what a target does: whenever the channel's
/// compare match is due before the next manage tick, the queue is serviced
/// as the interrupt would; otherwise the engine's manage pass runs and the
/// clock jumps to it.
pub struct SimMotor<'a> {
    engine: StepperEngine<'a, SimChannel, SimPin, 1>,
    handle: StepperHandle,
    channel: SimChannel,
    clock: Rc<Cell<u64>>,
    queue: &'a StepperQueue,
    next_manage_at: u64,
}

impl<'a> SimMotor<'a> {
    /// Wires one motor over the first queue of `queues`.
    pub fn new(queues: &'a [StepperQueue]) -> Self {
        let clock = Rc::new(Cell::new(0u64));
        let channel = SimChannel::new(clock.clone());
        let mut engine = StepperEngine::new(queues);
        let handle = engine
            .connect_to_pin(STEP_PIN, channel.clone())
            .expect("queue storage for at least one motor");
        Self {
            engine,
            handle,
            channel,
            clock,
            queue: &queues[0],
            next_manage_at: MANAGE_PERIOD_TICKS,
        }
    }

    /// The motor under simulation.
    pub fn stepper(&self) -> &Stepper<'a, SimChannel, SimPin> {
        self.engine.stepper(self.handle)
    }

    /// Mutable access to the motor under simulation.
    pub fn stepper_mut(&mut self) -> &mut Stepper<'a, SimChannel, SimPin> {
        self.engine.stepper_mut(self.handle)
    }

    /// Configures the direction output polarity on both the core and the
    /// simulated channel.
    pub fn set_direction_pin(&mut self, dir_high_counts_up: bool) {
        self.stepper_mut().set_direction_pin(dir_high_counts_up);
        self.channel.set_dir_high_counts_up(dir_high_counts_up);
    }

    /// Attaches a simulated enable pin and returns an observer handle.
    pub fn attach_enable_pin(&mut self, low_active: bool) -> SimPin {
        let pin = SimPin::new();
        let probe = pin.clone();
        // Infallible on SimPin.
        let _ = self.stepper_mut().set_enable_pin(pin, low_active);
        probe
    }

    /// Current virtual time in ticks.
    pub fn now(&self) -> u64 {
        self.clock.get()
    }

    /// Current motor position as tracked by the queue.
    pub fn position(&self) -> i32 {
        self.stepper().get_current_position()
    }

    /// Number of step edges emitted so far.
    pub fn step_count(&self) -> usize {
        self.channel.step_count()
    }

    /// All step edges emitted so far.
    pub fn trace(&self) -> Vec<TraceEntry> {
        self.channel.trace()
    }

    /// True when nothing is queued, armed or planned.
    pub fn is_idle(&self) -> bool {
        let stepper = self.stepper();
        !stepper.is_running()
            && stepper.is_queue_empty()
            && !stepper.is_ramp_generator_active()
    }

    /// Processes exactly one event: the pending compare match if it is due
    /// before the next manage tick, otherwise one manage pass.
    pub fn tick(&mut self) {
        let compare = self
            .channel
            .is_armed()
            .then(|| self.channel.compare_at());
        match compare {
            Some(at) if at <= self.next_manage_at => {
                self.clock.set(at);
                self.queue.service(&mut self.channel);
            }
            _ => {
                self.clock.set(self.next_manage_at);
                self.engine.manage_steppers();
                self.next_manage_at += MANAGE_PERIOD_TICKS;
            }
        }
    }

    /// Runs until `cond` holds, with a virtual-time budget.
    pub fn run_until(
        &mut self,
        max_ticks: u64,
        mut cond: impl FnMut(&Self) -> bool,
    ) -> Result<(), SimError> {
        while !cond(self) {
            if self.clock.get() > max_ticks {
                return Err(SimError::Timeout(max_ticks));
            }
            self.tick();
        }
        Ok(())
    }

    /// Runs until the motor is completely idle.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> Result<(), SimError> {
        self.run_until(max_ticks, |m| m.is_idle())?;
        debug!(
            ticks = self.clock.get(),
            steps = self.step_count(),
            position = self.position(),
            "motor idle"
        );
        Ok(())
    }

    /// Advances virtual time by `delta_ticks`, manage passes included.
    pub fn run_for(&mut self, delta_ticks: u64) -> Result<(), SimError> {
        let until = self.clock.get() + delta_ticks;
        self.run_until(until + MANAGE_PERIOD_TICKS, |m| m.now() >= until)
    }

    /// Dumps the step-edge trace as pretty JSON.
    pub fn write_trace<W: Write>(&self, writer: W) -> Result<(), SimError> {
        serde_json::to_writer_pretty(writer, &self.trace())?;
        Ok(())
    }
}
