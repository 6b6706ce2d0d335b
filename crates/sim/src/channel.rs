//! Simulated hardware: the stepper channel and plain output pins.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use stepper::channel::{StepperChannel, STARTUP_LEAD_TICKS};

use crate::TraceEntry;

/// Shared state behind a [`SimChannel`] handle.
#[derive(Debug)]
pub struct ChannelState {
    pub armed: bool,
    /// Absolute tick of the next compare match.
    pub compare_at: u64,
    /// Level of the direction output.
    pub dir_high: bool,
    /// Polarity mapping used for the traced position.
    pub dir_high_counts_up: bool,
    /// Position as seen on the outputs (advances per step edge).
    pub position: i32,
    last_schedule: u32,
    trace: Vec<TraceEntry>,
}

/// A [`StepperChannel`] backed by a virtual free-running timer.
///
/// Cloning yields another handle on the same channel, mirroring how the
/// producer side and the interrupt handler both reach the same timer
/// peripheral on hardware.
#[derive(Clone)]
pub struct SimChannel {
    clock: Rc<Cell<u64>>,
    state: Rc<RefCell<ChannelState>>,
}

impl SimChannel {
    pub fn new(clock: Rc<Cell<u64>>) -> Self {
        Self {
            clock,
            state: Rc::new(RefCell::new(ChannelState {
                armed: false,
                compare_at: 0,
                dir_high: true,
                dir_high_counts_up: true,
                position: 0,
                last_schedule: 0,
                trace: Vec::new(),
            })),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state.borrow().armed
    }

    pub fn compare_at(&self) -> u64 {
        self.state.borrow().compare_at
    }

    pub fn set_dir_high_counts_up(&self, counts_up: bool) {
        self.state.borrow_mut().dir_high_counts_up = counts_up;
    }

    /// Position as accumulated from the emitted step edges.
    pub fn output_position(&self) -> i32 {
        self.state.borrow().position
    }

    pub fn step_count(&self) -> usize {
        self.state.borrow().trace.len()
    }

    pub fn trace(&self) -> Vec<TraceEntry> {
        self.state.borrow().trace.clone()
    }
}

impl StepperChannel for SimChannel {
    fn arm(&mut self) {
        let mut state = self.state.borrow_mut();
        state.armed = true;
        state.compare_at = self.clock.get() + STARTUP_LEAD_TICKS as u64;
    }

    fn disarm(&mut self) {
        self.state.borrow_mut().armed = false;
    }

    fn schedule(&mut self, delta_ticks: u32) {
        let mut state = self.state.borrow_mut();
        state.compare_at += delta_ticks as u64;
        state.last_schedule = delta_ticks;
    }

    fn step(&mut self) {
        let mut state = self.state.borrow_mut();
        state.position += if state.dir_high == state.dir_high_counts_up {
            1
        } else {
            -1
        };
        let entry = TraceEntry {
            tick: state.compare_at,
            position: state.position,
            period: state.last_schedule,
            dir_high: state.dir_high,
        };
        state.trace.push(entry);
    }

    fn toggle_dir(&mut self) {
        let mut state = self.state.borrow_mut();
        state.dir_high = !state.dir_high;
    }
}

/// A simulated output pin whose level can be observed through any clone.
#[derive(Clone, Debug, Default)]
pub struct SimPin {
    high: Rc<Cell<bool>>,
}

impl SimPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.high.get()
    }
}

impl embedded_hal::digital::ErrorType for SimPin {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high.set(true);
        Ok(())
    }
}
