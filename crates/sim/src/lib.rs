//! Tick-accurate host simulation of the stepper pulse generator.
//!
//! Provides a [`StepperChannel`](stepper::StepperChannel) implementation
//! backed by a virtual free-running timer, and a [`SimMotor`] harness that
//! interleaves compare-match interrupts with the 10 ms manage cadence
//! exactly as a target would. Every emitted step edge is recorded as a
//! [`TraceEntry`] which can be dumped as JSON for analysis and CI
//! validation.

pub mod channel;
pub mod motor;

pub use channel::{SimChannel, SimPin};
pub use motor::SimMotor;

use serde::{Deserialize, Serialize};

/// One step edge as observed on the simulated step output.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    /// Virtual timer tick at which the edge occurred.
    pub tick: u64,
    /// Motor position after this step.
    pub position: i32,
    /// Period that was scheduled for this step, in ticks.
    pub period: u32,
    /// Level of the direction output during this step.
    pub dir_high: bool,
}

/// Errors produced by the simulation harness.
#[derive(thiserror::Error, Debug)]
pub enum SimError {
    /// The run condition was not reached within the tick budget.
    #[error("simulation exceeded {0} ticks without reaching its condition")]
    Timeout(u64),
    #[error("trace serialization failed")]
    Json(#[from] serde_json::Error),
}
