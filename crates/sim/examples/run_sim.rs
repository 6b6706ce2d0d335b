//! Runs a full trapezoidal move on the simulated motor and dumps the
//! step-edge trace as JSON for offline analysis.

use std::fs::File;

use anyhow::{Context, Result};
use sim::SimMotor;
use stepper::{ticks_to_us, StepperQueue, TICKS_PER_S};
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let queues = [StepperQueue::new()];
    let mut motor = SimMotor::new(&queues);
    motor.set_direction_pin(true);
    motor.stepper_mut().set_speed(100); // 10 kSteps/s cap
    motor.stepper_mut().set_acceleration(50_000);

    info!("starting move to 4000");
    motor.stepper_mut().move_to(4000).context("move rejected")?;
    motor
        .run_until_idle(60 * TICKS_PER_S as u64)
        .context("move did not complete")?;

    let trace = motor.trace();
    let min_period = trace.iter().map(|e| e.period).min().unwrap_or(0);
    info!(
        steps = trace.len(),
        position = motor.position(),
        duration_ms = motor.now() * 1000 / TICKS_PER_S as u64,
        peak_rate_sps = if min_period > 0 {
            TICKS_PER_S / min_period
        } else {
            0
        },
        first_period_us = trace.first().map(|e| ticks_to_us(e.period)).unwrap_or(0),
        "move complete"
    );

    let path = std::env::temp_dir().join("stepper_sim_trace.json");
    let file = File::create(&path).context("creating trace file")?;
    motor.write_trace(file).context("writing trace")?;
    info!(path = %path.display(), "trace dumped");
    Ok(())
}
