//! End-to-end motion scenarios on the simulated motor: full trapezoid
//! moves, mid-flight retargeting, online speed changes, auto-enable and
//! forced stops, all driven tick-accurately through the queue and the
//! manage cadence.

use sim::motor::MANAGE_PERIOD_TICKS;
use sim::SimMotor;
use stepper::{us_to_ticks, MoveError, StepperQueue, TICKS_PER_S};

const SECOND: u64 = TICKS_PER_S as u64;

fn motor_with(queues: &[StepperQueue], speed_us: u32, accel: u32) -> SimMotor<'_> {
    let mut motor = SimMotor::new(queues);
    motor.set_direction_pin(true);
    motor.stepper_mut().set_speed(speed_us);
    motor.stepper_mut().set_acceleration(accel);
    motor
}

#[test]
fn test_trapezoid_move_reaches_target_exactly() {
    let queues = [StepperQueue::new()];
    let mut motor = motor_with(&queues, 100, 1000);

    motor.stepper_mut().move_to(1000).unwrap();
    motor.run_until_idle(60 * SECOND).unwrap();

    assert_eq!(motor.position(), 1000);
    let trace = motor.trace();
    assert_eq!(trace.len(), 1000);

    // The first period comes straight off the acceleration curve:
    // sqrt(ticks_per_s^2 / (2 * accel)) = ~357770 ticks, up to compact
    // float truncation.
    assert!(
        trace[0].period > 350_000 && trace[0].period <= 360_000,
        "first period {}",
        trace[0].period
    );

    // The speed cap is never exceeded.
    let min_period = trace.iter().map(|e| e.period).min().unwrap();
    assert!(min_period >= us_to_ticks(100));

    // Triangular profile: periods shrink to the peak, then grow.
    let peak = trace
        .iter()
        .enumerate()
        .min_by_key(|(_, e)| e.period)
        .map(|(i, _)| i)
        .unwrap();
    for pair in trace[..peak].windows(2) {
        assert!(pair[1].period <= pair[0].period, "period grew while accelerating");
    }
    for pair in trace[peak..].windows(2) {
        assert!(pair[1].period >= pair[0].period, "period shrank while decelerating");
    }
}

#[test]
fn test_retarget_during_deceleration_reverses_without_overshoot() {
    let queues = [StepperQueue::new()];
    let mut motor = motor_with(&queues, 100, 1000);

    motor.stepper_mut().move_by(100).unwrap();
    // A 100-step triangular move peaks at 50; past 70 the motor is
    // decelerating toward the target.
    motor.run_until(60 * SECOND, |m| m.position() >= 70).unwrap();

    // Retargeting during a natural deceleration is legal.
    motor.stepper_mut().move_to(-200).unwrap();
    motor.run_until_idle(300 * SECOND).unwrap();

    assert_eq!(motor.position(), -200);
    let trace = motor.trace();
    let max_pos = trace.iter().map(|e| e.position).max().unwrap();
    // The turnaround stays within the stopping distance of the original
    // move; the reversal never undershoots the new target.
    assert!(max_pos <= 100, "overran to {max_pos}");
    assert!(trace.iter().all(|e| e.position >= -200));
    // Once reversed, motion is monotonically downward.
    let peak_idx = trace.iter().position(|e| e.position == max_pos).unwrap();
    for pair in trace[peak_idx..].windows(2) {
        assert_eq!(pair[1].position, pair[0].position - 1);
    }
}

#[test]
fn test_free_run_speed_change_and_stop() {
    let queues = [StepperQueue::new()];
    let mut motor = motor_with(&queues, 200, 1000);

    motor.stepper_mut().keep_running();
    motor
        .run_until(120 * SECOND, |m| m.step_count() >= 5000)
        .unwrap();

    // Raise the speed cap on the fly.
    motor.stepper_mut().set_speed(100);
    motor.stepper_mut().apply_speed_acceleration();
    motor
        .run_until(240 * SECOND, |m| m.step_count() >= 10_000)
        .unwrap();

    motor.stepper_mut().stop_move();
    motor.run_until_idle(240 * SECOND).unwrap();
    assert!(!motor.stepper().is_running());

    let trace = motor.trace();
    // No position jump anywhere: every edge advances by exactly one step.
    for (i, pair) in trace.windows(2).enumerate() {
        assert_eq!(
            pair[1].position,
            pair[0].position + 1,
            "position jumped at edge {i}"
        );
    }
    // The cap change keeps the ramp monotone: periods through the change
    // keep shrinking until the stop begins.
    for pair in trace[5000..10_000].windows(2) {
        assert!(pair[1].period <= pair[0].period);
    }
    // The configured caps are honored throughout.
    let min_period = trace.iter().map(|e| e.period).min().unwrap();
    assert!(min_period >= us_to_ticks(100));
}

#[test]
fn test_auto_enable_with_settle_delay() {
    let queues = [StepperQueue::new()];
    let mut motor = motor_with(&queues, 100, 1000);
    let enable = motor.attach_enable_pin(true); // low-active
    assert!(enable.is_high(), "enable pin must start inactive");

    motor.stepper_mut().set_auto_enable(true);
    motor.stepper_mut().set_delay_to_enable(2000).unwrap();
    motor.stepper_mut().set_delay_to_disable(100);

    motor.stepper_mut().move_to(5).unwrap();
    // The outputs are powered during the enqueue, before any step edge.
    assert!(!enable.is_high());
    assert_eq!(motor.step_count(), 0);

    motor.run_until_idle(60 * SECOND).unwrap();
    let trace = motor.trace();
    assert_eq!(trace.len(), 5);
    // The settle entry leads the train and counts as the first step.
    assert_eq!(trace[0].period, us_to_ticks(2000));
    assert_eq!(motor.position(), 5);
    assert!(!enable.is_high(), "still powered right after the move");

    // After the off-delay (10 manage periods) the outputs power down.
    motor.run_for(15 * MANAGE_PERIOD_TICKS).unwrap();
    assert!(enable.is_high());
}

#[test]
fn test_initiate_stop_while_accelerating() {
    let queues = [StepperQueue::new()];
    let mut motor = motor_with(&queues, 100, 1000);

    motor.stepper_mut().move_to(10).unwrap();
    motor.run_until(60 * SECOND, |m| m.position() >= 2).unwrap();

    motor.stepper_mut().stop_move();
    // While the forced stop is in progress new moves are refused.
    assert_eq!(motor.stepper_mut().move_to(20), Err(MoveError::StopOngoing));

    motor.run_until_idle(120 * SECOND).unwrap();
    let final_pos = motor.position();
    assert!(final_pos < 10, "stopped at {final_pos}");
    assert_eq!(
        final_pos,
        motor.stepper().get_position_after_commands_completed()
    );
    assert!(!motor.stepper().is_ramp_generator_active());

    // The stop is complete; a fresh move works again.
    motor.stepper_mut().move_to(20).unwrap();
    motor.run_until_idle(120 * SECOND).unwrap();
    assert_eq!(motor.position(), 20);
}

#[test]
fn test_move_to_exact_arrival_across_configurations() {
    for (speed_us, accel, target) in [
        (100u32, 1000u32, 3i32),
        (100, 50_000, 2500),
        (500, 5000, -1200),
        (50, 100_000, 10_000),
        (1000, 2000, 1),
    ] {
        let queues = [StepperQueue::new()];
        let mut motor = motor_with(&queues, speed_us, accel);
        motor.stepper_mut().move_to(target).unwrap();
        motor.run_until_idle(600 * SECOND).unwrap();
        assert_eq!(
            motor.position(),
            target,
            "speed={speed_us} accel={accel} target={target}"
        );
        assert_eq!(motor.step_count(), target.unsigned_abs() as usize);
        assert!(motor.stepper().is_queue_empty());
    }
}

#[test]
fn test_manage_cadence_survives_queue_starvation() {
    // At very low speeds individual periods exceed the 10 ms look-ahead,
    // so the queue drains between manage passes and must re-arm cleanly.
    let queues = [StepperQueue::new()];
    let mut motor = motor_with(&queues, 5000, 100);
    motor.stepper_mut().move_to(20).unwrap();
    motor.run_until_idle(600 * SECOND).unwrap();
    assert_eq!(motor.position(), 20);
    assert_eq!(motor.step_count(), 20);
}
