//! # Ramp Generator
//!
//! Plans trapezoidal (accelerate / coast / decelerate) velocity profiles as
//! a sequence of compact commands for the stepper command queue.
//!
//! The planner is driven by the queue's *tail-state*: the position and
//! period the motor will have once every already-queued step has been
//! emitted. Each call to [`RampGenerator::get_next_command`] advances the
//! profile by one command (at least 1 ms of motion at low speeds, a single
//! step at high speeds).
//!
//! The math rests on the relation between steps and time under constant
//! acceleration: from `s = a*t²/2` and `v = a*t`, the period of the n-th
//! step from rest is `sqrt(ticks_per_s² / (2*a*n))` ticks. The virtual
//! distance-from-rest `performed_ramp_up_steps` makes the same formula
//! serve acceleration, deceleration and online speed changes: a new speed
//! or acceleration simply recomputes that distance from the current tail
//! period.
//!
//! Every computed period is clipped so that truncation in the compact
//! float arithmetic can never produce an overshoot: periods only shrink
//! while accelerating, only grow while decelerating, and never cross the
//! configured speed cap.

use crate::error::MoveError;
use crate::upm::UpmFloat;
use crate::{ABSOLUTE_MAX_TICKS, MIN_DELTA_TICKS, TICKS_FOR_STOPPED_MOTOR, TICKS_PER_S, us_to_ticks};

/// `TICKS_PER_S` in compact float form, used by the acceleration setup.
const UPM_TICKS_PER_S: UpmFloat = UpmFloat::from_u32(TICKS_PER_S);

/// Remaining-steps value used while free-running.
const KEEP_RUNNING_STEPS: u32 = 0x0FFF_FFFF;

/// Direction of travel of the current ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MoveDirection {
    /// Position counts up.
    Up,
    /// Position counts down.
    Down,
}

impl MoveDirection {
    fn opposite(self) -> Self {
        match self {
            MoveDirection::Up => MoveDirection::Down,
            MoveDirection::Down => MoveDirection::Up,
        }
    }
}

/// Phase of the velocity profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RampPhase {
    Accelerate,
    Coast,
    /// Slowing down to a lower speed cap.
    Decelerate,
    /// Slowing down to standstill (end of move, reversal, or forced stop).
    DecelerateToStop,
}

/// Combined ramp state: idle, or a phase with a direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RampState {
    /// The generator produces no commands.
    Idle,
    Running { phase: RampPhase, dir: MoveDirection },
}

/// One planned run of steps for the command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RampCommand {
    /// Period between the steps of this run, in ticks.
    pub ticks: u32,
    /// Number of steps, `1..=127`.
    pub steps: u8,
    /// Whether position counts up during this run.
    pub count_up: bool,
}

/// Producer-owned configuration, staged until the next publication.
struct RampConfig {
    min_travel_ticks: u32,
    upm_inv_accel2: UpmFloat,
    /// Steps needed to reach the speed cap from rest.
    ramp_steps: u32,
}

/// Snapshot read by the refill path. Republished atomically with respect to
/// refill, which may itself run in interrupt context on some targets.
struct RampRo {
    target_pos: i32,
    min_travel_ticks: u32,
    upm_inv_accel2: UpmFloat,
    force_stop: bool,
}

/// State mutated only during refill.
struct RampRw {
    ramp_state: RampState,
    /// Virtual distance from rest along the acceleration curve.
    performed_ramp_up_steps: u32,
    keep_running: bool,
}

/// The per-motor ramp planner.
pub struct RampGenerator {
    config: RampConfig,
    ro: RampRo,
    rw: RampRw,
}

impl RampGenerator {
    pub const fn new() -> Self {
        Self {
            config: RampConfig {
                min_travel_ticks: 0,
                upm_inv_accel2: UpmFloat::ZERO,
                ramp_steps: 0,
            },
            ro: RampRo {
                target_pos: 0,
                min_travel_ticks: 0,
                upm_inv_accel2: UpmFloat::ZERO,
                force_stop: false,
            },
            rw: RampRw {
                ramp_state: RampState::Idle,
                performed_ramp_up_steps: 0,
                keep_running: false,
            },
        }
    }

    fn update_ramp_steps(&mut self) {
        self.config.ramp_steps = self
            .config
            .upm_inv_accel2
            .div(UpmFloat::from_u32(self.config.min_travel_ticks).square())
            .to_u32();
    }

    /// Sets the speed cap as the shortest allowed step period in µs.
    /// Ignored if `min_step_us` is zero. Takes effect on the next move or
    /// [`apply_speed_acceleration`](Self::apply_speed_acceleration).
    pub fn set_speed(&mut self, min_step_us: u32) {
        if min_step_us == 0 {
            return;
        }
        self.config.min_travel_ticks = us_to_ticks(min_step_us).max(MIN_DELTA_TICKS);
        self.update_ramp_steps();
    }

    /// Sets the acceleration in steps/s². Ignored if `accel` is zero.
    /// Takes effect on the next move or
    /// [`apply_speed_acceleration`](Self::apply_speed_acceleration).
    pub fn set_acceleration(&mut self, accel: u32) {
        if accel == 0 {
            return;
        }
        let upm_inv_accel =
            UPM_TICKS_PER_S.div(UpmFloat::from_u32(accel.saturating_mul(2)));
        self.config.upm_inv_accel2 = UPM_TICKS_PER_S.mul(upm_inv_accel);
        self.update_ramp_steps();
    }

    fn publish_config(&mut self, ticks_at_queue_end: u32, target_pos: i32) {
        // The new virtual distance-from-rest pretends the current tail
        // period was reached via the new acceleration curve, so the ramp
        // continues without a restart.
        let performed_ramp_up_steps = self
            .config
            .upm_inv_accel2
            .div(UpmFloat::from_u32(ticks_at_queue_end).square())
            .to_u32();
        critical_section::with(|_| {
            self.ro.min_travel_ticks = self.config.min_travel_ticks;
            self.ro.upm_inv_accel2 = self.config.upm_inv_accel2;
            self.rw.performed_ramp_up_steps = performed_ramp_up_steps;
            self.ro.target_pos = target_pos;
        });
    }

    /// Republishes speed and acceleration into the refill snapshot,
    /// recomputing the ramp progress from the current tail period.
    pub fn apply_speed_acceleration(&mut self, ticks_at_queue_end: u32) {
        let target_pos = self.ro.target_pos;
        self.publish_config(ticks_at_queue_end, target_pos);
    }

    fn calculate_move_to(
        &mut self,
        target_pos: i32,
        pos_at_queue_end: i32,
        ticks_at_queue_end: u32,
    ) -> Result<(), MoveError> {
        if self.config.min_travel_ticks == 0 {
            return Err(MoveError::SpeedUndefined);
        }
        if self.config.upm_inv_accel2 == UpmFloat::ZERO {
            return Err(MoveError::AccelUndefined);
        }
        self.publish_config(ticks_at_queue_end, target_pos);

        if self.rw.ramp_state == RampState::Idle {
            // Overflow of the position delta is legal.
            let delta = target_pos.wrapping_sub(pos_at_queue_end);
            let dir = if delta > 0 {
                MoveDirection::Up
            } else if delta < 0 {
                MoveDirection::Down
            } else {
                return Ok(());
            };
            critical_section::with(|_| {
                self.rw.keep_running = false;
                self.ro.force_stop = false;
                self.rw.ramp_state = RampState::Running {
                    phase: RampPhase::Accelerate,
                    dir,
                };
            });
        }
        #[cfg(feature = "defmt")]
        defmt::debug!(
            "ramp: move to {} (tail pos {}, tail ticks {})",
            target_pos,
            pos_at_queue_end,
            ticks_at_queue_end
        );
        Ok(())
    }

    /// Baseline for relative and retargeted moves: the published target if
    /// a positional ramp is active, else the queue tail.
    fn position_baseline(&self, pos_at_queue_end: i32) -> i32 {
        if self.is_ramp_generator_active() && !self.rw.keep_running {
            self.ro.target_pos
        } else {
            pos_at_queue_end
        }
    }

    /// Starts or retargets an absolute move.
    pub fn move_to(
        &mut self,
        position: i32,
        pos_at_queue_end: i32,
        ticks_at_queue_end: u32,
    ) -> Result<(), MoveError> {
        if self.is_stopping() {
            return Err(MoveError::StopOngoing);
        }
        let baseline = self.position_baseline(pos_at_queue_end);
        self.calculate_move_to(position, baseline, ticks_at_queue_end)
    }

    /// Starts a move relative to the current baseline position.
    pub fn move_by(
        &mut self,
        delta: i32,
        pos_at_queue_end: i32,
        ticks_at_queue_end: u32,
    ) -> Result<(), MoveError> {
        let new_pos = self.position_baseline(pos_at_queue_end).wrapping_add(delta);
        self.move_to(new_pos, pos_at_queue_end, ticks_at_queue_end)
    }

    /// Enters free-run: the generator ignores the target position and holds
    /// the current direction at the speed cap until stopped. From rest the
    /// ramp starts counting up.
    pub fn set_keep_running(&mut self) {
        critical_section::with(|_| {
            self.rw.keep_running = true;
            self.ro.force_stop = false;
            if self.rw.ramp_state == RampState::Idle {
                self.rw.ramp_state = RampState::Running {
                    phase: RampPhase::Accelerate,
                    dir: MoveDirection::Up,
                };
            }
        });
    }

    /// True while free-running.
    pub fn is_running_continuously(&self) -> bool {
        self.rw.keep_running
    }

    /// Requests a graceful stop: the next planned commands ramp down and
    /// the generator goes idle at standstill.
    pub fn initiate_stop(&mut self) {
        self.ro.force_stop = true;
    }

    /// Drops the ramp to idle without any deceleration. Queued commands
    /// still play out unless the queue is stopped as well.
    pub fn abort(&mut self) {
        self.rw.ramp_state = RampState::Idle;
    }

    /// True while the generator produces commands.
    pub fn is_ramp_generator_active(&self) -> bool {
        self.rw.ramp_state != RampState::Idle
    }

    /// True while a forced stop is in progress. Natural end-of-move
    /// deceleration does not count: the move can still be retargeted.
    pub fn is_stopping(&self) -> bool {
        self.ro.force_stop && self.is_ramp_generator_active()
    }

    /// Current state, for diagnostics.
    pub fn ramp_state(&self) -> RampState {
        self.rw.ramp_state
    }

    pub(crate) fn is_configured(&self) -> bool {
        self.config.min_travel_ticks != 0 && self.config.upm_inv_accel2 != UpmFloat::ZERO
    }

    /// Shifts the target by `delta` without recomputing any ramp state.
    /// Must be called inside the same interrupt-disabled scope that shifts
    /// the queue's tail position.
    pub fn advance_target_position_within_interrupt_disabled_scope(&mut self, delta: i32) {
        self.ro.target_pos = self.ro.target_pos.wrapping_add(delta);
    }

    /// Plans the next run of steps from the queue's tail-state. Returns
    /// `None` iff the ramp is idle.
    pub fn get_next_command(
        &mut self,
        ticks_at_queue_end: u32,
        pos_at_queue_end: i32,
    ) -> Option<RampCommand> {
        let dir = match self.rw.ramp_state {
            RampState::Idle => return None,
            RampState::Running { dir, .. } => dir,
        };

        // Should never happen; the queue publishes the sentinel instead.
        let ticks_at_queue_end = if ticks_at_queue_end == 0 {
            TICKS_FOR_STOPPED_MOTOR
        } else {
            ticks_at_queue_end
        };

        let count_up = dir == MoveDirection::Up;
        let (mut remaining_steps, need_count_up) = if self.rw.keep_running {
            (KEEP_RUNNING_STEPS, count_up)
        } else {
            let delta = self.ro.target_pos.wrapping_sub(pos_at_queue_end);
            if delta == 0 {
                self.rw.ramp_state = RampState::Idle;
                return None;
            }
            (delta.unsigned_abs(), delta > 0)
        };

        let phase = if self.ro.force_stop {
            remaining_steps = self.rw.performed_ramp_up_steps;
            self.rw.keep_running = false;
            RampPhase::DecelerateToStop
        } else if count_up != need_count_up {
            // Direction reversal: stop first, accelerate the other way
            // afterwards.
            remaining_steps = self.rw.performed_ramp_up_steps;
            RampPhase::DecelerateToStop
        } else if remaining_steps <= self.rw.performed_ramp_up_steps {
            RampPhase::DecelerateToStop
        } else if self.ro.min_travel_ticks < ticks_at_queue_end {
            RampPhase::Accelerate
        } else if self.ro.min_travel_ticks > ticks_at_queue_end {
            RampPhase::Decelerate
        } else {
            RampPhase::Coast
        };
        self.rw.ramp_state = RampState::Running { phase, dir };

        // Plan at least 1 ms of motion per command; exactly one step per
        // command once the period is below 1 ms.
        let mut planning_steps = ((TICKS_PER_S / 1000) / ticks_at_queue_end).max(1);
        let curr_ticks = ticks_at_queue_end;
        let mut next_ticks = match phase {
            RampPhase::Coast => {
                // Do not overshoot the deceleration start.
                planning_steps = planning_steps
                    .min(remaining_steps - self.rw.performed_ramp_up_steps);
                self.ro.min_travel_ticks
            }
            RampPhase::Accelerate => {
                let rem = UpmFloat::from_u32(
                    self.rw.performed_ramp_up_steps + planning_steps,
                );
                let d_ticks_new = self.ro.upm_inv_accel2.div(rem).sqrt().to_u32();
                // Speed cap.
                let mut ticks = d_ticks_new.max(self.ro.min_travel_ticks);
                if self.rw.performed_ramp_up_steps != 0 {
                    // Periods only shrink while accelerating. The very
                    // first command is exempt: it seeds the sequence
                    // instead of inheriting the stopped-motor sentinel.
                    ticks = ticks.min(curr_ticks);
                }
                ticks
            }
            RampPhase::Decelerate => {
                let rem = UpmFloat::from_u32(
                    self.rw.performed_ramp_up_steps + planning_steps,
                );
                let d_ticks_new = self.ro.upm_inv_accel2.div(rem).sqrt().to_u32();
                // Periods only grow while decelerating.
                d_ticks_new.min(self.ro.min_travel_ticks).max(curr_ticks)
            }
            RampPhase::DecelerateToStop => {
                let rem = UpmFloat::from_u32(
                    remaining_steps.saturating_sub(planning_steps),
                );
                let d_ticks_new = self.ro.upm_inv_accel2.div(rem).sqrt().to_u32();
                d_ticks_new.max(self.ro.min_travel_ticks).max(curr_ticks)
            }
        };
        next_ticks = next_ticks.min(ABSOLUTE_MAX_TICKS);

        let steps = planning_steps.max(1).min(remaining_steps).min(127) as u8;

        match phase {
            RampPhase::Accelerate => self.rw.performed_ramp_up_steps += steps as u32,
            RampPhase::Decelerate | RampPhase::DecelerateToStop => {
                self.rw.performed_ramp_up_steps =
                    self.rw.performed_ramp_up_steps.saturating_sub(steps as u32);
            }
            RampPhase::Coast => {}
        }

        if steps as u32 == remaining_steps {
            if count_up != need_count_up {
                // Standstill reached with the target on the other side:
                // accelerate in the opposite direction from scratch.
                self.rw.ramp_state = RampState::Running {
                    phase: RampPhase::Accelerate,
                    dir: dir.opposite(),
                };
                #[cfg(feature = "defmt")]
                defmt::debug!("ramp: reversing direction");
            } else {
                self.rw.ramp_state = RampState::Idle;
                #[cfg(feature = "defmt")]
                defmt::debug!("ramp: idle");
            }
        }

        Some(RampCommand {
            ticks: next_ticks,
            steps,
            count_up,
        })
    }
}

impl Default for RampGenerator {
    fn default() -> Self {
        Self::new()
    }
}
