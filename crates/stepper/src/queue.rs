//! # Stepper Command Queue
//!
//! A bounded ring of step commands shared between the foreground refill
//! path (producer) and the timer-compare interrupt (consumer).
//!
//! Each entry describes a *run* of steps with a common period. The producer
//! publishes entries and the projected *tail-state* (position, direction
//! and period after the last queued entry); the interrupt drains entries
//! one step at a time, decrementing the step count in place.
//!
//! ## Sharing discipline
//!
//! All cross-context fields are atomics, so both sides run lock-free:
//!
//! - `next_write_idx` is written by the producer only (release on publish)
//!   and read by the interrupt to detect an empty queue.
//! - `read_idx`, `is_running` and the in-flight step count are written by
//!   the interrupt only.
//! - The tail-state is owned by the producer, except that the interrupt
//!   publishes the stopped-motor sentinel when the queue drains.
//!
//! Indices are wider than the ring mask, so full and empty are
//! distinguished without wasting an entry. A short `critical_section`
//! covers only the places that need a coherent multi-field snapshot:
//! arming the timer against a concurrent drain, and the backward walk in
//! [`StepperQueue::current_position`].

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8};
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::channel::StepperChannel;
use crate::error::QueueError;
use crate::{ABSOLUTE_MAX_TICKS, QUEUE_LEN, QUEUE_LEN_MASK, TICKS_FOR_STOPPED_MOTOR};

/// One run of steps sharing the same inter-step period.
///
/// `steps_dir` packs the step count (`1..=127`) into bits 7..1 and the
/// direction-toggle flag into bit 0. The interrupt decrements the count in
/// place as steps are emitted.
struct QueueEntry {
    ticks: AtomicU32,
    steps_dir: AtomicU8,
}

impl QueueEntry {
    const EMPTY: Self = Self {
        ticks: AtomicU32::new(0),
        steps_dir: AtomicU8::new(0),
    };
}

/// The per-motor command queue.
pub struct StepperQueue {
    entries: [QueueEntry; QUEUE_LEN],
    /// Next entry to consume. Interrupt-owned.
    read_idx: AtomicU8,
    /// Next entry to write. Producer-owned.
    next_write_idx: AtomicU8,
    /// Whether the interrupt has loaded the entry at `read_idx`.
    entry_loaded: AtomicBool,
    /// Position once every queued step has been emitted.
    pos_at_queue_end: AtomicI32,
    /// Level of the direction output after the last queued entry.
    dir_at_queue_end: AtomicBool,
    /// Period of the last queued entry, or the stopped-motor sentinel.
    ticks_at_queue_end: AtomicU32,
    /// Polarity mapping of the direction output to the position counter.
    dir_high_counts_up: AtomicBool,
    /// True while the compare interrupt is armed.
    is_running: AtomicBool,
}

impl StepperQueue {
    /// Creates an empty queue with the interrupt disarmed.
    pub const fn new() -> Self {
        Self {
            entries: [QueueEntry::EMPTY; QUEUE_LEN],
            read_idx: AtomicU8::new(0),
            next_write_idx: AtomicU8::new(0),
            entry_loaded: AtomicBool::new(false),
            pos_at_queue_end: AtomicI32::new(0),
            dir_at_queue_end: AtomicBool::new(true),
            ticks_at_queue_end: AtomicU32::new(TICKS_FOR_STOPPED_MOTOR),
            dir_high_counts_up: AtomicBool::new(true),
            is_running: AtomicBool::new(false),
        }
    }

    /// True iff no unexecuted entry remains.
    pub fn is_empty(&self) -> bool {
        self.read_idx.load(Acquire) == self.next_write_idx.load(Acquire)
    }

    /// True iff no entry can be accepted.
    pub fn is_full(&self) -> bool {
        let rp = self.read_idx.load(Acquire);
        let wp = self.next_write_idx.load(Relaxed);
        wp.wrapping_sub(rp) as usize >= QUEUE_LEN
    }

    /// Position the motor will be at once the queue has drained.
    pub fn pos_at_queue_end(&self) -> i32 {
        self.pos_at_queue_end.load(Relaxed)
    }

    /// Moves the coordinate origin of the tail position.
    pub fn set_pos_at_queue_end(&self, pos: i32) {
        self.pos_at_queue_end.store(pos, Relaxed);
    }

    /// Projected level of the direction output after the queue drains.
    pub fn dir_at_queue_end(&self) -> bool {
        self.dir_at_queue_end.load(Relaxed)
    }

    /// Period of the last queued entry, or [`TICKS_FOR_STOPPED_MOTOR`].
    pub fn ticks_at_queue_end(&self) -> u32 {
        self.ticks_at_queue_end.load(Relaxed)
    }

    pub(crate) fn set_ticks_at_queue_end(&self, ticks: u32) {
        self.ticks_at_queue_end.store(ticks, Relaxed);
    }

    pub(crate) fn set_dir_high_counts_up(&self, counts_up: bool) {
        self.dir_high_counts_up.store(counts_up, Relaxed);
    }

    pub(crate) fn dir_high_counts_up(&self) -> bool {
        self.dir_high_counts_up.load(Relaxed)
    }

    /// True while the compare interrupt is armed and emitting pulses.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Relaxed)
    }

    /// Enqueues one run of `steps` steps with period `delta_ticks` and the
    /// direction output at `dir_high`, updating the tail-state. If the
    /// interrupt was disarmed, arms `channel` with a known-safe first
    /// compare.
    ///
    /// `delta_ticks` below [`crate::MIN_DELTA_TICKS`] is a contract
    /// violation of the planner; it is only checked in debug builds.
    pub fn add_entry<C: StepperChannel>(
        &self,
        channel: &mut C,
        delta_ticks: u32,
        steps: u8,
        dir_high: bool,
    ) -> Result<(), QueueError> {
        if steps == 0 || steps >= 128 {
            return Err(QueueError::StepsError);
        }
        if delta_ticks > ABSOLUTE_MAX_TICKS {
            return Err(QueueError::TicksTooHigh);
        }
        debug_assert!(delta_ticks >= crate::MIN_DELTA_TICKS);

        let rp = self.read_idx.load(Acquire);
        let wp = self.next_write_idx.load(Relaxed);
        if wp.wrapping_sub(rp) as usize >= QUEUE_LEN {
            return Err(QueueError::Full);
        }

        let toggle_dir = dir_high != self.dir_at_queue_end.load(Relaxed);
        let entry = &self.entries[wp as usize & QUEUE_LEN_MASK];
        entry.ticks.store(delta_ticks, Relaxed);
        entry.steps_dir.store((steps << 1) | toggle_dir as u8, Relaxed);

        let count_up = dir_high == self.dir_high_counts_up.load(Relaxed);
        let pos = self.pos_at_queue_end.load(Relaxed);
        let pos = if count_up {
            pos.wrapping_add(steps as i32)
        } else {
            pos.wrapping_sub(steps as i32)
        };
        self.pos_at_queue_end.store(pos, Relaxed);
        self.dir_at_queue_end.store(dir_high, Relaxed);
        self.ticks_at_queue_end.store(delta_ticks, Relaxed);
        self.next_write_idx.store(wp.wrapping_add(1), Release);

        // Arm the timer if the interrupt is idle. The critical section keeps
        // the running check coherent against a concurrent drain.
        critical_section::with(|_| {
            if !self.is_running.load(Relaxed) {
                self.entry_loaded.store(false, Relaxed);
                self.is_running.store(true, Relaxed);
                channel.arm();
            }
        });
        Ok(())
    }

    /// True iff the total unexecuted time in the queue is at least
    /// `min_ticks`. The planner uses this to stop producing once enough
    /// look-ahead is queued.
    pub fn has_ticks_in_queue(&self, min_ticks: u32) -> bool {
        let wp = self.next_write_idx.load(Relaxed);
        let mut idx = self.read_idx.load(Acquire);
        let mut total: u32 = 0;
        while idx != wp {
            let entry = &self.entries[idx as usize & QUEUE_LEN_MASK];
            let steps = (entry.steps_dir.load(Relaxed) >> 1) as u32;
            total = total.saturating_add(entry.ticks.load(Relaxed).saturating_mul(steps));
            if total >= min_ticks {
                return true;
            }
            idx = idx.wrapping_add(1);
        }
        false
    }

    /// Disarms the interrupt, discards all queued entries and publishes the
    /// stopped-motor sentinel. The tail position is left for the caller to
    /// set.
    pub fn force_stop<C: StepperChannel>(&self, channel: &mut C) {
        critical_section::with(|_| {
            channel.disarm();
            self.is_running.store(false, Relaxed);
            self.entry_loaded.store(false, Relaxed);
            self.ticks_at_queue_end
                .store(TICKS_FOR_STOPPED_MOTOR, Relaxed);
            self.read_idx
                .store(self.next_write_idx.load(Relaxed), Release);
        });
    }

    /// Current motor position: the tail position minus the signed steps
    /// still unexecuted in the queue, reconstructed by walking the ring
    /// backwards from the write index to the read index.
    pub fn current_position(&self) -> i32 {
        critical_section::with(|_| {
            let mut pos = self.pos_at_queue_end.load(Relaxed);
            let mut count_up =
                self.dir_at_queue_end.load(Relaxed) == self.dir_high_counts_up.load(Relaxed);
            let rp = self.read_idx.load(Relaxed);
            let mut wp = self.next_write_idx.load(Relaxed);
            while wp != rp {
                wp = wp.wrapping_sub(1);
                let steps_dir =
                    self.entries[wp as usize & QUEUE_LEN_MASK].steps_dir.load(Relaxed);
                let steps = (steps_dir >> 1) as i32;
                pos = if count_up {
                    pos.wrapping_sub(steps)
                } else {
                    pos.wrapping_add(steps)
                };
                if steps_dir & 1 != 0 {
                    count_up = !count_up;
                }
            }
            pos
        })
    }

    /// The compare-match interrupt body.
    ///
    /// Emits one step of the loaded entry and schedules the next compare.
    /// When an entry is exhausted the next one is loaded, flipping the
    /// direction output before its first step if flagged. When the queue
    /// drains, the channel is disarmed and the stopped-motor sentinel is
    /// published.
    pub fn service<C: StepperChannel>(&self, channel: &mut C) {
        let mut rp = self.read_idx.load(Relaxed);
        if self.entry_loaded.load(Relaxed) {
            let entry = &self.entries[rp as usize & QUEUE_LEN_MASK];
            channel.step();
            let steps_dir = entry.steps_dir.load(Relaxed).wrapping_sub(2);
            entry.steps_dir.store(steps_dir, Relaxed);
            if steps_dir >> 1 > 0 {
                // More steps in this entry.
                channel.schedule(entry.ticks.load(Relaxed));
                return;
            }
            rp = rp.wrapping_add(1);
            self.read_idx.store(rp, Release);
        }
        if rp == self.next_write_idx.load(Acquire) {
            channel.disarm();
            self.entry_loaded.store(false, Relaxed);
            self.ticks_at_queue_end
                .store(TICKS_FOR_STOPPED_MOTOR, Relaxed);
            self.is_running.store(false, Relaxed);
            return;
        }
        let entry = &self.entries[rp as usize & QUEUE_LEN_MASK];
        if entry.steps_dir.load(Relaxed) & 1 != 0 {
            channel.toggle_dir();
        }
        channel.schedule(entry.ticks.load(Relaxed));
        self.entry_loaded.store(true, Relaxed);
    }
}

impl Default for StepperQueue {
    fn default() -> Self {
        Self::new()
    }
}
