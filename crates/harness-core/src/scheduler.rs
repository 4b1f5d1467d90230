//! Cycle scheduler: time-boxed bursts handed back to the host each frame.
//!
//! A burst runs until either the instruction cap or the wall-clock budget is
//! reached. The clock is read before every step, so one burst overshoots the
//! wall-clock budget by at most the cost of a single step.
//!
//! Each queued burst is identified by a [`BurstToken`]. A token is accepted
//! once, and never after [`Scheduler::cancel`]; a host callback that fires
//! late therefore runs nothing.

use core::fmt;
use std::time::Duration;

use log::trace;

use crate::api::{BurstBudget, CpuModel};
use crate::fault::{CpuFault, HarnessError};
use crate::timing::Clock;

/// Identifies one queued burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BurstToken(u64);

impl BurstToken {
    /// Wraps a raw token value received back from the host.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw token value handed to the host.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BurstToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues burst tokens that are unique for the lifetime of a controller.
#[derive(Debug, Clone, Default)]
pub struct TokenSource {
    next: u64,
}

impl TokenSource {
    /// Creates a source starting at token 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    const fn next_token(&mut self) -> BurstToken {
        self.next += 1;
        BurstToken(self.next)
    }
}

/// Why a burst stopped stepping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BurstExit {
    /// Instruction cap reached.
    InstructionBudget,
    /// Wall-clock budget used up.
    WallClockBudget,
    /// The CPU model faulted; no further steps may run.
    Faulted(CpuFault),
}

/// Outcome of one burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstReport {
    /// Completed steps; a faulting step is not counted.
    pub steps: u32,
    /// Wall-clock time spent in the burst.
    pub elapsed: Duration,
    /// Exit reason.
    pub exit: BurstExit,
}

impl BurstReport {
    /// Returns the fault that ended the burst, if any.
    #[must_use]
    pub const fn fault(&self) -> Option<&CpuFault> {
        match &self.exit {
            BurstExit::Faulted(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Hand-back decision returned to the host after each frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Another burst is queued under this token.
    Continue(BurstToken),
    /// Nothing ran and nothing is queued.
    Cancelled,
    /// The session faulted and was torn down.
    Faulted(HarnessError),
}

/// Per-session burst pacing and cancellation state.
///
/// Not restartable: once cancelled, a scheduler issues no further tokens.
#[derive(Debug, Clone)]
pub struct Scheduler {
    budget: BurstBudget,
    pending: Option<BurstToken>,
    cancelled: bool,
}

impl Scheduler {
    /// Creates a scheduler with no queued burst.
    #[must_use]
    pub const fn new(budget: BurstBudget) -> Self {
        Self {
            budget,
            pending: None,
            cancelled: false,
        }
    }

    /// Burst limits in force.
    #[must_use]
    pub const fn budget(&self) -> BurstBudget {
        self.budget
    }

    /// Token of the queued burst, if one is queued.
    #[must_use]
    pub const fn pending(&self) -> Option<BurstToken> {
        self.pending
    }

    /// Whether [`Self::cancel`] has been called.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Queues the next burst. Returns `None` once cancelled.
    pub fn issue(&mut self, tokens: &mut TokenSource) -> Option<BurstToken> {
        if self.cancelled {
            return None;
        }
        let token = tokens.next_token();
        self.pending = Some(token);
        Some(token)
    }

    /// Consumes `token` if it names the queued burst.
    pub fn accept(&mut self, token: BurstToken) -> bool {
        if self.cancelled || self.pending != Some(token) {
            return false;
        }
        self.pending = None;
        true
    }

    /// Stops the scheduler and returns the token that was still queued.
    pub const fn cancel(&mut self) -> Option<BurstToken> {
        self.cancelled = true;
        self.pending.take()
    }

    /// Steps `cpu` until a budget is exhausted or the model faults.
    ///
    /// Each completed step runs one instruction, one peripheral tick and adds
    /// one to `cycle_count`.
    pub fn run_burst<M, C>(&self, cpu: &mut M, cycle_count: &mut u64, clock: &C) -> BurstReport
    where
        M: CpuModel + ?Sized,
        C: Clock + ?Sized,
    {
        let started = clock.now();
        let mut steps = 0u32;
        let exit = loop {
            if steps >= self.budget.max_instructions {
                break BurstExit::InstructionBudget;
            }
            if clock.now().saturating_sub(started) >= self.budget.wall_clock {
                break BurstExit::WallClockBudget;
            }
            if let Err(fault) = cpu.step() {
                break BurstExit::Faulted(fault);
            }
            cpu.tick();
            steps += 1;
            *cycle_count += 1;
        };
        let elapsed = clock.now().saturating_sub(started);
        trace!("burst ran {steps} steps in {elapsed:?}: {exit:?}");
        BurstReport {
            steps,
            elapsed,
            exit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BurstExit, Scheduler, TokenSource};
    use crate::api::{BurstBudget, CpuModel, ListenerId, PinId, PinLevel, PinListener};
    use crate::fault::CpuFault;
    use crate::timing::ManualClock;
    use std::time::Duration;

    struct Counter {
        clock: ManualClock,
        cost: Duration,
        steps: u64,
        ticks: u64,
        fault_at: Option<u64>,
    }

    impl Counter {
        fn new(clock: &ManualClock, cost: Duration) -> Self {
            Self {
                clock: clock.clone(),
                cost,
                steps: 0,
                ticks: 0,
                fault_at: None,
            }
        }
    }

    impl CpuModel for Counter {
        fn step(&mut self) -> Result<(), CpuFault> {
            if self.fault_at == Some(self.steps) {
                return Err(CpuFault::invalid_opcode("bad opcode"));
            }
            self.steps += 1;
            self.clock.advance(self.cost);
            Ok(())
        }

        fn tick(&mut self) {
            self.ticks += 1;
        }

        fn add_pin_listener(&mut self, _pin: PinId, _listener: PinListener) -> ListenerId {
            ListenerId::new(0)
        }

        fn remove_pin_listener(&mut self, _id: ListenerId) -> bool {
            false
        }

        fn pin_level(&self, _pin: PinId) -> PinLevel {
            PinLevel::Low
        }
    }

    fn budget(wall_ms: u64, max_instructions: u32) -> BurstBudget {
        BurstBudget {
            wall_clock: Duration::from_millis(wall_ms),
            max_instructions,
        }
    }

    #[test]
    fn instruction_cap_ends_cheap_bursts() {
        let clock = ManualClock::new();
        let mut cpu = Counter::new(&clock, Duration::from_nanos(10));
        let mut cycles = 0;
        let report = Scheduler::new(budget(16, 1_000)).run_burst(&mut cpu, &mut cycles, &clock);
        assert_eq!(report.exit, BurstExit::InstructionBudget);
        assert_eq!(report.steps, 1_000);
        assert_eq!(cycles, 1_000);
        assert_eq!(cpu.ticks, 1_000);
    }

    #[test]
    fn wall_clock_ends_expensive_bursts() {
        let clock = ManualClock::new();
        let mut cpu = Counter::new(&clock, Duration::from_millis(5));
        let mut cycles = 0;
        let report = Scheduler::new(budget(16, 80_000)).run_burst(&mut cpu, &mut cycles, &clock);
        assert_eq!(report.exit, BurstExit::WallClockBudget);
        assert_eq!(report.steps, 4);
        assert_eq!(report.elapsed, Duration::from_millis(20));
    }

    #[test]
    fn fault_stops_before_counting_the_step() {
        let clock = ManualClock::new();
        let mut cpu = Counter::new(&clock, Duration::from_nanos(10));
        cpu.fault_at = Some(3);
        let mut cycles = 0;
        let report = Scheduler::new(budget(16, 100)).run_burst(&mut cpu, &mut cycles, &clock);
        assert_eq!(report.steps, 3);
        assert_eq!(cycles, 3);
        assert_eq!(cpu.ticks, 3);
        assert_eq!(report.fault().map(CpuFault::reason), Some("bad opcode"));
    }

    #[test]
    fn tokens_are_single_use_and_die_with_cancel() {
        let mut tokens = TokenSource::new();
        let mut scheduler = Scheduler::new(budget(16, 10));
        let first = scheduler.issue(&mut tokens).expect("fresh scheduler issues");
        assert!(scheduler.accept(first));
        assert!(!scheduler.accept(first));

        let second = scheduler.issue(&mut tokens).expect("still running");
        assert_ne!(first, second);
        assert_eq!(scheduler.cancel(), Some(second));
        assert!(!scheduler.accept(second));
        assert_eq!(scheduler.issue(&mut tokens), None);
    }
}
