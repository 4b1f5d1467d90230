use core::fmt;
use std::time::Duration;

use log::debug;

use crate::api::{CpuModel, FrameHost, SignalBinding};
use crate::image::BinaryImage;
use crate::observer::{self, PinSubscription, Signals};
use crate::scheduler::{BurstReport, Scheduler};
use crate::timing::Clock;

/// Identifies one session within a controller's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SessionId(u64);

impl SessionId {
    /// Wraps a raw session number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw session number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session {}", self.0)
    }
}

/// Counters owned exclusively by one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionCounters {
    /// Completed steps. Only the scheduler writes this.
    pub cycle_count: u64,
    /// Clock reading when the session started.
    pub started_at: Duration,
    /// Clock reading of the latest telemetry sample.
    pub last_sample_at: Duration,
}

impl SessionCounters {
    /// Fresh counters for a session starting at `now`.
    #[must_use]
    pub const fn starting_at(now: Duration) -> Self {
        Self {
            cycle_count: 0,
            started_at: now,
            last_sample_at: now,
        }
    }
}

/// A CPU model with its image, subscriptions, counters and scheduler.
///
/// Sessions are never reused. [`Self::close`] is the only way to end one and
/// performs the complete teardown.
pub struct SimulationSession<M: CpuModel> {
    id: SessionId,
    cpu: M,
    image: BinaryImage,
    subscriptions: Vec<PinSubscription>,
    counters: SessionCounters,
    scheduler: Scheduler,
}

impl<M: CpuModel> SimulationSession<M> {
    /// Wraps `cpu` and subscribes every binding in `watch`.
    pub fn open(
        id: SessionId,
        mut cpu: M,
        image: BinaryImage,
        watch: &[SignalBinding],
        signals: &Signals,
        scheduler: Scheduler,
        now: Duration,
    ) -> Self {
        let subscriptions = watch
            .iter()
            .map(|binding| observer::attach(&mut cpu, binding, signals))
            .collect();
        Self {
            id,
            cpu,
            image,
            subscriptions,
            counters: SessionCounters::starting_at(now),
            scheduler,
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// CPU model.
    #[must_use]
    pub const fn cpu(&self) -> &M {
        &self.cpu
    }

    /// Loaded program image.
    #[must_use]
    pub const fn image(&self) -> &BinaryImage {
        &self.image
    }

    /// Session counters.
    #[must_use]
    pub const fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    pub(crate) const fn counters_mut(&mut self) -> &mut SessionCounters {
        &mut self.counters
    }

    /// Burst scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) const fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Number of live pin subscriptions.
    #[must_use]
    pub const fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Runs one burst against this session's CPU and cycle counter.
    pub fn run_burst<C: Clock + ?Sized>(&mut self, clock: &C) -> BurstReport {
        self.scheduler
            .run_burst(&mut self.cpu, &mut self.counters.cycle_count, clock)
    }

    /// Cancels queued work, releases every subscription and returns the final
    /// counters.
    pub fn close<H: FrameHost + ?Sized>(mut self, host: &mut H) -> SessionCounters {
        if let Some(token) = self.scheduler.cancel() {
            host.cancel_frame(token);
        }
        for subscription in self.subscriptions.drain(..) {
            subscription.release(&mut self.cpu);
        }
        debug!(
            "{} closed after {} cycles",
            self.id, self.counters.cycle_count
        );
        self.counters
    }
}

impl<M: CpuModel> fmt::Debug for SimulationSession<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationSession")
            .field("id", &self.id)
            .field("image_words", &self.image.len_words())
            .field("subscriptions", &self.subscriptions.len())
            .field("counters", &self.counters)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
