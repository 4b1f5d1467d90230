//! Lifecycle controller: the single owner of harness state.
//!
//! Transitions:
//!
//! - `Idle | Stopped --start--> Compiling`
//! - `Compiling --compile ok, image ok, model ok--> Running`
//! - `Compiling --any failure--> Error`
//! - `Running --stop--> Stopped`
//! - `Running --cpu fault--> Error`
//! - `any --reset--> Idle`
//!
//! `start` is ignored in `Compiling`, `Running` and `Error`. `stop` and
//! `reset` received in `Compiling` are held and applied once the compile
//! settles; a held reset replaces a held stop. Every edge out of `Running`
//! goes through one teardown routine that cancels the queued burst, releases
//! all pin subscriptions and drops the session.

use log::{debug, info, trace, warn};

use crate::api::{ConfigError, CpuFactory, FrameHost, HarnessConfig};
use crate::compiler::{self, CompileRequest, CompileTicket, CompilerService, StaleTicket};
use crate::fault::HarnessError;
use crate::image;
use crate::observer::Signals;
use crate::scheduler::{BurstExit, BurstToken, Continuation, Scheduler, TokenSource};
use crate::state::{LifecycleState, SessionId, SimulationSession};
use crate::telemetry::{SamplingPolicy, TelemetrySnapshot};
use crate::timing::Clock;
use crate::view::StatusView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    Stop,
    Reset,
}

#[derive(Debug, Clone, Copy)]
struct PendingCompile {
    ticket: CompileTicket,
    deferred: Option<Deferred>,
}

/// Drives one simulation at a time through compile, load, run and teardown.
pub struct Controller<F, H, C>
where
    F: CpuFactory,
    H: FrameHost,
    C: Clock,
{
    config: HarnessConfig,
    factory: F,
    host: H,
    clock: C,
    policy: SamplingPolicy,
    state: LifecycleState,
    session: Option<SimulationSession<F::Model>>,
    signals: Signals,
    snapshot: Option<TelemetrySnapshot>,
    retired_cycles: u64,
    tokens: TokenSource,
    pending: Option<PendingCompile>,
    next_ticket: u64,
    next_session: u64,
}

impl<F, H, C> Controller<F, H, C>
where
    F: CpuFactory,
    H: FrameHost,
    C: Clock,
{
    /// Creates an idle controller.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `config` fails validation.
    pub fn new(config: HarnessConfig, factory: F, host: H, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let signals = Signals::new();
        for binding in &config.watch {
            signals.declare(&binding.name);
        }
        Ok(Self {
            policy: SamplingPolicy::new(config.sample_interval),
            config,
            factory,
            host,
            clock,
            state: LifecycleState::Idle,
            session: None,
            signals,
            snapshot: None,
            retired_cycles: 0,
            tokens: TokenSource::new(),
            pending: None,
            next_ticket: 0,
            next_session: 0,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> &LifecycleState {
        &self.state
    }

    /// Configuration in force.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Whether a simulation session exists.
    #[must_use]
    pub const fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// The live session, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&SimulationSession<F::Model>> {
        self.session.as_ref()
    }

    /// Steps executed by the live session, or by the last one until reset.
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.session
            .as_ref()
            .map_or(self.retired_cycles, |session| session.counters().cycle_count)
    }

    /// Latest telemetry snapshot.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&TelemetrySnapshot> {
        self.snapshot.as_ref()
    }

    /// Signal board read by the presentation layer.
    #[must_use]
    pub const fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Ticket of the compile awaiting an answer.
    #[must_use]
    pub fn pending_ticket(&self) -> Option<CompileTicket> {
        self.pending.map(|pending| pending.ticket)
    }

    /// Frame host.
    #[must_use]
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Mutable frame host, for hosts that queue frames internally.
    pub const fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Presentation outputs for the current instant.
    #[must_use]
    pub fn view(&self) -> StatusView {
        StatusView::compose(
            &self.state,
            self.cycle_count(),
            self.snapshot.as_ref(),
            &self.signals,
            self.config.indicator().map(|binding| binding.name.as_str()),
        )
    }

    /// Begins a compile of `source`.
    ///
    /// Returns the request to forward to the compiler service, or `None`
    /// when the current state does not accept a start.
    pub fn start(&mut self, source: &str) -> Option<CompileRequest> {
        if !self.state.accepts_start() {
            match &self.state {
                LifecycleState::Error(err) => warn!("start ignored until reset: {err}"),
                other => debug!("start ignored while {}", other.status_text()),
            }
            return None;
        }

        self.teardown();
        self.retired_cycles = 0;
        self.snapshot = None;
        self.next_ticket += 1;
        let ticket = CompileTicket::new(self.next_ticket);
        self.pending = Some(PendingCompile {
            ticket,
            deferred: None,
        });
        self.state = LifecycleState::Compiling;
        info!("compile {ticket} requested ({} bytes of source)", source.len());
        Some(CompileRequest {
            ticket,
            source: source.to_owned(),
        })
    }

    /// Settles the pending compile with the compiler's image text or error.
    ///
    /// On success the image is loaded, a model constructed, the watched
    /// signals attached and the first burst queued. Any failure lands in
    /// [`LifecycleState::Error`]. A stop or reset held during the compile is
    /// applied afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`StaleTicket`] when `ticket` is not the pending compile; the
    /// controller is left untouched.
    pub fn complete_compile(
        &mut self,
        ticket: CompileTicket,
        outcome: Result<String, HarnessError>,
    ) -> Result<(), StaleTicket> {
        let deferred = match self.pending {
            Some(pending) if pending.ticket == ticket => pending.deferred,
            _ => {
                warn!("compile {ticket} settled but is not pending");
                return Err(StaleTicket(ticket));
            }
        };
        self.pending = None;

        if let Err(err) = outcome.and_then(|hex| self.launch(&hex)) {
            self.fail(err);
        }

        match deferred {
            Some(Deferred::Reset) => self.reset(),
            Some(Deferred::Stop) => self.stop(),
            None => {}
        }
        Ok(())
    }

    /// Starts and settles a compile through a blocking `service`.
    ///
    /// Returns false when the start was not accepted.
    pub fn start_with<S>(&mut self, source: &str, service: &mut S) -> bool
    where
        S: CompilerService + ?Sized,
    {
        let Some(request) = self.start(source) else {
            return false;
        };
        let outcome = compiler::settle(service, &request);
        self.complete_compile(request.ticket, outcome).is_ok()
    }

    /// Stops a running session. Held while compiling; ignored otherwise.
    pub fn stop(&mut self) {
        match self.state {
            LifecycleState::Compiling => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.deferred.get_or_insert(Deferred::Stop);
                }
                debug!("stop held until the compile settles");
            }
            LifecycleState::Running => {
                self.teardown();
                self.state = LifecycleState::Stopped;
                info!("stopped after {} cycles", self.retired_cycles);
            }
            _ => debug!("stop ignored while {}", self.state.status_text()),
        }
    }

    /// Tears down any session and returns to idle with zeroed telemetry.
    /// Held while compiling.
    pub fn reset(&mut self) {
        if matches!(self.state, LifecycleState::Compiling) {
            if let Some(pending) = self.pending.as_mut() {
                pending.deferred = Some(Deferred::Reset);
            }
            debug!("reset held until the compile settles");
            return;
        }
        self.teardown();
        self.retired_cycles = 0;
        self.snapshot = None;
        self.signals.clear();
        self.state = LifecycleState::Idle;
        info!("reset to idle");
    }

    /// Runs the burst queued under `token` and queues the next one.
    ///
    /// Tokens that are stale, already used or cancelled run nothing.
    pub fn run_frame(&mut self, token: BurstToken) -> Continuation {
        let Some(session) = self.session.as_mut() else {
            debug!("burst {token} ignored: no session");
            return Continuation::Cancelled;
        };
        if !session.scheduler_mut().accept(token) {
            warn!("burst {token} ignored: not the queued burst");
            return Continuation::Cancelled;
        }

        let report = session.run_burst(&self.clock);
        if let BurstExit::Faulted(fault) = report.exit {
            let err = HarnessError::from(fault);
            self.fail(err.clone());
            return Continuation::Faulted(err);
        }

        let now = self.clock.now();
        let counters = session.counters_mut();
        if let Some(snapshot) = self.policy.sample(
            now,
            counters.cycle_count,
            counters.started_at,
            counters.last_sample_at,
        ) {
            counters.last_sample_at = now;
            trace!(
                "{} cycles in {}, {:.0} ips",
                snapshot.cycle_count,
                snapshot.uptime_text(),
                snapshot.instructions_per_second
            );
            self.snapshot = Some(snapshot);
        }

        match session.scheduler_mut().issue(&mut self.tokens) {
            Some(next) => {
                self.host.request_frame(next);
                Continuation::Continue(next)
            }
            None => Continuation::Cancelled,
        }
    }

    fn launch(&mut self, hex: &str) -> Result<(), HarnessError> {
        let image = image::load_with_limit(hex, self.config.max_image_bytes)?;
        let cpu = self.factory.construct(&image)?;

        self.next_session += 1;
        let id = SessionId::new(self.next_session);
        let words = image.len_words();
        let mut session = SimulationSession::open(
            id,
            cpu,
            image,
            &self.config.watch,
            &self.signals,
            Scheduler::new(self.config.burst),
            self.clock.now(),
        );
        if let Some(token) = session.scheduler_mut().issue(&mut self.tokens) {
            self.host.request_frame(token);
        }
        self.session = Some(session);
        self.state = LifecycleState::Running;
        info!("{id} running a {words}-word image");
        Ok(())
    }

    fn fail(&mut self, err: HarnessError) {
        self.teardown();
        warn!("{:?} error: {err}", err.class());
        self.state = LifecycleState::Error(err);
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            self.retired_cycles = session.close(&mut self.host).cycle_count;
        }
    }
}
