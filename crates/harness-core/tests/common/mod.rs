//! Shared doubles for the harness integration suites.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use harness_core::{
    BinaryImage, BuildRequest, BuildResponse, BurstToken, CompilerService, Continuation,
    Controller, CpuFactory, CpuFault, CpuModel, FrameHost, HarnessConfig, ListenerId, ManualClock,
    PinId, PinLevel, PinListener,
};
use thiserror::Error;

/// Reset vector table from a compiled blink sketch.
pub const BLINK_HEX: &str = ":100000000C9434000C944E000C944E000C944E0052\n:00000001FF\n";

/// Step cost that models a 16 MHz part (rounded down to whole nanoseconds).
pub const STEP_COST_16MHZ: Duration = Duration::from_nanos(62);

/// Routes harness logs to the test writer once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Observations shared between a factory, its models and the test body.
#[derive(Debug, Default)]
pub struct Probe {
    pub constructed: Cell<u32>,
    pub steps: Cell<u64>,
    pub ticks: Cell<u64>,
    pub live_listeners: Cell<u32>,
    pub notifications: Cell<u64>,
}

/// Behaviour of models built by [`FakeFactory`].
#[derive(Debug, Clone, Copy)]
pub struct CpuPlan {
    pub step_cost: Duration,
    pub toggle_every: Option<u64>,
    pub fault_at: Option<u64>,
}

impl Default for CpuPlan {
    fn default() -> Self {
        Self {
            step_cost: STEP_COST_16MHZ,
            toggle_every: None,
            fault_at: None,
        }
    }
}

/// CPU double that advances a shared clock per step and can drive one pin.
pub struct FakeCpu {
    clock: ManualClock,
    plan: CpuPlan,
    probe: Rc<Probe>,
    steps: u64,
    level: PinLevel,
    listeners: Vec<(ListenerId, PinId, PinListener)>,
    next_listener: u32,
}

impl FakeCpu {
    pub fn new(clock: &ManualClock, plan: CpuPlan, probe: &Rc<Probe>) -> Self {
        Self {
            clock: clock.clone(),
            plan,
            probe: Rc::clone(probe),
            steps: 0,
            level: PinLevel::Low,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub const fn steps(&self) -> u64 {
        self.steps
    }

    pub fn drive(&mut self, level: PinLevel) {
        self.level = level;
        for (_, _, listener) in &mut self.listeners {
            self.probe.notifications.set(self.probe.notifications.get() + 1);
            listener(level);
        }
    }
}

impl CpuModel for FakeCpu {
    fn step(&mut self) -> Result<(), CpuFault> {
        if self.plan.fault_at == Some(self.steps) {
            return Err(CpuFault::invalid_opcode(format!(
                "illegal opcode 0xffff at step {}",
                self.steps
            )));
        }
        self.steps += 1;
        self.probe.steps.set(self.probe.steps.get() + 1);
        self.clock.advance(self.plan.step_cost);
        if let Some(every) = self.plan.toggle_every {
            if self.steps % every == 0 {
                let next = if self.level.is_high() {
                    PinLevel::Low
                } else {
                    PinLevel::High
                };
                self.drive(next);
            }
        }
        Ok(())
    }

    fn tick(&mut self) {
        self.probe.ticks.set(self.probe.ticks.get() + 1);
    }

    fn add_pin_listener(&mut self, pin: PinId, listener: PinListener) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId::new(self.next_listener);
        self.listeners.push((id, pin, listener));
        self.probe.live_listeners.set(self.probe.live_listeners.get() + 1);
        id
    }

    fn remove_pin_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(known, _, _)| *known != id);
        let removed = before != self.listeners.len();
        if removed {
            self.probe.live_listeners.set(self.probe.live_listeners.get() - 1);
        }
        removed
    }

    fn pin_level(&self, _pin: PinId) -> PinLevel {
        self.level
    }
}

/// Factory producing [`FakeCpu`] models, or refusing to.
pub struct FakeFactory {
    pub clock: ManualClock,
    pub plan: CpuPlan,
    pub probe: Rc<Probe>,
    pub refuse: Option<CpuFault>,
}

impl CpuFactory for FakeFactory {
    type Model = FakeCpu;

    fn construct(&mut self, _image: &BinaryImage) -> Result<FakeCpu, CpuFault> {
        if let Some(fault) = &self.refuse {
            return Err(fault.clone());
        }
        self.probe.constructed.set(self.probe.constructed.get() + 1);
        Ok(FakeCpu::new(&self.clock, self.plan, &self.probe))
    }
}

/// Frame host that queues tokens until the test fires them.
///
/// Cancelled tokens stay queued, modelling a callback the host already
/// scheduled.
#[derive(Debug, Default)]
pub struct ManualHost {
    pub queued: VecDeque<BurstToken>,
    pub cancelled: Vec<BurstToken>,
}

impl FrameHost for ManualHost {
    fn request_frame(&mut self, token: BurstToken) {
        self.queued.push_back(token);
    }

    fn cancel_frame(&mut self, token: BurstToken) {
        self.cancelled.push(token);
    }
}

/// Transport failure reported by [`ScriptedCompiler`].
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Compiler that replays canned answers in order.
#[derive(Debug, Default)]
pub struct ScriptedCompiler {
    pub answers: VecDeque<Result<BuildResponse, TransportError>>,
    pub seen: Vec<BuildRequest>,
}

impl ScriptedCompiler {
    pub fn hex(hex: &str) -> Self {
        Self::answering(Ok(BuildResponse {
            hex: Some(hex.to_owned()),
            stderr: None,
        }))
    }

    pub fn stderr(message: &str) -> Self {
        Self::answering(Ok(BuildResponse {
            hex: None,
            stderr: Some(message.to_owned()),
        }))
    }

    pub fn answering(answer: Result<BuildResponse, TransportError>) -> Self {
        Self {
            answers: VecDeque::from([answer]),
            seen: Vec::new(),
        }
    }

    pub fn then(mut self, answer: Result<BuildResponse, TransportError>) -> Self {
        self.answers.push_back(answer);
        self
    }
}

impl CompilerService for ScriptedCompiler {
    type Error = TransportError;

    fn build(&mut self, request: &BuildRequest) -> Result<BuildResponse, TransportError> {
        self.seen.push(request.clone());
        self.answers
            .pop_front()
            .unwrap_or_else(|| Err(TransportError("no scripted answer".to_owned())))
    }
}

pub type TestController = Controller<FakeFactory, ManualHost, ManualClock>;

/// Everything a lifecycle test needs to drive and inspect a controller.
pub struct Rig {
    pub controller: TestController,
    pub clock: ManualClock,
    pub probe: Rc<Probe>,
}

impl Rig {
    pub fn new(plan: CpuPlan) -> Self {
        Self::with_config(HarnessConfig::default(), plan)
    }

    pub fn with_config(config: HarnessConfig, plan: CpuPlan) -> Self {
        init_logging();
        let clock = ManualClock::new();
        let probe = Rc::new(Probe::default());
        let factory = FakeFactory {
            clock: clock.clone(),
            plan,
            probe: Rc::clone(&probe),
            refuse: None,
        };
        let controller = Controller::new(config, factory, ManualHost::default(), clock.clone())
            .expect("valid test config");
        Self {
            controller,
            clock,
            probe,
        }
    }

    /// Starts and settles a compile that returns `hex`.
    pub fn launch(&mut self, hex: &str) {
        let mut compiler = ScriptedCompiler::hex(hex);
        assert!(self.controller.start_with("void setup() {}", &mut compiler));
    }

    /// Fires the oldest queued frame, if any.
    pub fn fire(&mut self) -> Option<Continuation> {
        let token = self.controller.host_mut().queued.pop_front()?;
        Some(self.controller.run_frame(token))
    }

    /// Fires up to `frames` queued frames and returns how many ran.
    pub fn fire_n(&mut self, frames: usize) -> usize {
        (0..frames).take_while(|_| self.fire().is_some()).count()
    }
}

/// Encodes one Intel HEX record with a valid checksum.
pub fn record(kind: u8, offset: u16, data: &[u8]) -> String {
    let mut bytes = vec![
        u8::try_from(data.len()).expect("record payload fits in a byte"),
    ];
    bytes.extend_from_slice(&offset.to_be_bytes());
    bytes.push(kind);
    bytes.extend_from_slice(data);
    let checksum = bytes
        .iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte))
        .wrapping_neg();
    bytes.push(checksum);
    let digits: String = bytes.iter().map(|byte| format!("{byte:02X}")).collect();
    format!(":{digits}")
}

/// Encodes `words` little-endian from address zero, 16 bytes per record.
pub fn hex_image(words: &[u16]) -> String {
    let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
    let mut text = String::new();
    for (index, chunk) in bytes.chunks(16).enumerate() {
        let offset = u16::try_from(index * 16).expect("image fits in 64 KiB");
        text.push_str(&record(0x00, offset, chunk));
        text.push('\n');
    }
    text.push_str(&record(0x01, 0, &[]));
    text.push('\n');
    text
}
