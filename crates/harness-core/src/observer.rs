//! Peripheral observer: republishes pin changes as named signals.
//!
//! The CPU model owns the listener closures. Each closure checks a shared
//! liveness flag before touching the signal board, so a listener the model
//! keeps calling after [`PinSubscription::release`] has no effect.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::debug;

use crate::api::{CpuModel, ListenerId, PinId, PinLevel, SignalBinding};

/// Last published level of one named signal.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SignalState {
    name: String,
    level: PinLevel,
    changes: u64,
}

impl SignalState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            level: PinLevel::Low,
            changes: 0,
        }
    }

    /// Signal name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last published level.
    #[must_use]
    pub const fn level(&self) -> PinLevel {
        self.level
    }

    /// Whether the signal reads as on.
    #[must_use]
    pub const fn is_high(&self) -> bool {
        self.level.is_high()
    }

    /// Number of level changes published since the last clear.
    #[must_use]
    pub const fn changes(&self) -> u64 {
        self.changes
    }
}

/// Signal board shared between observer callbacks and readers.
///
/// Clones share state. Only observer callbacks and the controller write it.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    states: Rc<RefCell<Vec<SignalState>>>,
}

impl Signals {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the named signal.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<SignalState> {
        self.states
            .borrow()
            .iter()
            .find(|state| state.name == name)
            .cloned()
    }

    /// Returns the named signal's level.
    #[must_use]
    pub fn level(&self, name: &str) -> Option<PinLevel> {
        self.get(name).map(|state| state.level)
    }

    /// Copies every signal in declaration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SignalState> {
        self.states.borrow().clone()
    }

    /// Adds `name` at `Low` if absent.
    pub(crate) fn declare(&self, name: &str) {
        let mut states = self.states.borrow_mut();
        if !states.iter().any(|state| state.name == name) {
            states.push(SignalState::new(name));
        }
    }

    /// Stores `level`; returns true when it differs from the stored level.
    pub(crate) fn publish(&self, name: &str, level: PinLevel) -> bool {
        let mut states = self.states.borrow_mut();
        let index = states
            .iter()
            .position(|state| state.name == name)
            .unwrap_or_else(|| {
                states.push(SignalState::new(name));
                states.len() - 1
            });
        let state = &mut states[index];
        if state.level == level {
            return false;
        }
        state.level = level;
        state.changes += 1;
        true
    }

    /// Returns every signal to `Low` with no recorded changes.
    pub(crate) fn clear(&self) {
        for state in self.states.borrow_mut().iter_mut() {
            state.level = PinLevel::Low;
            state.changes = 0;
        }
    }
}

/// Live registration of one signal listener on a CPU model.
///
/// Dropping the handle disarms the callback. [`Self::release`] also removes
/// it from the model.
#[derive(Debug)]
pub struct PinSubscription {
    listener: ListenerId,
    pin: PinId,
    name: String,
    live: Rc<Cell<bool>>,
}

impl PinSubscription {
    /// Watched pin.
    #[must_use]
    pub const fn pin(&self) -> PinId {
        self.pin
    }

    /// Published signal name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Disarms the callback and unregisters it from `cpu`.
    pub fn release<M: CpuModel + ?Sized>(self, cpu: &mut M) {
        self.live.set(false);
        if !cpu.remove_pin_listener(self.listener) {
            debug!("listener {:?} for {} already gone", self.listener, self.pin);
        }
        debug!("released {} subscription on {}", self.name, self.pin);
    }
}

impl Drop for PinSubscription {
    fn drop(&mut self) {
        self.live.set(false);
    }
}

/// Subscribes `binding` on `cpu` and publishes the pin's current level.
pub fn attach<M: CpuModel + ?Sized>(
    cpu: &mut M,
    binding: &SignalBinding,
    signals: &Signals,
) -> PinSubscription {
    let live = Rc::new(Cell::new(true));
    signals.declare(&binding.name);
    signals.publish(&binding.name, cpu.pin_level(binding.pin));

    let listener = {
        let live = Rc::clone(&live);
        let signals = signals.clone();
        let name = binding.name.clone();
        Box::new(move |level: PinLevel| {
            if !live.get() {
                return;
            }
            if signals.publish(&name, level) {
                debug!("{name} {}", if level.is_high() { "on" } else { "off" });
            }
        })
    };

    let id = cpu.add_pin_listener(binding.pin, listener);
    debug!("attached {} to {}", binding.name, binding.pin);
    PinSubscription {
        listener: id,
        pin: binding.pin,
        name: binding.name.clone(),
        live,
    }
}
