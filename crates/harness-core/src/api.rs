use core::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::fault::CpuFault;
use crate::image::{BinaryImage, DEFAULT_MAX_IMAGE_BYTES, WORD_BYTES};
use crate::scheduler::BurstToken;

/// Default wall-clock budget of one burst (one ~60 Hz frame).
pub const DEFAULT_BURST_WALL_CLOCK: Duration = Duration::from_millis(16);

/// Default instruction cap of one burst.
pub const DEFAULT_BURST_MAX_INSTRUCTIONS: u32 = 80_000;

/// Default minimum spacing between telemetry snapshots.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Digital pin 7 on an `ATmega328P` board.
pub const DEFAULT_LED_PIN: PinId = PinId::new('D', 7);

/// Signal name bound to [`DEFAULT_LED_PIN`] by default.
pub const DEFAULT_LED_SIGNAL: &str = "led";

/// One I/O line, addressed by port letter and bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PinId {
    port: char,
    bit: u8,
}

impl PinId {
    /// Creates a pin identifier.
    #[must_use]
    pub const fn new(port: char, bit: u8) -> Self {
        Self { port, bit }
    }

    /// Port letter, e.g. `'D'`.
    #[must_use]
    pub const fn port(self) -> char {
        self.port
    }

    /// Bit within the port.
    #[must_use]
    pub const fn bit(self) -> u8 {
        self.bit
    }

    /// Returns true when the port is an uppercase letter and the bit fits a byte-wide port.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.port.is_ascii_uppercase() && self.bit < 8
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}{}", self.port, self.bit)
    }
}

/// Logic state reported by the CPU model for one pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum PinLevel {
    /// Output driven low.
    #[default]
    Low,
    /// Output driven high.
    High,
    /// Floating input.
    Input,
    /// Input with pull-up enabled.
    InputPullUp,
}

impl PinLevel {
    /// Decodes the numeric pin state used by JavaScript AVR models.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Low),
            1 => Some(Self::High),
            2 => Some(Self::Input),
            3 => Some(Self::InputPullUp),
            _ => None,
        }
    }

    /// Only a driven-high output lights an indicator.
    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, Self::High)
    }
}

/// Handle returned by [`CpuModel::add_pin_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ListenerId(u32);

impl ListenerId {
    /// Wraps a model-assigned listener number.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the model-assigned listener number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Callback invoked by the CPU model with the new level of a pin.
pub type PinListener = Box<dyn FnMut(PinLevel)>;

/// Virtual CPU model stepped by the scheduler.
///
/// Implementations own instruction semantics, memory and peripheral timing.
/// The harness only steps them and watches pins.
pub trait CpuModel {
    /// Executes exactly one instruction.
    ///
    /// # Errors
    ///
    /// Returns [`CpuFault`] when the instruction cannot execute. The model is
    /// not stepped again after a fault.
    fn step(&mut self) -> Result<(), CpuFault>;

    /// Advances peripheral and timer state by one unit.
    fn tick(&mut self);

    /// Registers `listener` for level changes on `pin`.
    fn add_pin_listener(&mut self, pin: PinId, listener: PinListener) -> ListenerId;

    /// Unregisters a listener. Returns false when `id` was not registered.
    fn remove_pin_listener(&mut self, id: ListenerId) -> bool;

    /// Reads the current level of `pin`.
    fn pin_level(&self, pin: PinId) -> PinLevel;
}

/// Builds CPU models from program images.
pub trait CpuFactory {
    /// Model type produced by this factory.
    type Model: CpuModel;

    /// Creates a model with `image` loaded into program memory.
    ///
    /// # Errors
    ///
    /// Returns [`CpuFault`] when the model cannot hold or accept the image.
    fn construct(&mut self, image: &BinaryImage) -> Result<Self::Model, CpuFault>;
}

/// Host redraw-cadence primitive.
///
/// The host calls back into the controller with the token once per requested
/// frame. Cancelling is best effort: a token that still fires after
/// cancellation is rejected by the scheduler.
pub trait FrameHost {
    /// Queues one burst for the next frame.
    fn request_frame(&mut self, token: BurstToken);

    /// Withdraws a queued burst.
    fn cancel_frame(&mut self, token: BurstToken);
}

/// Per-burst pacing limits; whichever is hit first ends the burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BurstBudget {
    /// Wall-clock time one burst may run.
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub wall_clock: Duration,
    /// Instructions one burst may execute.
    pub max_instructions: u32,
}

impl Default for BurstBudget {
    fn default() -> Self {
        Self {
            wall_clock: DEFAULT_BURST_WALL_CLOCK,
            max_instructions: DEFAULT_BURST_MAX_INSTRUCTIONS,
        }
    }
}

/// Named logical signal fed by one pin.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SignalBinding {
    /// Signal name shown to the presentation layer.
    pub name: String,
    /// Pin watched for the signal.
    pub pin: PinId,
}

impl SignalBinding {
    /// Creates a binding.
    #[must_use]
    pub fn new(name: impl Into<String>, pin: PinId) -> Self {
        Self {
            name: name.into(),
            pin,
        }
    }
}

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HarnessConfig {
    /// Burst pacing limits.
    pub burst: BurstBudget,
    /// Minimum spacing between telemetry snapshots.
    #[cfg_attr(feature = "serde", serde(with = "duration_ms"))]
    pub sample_interval: Duration,
    /// Program memory size images must fit in.
    pub max_image_bytes: usize,
    /// Watched signals; the first one drives the indicator.
    pub watch: Vec<SignalBinding>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            burst: BurstBudget::default(),
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            watch: vec![SignalBinding::new(DEFAULT_LED_SIGNAL, DEFAULT_LED_PIN)],
        }
    }
}

impl HarnessConfig {
    /// Checks that every limit is usable.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.burst.wall_clock.is_zero() {
            return Err(ConfigError::ZeroWallClock);
        }
        if self.burst.max_instructions == 0 {
            return Err(ConfigError::ZeroInstructionBudget);
        }
        if self.sample_interval.is_zero() {
            return Err(ConfigError::ZeroSampleInterval);
        }
        if self.max_image_bytes == 0 {
            return Err(ConfigError::ZeroImageLimit);
        }
        if !self.max_image_bytes.is_multiple_of(WORD_BYTES) {
            return Err(ConfigError::UnalignedImageLimit(self.max_image_bytes));
        }
        for (index, binding) in self.watch.iter().enumerate() {
            if !binding.pin.is_valid() {
                return Err(ConfigError::InvalidPin(binding.pin));
            }
            if self.watch[..index].iter().any(|prior| prior.name == binding.name) {
                return Err(ConfigError::DuplicateSignal(binding.name.clone()));
            }
        }
        Ok(())
    }

    /// Binding that drives the presentation indicator.
    #[must_use]
    pub fn indicator(&self) -> Option<&SignalBinding> {
        self.watch.first()
    }
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Burst wall-clock budget is zero.
    #[error("burst wall-clock budget must be non-zero")]
    ZeroWallClock,
    /// Burst instruction cap is zero.
    #[error("burst instruction budget must be non-zero")]
    ZeroInstructionBudget,
    /// Telemetry sampling interval is zero.
    #[error("sample interval must be non-zero")]
    ZeroSampleInterval,
    /// Image size limit is zero.
    #[error("image size limit must be non-zero")]
    ZeroImageLimit,
    /// Image size limit does not cover a whole number of flash words.
    #[error("image size limit of {0} bytes is not a whole number of words")]
    UnalignedImageLimit(usize),
    /// Watched pin is not a valid port/bit pair.
    #[error("invalid pin {0}")]
    InvalidPin(PinId),
    /// Two watched signals share a name.
    #[error("signal {0:?} is bound more than once")]
    DuplicateSignal(String),
}

#[cfg(feature = "serde")]
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ConfigError, HarnessConfig, PinId, PinLevel, SignalBinding, DEFAULT_LED_PIN,
        DEFAULT_LED_SIGNAL,
    };
    use std::time::Duration;

    #[test]
    fn default_config_watches_led_on_pd7() {
        let config = HarnessConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.burst.wall_clock, Duration::from_millis(16));
        assert_eq!(config.burst.max_instructions, 80_000);
        assert_eq!(config.sample_interval, Duration::from_millis(100));
        let indicator = config.indicator().expect("default indicator");
        assert_eq!(indicator.name, DEFAULT_LED_SIGNAL);
        assert_eq!(indicator.pin.to_string(), "PD7");
    }

    #[test]
    fn only_driven_high_is_high() {
        assert!(PinLevel::High.is_high());
        assert!(!PinLevel::InputPullUp.is_high());
        assert_eq!(PinLevel::from_u8(3), Some(PinLevel::InputPullUp));
        assert_eq!(PinLevel::from_u8(4), None);
    }

    #[test]
    fn validate_rejects_zero_budgets_and_duplicates() {
        let mut config = HarnessConfig::default();
        config.burst.max_instructions = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroInstructionBudget));

        let config = HarnessConfig {
            max_image_bytes: 0x7FFF,
            ..HarnessConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnalignedImageLimit(0x7FFF))
        );

        let mut config = HarnessConfig::default();
        config.watch.push(SignalBinding::new("led", PinId::new('B', 5)));
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateSignal("led".to_owned()))
        );
    }
}
