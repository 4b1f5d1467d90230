use std::cell::Cell;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use harness_core::{
    BinaryImage, BuildRequest, BuildResponse, BurstToken, Clock, CompileTicket, Continuation,
    Controller, CpuFactory, CpuFault, CpuFaultKind, CpuModel, FrameHost, HarnessConfig,
    HarnessError, ListenerId, PinId, PinLevel, PinListener, WORD_BYTES,
};
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);

    /// CPU model implemented in JavaScript, e.g. a wrapper around avr8js.
    pub type JsCpu;

    #[wasm_bindgen(method, catch)]
    fn step(this: &JsCpu) -> Result<(), JsValue>;

    #[wasm_bindgen(method)]
    fn tick(this: &JsCpu);

    #[wasm_bindgen(method, js_name = pinLevel)]
    fn pin_level(this: &JsCpu, port: &str, bit: u8) -> u8;

    #[wasm_bindgen(method, js_name = addPinListener)]
    fn add_pin_listener(
        this: &JsCpu,
        port: &str,
        bit: u8,
        callback: &Closure<dyn FnMut(u8)>,
    ) -> u32;

    #[wasm_bindgen(method, js_name = removePinListener)]
    fn remove_pin_listener(this: &JsCpu, id: u32) -> bool;
}

macro_rules! console_log {
    ($($t:tt)*) => (log(&format!($($t)*)))
}

/// Forwards `log` records from the harness to the browser console.
struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            console_log!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

fn install_logger() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Info);
    }
}

/// Best-effort text for a thrown JavaScript value.
fn describe(err: &JsValue) -> String {
    err.as_string()
        .or_else(|| {
            err.dyn_ref::<js_sys::Error>()
                .map(|error| String::from(error.message()))
        })
        .unwrap_or_else(|| format!("{err:?}"))
}

fn port_name(pin: PinId) -> String {
    pin.port().to_string()
}

/// Adapts a [`JsCpu`] to [`CpuModel`], keeping each listener closure alive
/// until the listener is removed.
struct JsCpuModel {
    cpu: JsCpu,
    listeners: HashMap<u32, Closure<dyn FnMut(u8)>>,
}

impl CpuModel for JsCpuModel {
    fn step(&mut self) -> Result<(), CpuFault> {
        self.cpu
            .step()
            .map_err(|err| CpuFault::new(CpuFaultKind::Other, describe(&err)))
    }

    fn tick(&mut self) {
        self.cpu.tick();
    }

    fn add_pin_listener(&mut self, pin: PinId, mut listener: PinListener) -> ListenerId {
        let closure = Closure::wrap(Box::new(move |raw: u8| {
            if let Some(level) = PinLevel::from_u8(raw) {
                listener(level);
            }
        }) as Box<dyn FnMut(u8)>);
        let id = self
            .cpu
            .add_pin_listener(&port_name(pin), pin.bit(), &closure);
        self.listeners.insert(id, closure);
        ListenerId::new(id)
    }

    fn remove_pin_listener(&mut self, id: ListenerId) -> bool {
        let removed = self.cpu.remove_pin_listener(id.get());
        self.listeners.remove(&id.get()).is_some() || removed
    }

    fn pin_level(&self, pin: PinId) -> PinLevel {
        PinLevel::from_u8(self.cpu.pin_level(&port_name(pin), pin.bit())).unwrap_or_default()
    }
}

/// Builds [`JsCpuModel`]s by calling a JavaScript factory with a full flash
/// image as a `Uint16Array`.
struct JsCpuFactory {
    construct: js_sys::Function,
    flash_words: usize,
}

impl CpuFactory for JsCpuFactory {
    type Model = JsCpuModel;

    fn construct(&mut self, image: &BinaryImage) -> Result<JsCpuModel, CpuFault> {
        let flash = image.to_flash(self.flash_words).ok_or_else(|| {
            CpuFault::new(
                CpuFaultKind::Construction,
                format!(
                    "image of {} bytes at {:#06x} does not fit {} words of flash",
                    image.byte_len(),
                    image.base_address(),
                    self.flash_words
                ),
            )
        })?;
        let words = js_sys::Uint16Array::from(flash.as_slice());
        let cpu = self
            .construct
            .call1(&JsValue::NULL, &words.into())
            .map_err(|err| CpuFault::new(CpuFaultKind::Construction, describe(&err)))?;
        if cpu.is_null() || cpu.is_undefined() {
            return Err(CpuFault::new(
                CpuFaultKind::Construction,
                "CPU factory returned no model",
            ));
        }
        Ok(JsCpuModel {
            cpu: cpu.unchecked_into(),
            listeners: HashMap::new(),
        })
    }
}

/// Frame host that forwards tokens to JavaScript callbacks, typically
/// wrapping `requestAnimationFrame` and `cancelAnimationFrame`.
struct JsFrameHost {
    request: js_sys::Function,
    cancel: js_sys::Function,
}

impl FrameHost for JsFrameHost {
    fn request_frame(&mut self, token: BurstToken) {
        if let Err(err) = self.request.call1(&JsValue::NULL, &JsValue::from(token.get())) {
            console_log!("frame request {token} failed: {}", describe(&err));
        }
    }

    fn cancel_frame(&mut self, token: BurstToken) {
        if let Err(err) = self.cancel.call1(&JsValue::NULL, &JsValue::from(token.get())) {
            console_log!("frame cancel {token} failed: {}", describe(&err));
        }
    }
}

/// Monotonic clock over `performance.now()`, falling back to `Date.now()`.
struct PerformanceClock {
    performance: Option<web_sys::Performance>,
    latest: Cell<Duration>,
}

impl PerformanceClock {
    fn new() -> Self {
        Self {
            performance: web_sys::window().and_then(|window| window.performance()),
            latest: Cell::new(Duration::ZERO),
        }
    }
}

impl Clock for PerformanceClock {
    fn now(&self) -> Duration {
        let millis = self
            .performance
            .as_ref()
            .map_or_else(js_sys::Date::now, web_sys::Performance::now);
        let reading = Duration::try_from_secs_f64(millis / 1_000.0).unwrap_or_default();
        let latest = self.latest.get().max(reading);
        self.latest.set(latest);
        latest
    }
}

/// Compile work handed to JavaScript by [`WasmHarness::start`].
#[derive(Serialize, Deserialize)]
pub struct WasmCompileRequest {
    pub ticket: u64,
    pub body: BuildRequest,
}

/// JS-compatible version of [`Continuation`].
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WasmContinuation {
    Continue { token: u64 },
    Cancelled,
    Faulted { reason: String },
}

impl From<Continuation> for WasmContinuation {
    fn from(continuation: Continuation) -> Self {
        match continuation {
            Continuation::Continue(token) => Self::Continue { token: token.get() },
            Continuation::Cancelled => Self::Cancelled,
            Continuation::Faulted(err) => Self::Faulted {
                reason: err.to_string(),
            },
        }
    }
}

fn to_js_bigints<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let serializer =
        serde_wasm_bindgen::Serializer::new().serialize_large_number_types_as_bigints(true);
    Ok(value.serialize(&serializer)?)
}

/// Browser entry point: one harness driving one JavaScript CPU model.
#[wasm_bindgen]
pub struct WasmHarness {
    controller: Controller<JsCpuFactory, JsFrameHost, PerformanceClock>,
}

#[wasm_bindgen]
impl WasmHarness {
    /// Creates an idle harness.
    ///
    /// `construct_cpu(words: Uint16Array)` returns a CPU model object.
    /// `request_frame(token)` and `cancel_frame(token)` receive `BigInt`
    /// tokens; the host calls `frame(token)` when a requested frame fires.
    /// `config` is optional and uses millisecond durations.
    #[wasm_bindgen(constructor)]
    pub fn new(
        construct_cpu: js_sys::Function,
        request_frame: js_sys::Function,
        cancel_frame: js_sys::Function,
        config: JsValue,
    ) -> Result<Self, JsValue> {
        console_error_panic_hook::set_once();
        install_logger();

        let config: HarnessConfig = if config.is_undefined() || config.is_null() {
            HarnessConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config)?
        };
        let factory = JsCpuFactory {
            construct: construct_cpu,
            flash_words: config.max_image_bytes / WORD_BYTES,
        };
        let host = JsFrameHost {
            request: request_frame,
            cancel: cancel_frame,
        };
        let controller = Controller::new(config, factory, host, PerformanceClock::new())
            .map_err(|err| JsValue::from_str(&err.to_string()))?;
        console_log!("harness ready");
        Ok(Self { controller })
    }

    /// Sets the console log level (`error`, `warn`, `info`, `debug`, `trace`, `off`).
    #[wasm_bindgen(js_name = setLogLevel)]
    pub fn set_log_level(level: &str) -> Result<(), JsValue> {
        let filter = log::LevelFilter::from_str(level)
            .map_err(|_| JsValue::from_str(&format!("unknown log level {level:?}")))?;
        log::set_max_level(filter);
        Ok(())
    }

    /// Begins a compile. Returns `{ticket, body: {sketch}}` to post to the
    /// compiler, or `undefined` when the current state ignores a start.
    pub fn start(&mut self, source: &str) -> Result<JsValue, JsValue> {
        let Some(request) = self.controller.start(source) else {
            return Ok(JsValue::UNDEFINED);
        };
        to_js_bigints(&WasmCompileRequest {
            ticket: request.ticket.get(),
            body: request.body(),
        })
    }

    /// Settles a compile with the compiler's `{hex, stderr}` response.
    #[wasm_bindgen(js_name = completeCompile)]
    pub fn complete_compile(&mut self, ticket: u64, response: JsValue) -> Result<(), JsValue> {
        let response: BuildResponse = serde_wasm_bindgen::from_value(response)?;
        self.settle(ticket, response.into_outcome())
    }

    /// Settles a compile whose request never produced a response.
    #[wasm_bindgen(js_name = failCompile)]
    pub fn fail_compile(&mut self, ticket: u64, reason: &str) -> Result<(), JsValue> {
        self.settle(ticket, Err(HarnessError::TransportFailure(reason.to_owned())))
    }

    pub fn stop(&mut self) {
        self.controller.stop();
    }

    pub fn reset(&mut self) {
        self.controller.reset();
    }

    /// Runs the burst queued under `token`.
    /// Returns `{kind: "continue", token}`, `{kind: "cancelled"}` or
    /// `{kind: "faulted", reason}`.
    pub fn frame(&mut self, token: u64) -> Result<JsValue, JsValue> {
        let continuation = self.controller.run_frame(BurstToken::new(token));
        to_js_bigints(&WasmContinuation::from(continuation))
    }

    /// Returns the presentation view as a plain object.
    pub fn view(&self) -> Result<JsValue, JsValue> {
        Ok(serde_wasm_bindgen::to_value(&self.controller.view())?)
    }

    #[wasm_bindgen(js_name = cycleCount)]
    pub fn cycle_count(&self) -> u64 {
        self.controller.cycle_count()
    }

    fn settle(
        &mut self,
        ticket: u64,
        outcome: Result<String, HarnessError>,
    ) -> Result<(), JsValue> {
        self.controller
            .complete_compile(CompileTicket::new(ticket), outcome)
            .map_err(|stale| JsValue::from_str(&stale.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::WasmContinuation;
    use harness_core::{BurstToken, Continuation, CpuFault, HarnessError};

    #[test]
    fn continuation_serializes_with_kind_tag() {
        let continue_json =
            serde_json::to_value(WasmContinuation::from(Continuation::Continue(BurstToken::new(7))))
                .expect("serializable");
        assert_eq!(continue_json["kind"], "continue");
        assert_eq!(continue_json["token"], 7);

        let fault = HarnessError::from(CpuFault::invalid_opcode("bad opcode at 0x0040"));
        assert_eq!(
            WasmContinuation::from(Continuation::Faulted(fault)),
            WasmContinuation::Faulted {
                reason: "bad opcode at 0x0040".to_owned()
            }
        );
    }
}
