//! Hardware-free stand-ins for the GPIO block and the pulse generator.
//!
//! Both record what they are asked to do into a shared [`SimTrace`], which
//! makes the exact order of pin writes and pulses observable. Useful for
//! tests and for dry runs on machines that are not a Raspberry Pi.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::gpio::GpioBits;
use crate::gpio::GpioPort;
use crate::gpio::VALID_BITS;
use crate::pulser::PinPulser;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimEvent {
    Set(GpioBits),
    Clear(GpioBits),
    PulseStart(usize),
    PulseFinished,
}

/// Shared, append-only event log.
#[derive(Clone, Debug, Default)]
pub struct SimTrace {
    events: Arc<Mutex<Vec<SimEvent>>>,
    limit: Option<usize>,
}

impl SimTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop recording after `limit` events. A running refresh thread produces
    /// events forever.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Arc::default(),
            limit: Some(limit),
        }
    }

    pub fn record(&self, event: SimEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if self.limit.is_none_or(|limit| events.len() < limit) {
            events.push(event);
        }
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Handle on the simulated pin levels, kept by a test after the
/// [`SimulatedGpio`] has been moved into a matrix.
#[derive(Clone, Debug, Default)]
pub struct SimulatedPins {
    levels: Arc<AtomicU64>,
}

impl SimulatedPins {
    pub fn levels(&self) -> GpioBits {
        self.levels.load(Ordering::Relaxed)
    }

    /// Drive external signals onto pins, as a button would.
    pub fn drive(&self, bits: GpioBits, high: bool) {
        if high {
            self.levels.fetch_or(bits, Ordering::Relaxed);
        } else {
            self.levels.fetch_and(!bits, Ordering::Relaxed);
        }
    }
}

/// [`GpioPort`] backed by memory.
#[derive(Debug)]
pub struct SimulatedGpio {
    pins: SimulatedPins,
    trace: Option<SimTrace>,
    output_bits: GpioBits,
    input_bits: GpioBits,
    reserved_bits: GpioBits,
}

impl Default for SimulatedGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self {
            pins: SimulatedPins::default(),
            trace: None,
            output_bits: 0,
            input_bits: 0,
            reserved_bits: 0,
        }
    }

    pub fn with_trace(mut self, trace: SimTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn pins(&self) -> SimulatedPins {
        self.pins.clone()
    }

    pub fn output_bits(&self) -> GpioBits {
        self.output_bits
    }

    pub fn reserved_bits(&self) -> GpioBits {
        self.reserved_bits
    }

    fn available(&self, bits: GpioBits) -> GpioBits {
        bits & VALID_BITS & !(self.output_bits | self.input_bits | self.reserved_bits)
    }

    fn record(&self, event: SimEvent) {
        if let Some(trace) = &self.trace {
            trace.record(event);
        }
    }
}

impl GpioPort for SimulatedGpio {
    fn init_outputs(&mut self, outputs: GpioBits) -> GpioBits {
        let outputs = self.available(outputs);
        self.output_bits |= outputs;
        outputs
    }

    fn request_inputs(&mut self, inputs: GpioBits) -> GpioBits {
        let inputs = self.available(inputs);
        self.input_bits |= inputs;
        inputs
    }

    fn reserve_as_inputs(&mut self, pins: GpioBits) {
        self.reserved_bits |= pins & VALID_BITS & !self.output_bits;
    }

    fn set_bits(&mut self, value: GpioBits) {
        if value != 0 {
            self.record(SimEvent::Set(value));
            self.pins
                .levels
                .fetch_or(value & self.output_bits, Ordering::Relaxed);
        }
    }

    fn clear_bits(&mut self, value: GpioBits) {
        if value != 0 {
            self.record(SimEvent::Clear(value));
            self.pins
                .levels
                .fetch_and(!(value & self.output_bits), Ordering::Relaxed);
        }
    }

    fn read(&self) -> GpioBits {
        self.pins.levels() & self.input_bits
    }
}

/// [`PinPulser`] that only records pulses.
#[derive(Debug, Default)]
pub struct SimulatedPulser {
    trace: Option<SimTrace>,
    in_flight: bool,
}

impl SimulatedPulser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace(mut self, trace: SimTrace) -> Self {
        self.trace = Some(trace);
        self
    }
}

impl PinPulser for SimulatedPulser {
    fn send_pulse(&mut self, _io: &mut dyn GpioPort, plane: usize) {
        if let Some(trace) = &self.trace {
            trace.record(SimEvent::PulseStart(plane));
        }
        self.in_flight = true;
    }

    fn wait_pulse_finished(&mut self) {
        if self.in_flight {
            if let Some(trace) = &self.trace {
                trace.record(SimEvent::PulseFinished);
            }
            self.in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::gpio_bit;

    #[test]
    fn outputs_are_granted_once() {
        let mut io = SimulatedGpio::new();
        assert_eq!(io.init_outputs(gpio_bit(3) | gpio_bit(30)), gpio_bit(3));
        assert_eq!(io.init_outputs(gpio_bit(3)), 0);
        assert_eq!(io.request_inputs(gpio_bit(3) | gpio_bit(5)), gpio_bit(5));
    }

    #[test]
    fn reserved_pins_are_not_handed_out() {
        let mut io = SimulatedGpio::new();
        io.reserve_as_inputs(gpio_bit(4));
        assert_eq!(io.init_outputs(gpio_bit(4) | gpio_bit(18)), gpio_bit(18));
        assert_eq!(io.reserved_bits(), gpio_bit(4));
    }

    #[test]
    fn inputs_follow_driven_levels() {
        let mut io = SimulatedGpio::new();
        io.request_inputs(gpio_bit(7));
        let pins = io.pins();
        pins.drive(gpio_bit(7) | gpio_bit(8), true);
        assert_eq!(io.read(), gpio_bit(7));
        pins.drive(gpio_bit(7), false);
        assert_eq!(io.read(), 0);
    }

    #[test]
    fn masked_write_records_both_halves() {
        let trace = SimTrace::new();
        let mut io = SimulatedGpio::new().with_trace(trace.clone());
        io.init_outputs(0b1111);
        io.write_masked_bits(0b0101, 0b0011);
        assert_eq!(trace.events(), vec![SimEvent::Clear(0b0010), SimEvent::Set(0b0001)]);
        assert_eq!(io.pins().levels(), 0b0001);
    }

    #[test]
    fn pulser_only_finishes_started_pulses() {
        let trace = SimTrace::with_limit(2);
        let mut io = SimulatedGpio::new();
        let mut pulser = SimulatedPulser::new().with_trace(trace.clone());
        pulser.wait_pulse_finished();
        pulser.send_pulse(&mut io, 3);
        pulser.wait_pulse_finished();
        pulser.send_pulse(&mut io, 4);
        assert_eq!(trace.events(), vec![SimEvent::PulseStart(3), SimEvent::PulseFinished]);
    }
}
