//! Bit-vector access to the GPIO pins.
//!
//! The hardware has separate "set" and "clear" registers that only affect the
//! bits written as one, so every mutation is a single store and never a
//! read-modify-write of the pin levels.

use std::sync::atomic::fence;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::warn;

use crate::platform::linux_has_module_loaded;
use crate::platform::Peripherals;

/// One bit per GPIO pin.
pub type GpioBits = u64;

/// Pins 0 to 27, the ones routed to the 40 pin header.
pub const VALID_BITS: GpioBits = (1 << 28) - 1;

const GPFSEL0: usize = 0x00 / 4;
const GPSET0: usize = 0x1C / 4;
const GPCLR0: usize = 0x28 / 4;
const GPLEV0: usize = 0x34 / 4;

/// Mask for a single pin.
pub const fn gpio_bit(pin: u32) -> GpioBits {
    1 << pin
}

/// Low level pin access as used by the refresh engine.
///
/// Implemented by the memory-mapped [`Gpio`] and by
/// [`SimulatedGpio`](crate::sim::SimulatedGpio) for running without hardware.
pub trait GpioPort: Send {
    /// Configure pins as outputs. Returns the subset that was granted; pins
    /// outside [`VALID_BITS`] or already in use are dropped.
    fn init_outputs(&mut self, outputs: GpioBits) -> GpioBits;

    /// Configure pins as inputs. Returns the subset that was granted.
    fn request_inputs(&mut self, inputs: GpioBits) -> GpioBits;

    /// Switch pins to input and keep them from being handed out later.
    fn reserve_as_inputs(&mut self, _pins: GpioBits) {}

    fn set_bits(&mut self, value: GpioBits);

    fn clear_bits(&mut self, value: GpioBits);

    /// Set the bits of `mask` to the corresponding bits of `value`, leaving
    /// everything outside `mask` untouched.
    fn write_masked_bits(&mut self, value: GpioBits, mask: GpioBits) {
        self.clear_bits(!value & mask);
        self.set_bits(value & mask);
    }

    /// Current pin levels.
    fn read(&self) -> GpioBits;
}

/// GPIO through the mapped BCM register block.
pub struct Gpio {
    peripherals: Arc<Peripherals>,
    slowdown: i32,
    output_bits: GpioBits,
    input_bits: GpioBits,
    reserved_bits: GpioBits,
}

impl Gpio {
    /// `slowdown` repeats every register write that many extra times for
    /// boards whose GPIO is faster than the panel can follow; `-1` issues a
    /// memory barrier after each write instead.
    pub fn new(peripherals: Arc<Peripherals>, slowdown: i32) -> Self {
        Self {
            peripherals,
            slowdown,
            output_bits: 0,
            input_bits: 0,
            reserved_bits: 0,
        }
    }

    pub fn output_bits(&self) -> GpioBits {
        self.output_bits
    }

    fn set_function(&self, pin: u32, function: u32) {
        let regs = self.peripherals.gpio();
        let word = GPFSEL0 + (pin / 10) as usize;
        let shift = (pin % 10) * 3;
        let value = regs.read(word) & !(7 << shift);
        regs.write(word, value | (function << shift));
    }

    fn make_input(&self, pin: u32) {
        self.set_function(pin, 0);
    }

    fn make_output(&self, pin: u32) {
        self.set_function(pin, 1);
    }

    fn claimed_bits(&self) -> GpioBits {
        self.output_bits | self.input_bits | self.reserved_bits
    }

    fn pins(bits: GpioBits) -> impl Iterator<Item = u32> {
        (0..28).filter(move |pin| bits & gpio_bit(*pin) != 0)
    }

    #[inline(always)]
    fn write_register(&self, word: usize, value: GpioBits) {
        let regs = self.peripherals.gpio();
        // only pins 0..27 exist on the header, the low word holds them all
        let value = value as u32;
        regs.write(word, value);
        if self.slowdown < 0 {
            fence(Ordering::SeqCst);
        } else {
            for _ in 0..self.slowdown {
                regs.write(word, value);
            }
        }
    }
}

impl GpioPort for Gpio {
    fn init_outputs(&mut self, outputs: GpioBits) -> GpioBits {
        let outputs = outputs & VALID_BITS & !self.claimed_bits();

        if outputs & gpio_bit(4) != 0 && linux_has_module_loaded("w1_gpio") {
            warn!(
                "the one-wire protocol is enabled and uses GPIO 4; \
                 disable 1-wire (raspi-config, Interface Options) to avoid display corruption"
            );
        }

        for pin in Self::pins(outputs) {
            // an output must pass through input mode first
            self.make_input(pin);
            self.make_output(pin);
        }
        self.output_bits |= outputs;
        outputs
    }

    fn request_inputs(&mut self, inputs: GpioBits) -> GpioBits {
        let inputs = inputs & VALID_BITS & !self.claimed_bits();
        for pin in Self::pins(inputs) {
            self.make_input(pin);
        }
        self.input_bits |= inputs;
        inputs
    }

    fn reserve_as_inputs(&mut self, pins: GpioBits) {
        let pins = pins & VALID_BITS & !self.output_bits;
        for pin in Self::pins(pins) {
            self.make_input(pin);
        }
        self.reserved_bits |= pins;
    }

    #[inline(always)]
    fn set_bits(&mut self, value: GpioBits) {
        if value != 0 {
            self.write_register(GPSET0, value);
        }
    }

    #[inline(always)]
    fn clear_bits(&mut self, value: GpioBits) {
        if value != 0 {
            self.write_register(GPCLR0, value);
        }
    }

    fn read(&self) -> GpioBits {
        GpioBits::from(self.peripherals.gpio().read(GPLEV0)) & self.input_bits
    }
}
