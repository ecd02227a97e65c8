//! The GPIO side of the refresh engine: pin setup for one panel
//! configuration and the primitive steps a frame is shown with.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use log::debug;
use log::error;

use crate::color::BIT_PLANES;
use crate::error::Hub75Error;
use crate::framebuffer::row_address::row_address_setter;
use crate::framebuffer::row_address::RowAddressSetter;
use crate::gpio::gpio_bit;
use crate::gpio::GpioBits;
use crate::gpio::GpioPort;
use crate::hardware_mapping::HardwareMapping;
use crate::options::MatrixOptions;
use crate::pulser::bitplane_timings;
use crate::pulser::PinPulser;

const FM6126A_REGISTER_12: &[u8; 16] = b"0111111111111111";
const FM6126A_REGISTER_13: &[u8; 16] = b"0000000001000000";

pub struct PanelDriver {
    io: Box<dyn GpioPort>,
    pulser: Box<dyn PinPulser>,
    row_setter: Box<dyn RowAddressSetter>,
    clock: GpioBits,
    strobe: GpioBits,
    color_clock_mask: GpioBits,
    user_output_bits: GpioBits,
}

impl PanelDriver {
    /// Claim every pin the configuration needs, create the pulser for the
    /// output-enable pins and run the panel's init sequence.
    ///
    /// `make_pulser` receives the output-enable bits and the pulse duration
    /// of every bit-plane. It is called after the pins have been switched to
    /// outputs.
    pub fn new<F>(
        mut io: Box<dyn GpioPort>,
        mapping: &HardwareMapping,
        rows: usize,
        columns: usize,
        options: &MatrixOptions,
        make_pulser: F,
    ) -> Result<Self, Hub75Error>
    where
        F: FnOnce(GpioBits, &[u32]) -> Result<Box<dyn PinPulser>, Hub75Error>,
    {
        if mapping.name == "adafruit-hat-pwm" {
            // boards modified for hardware pulsing connect GPIO 4 and 18
            io.reserve_as_inputs(gpio_bit(4));
        }

        let row_setter = row_address_setter(options.row_address_type, rows / 2, mapping);
        let color_bits = mapping.color_bits(options.parallel);
        let needed = mapping.output_enable
            | mapping.clock
            | mapping.strobe
            | color_bits
            | row_setter.need_bits();
        let granted = io.init_outputs(needed);
        if granted != needed {
            error!(
                "outputs not claimed: needed {needed:#x}, got {granted:#x}, missing {:#x}",
                needed & !granted
            );
            return Err(Hub75Error::OutputsUnavailable { needed, granted });
        }

        // output enable is active low
        io.set_bits(mapping.output_enable);

        let timings = bitplane_timings(
            options.pwm_lsb_nanoseconds,
            options.pwm_dither_bits,
            BIT_PLANES,
        );
        let pulser = make_pulser(mapping.output_enable, &timings)?;

        let mut driver = Self {
            io,
            pulser,
            row_setter,
            clock: mapping.clock,
            strobe: mapping.strobe,
            color_clock_mask: color_bits | mapping.clock,
            user_output_bits: 0,
        };
        if options.panel_type.eq_ignore_ascii_case("FM6126A") {
            driver.init_fm6126a(mapping.a, color_bits, columns);
        }
        debug!(
            "panel driver ready on {} ({} columns, {} rows, outputs {needed:#x})",
            mapping.name, columns, rows
        );
        Ok(driver)
    }

    fn write_panel_register(
        &mut self,
        register: &[u8; 16],
        bits_on: GpioBits,
        bits_off: GpioBits,
        latch_columns: usize,
        columns: usize,
    ) {
        let mask = bits_on | self.strobe;
        for column in 0..columns {
            let mut value = if register[column % 16] == b'0' { bits_off } else { bits_on };
            if column + latch_columns > columns {
                value |= self.strobe;
            }
            self.io.write_masked_bits(value, mask);
            self.io.set_bits(self.clock);
            self.io.clear_bits(self.clock);
        }
        self.io.clear_bits(self.strobe);
    }

    /// Program brightness and enable registers of FM6126A driver chips,
    /// which stay dark until configured.
    fn init_fm6126a(&mut self, a: GpioBits, color_bits: GpioBits, columns: usize) {
        let bits_on = color_bits | a;
        let bits_off = a;
        self.io.clear_bits(self.clock | self.strobe);
        self.write_panel_register(FM6126A_REGISTER_12, bits_on, bits_off, 12, columns);
        self.write_panel_register(FM6126A_REGISTER_13, bits_on, bits_off, 13, columns);
    }

    /// Shift one row of one bit-plane into the panels.
    #[inline]
    pub fn clock_in(&mut self, words: &[AtomicU64]) {
        for word in words {
            // also takes the clock low
            self.io
                .write_masked_bits(word.load(Ordering::Relaxed), self.color_clock_mask);
            self.io.set_bits(self.clock);
        }
        self.io.clear_bits(self.color_clock_mask);
    }

    /// Latch the clocked-in row and light it for the duration of `plane`.
    ///
    /// The previous pulse must be over before the latch changes what the
    /// LEDs show.
    #[inline]
    pub fn show(&mut self, double_row: usize, plane: usize) {
        self.pulser.wait_pulse_finished();
        self.row_setter.set_row_address(self.io.as_mut(), double_row);
        self.io.set_bits(self.strobe);
        self.io.clear_bits(self.strobe);
        self.pulser.send_pulse(self.io.as_mut(), plane);
    }

    /// Wait for the last pulse of a pass.
    pub fn finish(&mut self) {
        self.pulser.wait_pulse_finished();
    }

    pub fn request_inputs(&mut self, bits: GpioBits) -> GpioBits {
        self.io.request_inputs(bits)
    }

    pub fn read_inputs(&self) -> GpioBits {
        self.io.read()
    }

    /// Claim additional pins for the application. Returns the granted ones.
    pub fn request_outputs(&mut self, bits: GpioBits) -> GpioBits {
        let granted = self.io.init_outputs(bits);
        self.user_output_bits |= granted;
        granted
    }

    /// Write the application's output pins; other pins are not touched.
    pub fn output_gpio(&mut self, value: GpioBits) {
        self.write_outputs(value, !0);
    }

    /// Like [`output_gpio`](Self::output_gpio), restricted to `mask`.
    pub fn write_outputs(&mut self, value: GpioBits, mask: GpioBits) {
        self.io.write_masked_bits(value, mask & self.user_output_bits);
    }

    pub fn user_output_bits(&self) -> GpioBits {
        self.user_output_bits
    }
}
