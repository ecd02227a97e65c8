//! Output-enable pulse generation.
//!
//! Each bit-plane is shown for a time proportional to its significance. The
//! pulser drives the (active low) output-enable pins for the duration of the
//! requested plane, either by toggling them around a precise sleep or by
//! letting the PWM peripheral generate the pulse while the CPU clocks in the
//! next row.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bitfield::bitfield;
use log::info;
use log::warn;

use crate::error::Hub75Error;
use crate::gpio::gpio_bit;
use crate::gpio::GpioBits;
use crate::gpio::GpioPort;
use crate::platform::linux_has_module_loaded;
use crate::platform::Peripherals;
use crate::platform::RegisterBlock;
use crate::platform::TIMER_COUNTER_LOW;
use crate::timing::Clock;
use crate::timing::SleepCalibration;

/// Emits one timed low pulse per call on a fixed set of pins.
pub trait PinPulser: Send {
    /// Start (or fully perform) the pulse for bit-plane `plane`.
    fn send_pulse(&mut self, io: &mut dyn GpioPort, plane: usize);

    /// Block until a pulse started by [`send_pulse`](Self::send_pulse) is
    /// over. Must be called before the next row is strobed in.
    fn wait_pulse_finished(&mut self) {}
}

/// Pulse durations per bit-plane. Durations double with every plane, except
/// for the lowest `dither_bits` planes which all get the base time.
pub fn bitplane_timings(lsb_nanos: u32, dither_bits: u8, planes: usize) -> Vec<u32> {
    let mut timing = lsb_nanos;
    (0..planes)
        .map(|plane| {
            let current = timing;
            if plane >= usize::from(dither_bits) {
                timing = timing.saturating_mul(2);
            }
            current
        })
        .collect()
}

/// Pulser that clears the pins, sleeps and sets them again.
pub struct TimerPinPulser {
    bits: GpioBits,
    pulse_nanos: Vec<u32>,
    clock: Arc<dyn Clock>,
}

impl TimerPinPulser {
    pub fn new(bits: GpioBits, pulse_nanos: &[u32], clock: Arc<dyn Clock>) -> Self {
        Self {
            bits,
            pulse_nanos: pulse_nanos.to_vec(),
            clock,
        }
    }
}

impl PinPulser for TimerPinPulser {
    fn send_pulse(&mut self, io: &mut dyn GpioPort, plane: usize) {
        io.clear_bits(self.bits);
        self.clock.sleep_nanos(u64::from(self.pulse_nanos[plane]));
        io.set_bits(self.bits);
    }
}

const PWM_CTL: usize = 0x00 / 4;
const PWM_STA: usize = 0x04 / 4;
const PWM_RNG1: usize = 0x10 / 4;
const PWM_FIFO: usize = 0x18 / 4;

const PWM_STA_EMPT1: u32 = 1 << 1;

const CLK_PASSWD: u32 = 0x5A << 24;
const CLK_CTL_KILL: u32 = 1 << 5;
const CLK_CTL_ENAB: u32 = 1 << 4;
// 500 MHz PLLD
const CLK_CTL_SRC_PLLD: u32 = 6;
const CLK_PWMCTL: usize = 40;
const CLK_PWMDIV: usize = 41;

const PWM_BASE_TIME_NS: u32 = 2;

bitfield! {
    #[derive(Clone, Copy, Default)]
    struct PwmControl(u32);
    _, set_clear_fifo1: 6;
    _, set_use_fifo1: 5;
    _, set_polarity1: 4;
    _, set_enable1: 0;
}

fn pwm_control(enable: bool, clear_fifo: bool) -> u32 {
    let mut ctl = PwmControl::default();
    ctl.set_use_fifo1(true);
    ctl.set_polarity1(true);
    ctl.set_enable1(enable);
    ctl.set_clear_fifo1(clear_fifo);
    ctl.0
}

/// Pulser using the PWM peripheral fed from its FIFO.
///
/// Only works when the output-enable signal is on GPIO 12 or GPIO 18.
pub struct HardwarePinPulser {
    peripherals: Arc<Peripherals>,
    clock: Arc<dyn Clock>,
    pwm_range: Vec<u32>,
    sleep_hints_us: Vec<i64>,
    start_time: u32,
    sleep_hint_us: i64,
    triggered: bool,
}

impl HardwarePinPulser {
    pub fn can_handle(pins: GpioBits) -> bool {
        pins == gpio_bit(18) || pins == gpio_bit(12)
    }

    pub fn new(
        peripherals: Arc<Peripherals>,
        clock: Arc<dyn Clock>,
        pins: GpioBits,
        pulse_nanos: &[u32],
    ) -> Result<Self, Hub75Error> {
        let (Some(pwm), Some(clk), Some(_)) = (
            peripherals.pwm(),
            peripherals.clock(),
            peripherals.timer(),
        ) else {
            return Err(Hub75Error::Permission {
                message: "hardware pulsing needs the PWM, clock and timer registers; \
                          run as root or disable hardware pulsing"
                    .to_string(),
            });
        };
        if linux_has_module_loaded("snd_bcm2835") {
            return Err(Hub75Error::hardware(
                "the snd_bcm2835 sound module is loaded and conflicts with the PWM \
                 pulse generator; disable it or disable hardware pulsing",
            ));
        }
        let base = *pulse_nanos
            .first()
            .ok_or_else(|| Hub75Error::hardware("no pulse timings given"))?;

        let calibration = SleepCalibration::for_model(peripherals.model());
        let jitter = i64::from(calibration.jitter_allowance_us);
        let sleep_hints_us = pulse_nanos
            .iter()
            .map(|nanos| i64::from(*nanos / 1000) - jitter)
            .collect();

        let gpio = peripherals.gpio();
        match pins {
            p if p == gpio_bit(18) => set_gpio_mode(gpio, 18, 2), // alt 5: PWM0
            p if p == gpio_bit(12) => set_gpio_mode(gpio, 12, 4), // alt 0: PWM0
            _ => {
                return Err(Hub75Error::hardware(format!(
                    "hardware pulser cannot drive pins {:#x}",
                    pins
                )))
            }
        }

        let divider = (base / 2) / PWM_BASE_TIME_NS;
        if divider >= 1 << 12 {
            return Err(Hub75Error::hardware(format!(
                "pwm clock divider {} out of range",
                divider
            )));
        }
        init_pwm_divider(pwm, clk, divider);
        let pwm_range = pulse_nanos.iter().map(|nanos| 2 * nanos / base).collect();
        info!("using hardware pin pulser on {:#x}", pins);

        Ok(Self {
            peripherals,
            clock,
            pwm_range,
            sleep_hints_us,
            start_time: 0,
            sleep_hint_us: 0,
            triggered: false,
        })
    }
}

fn set_gpio_mode(gpio: &RegisterBlock, pin: u32, mode: u32) {
    let word = (pin / 10) as usize;
    let shift = (pin % 10) * 3;
    gpio.write(word, (gpio.read(word) & !(7 << shift)) | (mode << shift));
}

fn init_pwm_divider(pwm: &RegisterBlock, clk: &RegisterBlock, divider: u32) {
    pwm.write(PWM_CTL, pwm_control(false, true));
    clk.write(CLK_PWMCTL, CLK_PASSWD | CLK_CTL_KILL);
    clk.write(CLK_PWMCTL, CLK_PASSWD | CLK_CTL_SRC_PLLD);
    clk.write(CLK_PWMDIV, CLK_PASSWD | (divider << 12));
    clk.write(CLK_PWMCTL, CLK_PASSWD | CLK_CTL_ENAB | CLK_CTL_SRC_PLLD);
}

impl PinPulser for HardwarePinPulser {
    fn send_pulse(&mut self, _io: &mut dyn GpioPort, plane: usize) {
        let range = self.pwm_range[plane];
        let Some(pwm) = self.peripherals.pwm() else {
            return;
        };
        if range < 16 {
            pwm.write(PWM_RNG1, range);
            pwm.write(PWM_FIFO, range);
        } else {
            // keep the period short; the zero phase lasts one full period
            pwm.write(PWM_RNG1, range / 8);
            for _ in 0..8 {
                pwm.write(PWM_FIFO, range / 8);
            }
        }
        // two sentinels: one to return to idle, one so that "fifo empty"
        // means the pulse is over
        pwm.write(PWM_FIFO, 0);
        pwm.write(PWM_FIFO, 0);

        self.sleep_hint_us = self.sleep_hints_us[plane];
        self.start_time = self
            .peripherals
            .timer()
            .map(|timer| timer.read(TIMER_COUNTER_LOW))
            .unwrap_or_else(|| self.clock.micros());
        self.triggered = true;
        pwm.write(PWM_CTL, pwm_control(true, false));
    }

    fn wait_pulse_finished(&mut self) {
        if !self.triggered {
            return;
        }
        if self.sleep_hint_us > 0 {
            let elapsed = i64::from(self.clock.micros().wrapping_sub(self.start_time));
            let to_sleep_us = self.sleep_hint_us - elapsed;
            if to_sleep_us > 0 {
                thread::sleep(Duration::from_micros(to_sleep_us as u64));
            }
        }
        if let Some(pwm) = self.peripherals.pwm() {
            while pwm.read(PWM_STA) & PWM_STA_EMPT1 == 0 {
                std::hint::spin_loop();
            }
            pwm.write(PWM_CTL, pwm_control(false, true));
        }
        self.triggered = false;
    }
}

/// Pick the best pulser for `pins`.
pub fn create_pin_pulser(
    peripherals: &Arc<Peripherals>,
    clock: Arc<dyn Clock>,
    pins: GpioBits,
    allow_hardware_pulsing: bool,
    pulse_nanos: &[u32],
) -> Result<Box<dyn PinPulser>, Hub75Error> {
    if allow_hardware_pulsing && HardwarePinPulser::can_handle(pins) {
        let pulser = HardwarePinPulser::new(peripherals.clone(), clock, pins, pulse_nanos)?;
        return Ok(Box::new(pulser));
    }
    if peripherals.timer().is_none() {
        warn!(
            "no access to the 1 MHz timer: pulse timing falls back to the OS clock, \
             expect color degradation; consider running as root"
        );
    }
    Ok(Box::new(TimerPinPulser::new(pins, pulse_nanos, clock)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimEvent;
    use crate::sim::SimTrace;
    use crate::sim::SimulatedGpio;
    use crate::timing::SystemClock;

    #[test]
    fn timings_double_per_plane() {
        assert_eq!(bitplane_timings(130, 0, 4), vec![130, 260, 520, 1040]);
    }

    #[test]
    fn dither_bits_share_base_time() {
        assert_eq!(bitplane_timings(100, 2, 5), vec![100, 100, 100, 200, 400]);
        assert_eq!(bitplane_timings(100, 1, 3), vec![100, 100, 200]);
    }

    #[test]
    fn pwm_control_bits() {
        assert_eq!(pwm_control(true, false), (1 << 5) | (1 << 4) | 1);
        assert_eq!(pwm_control(false, true), (1 << 6) | (1 << 5) | (1 << 4));
    }

    #[test]
    fn hardware_pulser_pins() {
        assert!(HardwarePinPulser::can_handle(gpio_bit(18)));
        assert!(HardwarePinPulser::can_handle(gpio_bit(12)));
        assert!(!HardwarePinPulser::can_handle(gpio_bit(4)));
        assert!(!HardwarePinPulser::can_handle(gpio_bit(12) | gpio_bit(18)));
    }

    #[test]
    fn timer_pulser_drives_pins_low_then_high() {
        let trace = SimTrace::new();
        let mut io = SimulatedGpio::new().with_trace(trace.clone());
        io.init_outputs(gpio_bit(18));
        let clock = Arc::new(SystemClock::new());
        let mut pulser = TimerPinPulser::new(gpio_bit(18), &[1000, 2000], clock);
        pulser.send_pulse(&mut io, 1);
        assert_eq!(
            trace.events(),
            vec![SimEvent::Clear(gpio_bit(18)), SimEvent::Set(gpio_bit(18))]
        );
    }
}
