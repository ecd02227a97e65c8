//! Microsecond clock and precise short sleeps.
//!
//! `nanosleep()` overshoots by tens of microseconds, which is longer than the
//! shortest bit-plane. Short waits are therefore done with a calibrated
//! busy-loop and long waits sleep for most of the time and busy-wait the
//! remainder, measured against the 1 MHz system timer when it is mapped.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use cfg_if::cfg_if;

use crate::platform::Peripherals;
use crate::platform::PiModel;
use crate::platform::TIMER_COUNTER_LOW;

/// Typical `nanosleep()` overshoot on a stock kernel.
pub const EMPIRICAL_NANOSLEEP_OVERHEAD_US: u32 = 12;

/// Waits shorter than the overhead plus this are done with busy waiting.
pub const MINIMUM_NANOSLEEP_TIME_US: u32 = 5;

/// Time source and delay provider for the refresh engine.
pub trait Clock: Send + Sync {
    /// Free running microsecond counter, wrapping at `u32::MAX`.
    fn micros(&self) -> u32;

    /// Block for as close to `nanos` as the platform allows.
    fn sleep_nanos(&self, nanos: u64);

    fn sleep_micros(&self, micros: u64) {
        self.sleep_nanos(micros.saturating_mul(1000));
    }
}

/// Tunable constants for [`PreciseClock`].
///
/// These are empirical; a realtime kernel may warrant different values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SleepCalibration {
    pub nanosleep_overhead_us: u32,
    pub minimum_nanosleep_us: u32,
    /// Time reserved after a timed sleep for busy waiting to the deadline.
    pub jitter_allowance_us: u32,
}

impl SleepCalibration {
    pub fn for_model(model: PiModel) -> Self {
        let jitter_allowance_us = match model {
            PiModel::Pi1 => EMPIRICAL_NANOSLEEP_OVERHEAD_US,
            // multi-core boards can afford to burn more cycles
            PiModel::Pi2 | PiModel::Pi3 => EMPIRICAL_NANOSLEEP_OVERHEAD_US + 35,
            PiModel::Pi4 => EMPIRICAL_NANOSLEEP_OVERHEAD_US + 10,
        };
        Self {
            nanosleep_overhead_us: EMPIRICAL_NANOSLEEP_OVERHEAD_US,
            minimum_nanosleep_us: MINIMUM_NANOSLEEP_TIME_US,
            jitter_allowance_us,
        }
    }
}

impl Default for SleepCalibration {
    fn default() -> Self {
        Self::for_model(PiModel::Pi3)
    }
}

/// Busy-loop calibrated per board family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusyWait {
    Pi1,
    Pi2,
    Pi3,
    Pi4,
}

impl From<PiModel> for BusyWait {
    fn from(model: PiModel) -> Self {
        match model {
            PiModel::Pi1 => BusyWait::Pi1,
            PiModel::Pi2 => BusyWait::Pi2,
            PiModel::Pi3 => BusyWait::Pi3,
            PiModel::Pi4 => BusyWait::Pi4,
        }
    }
}

impl BusyWait {
    /// Loop iterations that take roughly `nanos` on this board.
    pub fn iterations(self, nanos: u64) -> u64 {
        match self {
            BusyWait::Pi1 if nanos >= 70 => (nanos - 70) >> 2,
            BusyWait::Pi2 if nanos >= 20 => (nanos - 20) * 100 / 110,
            BusyWait::Pi3 if nanos >= 20 => (nanos - 15) * 100 / 73,
            // the Pi4 runs this loop slower than the Pi3
            BusyWait::Pi4 if nanos >= 20 => (nanos - 5) * 100 / 132,
            _ => 0,
        }
    }

    pub fn spin(self, nanos: u64) {
        for _ in 0..self.iterations(nanos) {
            relax();
        }
    }
}

#[inline(always)]
fn relax() {
    cfg_if! {
        if #[cfg(any(target_arch = "arm", target_arch = "aarch64"))] {
            // SAFETY: a nop touches neither memory nor flags.
            unsafe { core::arch::asm!("nop", options(nomem, nostack, preserves_flags)) }
        } else {
            core::hint::spin_loop()
        }
    }
}

fn monotonic_micros(epoch: Instant) -> u32 {
    // wraps like the hardware counter
    epoch.elapsed().as_micros() as u32
}

/// Clock backed by the BCM 1 MHz system timer.
pub struct PreciseClock {
    peripherals: Arc<Peripherals>,
    busy_wait: BusyWait,
    calibration: SleepCalibration,
    epoch: Instant,
}

impl PreciseClock {
    pub fn new(peripherals: Arc<Peripherals>) -> Self {
        let model = peripherals.model();
        Self {
            peripherals,
            busy_wait: model.into(),
            calibration: SleepCalibration::for_model(model),
            epoch: Instant::now(),
        }
    }

    pub fn with_calibration(mut self, calibration: SleepCalibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn calibration(&self) -> SleepCalibration {
        self.calibration
    }
}

impl Clock for PreciseClock {
    fn micros(&self) -> u32 {
        match self.peripherals.timer() {
            Some(timer) => timer.read(TIMER_COUNTER_LOW),
            None => monotonic_micros(self.epoch),
        }
    }

    fn sleep_nanos(&self, nanos: u64) {
        let mut nanos = nanos;
        let calibration = &self.calibration;
        match self.peripherals.timer() {
            Some(timer) => {
                let allowance = u64::from(calibration.jitter_allowance_us) * 1000;
                if nanos > allowance + u64::from(calibration.minimum_nanosleep_us) * 1000 {
                    let before = timer.read(TIMER_COUNTER_LOW);
                    thread::sleep(Duration::from_nanos(nanos - allowance));
                    let after = timer.read(TIMER_COUNTER_LOW);
                    let passed = u64::from(after.wrapping_sub(before)) * 1000;
                    if passed > nanos {
                        return;
                    }
                    nanos -= passed;
                }
            }
            None => {
                // no hardware timer: long waits are plain sleeps
                let overhead = u64::from(calibration.nanosleep_overhead_us) * 1000;
                if nanos > overhead + u64::from(calibration.minimum_nanosleep_us) * 1000 {
                    thread::sleep(Duration::from_nanos(nanos - overhead));
                    return;
                }
            }
        }
        self.busy_wait.spin(nanos);
    }
}

/// Clock for hosts without the BCM timer, built on [`Instant`].
#[derive(Debug)]
pub struct SystemClock {
    epoch: Instant,
    calibration: SleepCalibration,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            calibration: SleepCalibration::default(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn micros(&self) -> u32 {
        monotonic_micros(self.epoch)
    }

    fn sleep_nanos(&self, nanos: u64) {
        let deadline = Instant::now() + Duration::from_nanos(nanos);
        let overhead = u64::from(self.calibration.nanosleep_overhead_us) * 1000;
        if nanos > overhead + u64::from(self.calibration.minimum_nanosleep_us) * 1000 {
            thread::sleep(Duration::from_nanos(nanos - overhead));
        }
        while Instant::now() < deadline {
            core::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_wait_iterations() {
        assert_eq!(BusyWait::Pi1.iterations(69), 0);
        assert_eq!(BusyWait::Pi1.iterations(470), 100);
        assert_eq!(BusyWait::Pi2.iterations(1120), 1000);
        assert_eq!(BusyWait::Pi3.iterations(745), 1000);
        assert_eq!(BusyWait::Pi4.iterations(1325), 1000);
        assert_eq!(BusyWait::Pi4.iterations(19), 0);
    }

    #[test]
    fn jitter_allowance_per_model() {
        assert_eq!(SleepCalibration::for_model(PiModel::Pi1).jitter_allowance_us, 12);
        assert_eq!(SleepCalibration::for_model(PiModel::Pi3).jitter_allowance_us, 47);
        assert_eq!(SleepCalibration::for_model(PiModel::Pi4).jitter_allowance_us, 22);
    }

    #[test]
    fn system_clock_sleeps_at_least_requested() {
        let clock = SystemClock::new();
        let start = Instant::now();
        clock.sleep_nanos(200_000);
        assert!(start.elapsed() >= Duration::from_micros(200));
        let a = clock.micros();
        clock.sleep_micros(50);
        assert!(clock.micros().wrapping_sub(a) >= 50);
    }
}
