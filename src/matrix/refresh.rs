//! The refresh thread and its hand-off points with the application.
//!
//! The thread shows the active canvas over and over. After each complete
//! pass it checks for a pending swap, so a frame is never replaced halfway
//! through, and samples the input pins.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use log::debug;
use log::info;

use crate::canvas::FrameCanvas;
use crate::driver::PanelDriver;
use crate::gpio::GpioBits;
use crate::timing::Clock;

const REFRESH_REPORT_INTERVAL_US: u32 = 1_000_000;
const LOWEST_RATE_HOLDOFF_US: u32 = 2_000_000;
const IDLE_SLEEP_US: u32 = 1_000;

/// Lowest plane shown on consecutive passes for 0, 1 and 2 dither bits.
const DITHER_START_BITS: [[usize; 4]; 3] = [[0, 0, 0, 0], [0, 1, 0, 1], [0, 1, 2, 2]];

pub(crate) struct FrameSync {
    pub current: Option<Arc<FrameCanvas>>,
    /// Replacement for `current`, taken at the next vsync.
    pub next: Option<Option<Arc<FrameCanvas>>>,
    /// What `current` was before the last swap, for the swapping caller.
    pub outgoing: Option<Arc<FrameCanvas>>,
    pub requested_frame_multiple: u32,
    /// Number of vsync boundaries so far.
    pub vsync: u64,
}

#[derive(Default)]
pub(crate) struct InputSync {
    pub bits: GpioBits,
    pub generation: u64,
}

/// State shared by the matrix and its refresh thread.
pub(crate) struct Shared {
    pub running: AtomicBool,
    pub frame: Mutex<FrameSync>,
    pub frame_done: Condvar,
    pub inputs: Mutex<InputSync>,
    pub input_change: Condvar,
}

impl Shared {
    pub fn new(current: Option<Arc<FrameCanvas>>) -> Self {
        Self {
            running: AtomicBool::new(false),
            frame: Mutex::new(FrameSync {
                current,
                next: None,
                outgoing: None,
                requested_frame_multiple: 1,
                vsync: 0,
            }),
            frame_done: Condvar::new(),
            inputs: Mutex::new(InputSync::default()),
            input_change: Condvar::new(),
        }
    }

    pub fn lock_frame(&self) -> MutexGuard<'_, FrameSync> {
        self.frame.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lock_inputs(&self) -> MutexGuard<'_, InputSync> {
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the thread to exit after its current pass.
    pub fn stop(&self) {
        let _frame = self.lock_frame();
        self.running.store(false, Ordering::Release);
        self.frame_done.notify_all();
    }
}

pub(crate) fn lock_driver(driver: &Mutex<PanelDriver>) -> MutexGuard<'_, PanelDriver> {
    driver.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed parameters of a refresh thread.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RefreshConfig {
    pub dither_bits: u8,
    pub show_refresh_rate: bool,
    /// 0 for as fast as possible.
    pub limit_refresh_rate_hz: u32,
    pub allow_busy_waiting: bool,
    pub realtime_priority: Option<i32>,
    pub cpu: Option<usize>,
}

impl RefreshConfig {
    fn target_frame_us(&self) -> u32 {
        if self.limit_refresh_rate_hz == 0 {
            0
        } else {
            1_000_000 / self.limit_refresh_rate_hz
        }
    }
}

#[derive(Default)]
struct RateMonitor {
    last_report_us: Option<u32>,
    holdoff_start_us: Option<u32>,
    largest_us: u32,
    lowest_enabled: bool,
}

impl RateMonitor {
    fn record(&mut self, start_us: u32, end_us: u32) {
        let pass_us = end_us.wrapping_sub(start_us).max(1);
        let holdoff_start = *self.holdoff_start_us.get_or_insert(start_us);
        if self.lowest_enabled {
            self.largest_us = self.largest_us.max(pass_us);
        } else {
            // startup passes are not representative
            self.lowest_enabled = end_us.wrapping_sub(holdoff_start) > LOWEST_RATE_HOLDOFF_US;
        }
        let report_due = self
            .last_report_us
            .is_none_or(|last| end_us.wrapping_sub(last) >= REFRESH_REPORT_INTERVAL_US);
        if report_due {
            self.last_report_us = Some(end_us);
            let hz = 1e6 / f64::from(pass_us);
            if self.largest_us > 0 {
                info!(
                    "refresh rate {hz:.1}Hz (lowest: {:.1}Hz)",
                    1e6 / f64::from(self.largest_us)
                );
            } else {
                info!("refresh rate {hz:.1}Hz");
            }
        }
    }
}

/// Scheduling is set up by the spawning thread, see `RGBMatrix::start_refresh`.
pub(crate) fn run(
    shared: Arc<Shared>,
    driver: Arc<Mutex<PanelDriver>>,
    clock: Arc<dyn Clock>,
    config: RefreshConfig,
) {
    debug!("refresh thread started");

    let start_bits = DITHER_START_BITS[usize::from(config.dither_bits.min(2))];
    let target_frame_us = config.target_frame_us();
    let mut frame_count: u32 = 0;
    let mut low_bit_sequence: usize = 0;
    let mut last_inputs: GpioBits = 0;
    let mut monitor = RateMonitor::default();

    while shared.is_running() {
        let start_us = clock.micros();

        let current = shared.lock_frame().current.clone();
        match current {
            Some(canvas) => {
                let mut driver = lock_driver(&driver);
                canvas
                    .framebuffer()
                    .dump_to_matrix(&mut driver, start_bits[low_bit_sequence % 4]);
            }
            None => clock.sleep_micros(u64::from(IDLE_SLEEP_US)),
        }

        {
            let mut frame = shared.lock_frame();
            if frame_count % frame.requested_frame_multiple.max(1) == 0 {
                frame_count = 0;
                if let Some(next) = frame.next.take() {
                    frame.outgoing = std::mem::replace(&mut frame.current, next);
                }
                frame.vsync = frame.vsync.wrapping_add(1);
                shared.frame_done.notify_all();
            }
        }

        let inputs = lock_driver(&driver).read_inputs();
        if inputs != last_inputs {
            last_inputs = inputs;
            let mut state = shared.lock_inputs();
            state.bits = inputs;
            state.generation = state.generation.wrapping_add(1);
            shared.input_change.notify_all();
        }

        frame_count = frame_count.wrapping_add(1);
        low_bit_sequence = low_bit_sequence.wrapping_add(1);

        if target_frame_us > 0 {
            if config.allow_busy_waiting {
                while clock.micros().wrapping_sub(start_us) < target_frame_us {
                    std::hint::spin_loop();
                }
            } else {
                let spent_us = clock.micros().wrapping_sub(start_us);
                if spent_us < target_frame_us {
                    clock.sleep_micros(u64::from(target_frame_us - spent_us));
                }
            }
        }

        if config.show_refresh_rate {
            monitor.record(start_us, clock.micros());
        }
    }
    debug!("refresh thread stopped");
}

/// Block until the refresh thread reaches a vsync boundary after the swap
/// request in `frame` was made, or stops.
pub(crate) fn wait_for_vsync<'a>(
    shared: &'a Shared,
    frame: MutexGuard<'a, FrameSync>,
) -> MutexGuard<'a, FrameSync> {
    let requested_at = frame.vsync;
    shared
        .frame_done
        .wait_while(frame, |frame| frame.vsync == requested_at && shared.is_running())
        .unwrap_or_else(PoisonError::into_inner)
}

/// Wait up to `timeout` for the refresh thread to see the inputs change.
pub(crate) fn wait_for_input_change(shared: &Shared, timeout: Duration) -> GpioBits {
    let state = shared.lock_inputs();
    let generation = state.generation;
    let (state, _) = shared
        .input_change
        .wait_timeout_while(state, timeout, |state| state.generation == generation)
        .unwrap_or_else(PoisonError::into_inner);
    state.bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dither_tables() {
        assert_eq!(DITHER_START_BITS[1][3], 1);
        assert_eq!(DITHER_START_BITS[2], [0, 1, 2, 2]);
    }

    #[test]
    fn frame_target() {
        let config = RefreshConfig {
            limit_refresh_rate_hz: 100,
            ..Default::default()
        };
        assert_eq!(config.target_frame_us(), 10_000);
        assert_eq!(RefreshConfig::default().target_frame_us(), 0);
    }

    #[test]
    fn lowest_rate_waits_for_holdoff() {
        let mut monitor = RateMonitor::default();
        monitor.record(0, 5_000);
        monitor.record(5_000, 20_000);
        assert_eq!(monitor.largest_us, 0);
        monitor.record(2_100_000, 2_110_000);
        monitor.record(2_110_000, 2_130_000);
        assert_eq!(monitor.largest_us, 20_000);
    }
}
