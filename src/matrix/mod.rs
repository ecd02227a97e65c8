//! The display: a canvas that is continuously shown on the panels.

use std::os::unix::thread::JoinHandleExt;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use core::convert::Infallible;

use embedded_graphics::pixelcolor::RgbColor;
use embedded_graphics::prelude::OriginDimensions;
use embedded_graphics::prelude::Size;
use embedded_graphics::Pixel;
use log::debug;
use log::warn;

use crate::canvas::Canvas;
use crate::canvas::FrameCanvas;
use crate::color::LuminanceTable;
use crate::driver::PanelDriver;
use crate::error::Hub75Error;
use crate::framebuffer::FrameSettings;
use crate::framebuffer::Framebuffer;
use crate::framebuffer::PanelLayout;
use crate::framebuffer::PixelDesignatorMap;
use crate::gpio::gpio_bit;
use crate::gpio::GpioBits;
use crate::options::MatrixOptions;
use crate::pixel_mapper::PixelMapper;
use crate::thread::tune_refresh_thread;
use crate::timing::Clock;
use crate::Color;

mod builder;
mod pins;
mod refresh;

pub use builder::MatrixBuilder;
pub use pins::UserInputPin;
pub use pins::UserOutputPin;

use refresh::lock_driver;
use refresh::RefreshConfig;
use refresh::Shared;

const CANVAS_WARNING_INTERVAL: usize = 500;

/// An LED matrix display.
///
/// Drawing on the matrix itself goes straight to the buffer being shown.
/// For flicker free animation draw on a canvas from
/// [`create_frame_canvas`](Self::create_frame_canvas) and hand it over with
/// [`swap_on_vsync`](Self::swap_on_vsync).
pub struct RGBMatrix {
    options: MatrixOptions,
    layout: PanelLayout,
    designators: Arc<PixelDesignatorMap>,
    luminance: Arc<LuminanceTable>,
    settings: FrameSettings,
    shared: Arc<Shared>,
    driver: Option<Arc<Mutex<PanelDriver>>>,
    clock: Arc<dyn Clock>,
    refresh_config: RefreshConfig,
    refresh: Option<JoinHandle<()>>,
    created_frames: usize,
}

impl RGBMatrix {
    /// Set up the hardware and start showing a blank canvas.
    pub fn new(
        options: MatrixOptions,
        runtime: &crate::options::RuntimeOptions,
    ) -> Result<Self, Hub75Error> {
        Self::builder(options).build(runtime)
    }

    pub fn builder(options: MatrixOptions) -> MatrixBuilder {
        MatrixBuilder::new(options)
    }

    fn assemble(
        options: MatrixOptions,
        layout: PanelLayout,
        designators: PixelDesignatorMap,
        luminance: Arc<LuminanceTable>,
        driver: Option<PanelDriver>,
        clock: Arc<dyn Clock>,
        refresh_config: RefreshConfig,
    ) -> Self {
        let settings = FrameSettings {
            pwm_bits: options.pwm_bits,
            brightness: options.brightness,
            luminance_correct: true,
        };
        let matrix = Self {
            options,
            layout,
            designators: Arc::new(designators),
            luminance,
            settings,
            shared: Arc::new(Shared::new(None)),
            driver: driver.map(|driver| Arc::new(Mutex::new(driver))),
            clock,
            refresh_config,
            refresh: None,
            created_frames: 0,
        };
        let active = matrix.new_canvas();
        matrix.shared.lock_frame().current = Some(Arc::new(active));
        matrix
    }

    fn new_canvas(&self) -> FrameCanvas {
        FrameCanvas::new(Framebuffer::new(
            self.layout,
            self.options.scan_mode,
            self.options.inverse_colors,
            self.designators.clone(),
            self.luminance.clone(),
            self.settings,
        ))
    }

    pub fn options(&self) -> &MatrixOptions {
        &self.options
    }

    /// Geometry of the bit-plane buffers.
    pub fn layout(&self) -> PanelLayout {
        self.layout
    }

    /// Whether frames are being sent to the panels.
    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_some() && self.shared.is_running()
    }

    /// Start the refresh thread if it was deferred. Does nothing without
    /// hardware or when already running.
    pub fn start_refresh(&mut self) -> Result<(), Hub75Error> {
        let Some(driver) = &self.driver else {
            return Ok(());
        };
        if self.refresh.is_some() {
            return Ok(());
        }
        self.shared
            .running
            .store(true, std::sync::atomic::Ordering::Release);
        let shared = self.shared.clone();
        let driver = driver.clone();
        let clock = self.clock.clone();
        let config = self.refresh_config;
        let spawned = std::thread::Builder::new()
            .name("hub75-refresh".to_string())
            .spawn(move || refresh::run(shared, driver, clock, config));
        match spawned {
            Ok(handle) => {
                // before returning, so a following privilege drop can't get in between
                tune_refresh_thread(handle.as_pthread_t(), config.realtime_priority, config.cpu);
                self.refresh = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared
                    .running
                    .store(false, std::sync::atomic::Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// A new off-screen canvas with the matrix' current settings.
    pub fn create_frame_canvas(&mut self) -> FrameCanvas {
        self.created_frames += 1;
        if self.created_frames % CANVAS_WARNING_INTERVAL == 0 {
            warn!(
                "{} frame canvases created; canvases are meant to be reused via swap_on_vsync",
                self.created_frames
            );
        }
        self.new_canvas()
    }

    /// Show `next` from the next vsync on and return the canvas shown so far.
    ///
    /// Blocks until the refresh thread finished the pass it is on, and with
    /// `framerate_fraction` > 1 until a pass number that is a multiple of it,
    /// which allows frame rates below the refresh rate. Passing `None` takes
    /// the shown canvas out and leaves the display dark until the next swap.
    /// Without a running refresh thread the swap happens immediately.
    pub fn swap_on_vsync(
        &mut self,
        next: Option<FrameCanvas>,
        framerate_fraction: u32,
    ) -> Option<FrameCanvas> {
        let next = next.map(Arc::new);
        let previous = {
            let mut frame = self.shared.lock_frame();
            if self.is_refreshing() {
                frame.next = Some(next);
                frame.requested_frame_multiple = framerate_fraction.max(1);
                let mut frame = refresh::wait_for_vsync(&self.shared, frame);
                match frame.next.take() {
                    // the thread stopped before it got to the swap
                    Some(next) => std::mem::replace(&mut frame.current, next),
                    None => frame.outgoing.take(),
                }
            } else {
                std::mem::replace(&mut frame.current, next)
            }
        };
        previous.and_then(|canvas| match Arc::try_unwrap(canvas) {
            Ok(canvas) => Some(canvas),
            Err(_) => {
                warn!("previous canvas is still in use and cannot be handed back");
                None
            }
        })
    }

    /// Add `mapper` on top of the mappers already in place. Affects the
    /// shown canvas and canvases created later.
    pub fn apply_pixel_mapper(&mut self, mapper: &dyn PixelMapper) -> Result<(), Hub75Error> {
        let designators = Arc::new(self.designators.remapped(mapper)?);
        debug!(
            "pixel mapper {} applied, canvas is now {}x{}",
            mapper.name(),
            designators.width(),
            designators.height()
        );
        self.designators = designators;

        let mut frame = self.shared.lock_frame();
        let Some(current) = frame.current.clone() else {
            return Ok(());
        };
        let framebuffer = Framebuffer::new(
            self.layout,
            self.options.scan_mode,
            self.options.inverse_colors,
            self.designators.clone(),
            self.luminance.clone(),
            current.settings(),
        );
        framebuffer.copy_from(current.framebuffer())?;
        frame.current = Some(Arc::new(FrameCanvas::new(framebuffer)));
        Ok(())
    }

    fn active(&self) -> Option<Arc<FrameCanvas>> {
        self.shared.lock_frame().current.clone()
    }

    /// Applies to the shown canvas and all canvases created later.
    pub fn set_pwm_bits(&mut self, pwm_bits: u8) -> Result<(), Hub75Error> {
        if let Some(active) = self.active() {
            active.framebuffer().set_pwm_bits(pwm_bits)?;
        } else if pwm_bits < 1 || usize::from(pwm_bits) > crate::color::BIT_PLANES {
            return Err(Hub75Error::InvalidPwmBits {
                value: pwm_bits,
                max: crate::color::BIT_PLANES,
            });
        }
        self.settings.pwm_bits = pwm_bits;
        Ok(())
    }

    pub fn pwm_bits(&self) -> u8 {
        self.settings.pwm_bits
    }

    /// Percent, clamped into 1..=100. Only affects pixels drawn afterwards.
    pub fn set_brightness(&mut self, brightness: u8) {
        if let Some(active) = self.active() {
            active.framebuffer().set_brightness(brightness);
        }
        self.settings.brightness = brightness.clamp(1, crate::color::MAX_BRIGHTNESS);
    }

    pub fn brightness(&self) -> u8 {
        self.settings.brightness
    }

    pub fn set_luminance_correct(&mut self, on: bool) {
        if let Some(active) = self.active() {
            active.framebuffer().set_luminance_correct(on);
        }
        self.settings.luminance_correct = on;
    }

    pub fn luminance_correct(&self) -> bool {
        self.settings.luminance_correct
    }

    /// Claim pins as inputs. Returns the granted ones.
    pub fn request_inputs(&mut self, bits: GpioBits) -> GpioBits {
        match &self.driver {
            Some(driver) => lock_driver(driver).request_inputs(bits),
            None => 0,
        }
    }

    /// Wait up to `timeout` for a change on the input pins and return their
    /// state. The pins are sampled once per refresh pass.
    pub fn await_input_change(&self, timeout: Duration) -> GpioBits {
        if self.is_refreshing() {
            return refresh::wait_for_input_change(&self.shared, timeout);
        }
        match &self.driver {
            Some(driver) => lock_driver(driver).read_inputs(),
            None => 0,
        }
    }

    /// Claim pins for the application's own use. Returns the granted ones.
    pub fn request_outputs(&mut self, bits: GpioBits) -> GpioBits {
        match &self.driver {
            Some(driver) => lock_driver(driver).request_outputs(bits),
            None => 0,
        }
    }

    /// Set the requested output pins to `bits`.
    pub fn output_gpio(&mut self, bits: GpioBits) {
        if let Some(driver) = &self.driver {
            lock_driver(driver).output_gpio(bits);
        }
    }

    /// Claim `pin` as an output and wrap it in an `embedded-hal` pin.
    pub fn output_pin(&mut self, pin: u32) -> Option<UserOutputPin> {
        let bit = gpio_bit(pin);
        if self.request_outputs(bit) != bit {
            return None;
        }
        let driver = self.driver.clone()?;
        Some(UserOutputPin::new(driver, bit))
    }

    /// Claim `pin` as an input and wrap it in an `embedded-hal` pin.
    pub fn input_pin(&mut self, pin: u32) -> Option<UserInputPin> {
        let bit = gpio_bit(pin);
        if self.request_inputs(bit) != bit {
            return None;
        }
        let driver = self.driver.clone()?;
        Some(UserInputPin::new(driver, bit))
    }
}

impl Canvas for RGBMatrix {
    fn width(&self) -> usize {
        self.designators.width()
    }

    fn height(&self) -> usize {
        self.designators.height()
    }

    fn set_pixel(&mut self, x: i32, y: i32, r: u8, g: u8, b: u8) {
        if let Some(active) = self.active() {
            active.framebuffer().set_pixel(x, y, r, g, b);
        }
    }

    fn clear(&mut self) {
        if let Some(active) = self.active() {
            active.framebuffer().clear();
        }
    }

    fn fill(&mut self, r: u8, g: u8, b: u8) {
        if let Some(active) = self.active() {
            active.framebuffer().fill(r, g, b);
        }
    }
}

impl OriginDimensions for RGBMatrix {
    fn size(&self) -> Size {
        Size::new(self.designators.width() as u32, self.designators.height() as u32)
    }
}

impl embedded_graphics::draw_target::DrawTarget for RGBMatrix {
    type Color = Color;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        if let Some(active) = self.active() {
            for Pixel(point, color) in pixels {
                active
                    .framebuffer()
                    .set_pixel(point.x, point.y, color.r(), color.g(), color.b());
            }
        }
        Ok(())
    }
}

impl Drop for RGBMatrix {
    fn drop(&mut self) {
        self.shared.stop();
        if let Some(handle) = self.refresh.take() {
            if handle.join().is_err() {
                warn!("refresh thread panicked");
            }
        }
        // leave the LEDs off
        if let (Some(driver), Some(active)) = (&self.driver, self.active()) {
            active.framebuffer().clear();
            active.framebuffer().dump_to_matrix(&mut lock_driver(driver), 0);
        }
    }
}
