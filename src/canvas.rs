use core::convert::Infallible;

use embedded_graphics::pixelcolor::RgbColor;
use embedded_graphics::prelude::OriginDimensions;
use embedded_graphics::prelude::Size;
use embedded_graphics::Pixel;

use crate::error::Hub75Error;
use crate::framebuffer::FrameSettings;
use crate::framebuffer::Framebuffer;
use crate::Color;

/// Something pixels can be drawn on.
pub trait Canvas {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    /// Coordinates outside the canvas are ignored.
    fn set_pixel(&mut self, x: i32, y: i32, r: u8, g: u8, b: u8);

    fn clear(&mut self);

    fn fill(&mut self, r: u8, g: u8, b: u8);
}

/// An off-screen frame, handed to the display with
/// [`RGBMatrix::swap_on_vsync`](crate::RGBMatrix::swap_on_vsync).
pub struct FrameCanvas {
    framebuffer: Framebuffer,
}

impl FrameCanvas {
    pub(crate) fn new(framebuffer: Framebuffer) -> Self {
        Self { framebuffer }
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    pub fn settings(&self) -> FrameSettings {
        self.framebuffer.settings()
    }

    pub fn set_pwm_bits(&mut self, pwm_bits: u8) -> Result<(), Hub75Error> {
        self.framebuffer.set_pwm_bits(pwm_bits)
    }

    pub fn pwm_bits(&self) -> u8 {
        self.framebuffer.pwm_bits()
    }

    pub fn set_brightness(&mut self, brightness: u8) {
        self.framebuffer.set_brightness(brightness);
    }

    pub fn brightness(&self) -> u8 {
        self.framebuffer.brightness()
    }

    pub fn set_luminance_correct(&mut self, on: bool) {
        self.framebuffer.set_luminance_correct(on);
    }

    pub fn luminance_correct(&self) -> bool {
        self.framebuffer.luminance_correct()
    }

    /// Copy the pixels of `other`, which must have the same geometry.
    pub fn copy_from(&mut self, other: &FrameCanvas) -> Result<(), Hub75Error> {
        self.framebuffer.copy_from(&other.framebuffer)
    }

    /// Raw bit-plane content, for storing pre-rendered frames.
    pub fn serialize(&self) -> Vec<u8> {
        self.framebuffer.serialize()
    }

    pub fn deserialize(&mut self, data: &[u8]) -> Result<(), Hub75Error> {
        self.framebuffer.deserialize(data)
    }
}

impl Canvas for FrameCanvas {
    fn width(&self) -> usize {
        self.framebuffer.width()
    }

    fn height(&self) -> usize {
        self.framebuffer.height()
    }

    fn set_pixel(&mut self, x: i32, y: i32, r: u8, g: u8, b: u8) {
        self.framebuffer.set_pixel(x, y, r, g, b);
    }

    fn clear(&mut self) {
        self.framebuffer.clear();
    }

    fn fill(&mut self, r: u8, g: u8, b: u8) {
        self.framebuffer.fill(r, g, b);
    }
}

impl OriginDimensions for FrameCanvas {
    fn size(&self) -> Size {
        Size::new(self.framebuffer.width() as u32, self.framebuffer.height() as u32)
    }
}

impl embedded_graphics::draw_target::DrawTarget for FrameCanvas {
    type Color = Color;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            self.framebuffer
                .set_pixel(point.x, point.y, color.r(), color.g(), color.b());
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.framebuffer.fill(color.r(), color.g(), color.b());
        Ok(())
    }
}
