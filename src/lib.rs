//! Drive HUB75 RGB LED matrix panels straight from the Raspberry Pi GPIO
//! header.
//!
//! Pixels are drawn into a [`FrameCanvas`] (or the [`RGBMatrix`] itself) and
//! a background thread keeps scanning the active frame out to the panels.

use embedded_graphics::pixelcolor::Rgb888;

pub mod canvas;
pub mod color;
pub mod content_streamer;
pub mod driver;
pub mod error;
pub mod framebuffer;
pub mod gpio;
pub mod hardware_mapping;
pub mod matrix;
pub mod options;
pub mod pixel_mapper;
pub mod platform;
pub mod pulser;
pub mod sim;
pub mod thread;
pub mod timing;

pub use canvas::Canvas;
pub use canvas::FrameCanvas;
pub use color::LedSequence;
pub use content_streamer::StreamReader;
pub use content_streamer::StreamWriter;
pub use error::Hub75Error;
pub use hardware_mapping::HardwareMapping;
pub use matrix::MatrixBuilder;
pub use matrix::RGBMatrix;
pub use matrix::UserInputPin;
pub use matrix::UserOutputPin;
pub use options::MatrixOptions;
pub use options::RowAddressType;
pub use options::RuntimeOptions;
pub use options::ScanMode;
pub use pixel_mapper::PixelMapper;
pub use pixel_mapper::PixelMapperRegistry;

pub type Color = Rgb888;
