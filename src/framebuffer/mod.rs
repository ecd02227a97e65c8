//! Bit-plane frame storage and scan-out.
//!
//! A frame is stored as one GPIO word per column, per double-row and per
//! bit-plane. Each word already holds the color bits of every parallel chain
//! and of both halves of the panel, so refreshing a row of one plane is a
//! straight walk over `columns` consecutive words:
//!
//! ```text
//! index = double_row * (columns * BIT_PLANES) + plane * columns + column
//! ```
//!
//! Plane `p` is lit for a time proportional to `2^p`; with `pwm_bits` set
//! lower than [`BIT_PLANES`] only the most significant planes are written and
//! shown.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::color::map_color;
use crate::color::LuminanceTable;
use crate::color::BIT_PLANES;
use crate::color::MAX_BRIGHTNESS;
use crate::driver::PanelDriver;
use crate::error::Hub75Error;
use crate::gpio::GpioBits;
use crate::options::ScanMode;

mod designator;
pub mod row_address;

pub use designator::PixelDesignator;
pub use designator::PixelDesignatorMap;

/// Physical shape of the bit-plane buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PanelLayout {
    /// Rows of one panel as driven (after multiplexing adjustments).
    pub rows: usize,
    /// Columns of a whole chain.
    pub columns: usize,
    pub parallel: usize,
}

impl PanelLayout {
    pub const fn double_rows(&self) -> usize {
        self.rows / 2
    }

    /// Height of the unmapped canvas.
    pub const fn height(&self) -> usize {
        self.rows * self.parallel
    }

    pub const fn word_count(&self) -> usize {
        self.double_rows() * self.columns * BIT_PLANES
    }

    #[inline]
    pub const fn word_index(&self, double_row: usize, column: usize, plane: usize) -> usize {
        double_row * (self.columns * BIT_PLANES) + plane * self.columns + column
    }
}

/// Per-frame color settings. New canvases start with a copy of the matrix'
/// current settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSettings {
    pub pwm_bits: u8,
    pub brightness: u8,
    pub luminance_correct: bool,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            pwm_bits: BIT_PLANES as u8,
            brightness: MAX_BRIGHTNESS,
            luminance_correct: true,
        }
    }
}

pub struct Framebuffer {
    layout: PanelLayout,
    scan_mode: ScanMode,
    inverse_colors: bool,
    designators: Arc<PixelDesignatorMap>,
    luminance: Arc<LuminanceTable>,
    // written by the drawing side while the refresh thread reads it
    bitplanes: Box<[AtomicU64]>,
    pwm_bits: AtomicU8,
    brightness: AtomicU8,
    luminance_correct: AtomicBool,
}

impl Framebuffer {
    pub fn new(
        layout: PanelLayout,
        scan_mode: ScanMode,
        inverse_colors: bool,
        designators: Arc<PixelDesignatorMap>,
        luminance: Arc<LuminanceTable>,
        settings: FrameSettings,
    ) -> Self {
        let bitplanes = (0..layout.word_count()).map(|_| AtomicU64::new(0)).collect();
        let framebuffer = Self {
            layout,
            scan_mode,
            inverse_colors,
            designators,
            luminance,
            bitplanes,
            pwm_bits: AtomicU8::new(settings.pwm_bits.clamp(1, BIT_PLANES as u8)),
            brightness: AtomicU8::new(settings.brightness.clamp(1, MAX_BRIGHTNESS)),
            luminance_correct: AtomicBool::new(settings.luminance_correct),
        };
        framebuffer.clear();
        framebuffer
    }

    pub fn layout(&self) -> PanelLayout {
        self.layout
    }

    pub fn designators(&self) -> &Arc<PixelDesignatorMap> {
        &self.designators
    }

    /// Visible width.
    pub fn width(&self) -> usize {
        self.designators.width()
    }

    /// Visible height.
    pub fn height(&self) -> usize {
        self.designators.height()
    }

    pub fn settings(&self) -> FrameSettings {
        FrameSettings {
            pwm_bits: self.pwm_bits(),
            brightness: self.brightness(),
            luminance_correct: self.luminance_correct(),
        }
    }

    /// Only affects pixels written afterwards. Out of range values are
    /// rejected and leave the setting unchanged.
    pub fn set_pwm_bits(&self, pwm_bits: u8) -> Result<(), Hub75Error> {
        if pwm_bits < 1 || usize::from(pwm_bits) > BIT_PLANES {
            return Err(Hub75Error::InvalidPwmBits {
                value: pwm_bits,
                max: BIT_PLANES,
            });
        }
        self.pwm_bits.store(pwm_bits, Ordering::Relaxed);
        Ok(())
    }

    pub fn pwm_bits(&self) -> u8 {
        self.pwm_bits.load(Ordering::Relaxed)
    }

    /// Clamped into 1..=100.
    pub fn set_brightness(&self, brightness: u8) {
        self.brightness
            .store(brightness.clamp(1, MAX_BRIGHTNESS), Ordering::Relaxed);
    }

    pub fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::Relaxed)
    }

    pub fn set_luminance_correct(&self, on: bool) {
        self.luminance_correct.store(on, Ordering::Relaxed);
    }

    pub fn luminance_correct(&self) -> bool {
        self.luminance_correct.load(Ordering::Relaxed)
    }

    fn map_rgb(&self, r: u8, g: u8, b: u8) -> [u16; 3] {
        let brightness = self.brightness();
        let table = self.luminance_correct().then_some(&*self.luminance);
        [r, g, b].map(|value| map_color(value, brightness, table, self.inverse_colors))
    }

    fn min_plane(&self) -> usize {
        BIT_PLANES - usize::from(self.pwm_bits())
    }

    fn plane_bits(color: [u16; 3], plane: usize, designator: &PixelDesignator) -> GpioBits {
        let mask = 1 << plane;
        let mut bits = 0;
        if color[0] & mask != 0 {
            bits |= designator.r_bit;
        }
        if color[1] & mask != 0 {
            bits |= designator.g_bit;
        }
        if color[2] & mask != 0 {
            bits |= designator.b_bit;
        }
        bits
    }

    /// Pixels outside the visible canvas are ignored.
    pub fn set_pixel(&self, x: i32, y: i32, r: u8, g: u8, b: u8) {
        let (Ok(x), Ok(y)) = (usize::try_from(x), usize::try_from(y)) else {
            return;
        };
        let Some(designator) = self.designators.get(x, y) else {
            return;
        };
        let Some(word) = designator.gpio_word else {
            return;
        };
        let color = self.map_rgb(r, g, b);
        for plane in self.min_plane()..BIT_PLANES {
            let cell = &self.bitplanes[word + plane * self.layout.columns];
            let bits = Self::plane_bits(color, plane, designator);
            cell.fetch_and(designator.mask, Ordering::Relaxed);
            cell.fetch_or(bits, Ordering::Relaxed);
        }
    }

    pub fn fill(&self, r: u8, g: u8, b: u8) {
        let color = self.map_rgb(r, g, b);
        let fill_bits = *self.designators.fill_bits();
        let columns = self.layout.columns;
        for plane in self.min_plane()..BIT_PLANES {
            let bits = Self::plane_bits(color, plane, &fill_bits);
            for double_row in 0..self.layout.double_rows() {
                let start = self.layout.word_index(double_row, 0, plane);
                for cell in &self.bitplanes[start..start + columns] {
                    cell.store(bits, Ordering::Relaxed);
                }
            }
        }
    }

    /// All LEDs off.
    pub fn clear(&self) {
        if self.inverse_colors {
            // off is all ones on inverting hardware
            self.fill(0, 0, 0);
        } else {
            for cell in self.bitplanes.iter() {
                cell.store(0, Ordering::Relaxed);
            }
        }
    }

    pub fn word(&self, double_row: usize, column: usize, plane: usize) -> GpioBits {
        self.bitplanes[self.layout.word_index(double_row, column, plane)].load(Ordering::Relaxed)
    }

    /// Intensity of each color channel of a pixel as stored in the bit-planes,
    /// `None` outside the canvas or for unwired pixels.
    pub fn read_pixel_planes(&self, x: usize, y: usize) -> Option<[u16; 3]> {
        let designator = self.designators.get(x, y)?;
        let word = designator.gpio_word?;
        let mut color = [0u16; 3];
        for plane in 0..BIT_PLANES {
            let bits = self.bitplanes[word + plane * self.layout.columns].load(Ordering::Relaxed);
            for (channel, bit) in color
                .iter_mut()
                .zip([designator.r_bit, designator.g_bit, designator.b_bit])
            {
                if bits & bit != 0 {
                    *channel |= 1 << plane;
                }
            }
        }
        Some(color)
    }

    /// Clock one full frame out to the panels.
    ///
    /// Planes below `pwm_low_bit` are skipped on this pass, which is how
    /// dithering trades refresh rate for color depth.
    pub fn dump_to_matrix(&self, driver: &mut PanelDriver, pwm_low_bit: usize) {
        let double_rows = self.layout.double_rows();
        let columns = self.layout.columns;
        let start_plane = pwm_low_bit.max(self.min_plane());
        for step in 0..double_rows {
            let double_row = self.scan_mode.double_row(step, double_rows);
            for plane in start_plane..BIT_PLANES {
                let start = self.layout.word_index(double_row, 0, plane);
                driver.clock_in(&self.bitplanes[start..start + columns]);
                driver.show(double_row, plane);
            }
        }
        driver.finish();
    }

    /// Length in bytes of [`serialize`](Self::serialize) output.
    pub fn serialized_size(&self) -> usize {
        self.bitplanes.len() * 8
    }

    /// Raw buffer content, little endian.
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = vec![0u8; self.serialized_size()];
        for (chunk, cell) in data.chunks_exact_mut(8).zip(self.bitplanes.iter()) {
            LittleEndian::write_u64(chunk, cell.load(Ordering::Relaxed));
        }
        data
    }

    /// Counterpart of [`serialize`](Self::serialize). The data must come from
    /// a framebuffer of the same layout.
    pub fn deserialize(&self, data: &[u8]) -> Result<(), Hub75Error> {
        if data.len() != self.serialized_size() {
            return Err(Hub75Error::GeometryMismatch {
                expected: format!("{} bytes", self.serialized_size()),
                actual: format!("{} bytes", data.len()),
            });
        }
        for (chunk, cell) in data.chunks_exact(8).zip(self.bitplanes.iter()) {
            cell.store(LittleEndian::read_u64(chunk), Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn copy_from(&self, other: &Framebuffer) -> Result<(), Hub75Error> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        if self.layout != other.layout {
            return Err(Hub75Error::GeometryMismatch {
                expected: format!("{:?}", self.layout),
                actual: format!("{:?}", other.layout),
            });
        }
        for (dst, src) in self.bitplanes.iter().zip(other.bitplanes.iter()) {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::LedSequence;
    use crate::hardware_mapping::HardwareMapping;

    fn framebuffer(settings: FrameSettings) -> Framebuffer {
        let layout = PanelLayout {
            rows: 16,
            columns: 32,
            parallel: 1,
        };
        let mapping = HardwareMapping::default();
        let designators = PixelDesignatorMap::for_panels(layout, &mapping, LedSequence::default());
        Framebuffer::new(
            layout,
            ScanMode::Progressive,
            false,
            Arc::new(designators),
            Arc::new(LuminanceTable::cie1931()),
            settings,
        )
    }

    #[test]
    fn word_layout() {
        let layout = PanelLayout {
            rows: 32,
            columns: 64,
            parallel: 2,
        };
        assert_eq!(layout.double_rows(), 16);
        assert_eq!(layout.height(), 64);
        assert_eq!(layout.word_count(), 16 * 64 * BIT_PLANES);
        assert_eq!(layout.word_index(1, 3, 2), 64 * BIT_PLANES + 2 * 64 + 3);
    }

    #[test]
    fn pixel_only_touches_active_planes() {
        let fb = framebuffer(FrameSettings {
            pwm_bits: 4,
            luminance_correct: false,
            ..Default::default()
        });
        fb.set_pixel(1, 1, 255, 0, 0);
        let red = fb.designators().get(1, 1).unwrap().r_bit;
        for plane in 0..BIT_PLANES {
            assert_eq!(fb.word(1, 1, plane) == red, plane >= BIT_PLANES - 4, "plane {plane}");
        }
    }

    #[test]
    fn pixel_keeps_other_half() {
        let fb = framebuffer(FrameSettings {
            luminance_correct: false,
            ..Default::default()
        });
        fb.set_pixel(0, 0, 255, 255, 255);
        fb.set_pixel(0, 8, 255, 0, 0);
        fb.set_pixel(0, 0, 0, 0, 0);
        assert_eq!(fb.read_pixel_planes(0, 0), Some([0, 0, 0]));
        assert_eq!(fb.read_pixel_planes(0, 8), Some([255 << 3, 0, 0]));
    }

    #[test]
    fn invalid_pwm_bits_are_rejected() {
        let fb = framebuffer(FrameSettings::default());
        assert!(fb.set_pwm_bits(0).is_err());
        assert!(fb.set_pwm_bits(12).is_err());
        assert_eq!(fb.pwm_bits(), 11);
        fb.set_pwm_bits(7).unwrap();
        assert_eq!(fb.pwm_bits(), 7);
    }

    #[test]
    fn serialized_size_is_checked() {
        let fb = framebuffer(FrameSettings::default());
        fb.fill(10, 20, 30);
        let data = fb.serialize();
        assert_eq!(data.len(), 8 * 32 * 8 * BIT_PLANES);
        assert_eq!(fb.serialized_size(), data.len());
        let other = framebuffer(FrameSettings::default());
        other.deserialize(&data).unwrap();
        assert_eq!(other.serialize(), data);
        assert!(other.deserialize(&data[1..]).is_err());
    }
}
