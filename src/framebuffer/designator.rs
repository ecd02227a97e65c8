use log::error;

use crate::color::Channel;
use crate::color::LedSequence;
use crate::error::Hub75Error;
use crate::framebuffer::PanelLayout;
use crate::gpio::GpioBits;
use crate::hardware_mapping::HardwareMapping;
use crate::pixel_mapper::PixelMapper;

/// Where one visible pixel lives in the bit-plane buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelDesignator {
    /// Index of the pixel's word in bit-plane 0, `None` for pixels that are
    /// not wired to anything.
    pub gpio_word: Option<usize>,
    pub r_bit: GpioBits,
    pub g_bit: GpioBits,
    pub b_bit: GpioBits,
    /// Everything except the three color bits.
    pub mask: GpioBits,
}

impl Default for PixelDesignator {
    fn default() -> Self {
        Self {
            gpio_word: None,
            r_bit: 0,
            g_bit: 0,
            b_bit: 0,
            mask: !0,
        }
    }
}

impl PixelDesignator {
    fn wired(
        word: usize,
        red: GpioBits,
        green: GpioBits,
        blue: GpioBits,
        sequence: LedSequence,
    ) -> Self {
        let r_bit = sequence.select(Channel::Red, red, green, blue);
        let g_bit = sequence.select(Channel::Green, red, green, blue);
        let b_bit = sequence.select(Channel::Blue, red, green, blue);
        Self {
            gpio_word: Some(word),
            r_bit,
            g_bit,
            b_bit,
            mask: !(r_bit | g_bit | b_bit),
        }
    }
}

/// Visible coordinate to [`PixelDesignator`] table.
///
/// Pixel mappers never touch the buffer layout; they only produce a new
/// table pointing into the same words.
#[derive(Clone, Debug)]
pub struct PixelDesignatorMap {
    width: usize,
    height: usize,
    designators: Vec<PixelDesignator>,
    fill_bits: PixelDesignator,
}

impl PixelDesignatorMap {
    pub fn new(width: usize, height: usize, fill_bits: PixelDesignator) -> Self {
        Self {
            width,
            height,
            designators: vec![PixelDesignator::default(); width * height],
            fill_bits,
        }
    }

    /// The unmapped table: every pixel of every parallel chain, in wiring
    /// order.
    pub fn for_panels(
        layout: PanelLayout,
        mapping: &HardwareMapping,
        sequence: LedSequence,
    ) -> Self {
        let chains = &mapping.chains[..layout.parallel.min(mapping.chains.len())];

        let mut fill_bits = PixelDesignator::default();
        for chain in chains {
            let upper = PixelDesignator::wired(0, chain.r1, chain.g1, chain.b1, sequence);
            let lower = PixelDesignator::wired(0, chain.r2, chain.g2, chain.b2, sequence);
            fill_bits.r_bit |= upper.r_bit | lower.r_bit;
            fill_bits.g_bit |= upper.g_bit | lower.g_bit;
            fill_bits.b_bit |= upper.b_bit | lower.b_bit;
        }
        fill_bits.mask = !(fill_bits.r_bit | fill_bits.g_bit | fill_bits.b_bit);

        let mut map = Self::new(layout.columns, layout.height(), fill_bits);
        let double_rows = layout.double_rows();
        for y in 0..map.height {
            let Some(chain) = chains.get(y / layout.rows) else {
                continue;
            };
            let upper_half = y % layout.rows < double_rows;
            for x in 0..map.width {
                let word = layout.word_index(y % double_rows, x, 0);
                let designator = if upper_half {
                    PixelDesignator::wired(word, chain.r1, chain.g1, chain.b1, sequence)
                } else {
                    PixelDesignator::wired(word, chain.r2, chain.g2, chain.b2, sequence)
                };
                map.designators[y * map.width + x] = designator;
            }
        }
        map
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> Option<&PixelDesignator> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.designators.get(y * self.width + x)
    }

    pub fn get_mut(&mut self, x: usize, y: usize) -> Option<&mut PixelDesignator> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.designators.get_mut(y * self.width + x)
    }

    /// Bits of every color wire, used for whole-canvas fills.
    pub fn fill_bits(&self) -> &PixelDesignator {
        &self.fill_bits
    }

    /// Table for the visible canvas `mapper` produces from this one.
    ///
    /// Coordinates the mapper sends out of range are logged and left
    /// unwired, just like the ones it declines to map.
    pub fn remapped(&self, mapper: &dyn PixelMapper) -> Result<Self, Hub75Error> {
        let (width, height) = mapper.size_mapping(self.width, self.height)?;
        let mut map = Self::new(width, height, self.fill_bits);
        for y in 0..height {
            for x in 0..width {
                let mapped = mapper.map_visible_to_matrix(self.width, self.height, x, y);
                let Some((matrix_x, matrix_y)) = mapped else {
                    continue;
                };
                let Some(designator) = self.get(matrix_x, matrix_y) else {
                    error!(
                        "pixel mapper {}: ({x}, {y}) -> ({matrix_x}, {matrix_y}) outside {}x{}",
                        mapper.name(),
                        self.width,
                        self.height
                    );
                    continue;
                };
                map.designators[y * width + x] = *designator;
            }
        }
        Ok(map)
    }
}
