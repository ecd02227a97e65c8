//! Mapping of 8 bit channel values onto bit-plane intensities.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::OnceLock;

use crate::error::Hub75Error;

/// Number of bit-planes a framebuffer stores. Color values are scaled to
/// this many bits before being split into planes.
pub const BIT_PLANES: usize = 11;

pub const MAX_BRIGHTNESS: u8 = 100;

const OUT_MAX: f32 = ((1 << BIT_PLANES) - 1) as f32;

/// Linear scaling of `value` by `brightness` percent into [`BIT_PLANES`] bits.
pub const fn linear_map(value: u8, brightness: u8) -> u16 {
    ((value as u16 * brightness as u16) / 100) << (BIT_PLANES - 8)
}

/// CIE1931 perceived lightness correction of `value` at `brightness` percent.
pub fn cie1931(value: u8, brightness: u8) -> u16 {
    let v = f32::from(value) * f32::from(brightness) / 255.0;
    let luminance = if v <= 8.0 {
        v / 902.3
    } else {
        ((v + 16.0) / 116.0).powi(3)
    };
    (OUT_MAX * luminance).round() as u16
}

/// Precomputed [`cie1931`] values for every brightness and channel value.
///
/// Built once and shared by all framebuffers of a matrix.
pub struct LuminanceTable {
    table: Vec<[u16; 256]>,
}

impl LuminanceTable {
    pub fn cie1931() -> Self {
        let table = (1..=MAX_BRIGHTNESS)
            .map(|brightness| {
                let mut row = [0u16; 256];
                for (value, out) in row.iter_mut().enumerate() {
                    *out = cie1931(value as u8, brightness);
                }
                row
            })
            .collect();
        Self { table }
    }

    /// Process wide table, computed on first use.
    pub fn shared() -> Arc<Self> {
        static TABLE: OnceLock<Arc<LuminanceTable>> = OnceLock::new();
        TABLE.get_or_init(|| Arc::new(Self::cie1931())).clone()
    }

    /// `brightness` is clamped into 1..=100.
    #[inline]
    pub fn lookup(&self, brightness: u8, value: u8) -> u16 {
        let row = usize::from(brightness.clamp(1, MAX_BRIGHTNESS)) - 1;
        self.table[row][usize::from(value)]
    }
}

impl fmt::Debug for LuminanceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuminanceTable")
            .field("brightness_levels", &self.table.len())
            .finish()
    }
}

/// Map one channel value to its bit-plane intensity.
pub fn map_color(
    value: u8,
    brightness: u8,
    luminance: Option<&LuminanceTable>,
    inverse: bool,
) -> u16 {
    let mapped = match luminance {
        Some(table) => table.lookup(brightness, value),
        None => linear_map(value, brightness),
    };
    if inverse {
        !mapped
    } else {
        mapped
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'R' => Some(Channel::Red),
            'G' => Some(Channel::Green),
            'B' => Some(Channel::Blue),
            _ => None,
        }
    }

    fn as_char(self) -> char {
        match self {
            Channel::Red => 'R',
            Channel::Green => 'G',
            Channel::Blue => 'B',
        }
    }
}

/// Order in which a panel wires its sub-pixels.
///
/// `"RBG"` means the wire the mapping calls "green" drives the blue LED and
/// the "blue" wire drives green.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedSequence([Channel; 3]);

impl LedSequence {
    pub fn parse(sequence: &str) -> Result<Self, Hub75Error> {
        let invalid = || Hub75Error::InvalidOptions {
            message: format!("led sequence '{sequence}' must be a permutation of R, G and B"),
        };
        let mut channels = sequence.chars().map(Channel::from_char);
        let parsed = [
            channels.next().flatten().ok_or_else(invalid)?,
            channels.next().flatten().ok_or_else(invalid)?,
            channels.next().flatten().ok_or_else(invalid)?,
        ];
        if channels.next().is_some()
            || parsed[0] == parsed[1]
            || parsed[1] == parsed[2]
            || parsed[0] == parsed[2]
        {
            return Err(invalid());
        }
        Ok(Self(parsed))
    }

    /// The wire carrying `channel`, picked from the red, green and blue wires
    /// of the mapping in that order.
    pub fn select<T: Copy>(&self, channel: Channel, red: T, green: T, blue: T) -> T {
        let wires = [red, green, blue];
        let position = self
            .0
            .iter()
            .position(|c| *c == channel)
            .unwrap_or(channel as usize);
        wires[position]
    }
}

impl Default for LedSequence {
    fn default() -> Self {
        Self([Channel::Red, Channel::Green, Channel::Blue])
    }
}

impl FromStr for LedSequence {
    type Err = Hub75Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LedSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|c| write!(f, "{}", c.as_char()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_is_lossless_at_full_brightness() {
        assert_eq!(linear_map(255, 100), 255 << 3);
        assert_eq!(linear_map(1, 100), 8);
        assert_eq!(linear_map(200, 50), 100 << 3);
    }

    #[test]
    fn cie_endpoints() {
        assert_eq!(cie1931(0, 100), 0);
        assert_eq!(cie1931(255, 100), 2047);
        // below the linear knee
        assert_eq!(cie1931(20, 100), (2047.0f32 * (20.0 * 100.0 / 255.0) / 902.3).round() as u16);
    }

    #[test]
    fn cie_table_is_monotonic() {
        let table = LuminanceTable::cie1931();
        for brightness in [1, 50, 100] {
            let mut last = 0;
            for value in 0..=255u8 {
                let mapped = table.lookup(brightness, value);
                assert!(mapped >= last);
                last = mapped;
            }
        }
        assert_eq!(table.lookup(0, 255), table.lookup(1, 255));
    }

    #[test]
    fn inverse_flips_bits() {
        assert_eq!(map_color(0, 100, None, true), 0xffff);
        assert_eq!(map_color(255, 100, None, true), !(255u16 << 3));
    }

    #[test]
    fn sequence_parsing() {
        assert_eq!(LedSequence::parse("rgb").unwrap(), LedSequence::default());
        assert_eq!(LedSequence::parse("BGR").unwrap().to_string(), "BGR");
        assert!(LedSequence::parse("RRB").is_err());
        assert!(LedSequence::parse("RG").is_err());
        assert!(LedSequence::parse("RGBA").is_err());
        assert!(LedSequence::parse("RGX").is_err());
    }

    #[test]
    fn sequence_selects_wire_by_position() {
        let rbg = LedSequence::parse("RBG").unwrap();
        assert_eq!(rbg.select(Channel::Red, 'r', 'g', 'b'), 'r');
        assert_eq!(rbg.select(Channel::Blue, 'r', 'g', 'b'), 'g');
        assert_eq!(rbg.select(Channel::Green, 'r', 'g', 'b'), 'b');
    }
}
