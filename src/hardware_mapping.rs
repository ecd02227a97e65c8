//! Named wiring profiles: which GPIO carries which HUB75 signal.

use std::fmt;
use std::str::FromStr;

use crate::error::Hub75Error;
use crate::gpio::gpio_bit;
use crate::gpio::GpioBits;

/// Color pins of one parallel chain, for the upper (`1`) and lower (`2`)
/// half of the panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainPins {
    pub r1: GpioBits,
    pub g1: GpioBits,
    pub b1: GpioBits,
    pub r2: GpioBits,
    pub g2: GpioBits,
    pub b2: GpioBits,
}

impl ChainPins {
    pub const fn all(&self) -> GpioBits {
        self.r1 | self.g1 | self.b1 | self.r2 | self.g2 | self.b2
    }
}

/// An immutable assignment of panel signals to GPIO pins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardwareMapping {
    pub name: &'static str,
    pub output_enable: GpioBits,
    pub clock: GpioBits,
    pub strobe: GpioBits,
    pub a: GpioBits,
    pub b: GpioBits,
    pub c: GpioBits,
    pub d: GpioBits,
    pub e: GpioBits,
    /// One entry per parallel chain the wiring supports.
    pub chains: &'static [ChainPins],
}

const REGULAR_CHAINS: &[ChainPins] = &[
    ChainPins {
        r1: gpio_bit(11),
        g1: gpio_bit(27),
        b1: gpio_bit(7),
        r2: gpio_bit(8),
        g2: gpio_bit(9),
        b2: gpio_bit(10),
    },
    ChainPins {
        r1: gpio_bit(12),
        g1: gpio_bit(5),
        b1: gpio_bit(6),
        r2: gpio_bit(19),
        g2: gpio_bit(13),
        b2: gpio_bit(20),
    },
    ChainPins {
        r1: gpio_bit(14),
        g1: gpio_bit(2),
        b1: gpio_bit(3),
        r2: gpio_bit(26),
        g2: gpio_bit(16),
        b2: gpio_bit(21),
    },
];

const ADAFRUIT_CHAINS: &[ChainPins] = &[ChainPins {
    r1: gpio_bit(5),
    g1: gpio_bit(13),
    b1: gpio_bit(6),
    r2: gpio_bit(12),
    g2: gpio_bit(16),
    b2: gpio_bit(23),
}];

const REGULAR_PI1_CHAINS: &[ChainPins] = &[ChainPins {
    r1: gpio_bit(11),
    // Rev1 boards have GPIO 21 where later ones have GPIO 27
    g1: gpio_bit(21) | gpio_bit(27),
    b1: gpio_bit(7),
    r2: gpio_bit(8),
    g2: gpio_bit(9),
    b2: gpio_bit(10),
}];

const CLASSIC_CHAINS: &[ChainPins] = &[
    ChainPins {
        r1: gpio_bit(17),
        g1: gpio_bit(18),
        b1: gpio_bit(22),
        r2: gpio_bit(23),
        g2: gpio_bit(24),
        b2: gpio_bit(25),
    },
    ChainPins {
        r1: gpio_bit(12),
        g1: gpio_bit(5),
        b1: gpio_bit(6),
        r2: gpio_bit(19),
        g2: gpio_bit(13),
        b2: gpio_bit(20),
    },
    ChainPins {
        r1: gpio_bit(14),
        g1: gpio_bit(2),
        b1: gpio_bit(3),
        r2: gpio_bit(15),
        g2: gpio_bit(26),
        b2: gpio_bit(21),
    },
];

/// All known wirings. "regular" is the default.
pub const HARDWARE_MAPPINGS: &[HardwareMapping] = &[
    HardwareMapping {
        name: "regular",
        output_enable: gpio_bit(18),
        clock: gpio_bit(17),
        strobe: gpio_bit(4),
        a: gpio_bit(22),
        b: gpio_bit(23),
        c: gpio_bit(24),
        d: gpio_bit(25),
        e: gpio_bit(15),
        chains: REGULAR_CHAINS,
    },
    HardwareMapping {
        name: "adafruit-hat",
        output_enable: gpio_bit(4),
        clock: gpio_bit(17),
        strobe: gpio_bit(21),
        a: gpio_bit(22),
        b: gpio_bit(26),
        c: gpio_bit(27),
        d: gpio_bit(20),
        e: gpio_bit(24),
        chains: ADAFRUIT_CHAINS,
    },
    HardwareMapping {
        name: "adafruit-hat-pwm",
        output_enable: gpio_bit(18),
        clock: gpio_bit(17),
        strobe: gpio_bit(21),
        a: gpio_bit(22),
        b: gpio_bit(26),
        c: gpio_bit(27),
        d: gpio_bit(20),
        e: gpio_bit(24),
        chains: ADAFRUIT_CHAINS,
    },
    HardwareMapping {
        name: "regular-pi1",
        output_enable: gpio_bit(18),
        clock: gpio_bit(17),
        strobe: gpio_bit(4),
        a: gpio_bit(22),
        b: gpio_bit(23),
        c: gpio_bit(24),
        d: gpio_bit(25),
        e: gpio_bit(15),
        chains: REGULAR_PI1_CHAINS,
    },
    HardwareMapping {
        name: "classic",
        output_enable: gpio_bit(27),
        clock: gpio_bit(11),
        strobe: gpio_bit(4),
        a: gpio_bit(7),
        b: gpio_bit(8),
        c: gpio_bit(9),
        d: gpio_bit(10),
        e: 0,
        chains: CLASSIC_CHAINS,
    },
    HardwareMapping {
        name: "classic-pi1",
        // Rev1 and Rev2 boards differ on these header pins, drive both
        output_enable: gpio_bit(0) | gpio_bit(2),
        clock: gpio_bit(1) | gpio_bit(3),
        strobe: gpio_bit(4),
        a: gpio_bit(7),
        b: gpio_bit(8),
        c: gpio_bit(9),
        d: gpio_bit(10),
        e: 0,
        chains: &[ChainPins {
            r1: gpio_bit(17),
            g1: gpio_bit(18),
            b1: gpio_bit(22),
            r2: gpio_bit(23),
            g2: gpio_bit(24),
            b2: gpio_bit(25),
        }],
    },
];

impl HardwareMapping {
    /// Look up a mapping by name, ignoring case.
    pub fn find(name: &str) -> Result<&'static HardwareMapping, Hub75Error> {
        HARDWARE_MAPPINGS
            .iter()
            .find(|mapping| mapping.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Hub75Error::UnknownHardwareMapping {
                name: name.to_string(),
            })
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        HARDWARE_MAPPINGS.iter().map(|mapping| mapping.name)
    }

    pub fn max_parallel(&self) -> usize {
        self.chains.len()
    }

    /// Color pins of the first `parallel` chains.
    pub fn color_bits(&self, parallel: usize) -> GpioBits {
        self.chains
            .iter()
            .take(parallel)
            .fold(0, |bits, chain| bits | chain.all())
    }
}

impl Default for HardwareMapping {
    fn default() -> Self {
        HARDWARE_MAPPINGS[0]
    }
}

impl FromStr for HardwareMapping {
    type Err = Hub75Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::find(s).copied()
    }
}

impl fmt::Display for HardwareMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mapping = HardwareMapping::find("Adafruit-HAT").unwrap();
        assert_eq!(mapping.name, "adafruit-hat");
        assert_eq!(mapping.output_enable, gpio_bit(4));
        assert!(HardwareMapping::find("nope").is_err());
    }

    #[test]
    fn pwm_variant_only_moves_output_enable() {
        let hat = HardwareMapping::find("adafruit-hat").unwrap();
        let pwm: HardwareMapping = "adafruit-hat-pwm".parse().unwrap();
        assert_eq!(pwm.output_enable, gpio_bit(18));
        let moved_back = HardwareMapping {
            name: hat.name,
            output_enable: hat.output_enable,
            ..pwm
        };
        assert_eq!(moved_back, *hat);
    }

    #[test]
    fn parallel_support() {
        assert_eq!(HardwareMapping::default().name, "regular");
        assert_eq!(HardwareMapping::default().max_parallel(), 3);
        assert_eq!(HardwareMapping::find("regular-pi1").unwrap().max_parallel(), 1);
        let regular = HardwareMapping::default();
        assert_eq!(regular.color_bits(1), REGULAR_CHAINS[0].all());
        assert_eq!(regular.color_bits(2), REGULAR_CHAINS[0].all() | REGULAR_CHAINS[1].all());
    }

    #[test]
    fn signals_do_not_overlap_within_a_mapping() {
        for mapping in HARDWARE_MAPPINGS {
            let control = [
                mapping.output_enable,
                mapping.clock,
                mapping.strobe,
                mapping.a,
                mapping.b,
                mapping.c,
                mapping.d,
                mapping.e,
            ];
            let mut seen = 0;
            for bits in control
                .iter()
                .copied()
                .chain(mapping.chains.iter().flat_map(|c| [c.r1, c.g1, c.b1, c.r2, c.g2, c.b2]))
            {
                assert_eq!(seen & bits, 0, "{} reuses a pin", mapping.name);
                seen |= bits;
            }
        }
    }
}
