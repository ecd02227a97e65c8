//! Panel and process configuration.

use crate::color::LedSequence;
use crate::color::BIT_PLANES;
use crate::color::MAX_BRIGHTNESS;
use crate::error::Hub75Error;
use crate::hardware_mapping::HardwareMapping;
use crate::pixel_mapper::multiplex::MULTIPLEXER_NAMES;
use crate::pixel_mapper::PixelMapperRegistry;

/// Order in which double-rows are refreshed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScanMode {
    #[default]
    Progressive,
    /// Even double-rows first, then the odd ones.
    Interlaced,
}

impl ScanMode {
    /// Double-row shown at position `step` of a pass.
    pub fn double_row(self, step: usize, double_rows: usize) -> usize {
        match self {
            ScanMode::Progressive => step,
            ScanMode::Interlaced => {
                let half = double_rows / 2;
                if step < half {
                    step * 2
                } else {
                    (step - half) * 2 + 1
                }
            }
        }
    }
}

impl TryFrom<u8> for ScanMode {
    type Error = Hub75Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ScanMode::Progressive),
            1 => Ok(ScanMode::Interlaced),
            _ => Err(Hub75Error::InvalidOptions {
                message: format!("invalid scan mode {value} (0 or 1 allowed)"),
            }),
        }
    }
}

/// How the row address reaches the panel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum RowAddressType {
    /// Binary row number on A..E.
    #[default]
    Direct,
    /// A clocks a row shift register, B is its data.
    ShiftRegister,
    /// One address line per row.
    DirectRowSelect,
    /// A clock, B data and C latch of a row shift register.
    AbcShiftRegister,
}

impl TryFrom<u8> for RowAddressType {
    type Error = Hub75Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RowAddressType::Direct),
            1 => Ok(RowAddressType::ShiftRegister),
            2 => Ok(RowAddressType::DirectRowSelect),
            3 => Ok(RowAddressType::AbcShiftRegister),
            _ => Err(Hub75Error::InvalidOptions {
                message: format!(
                    "invalid row address type {value}: 0 (direct), 1 (AB shift register), \
                     2 (direct row select) or 3 (ABC shift register)"
                ),
            }),
        }
    }
}

/// Panel geometry and driving parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MatrixOptions {
    pub hardware_mapping: String,
    /// Rows of one panel.
    pub rows: usize,
    /// Columns of one panel.
    pub cols: usize,
    /// Panels daisy-chained per output.
    pub chain_length: usize,
    /// Chains driven at the same time.
    pub parallel: usize,
    pub pwm_bits: u8,
    /// Duration of the least significant bit-plane pulse.
    pub pwm_lsb_nanoseconds: u32,
    /// Lowest planes that share the base pulse time and are shown on
    /// alternating passes.
    pub pwm_dither_bits: u8,
    pub brightness: u8,
    pub scan_mode: ScanMode,
    pub row_address_type: RowAddressType,
    /// 0 for none, otherwise the 1-based multiplexer index.
    pub multiplexing: usize,
    pub disable_hardware_pulsing: bool,
    pub show_refresh_rate: bool,
    pub inverse_colors: bool,
    pub led_rgb_sequence: String,
    /// `name[:param][;name[:param]...]`
    pub pixel_mapper_config: String,
    pub panel_type: String,
    /// 0 means unlimited.
    pub limit_refresh_rate_hz: u32,
    /// Pad passes with sleeps instead of spinning when limiting the rate.
    pub disable_busy_waiting: bool,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self {
            hardware_mapping: "regular".to_string(),
            rows: 32,
            cols: 32,
            chain_length: 1,
            parallel: 1,
            pwm_bits: BIT_PLANES as u8,
            pwm_lsb_nanoseconds: 130,
            pwm_dither_bits: 0,
            brightness: MAX_BRIGHTNESS,
            scan_mode: ScanMode::Progressive,
            row_address_type: RowAddressType::Direct,
            multiplexing: 0,
            disable_hardware_pulsing: false,
            show_refresh_rate: false,
            inverse_colors: false,
            led_rgb_sequence: "RGB".to_string(),
            pixel_mapper_config: String::new(),
            panel_type: String::new(),
            limit_refresh_rate_hz: 0,
            disable_busy_waiting: false,
        }
    }
}

impl MatrixOptions {
    /// Check every field, using the built-in pixel mappers for
    /// `pixel_mapper_config`.
    pub fn validate(&self) -> Result<(), Hub75Error> {
        self.validate_with(&PixelMapperRegistry::default())
    }

    /// All problems are reported together in one [`Hub75Error::InvalidOptions`].
    pub fn validate_with(&self, mappers: &PixelMapperRegistry) -> Result<(), Hub75Error> {
        let mut problems = Vec::new();

        let mapping = match HardwareMapping::find(&self.hardware_mapping) {
            Ok(mapping) => Some(mapping),
            Err(err) => {
                problems.push(err.to_string());
                None
            }
        };
        if self.rows < 8 || self.rows > 64 || self.rows % 2 != 0 {
            problems.push(format!("invalid number of rows per panel {} (even, 8..64)", self.rows));
        }
        if self.cols < 16 {
            problems.push(format!(
                "invalid number of columns per panel {} (at least 16)",
                self.cols
            ));
        }
        if self.chain_length < 1 {
            problems.push("chain length must be at least 1".to_string());
        }
        if self.parallel < 1 || self.parallel > 3 {
            problems.push(format!("parallel {} outside usable range (1..3)", self.parallel));
        } else if let Some(mapping) = mapping {
            if self.parallel > mapping.max_parallel() {
                problems.push(format!(
                    "hardware mapping {} supports at most {} parallel chains",
                    mapping.name,
                    mapping.max_parallel()
                ));
            }
        }
        if self.brightness < 1 || self.brightness > MAX_BRIGHTNESS {
            problems.push(format!("brightness {} outside usable range (1..100)", self.brightness));
        }
        if self.pwm_bits < 1 || usize::from(self.pwm_bits) > BIT_PLANES {
            problems.push(format!(
                "pwm bits {} outside usable range (1..{BIT_PLANES})",
                self.pwm_bits
            ));
        }
        if !(50..=3000).contains(&self.pwm_lsb_nanoseconds) {
            problems.push(format!(
                "pwm lsb nanoseconds {} outside usable range (50..3000)",
                self.pwm_lsb_nanoseconds
            ));
        }
        if self.pwm_dither_bits > 2 {
            problems.push(format!(
                "pwm dither bits {} outside usable range (0..2)",
                self.pwm_dither_bits
            ));
        }
        if self.multiplexing > MULTIPLEXER_NAMES.len() {
            let choices: Vec<String> = MULTIPLEXER_NAMES
                .iter()
                .enumerate()
                .map(|(i, name)| format!("{}={name}", i + 1))
                .collect();
            problems.push(format!(
                "multiplexing can only be one of 0=normal; {}",
                choices.join("; ")
            ));
        }
        if let Err(err) = LedSequence::parse(&self.led_rgb_sequence) {
            problems.push(err.to_string());
        }
        if !self.panel_type.is_empty() && !self.panel_type.eq_ignore_ascii_case("FM6126A") {
            problems.push(format!("unknown panel type '{}'", self.panel_type));
        }
        let parsed =
            mappers.parse_config(&self.pixel_mapper_config, self.chain_length, self.parallel);
        if let Err(err) = parsed {
            problems.push(err.to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Hub75Error::InvalidOptions {
                message: problems.join("; "),
            })
        }
    }
}

/// Process level settings, only relevant when driving real hardware.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RuntimeOptions {
    /// Extra writes per GPIO access, `-1` for a memory barrier instead.
    pub gpio_slowdown: i32,
    /// `-1` defers starting the refresh thread until
    /// [`RGBMatrix::start_refresh`](crate::RGBMatrix::start_refresh).
    pub daemon: i32,
    /// Switch to `drop_priv_user`/`drop_priv_group` once the hardware is
    /// mapped, when greater than zero.
    pub drop_privileges: i32,
    /// Without GPIO init the matrix only renders into memory.
    pub do_gpio_init: bool,
    pub drop_priv_user: String,
    pub drop_priv_group: String,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            gpio_slowdown: 1,
            daemon: 0,
            drop_privileges: 1,
            do_gpio_init: true,
            drop_priv_user: "daemon".to_string(),
            drop_priv_group: "daemon".to_string(),
        }
    }
}

impl RuntimeOptions {
    pub fn validate(&self) -> Result<(), Hub75Error> {
        if !(-1..=5).contains(&self.gpio_slowdown) {
            return Err(Hub75Error::InvalidOptions {
                message: format!(
                    "gpio slowdown {} outside usable range (-1..5)",
                    self.gpio_slowdown
                ),
            });
        }
        Ok(())
    }
}
