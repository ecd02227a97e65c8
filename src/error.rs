use derive_more::Display;
use derive_more::Error;
use derive_more::From;

use crate::gpio::GpioBits;

/// Everything that can go wrong while setting up or feeding a matrix.
///
/// The refresh loop itself never fails; problems surface while mapping
/// registers, validating options, building mappers or reading streams.
#[derive(Debug, Display, Error, From)]
pub enum Hub75Error {
    #[display("invalid matrix options: {message}")]
    #[from(skip)]
    InvalidOptions { message: String },

    #[display("no hardware mapping named '{name}'")]
    #[from(skip)]
    UnknownHardwareMapping { name: String },

    #[display("no pixel mapper named '{name}'")]
    #[from(skip)]
    UnknownPixelMapper { name: String },

    #[display("{mapper}: {message}")]
    #[from(skip)]
    InvalidMapperParameter { mapper: String, message: String },

    #[display("GPIO outputs not available: needed {needed:#x}, granted {granted:#x}")]
    #[from(skip)]
    OutputsUnavailable { needed: GpioBits, granted: GpioBits },

    #[display("insufficient permissions: {message}")]
    #[from(skip)]
    Permission { message: String },

    #[display("hardware: {message}")]
    #[from(skip)]
    Hardware { message: String },

    #[display("content stream: {message}")]
    #[from(skip)]
    Stream { message: String },

    #[display("geometry mismatch: expected {expected}, got {actual}")]
    #[from(skip)]
    GeometryMismatch { expected: String, actual: String },

    #[display("pwm bits must be in 1..={max}, got {value}")]
    #[from(skip)]
    InvalidPwmBits { value: u8, max: usize },

    #[display("I/O error: {source}")]
    Io { source: std::io::Error },
}

impl Hub75Error {
    pub(crate) fn hardware(message: impl Into<String>) -> Self {
        Self::Hardware {
            message: message.into(),
        }
    }

    pub(crate) fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    pub(crate) fn mapper(mapper: &str, message: impl Into<String>) -> Self {
        Self::InvalidMapperParameter {
            mapper: mapper.to_string(),
            message: message.into(),
        }
    }
}
