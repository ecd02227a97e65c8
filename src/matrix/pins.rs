//! Spare GPIO pins claimed through the matrix, as `embedded-hal` pins.
//!
//! Writes go through the same driver the refresh thread uses, so they only
//! touch the claimed pin and never disturb the panel signals.

use core::convert::Infallible;
use std::sync::Arc;
use std::sync::Mutex;

use embedded_hal::digital::ErrorType;
use embedded_hal::digital::InputPin;
use embedded_hal::digital::OutputPin;
use embedded_hal::digital::StatefulOutputPin;

use crate::driver::PanelDriver;
use crate::gpio::GpioBits;
use crate::matrix::refresh::lock_driver;

pub struct UserOutputPin {
    driver: Arc<Mutex<PanelDriver>>,
    bit: GpioBits,
    high: bool,
}

impl UserOutputPin {
    pub(crate) fn new(driver: Arc<Mutex<PanelDriver>>, bit: GpioBits) -> Self {
        Self {
            driver,
            bit,
            high: false,
        }
    }

    fn write(&mut self, high: bool) {
        let value = if high { self.bit } else { 0 };
        lock_driver(&self.driver).write_outputs(value, self.bit);
        self.high = high;
    }
}

impl ErrorType for UserOutputPin {
    type Error = Infallible;
}

impl OutputPin for UserOutputPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true);
        Ok(())
    }
}

impl StatefulOutputPin for UserOutputPin {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.high)
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.high)
    }
}

pub struct UserInputPin {
    driver: Arc<Mutex<PanelDriver>>,
    bit: GpioBits,
}

impl UserInputPin {
    pub(crate) fn new(driver: Arc<Mutex<PanelDriver>>, bit: GpioBits) -> Self {
        Self { driver, bit }
    }
}

impl ErrorType for UserInputPin {
    type Error = Infallible;
}

impl InputPin for UserInputPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(lock_driver(&self.driver).read_inputs() & self.bit != 0)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.is_high()?)
    }
}
