// GPIO input using rppal

use parking_lot::Mutex;
use rppal::gpio::{Gpio, InputPin};

use super::{DeviceError, DigitalInput, PinLevel};

/// Highest BCM pin number exposed on the 40-pin header
pub const MAX_BCM_PIN: u8 = 26;

/// A BCM pin configured as a plain digital input (no pull resistor).
///
/// The pin mode is restored when this value is dropped.
pub struct GpioInput {
    pin: u8,
    input: Mutex<InputPin>,
}

impl GpioInput {
    /// Bind `pin` as an input
    pub fn bind(pin: u8) -> Result<Self, DeviceError> {
        let gpio = Gpio::new()?;
        let input = gpio.get(pin)?.into_input();

        log::debug!("Bound GPIO {} as input (currently {})", pin, PinLevel::from(input.read()));

        Ok(Self {
            pin,
            input: Mutex::new(input),
        })
    }
}

impl DigitalInput for GpioInput {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn read_level(&self) -> PinLevel {
        self.input.lock().read().into()
    }
}

impl Drop for GpioInput {
    fn drop(&mut self) {
        log::debug!("Released GPIO {}", self.pin);
    }
}
