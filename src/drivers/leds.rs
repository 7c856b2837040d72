/// Status LED pair: red for disarmed/fault, green for armed.
use embassy_stm32::gpio::{AnyPin, Output};

pub struct StatusLeds {
    red: Output<'static, AnyPin>,
    green: Output<'static, AnyPin>,
}

impl StatusLeds {
    pub fn new(red: Output<'static, AnyPin>, green: Output<'static, AnyPin>) -> Self {
        Self { red, green }
    }

    pub fn set_red(&mut self, on: bool) {
        if on {
            self.red.set_high();
        } else {
            self.red.set_low();
        }
    }

    pub fn set_green(&mut self, on: bool) {
        if on {
            self.green.set_high();
        } else {
            self.green.set_low();
        }
    }

    pub fn toggle_red(&mut self) {
        self.red.toggle();
    }
}
